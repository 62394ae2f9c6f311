//! Delimited-text export.

use std::io::Write;

use super::{CsvQuoting, ExportConfig};
use crate::error::{Result, ShapeError};
use crate::query::ColumnarResult;

/// Renders `result` as CSV lines: one header line, then one line per row index
/// up to the longest column.
///
/// Columns missing from the result, and rows past the end of a short column,
/// render as empty cells.
pub fn to_csv(result: &ColumnarResult, config: &ExportConfig) -> Vec<String> {
    let columns: Vec<&str> = match &config.columns {
        Some(columns) => columns.iter().map(String::as_str).collect(),
        None => result.titles().collect(),
    };
    let separator = config.separator.to_string();
    let cell = |value: &str| quote(value, config.separator, config.quoting);

    let row_count = result.max_rows();
    let mut lines = Vec::with_capacity(row_count + 1);
    let header: Vec<String> = columns.iter().map(|title| cell(title)).collect();
    lines.push(header.join(&separator));

    for row in 0..row_count {
        let line = columns
            .iter()
            .map(|title| {
                let value = result
                    .get(title)
                    .and_then(|values| values.get(row))
                    .map(String::as_str)
                    .unwrap_or("");
                cell(value)
            })
            .collect::<Vec<_>>()
            .join(&separator);
        lines.push(line);
    }

    lines
}

/// Writes the CSV lines of `result` to `writer`, each terminated by `\n`.
pub fn write_csv<W: Write>(
    writer: &mut W,
    result: &ColumnarResult,
    config: &ExportConfig,
) -> Result<()> {
    let write_error = |e: std::io::Error| ShapeError::export(format!("Failed to write CSV: {e}"));
    for line in to_csv(result, config) {
        writeln!(writer, "{line}").map_err(write_error)?;
    }
    writer.flush().map_err(write_error)
}

fn quote(value: &str, separator: char, quoting: CsvQuoting) -> String {
    if !value.contains(separator) && !value.contains('"') {
        return value.to_string();
    }
    let escaped = match quoting {
        CsvQuoting::Legacy => value.replace('"', "\"'"),
        CsvQuoting::Rfc4180 => value.replace('"', "\"\""),
    };
    format!("\"{escaped}\"")
}
