//! Per-row JSON records built from a columnar result.

use serde_json::{Map, Value as JsonValue};

use crate::error::{Result, ShapeError};
use crate::query::ColumnarResult;

/// Turns `result` into one JSON object per row.
///
/// The row count is the length of the first column. Each object carries one
/// string field per selected column (`columns`, or every column in first-seen
/// order). A selected column that is missing or shorter than the first column
/// is an error.
pub fn to_json_report(
    result: &ColumnarResult,
    columns: Option<&[String]>,
) -> Result<Vec<Map<String, JsonValue>>> {
    let Some((_, first)) = result.first() else {
        return Ok(Vec::new());
    };
    let row_count = first.len();

    let selected: Vec<(&str, &[String])> = match columns {
        Some(columns) => columns
            .iter()
            .map(|title| {
                result
                    .get(title)
                    .map(|values| (title.as_str(), values))
                    .ok_or_else(|| ShapeError::export(format!("Unknown column '{title}'")))
            })
            .collect::<Result<_>>()?,
        None => result.iter().collect(),
    };

    if let Some((title, values)) = selected.iter().find(|(_, values)| values.len() < row_count) {
        return Err(ShapeError::export(format!(
            "Column '{}' has {} values, expected {}",
            title,
            values.len(),
            row_count
        )));
    }

    Ok((0..row_count)
        .map(|row| {
            selected
                .iter()
                .map(|(title, values)| (title.to_string(), JsonValue::String(values[row].clone())))
                .collect()
        })
        .collect())
}
