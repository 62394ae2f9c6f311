//! Rendering of columnar results as delimited text and JSON report records.

mod csv;
mod report;

pub use csv::{to_csv, write_csv};
pub use report::to_json_report;

use serde::{Deserialize, Serialize};

/// How CSV cells that need quoting are escaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CsvQuoting {
    /// Embedded `"` becomes `"'`. Matches files produced by existing consumers.
    #[default]
    Legacy,
    /// Embedded `"` is doubled.
    Rfc4180,
}

/// Options for CSV export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub separator: char,
    /// Explicit subset and order of column titles. All columns when unset.
    pub columns: Option<Vec<String>>,
    pub quoting: CsvQuoting,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            separator: ',',
            columns: None,
            quoting: CsvQuoting::Legacy,
        }
    }
}

impl ExportConfig {
    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn with_quoting(mut self, quoting: CsvQuoting) -> Self {
        self.quoting = quoting;
        self
    }
}
