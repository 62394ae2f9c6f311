//! Column-oriented accumulation of a whole result set.

use futures::stream::{self, BoxStream, StreamExt};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::path::Path;

use crate::db::{RawRow, RowStream};
use crate::error::{Result, ShapeError};

/// Display titles for raw column names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnTitle {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

impl ColumnTitle {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: Some(title.into()),
        }
    }
}

/// An ordered list of `{id, title}` entries used to rename columns.
///
/// Serialized as a JSON array, e.g. `[{"id": "cust_name", "title": "Customer"}]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMetadata(Vec<ColumnTitle>);

impl ColumnMetadata {
    pub fn new(entries: Vec<ColumnTitle>) -> Self {
        Self(entries)
    }

    /// Parses metadata from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ShapeError::config(format!("Invalid column metadata: {e}")))
    }

    /// Loads metadata from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            ShapeError::config(format!(
                "Failed to read column metadata {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&json)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the title for `column`: the first entry whose id matches exactly,
    /// falling back to the raw name when there is none or it has no title.
    pub fn title_for<'a>(&'a self, column: &'a str) -> &'a str {
        self.0
            .iter()
            .find(|entry| entry.id == column)
            .and_then(|entry| entry.title.as_deref())
            .unwrap_or(column)
    }
}

/// Ordered map from column title to the display strings of that column.
///
/// Titles keep the order in which they were first seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnarResult {
    titles: Vec<String>,
    values: Vec<Vec<String>>,
    index: HashMap<String, usize>,
}

impl ColumnarResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a result from complete columns, in order.
    pub fn from_columns<I, K, V>(columns: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut result = Self::new();
        for (title, values) in columns {
            let slot = result.slot(title.into());
            result.values[slot].extend(values.into_iter().map(Into::into));
        }
        result
    }

    /// Appends one value to the column titled `title`, creating it if needed.
    pub fn push(&mut self, title: impl Into<String>, value: impl Into<String>) {
        let slot = self.slot(title.into());
        self.values[slot].push(value.into());
    }

    fn slot(&mut self, title: String) -> usize {
        if let Some(&slot) = self.index.get(&title) {
            return slot;
        }
        let slot = self.titles.len();
        self.index.insert(title.clone(), slot);
        self.titles.push(title);
        self.values.push(Vec::new());
        slot
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    pub fn get(&self, title: &str) -> Option<&[String]> {
        self.index.get(title).map(|&slot| self.values[slot].as_slice())
    }

    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.titles.iter().map(String::as_str)
    }

    /// Iterates columns in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.titles
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(Vec::as_slice))
    }

    /// The first column, if any.
    pub fn first(&self) -> Option<(&str, &[String])> {
        self.iter().next()
    }

    /// Length of the longest column.
    pub fn max_rows(&self) -> usize {
        self.values.iter().map(Vec::len).max().unwrap_or(0)
    }
}

impl Serialize for ColumnarResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (title, values) in self.iter() {
            map.serialize_entry(title, values)?;
        }
        map.end()
    }
}

/// Folds raw rows into a [`ColumnarResult`].
#[derive(Debug, Default)]
pub struct ColumnAccumulator {
    metadata: ColumnMetadata,
    result: ColumnarResult,
    rows: usize,
}

impl ColumnAccumulator {
    pub fn new(metadata: ColumnMetadata) -> Self {
        Self {
            metadata,
            result: ColumnarResult::new(),
            rows: 0,
        }
    }

    /// Appends every column of `row` under its (possibly renamed) title.
    /// NULL becomes the empty string.
    pub fn push_row(&mut self, row: RawRow) {
        for (column, value) in row {
            let display = if value.is_null() {
                String::new()
            } else {
                value.to_display_string()
            };
            let title = self.metadata.title_for(&column).to_string();
            self.result.push(title, display);
        }
        self.rows += 1;
    }

    /// Rows folded so far.
    pub fn rows_seen(&self) -> usize {
        self.rows
    }

    pub fn finish(self) -> ColumnarResult {
        self.result
    }
}

/// Drains `rows` into a single columnar result when first polled.
///
/// A failing row ends the stream with that error and no result.
pub(crate) fn accumulate<'a>(
    rows: RowStream<'a>,
    metadata: ColumnMetadata,
) -> BoxStream<'a, Result<ColumnarResult>> {
    stream::once(async move {
        let mut rows = rows;
        let mut accumulator = ColumnAccumulator::new(metadata);
        while let Some(row) = rows.next().await {
            accumulator.push_row(row?);
        }
        tracing::debug!(rows = accumulator.rows_seen(), "Accumulated columnar result");
        Ok(accumulator.finish())
    })
    .boxed()
}
