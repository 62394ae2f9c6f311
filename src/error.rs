//! Error types for db-shape.
//!
//! Defines the error enum shared by the executor, the projections and the exporter.

use thiserror::Error;

/// Main error type for db-shape operations.
#[derive(Error, Debug)]
pub enum ShapeError {
    /// Opening a connection or executing a command failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The driver rejected the statement or a row fetch failed.
    #[error("Query error: {0}")]
    Query(String),

    /// A cancellation signal was observed at a row-fetch boundary.
    #[error("Query cancelled")]
    Cancelled,

    /// A row value could not be coerced into the requested shape.
    #[error("Projection error: {0}")]
    Projection(String),

    /// A single-element reducer found no elements.
    #[error("Sequence contains no elements")]
    EmptyResult,

    /// A single-element reducer found more than one element.
    #[error("Sequence contains more than one element")]
    MultipleResults,

    /// A columnar result could not be rendered.
    #[error("Export error: {0}")]
    Export(String),

    /// Configuration errors (invalid config file, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal errors (unexpected states, runtime setup, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ShapeError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates a projection error with the given message.
    pub fn projection(msg: impl Into<String>) -> Self {
        Self::Projection(msg.into())
    }

    /// Creates an export error with the given message.
    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Cancelled => "Cancelled",
            Self::Projection(_) => "Projection Error",
            Self::EmptyResult | Self::MultipleResults => "Result Error",
            Self::Export(_) => "Export Error",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
        }
    }
}

/// Result type alias using ShapeError.
pub type Result<T> = std::result::Result<T, ShapeError>;
