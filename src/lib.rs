//! db-shape: run parameterized SQL and shape the rows.
//!
//! Results stream lazily from a [`db::ConnectionScope`] and are projected into
//! scalars, records declared with [`record!`], or a single
//! [`query::ColumnarResult`] ready for CSV or JSON export.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod logging;
pub mod query;
