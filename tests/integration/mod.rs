//! Integration tests for db-shape.

pub mod export_test;
pub mod postgres_test;
pub mod sqlite_test;
