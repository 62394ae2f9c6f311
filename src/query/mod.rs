//! Query execution and result shaping.
//!
//! Runs commands through a connection scope and projects the rows into scalars,
//! records, or a single column-oriented result.

mod columnar;
mod executor;
mod shape;
mod terminal;

pub use columnar::{ColumnAccumulator, ColumnMetadata, ColumnTitle, ColumnarResult};
pub use executor::{fetch_raw, stored_procedure_exists, QueryExecutor, QueryOptions};
pub use shape::{
    FieldBinding, FromValue, Projection, ProjectionMode, Record, RecordProjector, ResolvedShape,
    Shape, ShapeResolver,
};
pub use terminal::{Page, ShapedRows};
