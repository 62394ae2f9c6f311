//! Output shapes and projection-mode resolution.
//!
//! Every type a query can be projected into implements [`Shape`] and states its
//! projection through the closed [`Projection`] enum. Scalars decode the first
//! column of each row, records bind columns to fields through a static table,
//! and [`ColumnarResult`] accumulates the whole result set.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use super::columnar::ColumnarResult;
use crate::db::{RawRow, Value};
use crate::error::{Result, ShapeError};

/// The output category of a query, fixed for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionMode {
    /// One value per row, taken from the first column.
    Scalar,
    /// One structured record per row.
    Record,
    /// One column-oriented result for the whole execution.
    Columnar,
}

/// How rows turn into instances of `T`.
pub enum Projection<T> {
    Scalar(fn(Value) -> Result<T>),
    Record(RecordProjector<T>),
    Columnar(fn(ColumnarResult) -> T),
}

impl<T> Projection<T> {
    pub fn mode(&self) -> ProjectionMode {
        match self {
            Self::Scalar(_) => ProjectionMode::Scalar,
            Self::Record(_) => ProjectionMode::Record,
            Self::Columnar(_) => ProjectionMode::Columnar,
        }
    }
}

impl<T: Record> Projection<T> {
    /// Record projection over `T`'s binding table.
    pub fn record() -> Self {
        Self::Record(RecordProjector::new())
    }
}

/// A type that query results can be projected into.
pub trait Shape: Sized + Send + 'static {
    /// Selects the projection used for this type.
    fn projection() -> Projection<Self>;

    /// Builds the default instance of this type, if it has one.
    fn template() -> Option<Self> {
        None
    }
}

/// Declares how a column maps onto a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldBinding {
    pub field: &'static str,
    pub column: Option<&'static str>,
}

impl FieldBinding {
    pub const fn new(field: &'static str, column: Option<&'static str>) -> Self {
        Self { field, column }
    }

    /// The column name this field binds to: the override if declared, else the field name.
    pub fn column_name(&self) -> &'static str {
        match self.column {
            Some(column) => column,
            None => self.field,
        }
    }
}

/// A structured record with a statically declared binding table.
///
/// Usually implemented through the [`record!`](crate::record) macro.
pub trait Record: Default + Send + 'static {
    fn bindings() -> &'static [FieldBinding];

    /// Stores `value` into the field named `field`.
    fn assign(&mut self, field: &str, value: Value) -> Result<()>;
}

/// Projects rows into records by case-insensitive column name.
pub struct RecordProjector<T> {
    lookup: HashMap<String, &'static str>,
    make: fn() -> T,
    assign: fn(&mut T, &str, Value) -> Result<()>,
}

impl<T: Record> RecordProjector<T> {
    /// Resolves `T`'s binding table into a column lookup.
    pub fn new() -> Self {
        let mut lookup = HashMap::new();
        for binding in T::bindings() {
            lookup
                .entry(binding.column_name().to_lowercase())
                .or_insert(binding.field);
        }

        Self {
            lookup,
            make: T::default,
            assign: T::assign,
        }
    }
}

impl<T: Record> Default for RecordProjector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RecordProjector<T> {
    /// Builds one record from one row. Unmatched columns are ignored and
    /// unmatched fields keep their default.
    pub fn project(&self, row: RawRow) -> Result<T> {
        let mut record = (self.make)();
        for (column, value) in row {
            if let Some(field) = self.lookup.get(&column.to_lowercase()) {
                (self.assign)(&mut record, field, value)?;
            }
        }
        Ok(record)
    }

    /// Returns the field bound to `column`, if any.
    pub fn field_for(&self, column: &str) -> Option<&'static str> {
        self.lookup.get(&column.to_lowercase()).copied()
    }
}

/// The projection chosen for one execution, plus the optional template instance.
pub struct ResolvedShape<T> {
    pub mode: ProjectionMode,
    pub projection: Projection<T>,
    pub template: Option<T>,
}

/// Picks the projection for a requested output type.
pub struct ShapeResolver;

impl ShapeResolver {
    /// Resolves the projection for `T` before any row is pulled.
    ///
    /// A type without a template is not an error; the mode is unaffected.
    pub fn resolve<T: Shape>() -> ResolvedShape<T> {
        let projection = T::projection();
        let mode = projection.mode();
        let template = T::template();
        debug!(
            ?mode,
            has_template = template.is_some(),
            target = std::any::type_name::<T>(),
            "Resolved projection"
        );
        ResolvedShape {
            mode,
            projection,
            template,
        }
    }
}

/// Coercion from a database value into a Rust type.
///
/// NULL converts to the zero value of the type; `Option<T>` converts it to `None`.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch(value: &Value, target: &str) -> ShapeError {
    ShapeError::projection(format!(
        "cannot convert {} value '{}' to {}",
        value.kind(),
        value,
        target
    ))
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(0),
            Value::Int(i) => Ok(i),
            Value::Bool(b) => Ok(b as i64),
            Value::String(ref s) => s.trim().parse().map_err(|_| mismatch(&value, "i64")),
            other => Err(mismatch(&other, "i64")),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide)
            .map_err(|_| ShapeError::projection(format!("{wide} is out of range for i32")))
    }
}

impl FromValue for i16 {
    fn from_value(value: Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        i16::try_from(wide)
            .map_err(|_| ShapeError::projection(format!("{wide} is out of range for i16")))
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(0.0),
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            Value::Decimal(d) => d.to_f64().ok_or_else(|| mismatch(&value, "f64")),
            Value::String(ref s) => s.trim().parse().map_err(|_| mismatch(&value, "f64")),
            other => Err(mismatch(&other, "f64")),
        }
    }
}

impl FromValue for Decimal {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Decimal::ZERO),
            Value::Decimal(d) => Ok(d),
            Value::Int(i) => Ok(Decimal::from(i)),
            Value::Float(f) => Decimal::from_f64(f).ok_or_else(|| mismatch(&value, "decimal")),
            Value::String(ref s) => s.trim().parse().map_err(|_| mismatch(&value, "decimal")),
            other => Err(mismatch(&other, "decimal")),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(false),
            Value::Bool(b) => Ok(b),
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            Value::String(ref s) => match s.trim().to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(mismatch(&value, "bool")),
            },
            other => Err(mismatch(&other, "bool")),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(String::new()),
            Value::String(s) => Ok(s),
            other => Ok(other.to_display_string()),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Bytes(b) => Ok(b),
            Value::String(s) => Ok(s.into_bytes()),
            other => Err(mismatch(&other, "bytes")),
        }
    }
}

impl FromValue for Uuid {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Uuid::nil()),
            Value::Uuid(u) => Ok(u),
            Value::String(ref s) => Uuid::parse_str(s.trim()).map_err(|_| mismatch(&value, "uuid")),
            other => Err(mismatch(&other, "uuid")),
        }
    }
}

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

impl FromValue for NaiveDateTime {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(NaiveDateTime::default()),
            Value::Timestamp(ts) => Ok(ts),
            Value::Date(d) => Ok(d.and_time(chrono::NaiveTime::MIN)),
            Value::String(ref s) => TIMESTAMP_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(s.trim(), format).ok())
                .ok_or_else(|| mismatch(&value, "timestamp")),
            other => Err(mismatch(&other, "timestamp")),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(NaiveDate::default()),
            Value::Date(d) => Ok(d),
            Value::Timestamp(ts) => Ok(ts.date()),
            Value::String(ref s) => {
                NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| mismatch(&value, "date"))
            }
            other => Err(mismatch(&other, "date")),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

macro_rules! scalar_shape {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Shape for $ty {
                fn projection() -> Projection<Self> {
                    Projection::Scalar(<$ty as FromValue>::from_value)
                }

                fn template() -> Option<Self> {
                    <$ty as FromValue>::from_value(Value::Null).ok()
                }
            }
        )*
    };
}

scalar_shape!(
    Value,
    i64,
    i32,
    i16,
    f64,
    f32,
    Decimal,
    bool,
    String,
    Vec<u8>,
    Uuid,
    NaiveDateTime,
    NaiveDate,
);

impl<T: FromValue + Send + 'static> Shape for Option<T> {
    fn projection() -> Projection<Self> {
        Projection::Scalar(<Option<T> as FromValue>::from_value)
    }

    fn template() -> Option<Self> {
        Some(None)
    }
}

impl Shape for ColumnarResult {
    fn projection() -> Projection<Self> {
        Projection::Columnar(std::convert::identity)
    }

    fn template() -> Option<Self> {
        Some(ColumnarResult::new())
    }
}

/// Declares a [`Record`] and [`Shape`] implementation for a struct.
///
/// Each listed field binds to the column of the same name, or to the column
/// given after `=>`. Matching is case-insensitive.
///
/// ```
/// #[derive(Debug, Default)]
/// struct Customer {
///     id: i64,
///     name: Option<String>,
/// }
///
/// db_shape::record!(Customer { id => "customer_id", name });
/// ```
#[macro_export]
macro_rules! record {
    (@column) => {
        None
    };
    (@column $column:literal) => {
        Some($column)
    };
    ($ty:ty { $($field:ident $(=> $column:literal)?),* $(,)? }) => {
        impl $crate::query::Record for $ty {
            fn bindings() -> &'static [$crate::query::FieldBinding] {
                const BINDINGS: &[$crate::query::FieldBinding] = &[
                    $(
                        $crate::query::FieldBinding::new(
                            stringify!($field),
                            $crate::record!(@column $($column)?),
                        ),
                    )*
                ];
                BINDINGS
            }

            fn assign(
                &mut self,
                field: &str,
                value: $crate::db::Value,
            ) -> $crate::error::Result<()> {
                match field {
                    $(stringify!($field) => self.$field = value.decode()?,)*
                    _ => {}
                }
                Ok(())
            }
        }

        impl $crate::query::Shape for $ty {
            fn projection() -> $crate::query::Projection<Self> {
                $crate::query::Projection::record()
            }

            fn template() -> Option<Self> {
                Some(<$ty as Default>::default())
            }
        }
    };
}
