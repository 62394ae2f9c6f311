//! PostgreSQL connection scope.
//!
//! Provides the `PostgresScope` struct that implements the `ConnectionScope` trait
//! for PostgreSQL databases using sqlx.

use crate::config::ConnectionConfig;
use crate::db::{Command, CommandKind, ConnectionScope, RawRow, RowStream, Value};
use crate::error::{Result, ShapeError};
use async_trait::async_trait;
use futures::StreamExt;
use sqlx::postgres::{PgArguments, PgConnection, PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::query::Query;
use sqlx::{Column as SqlxColumn, Row as SqlxRow, TypeInfo};
use std::time::Duration;
use tracing::debug;

/// Catalog probe: procedures and functions visible under the given name.
const PROCEDURE_PROBE_SQL: &str = r#"
    SELECT p.proname::text
    FROM pg_catalog.pg_proc p
    WHERE p.proname = $1 AND p.prokind IN ('p', 'f')
"#;

/// True when every routine with the given name is a procedure (invoked with `CALL`).
const PROCEDURE_KIND_SQL: &str = r#"
    SELECT bool_and(p.prokind = 'p')
    FROM pg_catalog.pg_proc p
    WHERE p.proname = $1 AND p.prokind IN ('p', 'f')
"#;

/// PostgreSQL connection scope.
///
/// Statements run on the pool unless a caller-owned connection (typically the
/// inside of a `sqlx::Transaction`) has been attached.
#[derive(Debug)]
pub struct PostgresScope<'t> {
    pool: PgPool,
    transaction: Option<&'t mut PgConnection>,
    endpoint: String,
}

impl PostgresScope<'static> {
    /// Creates a scope with a lazily connecting pool.
    ///
    /// Pool sizing and acquire timeout are passed through from the config unchanged.
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        let conn_str = config.to_connection_string()?;

        let mut options = PgPoolOptions::new().max_connections(config.max_connections);
        if let Some(secs) = config.acquire_timeout_secs {
            options = options.acquire_timeout(Duration::from_secs(secs));
        }

        let pool = options
            .connect_lazy(&conn_str)
            .map_err(|e| ShapeError::config(format!("Invalid connection string: {e}")))?;

        debug!("Created lazy pool for {}", config.display_string());
        Ok(Self {
            pool,
            transaction: None,
            endpoint: config.display_string(),
        })
    }

    /// Creates a scope from an existing connection pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            transaction: None,
            endpoint: "postgres".to_string(),
        }
    }
}

impl<'t> PostgresScope<'t> {
    /// Returns a scope that runs every statement on `conn`.
    ///
    /// Pass `&mut *tx` to run inside a caller-owned transaction; committing or
    /// rolling back stays with the caller.
    pub fn attach<'c>(&self, conn: &'c mut PgConnection) -> PostgresScope<'c> {
        PostgresScope {
            pool: self.pool.clone(),
            transaction: Some(conn),
            endpoint: self.endpoint.clone(),
        }
    }

    /// Returns true if statements run on an attached connection.
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl<'t> ConnectionScope for PostgresScope<'t> {
    /// Procedures are invoked with `CALL`, functions with `SELECT * FROM`.
    async fn prepare(&mut self, command: &Command) -> Result<String> {
        if command.kind != CommandKind::StoredProcedure {
            return self.render(command);
        }

        let lookup =
            sqlx::query_scalar::<_, Option<bool>>(PROCEDURE_KIND_SQL).bind(command.text.as_str());
        let is_procedure = match self.transaction.as_deref_mut() {
            Some(conn) => lookup.fetch_one(conn).await,
            None => lookup.fetch_one(&self.pool).await,
        }
        .map_err(|e| map_fetch_error(e, &self.endpoint))?
        .unwrap_or(false);

        if is_procedure {
            debug!(procedure = %command.text, "Invoking with CALL");
            Ok(command.render_call(|index| format!("${index}")))
        } else {
            self.render(command)
        }
    }

    fn fetch<'a>(&'a mut self, statement: &'a str, params: &'a [Value]) -> RowStream<'a> {
        let query = params
            .iter()
            .fold(sqlx::query(statement), |query, value| bind_value(query, value));

        let rows = match self.transaction.as_deref_mut() {
            Some(conn) => query.fetch(conn),
            None => query.fetch(&self.pool),
        };

        let endpoint = self.endpoint.as_str();
        rows.map(move |row| match row {
            Ok(row) => convert_row(&row),
            Err(e) => Err(map_fetch_error(e, endpoint)),
        })
        .boxed()
    }

    fn procedure_probe(&self, name: &str) -> Command {
        Command::text(PROCEDURE_PROBE_SQL).bind(name)
    }

    async fn close(&mut self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Binds one parameter, picking the wire type from the value variant.
fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Decimal(d) => query.bind(*d),
        Value::String(s) => query.bind(s.as_str()),
        Value::Bytes(b) => query.bind(b.as_slice()),
        Value::Uuid(u) => query.bind(*u),
        Value::Timestamp(ts) => query.bind(*ts),
        Value::Date(d) => query.bind(*d),
    }
}

/// Converts a sqlx PgRow to our RawRow type.
///
/// A column that cannot be decoded fails the whole row.
fn convert_row(row: &PgRow) -> Result<RawRow> {
    let mut raw = RawRow::with_capacity(row.columns().len());
    for (i, col) in row.columns().iter().enumerate() {
        let type_name = col.type_info().name();
        let value = convert_value(row, i, type_name).map_err(|e| {
            ShapeError::query(format!(
                "Cannot decode column '{}' of type {}: {}",
                col.name(),
                type_name,
                e
            ))
        })?;
        raw.push(col.name(), value);
    }
    Ok(raw)
}

fn decode<'r, T>(row: &'r PgRow, index: usize) -> std::result::Result<Option<T>, sqlx::Error>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get::<Option<T>, _>(index)
}

/// Converts a single column value from a PgRow to our Value type.
fn convert_value(
    row: &PgRow,
    index: usize,
    type_name: &str,
) -> std::result::Result<Value, sqlx::Error> {
    let value = match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => decode::<bool>(row, index)?.map(Value::Bool),
        "INT2" | "SMALLINT" => decode::<i16>(row, index)?.map(|v| Value::Int(v.into())),
        "INT4" | "INT" | "INTEGER" => decode::<i32>(row, index)?.map(|v| Value::Int(v.into())),
        "INT8" | "BIGINT" => decode::<i64>(row, index)?.map(Value::Int),
        "FLOAT4" | "REAL" => decode::<f32>(row, index)?.map(|v| Value::Float(v.into())),
        "FLOAT8" | "DOUBLE PRECISION" => decode::<f64>(row, index)?.map(Value::Float),
        "NUMERIC" => decode::<rust_decimal::Decimal>(row, index)?.map(Value::Decimal),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" | "UNKNOWN" | "CITEXT" => {
            decode::<String>(row, index)?.map(Value::String)
        }
        "BYTEA" => decode::<Vec<u8>>(row, index)?.map(Value::Bytes),
        "UUID" => decode::<uuid::Uuid>(row, index)?.map(Value::Uuid),
        "TIMESTAMP" => decode::<chrono::NaiveDateTime>(row, index)?.map(Value::Timestamp),
        "TIMESTAMPTZ" => decode::<chrono::DateTime<chrono::Utc>>(row, index)?
            .map(|v| Value::Timestamp(v.naive_utc())),
        "DATE" => decode::<chrono::NaiveDate>(row, index)?.map(Value::Date),
        "TIME" => decode::<chrono::NaiveTime>(row, index)?.map(|v| Value::String(v.to_string())),
        "JSON" | "JSONB" => {
            decode::<serde_json::Value>(row, index)?.map(|v| Value::String(v.to_string()))
        }
        // a function returning void still yields one column
        "VOID" => None,
        _ => {
            return Err(sqlx::Error::Decode(
                "no mapping for this type; cast the column to text in the query".into(),
            ))
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Maps a failure on the row stream to a connection or query error.
fn map_fetch_error(error: sqlx::Error, endpoint: &str) -> ShapeError {
    match &error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Configuration(_) => map_connection_error(error, endpoint),
        _ => ShapeError::query(format_query_error(error)),
    }
}

/// Maps sqlx connection errors to user-friendly messages.
fn map_connection_error(error: sqlx::Error, endpoint: &str) -> ShapeError {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        ShapeError::connection(format!(
            "Cannot connect to {endpoint}. Check that the server is running."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        ShapeError::connection(format!(
            "Authentication failed for {endpoint}. Check your credentials."
        ))
    } else if error_str.contains("ssl") || error_str.contains("tls") {
        ShapeError::connection(
            "Server requires SSL. Add '?sslmode=require' to connection string.".to_string(),
        )
    } else if matches!(error, sqlx::Error::PoolTimedOut) {
        ShapeError::connection(format!(
            "Timed out waiting for a connection to {endpoint}."
        ))
    } else {
        ShapeError::connection(error.to_string())
    }
}

/// Formats a query error with PostgreSQL detail and hint if available.
fn format_query_error(error: sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = String::from("ERROR: ");
    result.push_str(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }

        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }

        if let Some(table) = pg_error.table() {
            result.push_str("\n  TABLE: ");
            result.push_str(table);
        }

        if let Some(column) = pg_error.column() {
            result.push_str("\n  COLUMN: ");
            result.push_str(column);
        }
    }

    result
}
