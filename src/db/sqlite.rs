//! SQLite connection scope.
//!
//! Mirrors `PostgresScope` for SQLite files and in-memory databases.

use crate::config::ConnectionConfig;
use crate::db::{Command, CommandKind, ConnectionScope, RawRow, RowStream, Value};
use crate::error::{Result, ShapeError};
use async_trait::async_trait;
use futures::StreamExt;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection, SqlitePool,
    SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column as SqlxColumn, Row as SqlxRow, TypeInfo, ValueRef};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// SQLite has no procedures; the probe always comes back empty.
const PROCEDURE_PROBE_SQL: &str =
    "SELECT name FROM sqlite_master WHERE type = 'procedure' AND name = ?";

/// SQLite connection scope.
#[derive(Debug)]
pub struct SqliteScope<'t> {
    pool: SqlitePool,
    transaction: Option<&'t mut SqliteConnection>,
}

impl SqliteScope<'static> {
    /// Creates a scope with a lazily connecting pool.
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        let conn_str = config.to_connection_string()?;
        let options = SqliteConnectOptions::from_str(&conn_str)
            .map_err(|e| ShapeError::config(format!("Invalid database path: {e}")))?;

        let mut pool_options = SqlitePoolOptions::new().max_connections(config.max_connections);
        if let Some(secs) = config.acquire_timeout_secs {
            pool_options = pool_options.acquire_timeout(Duration::from_secs(secs));
        }

        debug!("Created lazy pool for {}", config.display_string());
        Ok(Self {
            pool: pool_options.connect_lazy_with(options),
            transaction: None,
        })
    }

    /// Creates a scope from an existing connection pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            transaction: None,
        }
    }
}

impl<'t> SqliteScope<'t> {
    /// Returns a scope that runs every statement on `conn`.
    pub fn attach<'c>(&self, conn: &'c mut SqliteConnection) -> SqliteScope<'c> {
        SqliteScope {
            pool: self.pool.clone(),
            transaction: Some(conn),
        }
    }

    /// Returns true if statements run on an attached connection.
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl<'t> ConnectionScope for SqliteScope<'t> {
    fn render(&self, command: &Command) -> Result<String> {
        match command.kind {
            CommandKind::Text => Ok(command.text.clone()),
            CommandKind::StoredProcedure => Err(ShapeError::query(format!(
                "SQLite does not support stored procedures (requested '{}')",
                command.text
            ))),
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

        rows.map(|row| match row {
            Ok(row) => Ok(convert_row(&row)),
            Err(e) => Err(map_fetch_error(e)),
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

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Decimal(d) => query.bind(d.to_string()),
        Value::String(s) => query.bind(s.as_str()),
        Value::Bytes(b) => query.bind(b.as_slice()),
        Value::Uuid(u) => query.bind(u.to_string()),
        Value::Timestamp(ts) => query.bind(*ts),
        Value::Date(d) => query.bind(*d),
    }
}

fn convert_row(row: &SqliteRow) -> RawRow {
    let mut raw = RawRow::with_capacity(row.columns().len());
    for (i, col) in row.columns().iter().enumerate() {
        raw.push(col.name(), convert_value(row, i, col.type_info().name()));
    }
    raw
}

/// Decodes by declared type for booleans, otherwise by the storage class of the value.
fn convert_value(row: &SqliteRow, index: usize, declared: &str) -> Value {
    let storage = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_uppercase(),
        Err(_) => return Value::Null,
    };

    if declared.eq_ignore_ascii_case("BOOLEAN") {
        return row
            .try_get_unchecked::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null);
    }

    match storage.as_str() {
        "INTEGER" => row
            .try_get_unchecked::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "REAL" => row
            .try_get_unchecked::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "BLOB" => row
            .try_get_unchecked::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),

        _ => row
            .try_get_unchecked::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn map_fetch_error(error: sqlx::Error) -> ShapeError {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Configuration(_) => ShapeError::connection(error.to_string()),
        other => match other.as_database_error() {
            Some(db_error) => ShapeError::query(format!("ERROR: {}", db_error.message())),
            None => ShapeError::query(other.to_string()),
        },
    }
}
