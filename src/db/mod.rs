//! Database abstraction layer for db-shape.
//!
//! Provides a trait-based interface over connection scopes, allowing the query
//! executor to stream rows from different backends interchangeably.

mod command;
mod mock;
mod postgres;
mod sqlite;
mod types;

pub use command::{Command, CommandKind};
pub use mock::{MockResponse, MockScope, MockStats};
pub use postgres::PostgresScope;
pub use sqlite::SqliteScope;
pub use types::{RawRow, Value};

use crate::config::ConnectionConfig;
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// A lazily pulled stream of raw rows.
pub type RowStream<'a> = BoxStream<'a, Result<RawRow>>;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Postgres,
    Sqlite,
}

impl DatabaseBackend {
    /// Returns the backend as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Parses a backend from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Returns the default port for this backend, if it listens on one.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgres => Some(5432),
            Self::Sqlite => None,
        }
    }
}

/// Creates a connection scope for the configured backend.
///
/// The pool is created lazily: no connection is opened until the first row is pulled.
pub fn connect(config: &ConnectionConfig) -> Result<Box<dyn ConnectionScope>> {
    match config.backend {
        DatabaseBackend::Postgres => Ok(Box::new(PostgresScope::connect(config)?)),
        DatabaseBackend::Sqlite => Ok(Box::new(SqliteScope::connect(config)?)),
    }
}

/// A provider of connections, optionally bound to a caller-owned transaction.
///
/// Implementations never begin transactions themselves; when one is attached every
/// statement runs on it.
#[async_trait]
pub trait ConnectionScope: Send {
    /// Renders a command into the statement text this backend executes.
    fn render(&self, command: &Command) -> Result<String> {
        Ok(command.render(|index| format!("${index}")))
    }

    /// Produces the statement to execute for `command`.
    ///
    /// Called on the first pull of a result stream. Backends that must consult the
    /// catalog to pick the invocation syntax override this.
    async fn prepare(&mut self, command: &Command) -> Result<String> {
        self.render(command)
    }

    /// Executes `statement` with `params` bound positionally.
    ///
    /// Nothing happens until the stream is first polled. The stream owns the
    /// connection it acquires and gives it back when dropped.
    fn fetch<'a>(&'a mut self, statement: &'a str, params: &'a [Value]) -> RowStream<'a>;

    /// Builds the catalog query that lists procedures named `name`, one row each.
    fn procedure_probe(&self, name: &str) -> Command;

    /// Closes the underlying pool.
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
impl<S: ConnectionScope + ?Sized> ConnectionScope for Box<S> {
    fn render(&self, command: &Command) -> Result<String> {
        (**self).render(command)
    }

    async fn prepare(&mut self, command: &Command) -> Result<String> {
        (**self).prepare(command).await
    }

    fn fetch<'a>(&'a mut self, statement: &'a str, params: &'a [Value]) -> RowStream<'a> {
        (**self).fetch(statement, params)
    }

    fn procedure_probe(&self, name: &str) -> Command {
        (**self).procedure_probe(name)
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}
