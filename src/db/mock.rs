//! Mock connection scope for testing.
//!
//! Serves scripted rows keyed by statement text and counts how often a
//! connection was opened and released, so tests can check laziness and cleanup.

use super::{Command, ConnectionScope, RawRow, RowStream, Value};
use crate::error::{Result, ShapeError};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Statement text the mock answers from its procedure catalog.
const PROCEDURE_PROBE_SQL: &str = "mock:procedure_exists";

/// Scripted outcome for one statement.
#[derive(Debug, Clone, Default)]
pub struct MockResponse {
    rows: Vec<RawRow>,
    fail_open: Option<String>,
    fail_after: Option<(usize, String)>,
}

impl MockResponse {
    /// Responds with the given rows.
    pub fn rows(rows: Vec<RawRow>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Fails when the connection is opened.
    pub fn fail_open(message: impl Into<String>) -> Self {
        Self {
            fail_open: Some(message.into()),
            ..Self::default()
        }
    }

    /// Delivers `delivered` rows, then fails the next fetch.
    pub fn fail_after(mut self, delivered: usize, message: impl Into<String>) -> Self {
        self.fail_after = Some((delivered, message.into()));
        self
    }
}

/// Connection counters shared between a `MockScope` and its streams.
#[derive(Debug, Default)]
pub struct MockStats {
    opened: AtomicUsize,
    released: AtomicUsize,
    executed: Mutex<Vec<(String, Vec<Value>)>>,
}

impl MockStats {
    /// Number of connections opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of connections released so far.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Statements executed so far, with their parameters, in order.
    pub fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.executed
            .lock()
            .map(|executed| executed.clone())
            .unwrap_or_default()
    }
}

/// A connection scope that returns predefined results.
#[derive(Debug, Default)]
pub struct MockScope {
    responses: HashMap<String, MockResponse>,
    procedures: Vec<String>,
    fail_catalog: bool,
    stats: Arc<MockStats>,
}

impl MockScope {
    /// Creates a mock scope with no scripted statements.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the rows returned for `statement`.
    pub fn on(mut self, statement: impl Into<String>, response: MockResponse) -> Self {
        self.responses.insert(statement.into(), response);
        self
    }

    /// Adds a procedure to the catalog; adding a name twice simulates overloads.
    pub fn with_procedure(mut self, name: impl Into<String>) -> Self {
        self.procedures.push(name.into());
        self
    }

    /// Makes every catalog probe fail.
    pub fn with_failing_catalog(mut self) -> Self {
        self.fail_catalog = true;
        self
    }

    /// Returns the shared connection counters.
    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }

    fn respond(&self, statement: &str, params: &[Value]) -> MockResponse {
        if statement == PROCEDURE_PROBE_SQL {
            if self.fail_catalog {
                return MockResponse::fail_open("catalog unavailable");
            }
            let rows = self
                .procedures
                .iter()
                .filter(|name| params.first() == Some(&Value::String((*name).clone())))
                .map(|name| RawRow::new().with("name", name.as_str()))
                .collect();
            return MockResponse::rows(rows);
        }

        self.responses.get(statement).cloned().unwrap_or_else(|| {
            MockResponse::fail_open(format!("no scripted result for: {statement}"))
        })
    }
}

/// Marks one open connection; dropping it counts a release.
struct OpenConnection(Arc<MockStats>);

impl Drop for OpenConnection {
    fn drop(&mut self) {
        self.0.released.fetch_add(1, Ordering::SeqCst);
    }
}

enum Cursor {
    Pending {
        stats: Arc<MockStats>,
        statement: String,
        params: Vec<Value>,
        response: MockResponse,
    },
    Open {
        _connection: OpenConnection,
        rows: std::vec::IntoIter<RawRow>,
        delivered: usize,
        fail_after: Option<(usize, String)>,
    },
    Done,
}

impl Cursor {
    async fn step(self) -> Option<(Result<RawRow>, Cursor)> {
        match self {
            Cursor::Pending {
                stats,
                statement,
                params,
                response,
            } => {
                if let Some(message) = response.fail_open {
                    return Some((Err(ShapeError::connection(message)), Cursor::Done));
                }
                stats.opened.fetch_add(1, Ordering::SeqCst);
                if let Ok(mut executed) = stats.executed.lock() {
                    executed.push((statement, params));
                }
                Cursor::Open {
                    _connection: OpenConnection(stats),
                    rows: response.rows.into_iter(),
                    delivered: 0,
                    fail_after: response.fail_after,
                }
                .next_row()
            }
            open @ Cursor::Open { .. } => open.next_row(),
            Cursor::Done => None,
        }
    }

    fn next_row(self) -> Option<(Result<RawRow>, Cursor)> {
        let Cursor::Open {
            _connection,
            mut rows,
            delivered,
            fail_after,
        } = self
        else {
            return None;
        };

        if let Some((limit, message)) = &fail_after {
            if delivered == *limit {
                return Some((Err(ShapeError::query(message.clone())), Cursor::Done));
            }
        }

        let row = rows.next()?;
        Some((
            Ok(row),
            Cursor::Open {
                _connection,
                rows,
                delivered: delivered + 1,
                fail_after,
            },
        ))
    }
}

#[async_trait]
impl ConnectionScope for MockScope {
    fn fetch<'a>(&'a mut self, statement: &'a str, params: &'a [Value]) -> RowStream<'a> {
        let cursor = Cursor::Pending {
            stats: Arc::clone(&self.stats),
            statement: statement.to_string(),
            params: params.to_vec(),
            response: self.respond(statement, params),
        };
        stream::unfold(cursor, Cursor::step).boxed()
    }

    fn procedure_probe(&self, name: &str) -> Command {
        Command::text(PROCEDURE_PROBE_SQL).bind(name)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
