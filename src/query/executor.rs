//! Query execution over a connection scope.
//!
//! The executor binds a command to a scope, resolves the projection for the
//! requested output type, and hands back a lazy [`ShapedRows`] sequence.

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::columnar::{accumulate, ColumnMetadata};
use super::shape::{Projection, ProjectionMode, Shape, ShapeResolver};
use super::terminal::ShapedRows;
use crate::db::{Command, ConnectionScope, RawRow, RowStream, Value};
use crate::error::{Result, ShapeError};

/// Per-execution options.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Renames applied to columnar results.
    pub column_metadata: ColumnMetadata,
    /// Appends one default-constructed element after the last row when the
    /// output type has a default. Off by default.
    pub trailing_template: bool,
}

/// Executes one command against one scope.
///
/// The executor holds the scope mutably, so at most one sequence is active per
/// scope at a time. No timeout is applied; use a cancellation token or the
/// pool's acquire timeout to bound waiting.
pub struct QueryExecutor<'s, S: ConnectionScope + ?Sized> {
    scope: &'s mut S,
    command: Command,
    statement: String,
    cancel: CancellationToken,
    options: QueryOptions,
}

impl<'s, S: ConnectionScope + ?Sized> QueryExecutor<'s, S> {
    /// Creates an executor. Nothing is sent to the database yet.
    pub fn new(scope: &'s mut S, command: Command) -> Self {
        Self {
            scope,
            command,
            statement: String::new(),
            cancel: CancellationToken::new(),
            options: QueryOptions::default(),
        }
    }

    /// Observes `token` before each row fetch.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_column_metadata(mut self, metadata: ColumnMetadata) -> Self {
        self.options.column_metadata = metadata;
        self
    }

    pub fn with_trailing_template(mut self, enabled: bool) -> Self {
        self.options.trailing_template = enabled;
        self
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Streams the unprojected rows.
    ///
    /// The statement is prepared on the first pull; a preparation failure is the
    /// only element of the stream.
    pub fn raw_rows(&mut self) -> RowStream<'_> {
        let scope = &mut *self.scope;
        let command = &self.command;
        let statement = &mut self.statement;

        let rows = stream::once(async move {
            *statement = scope.prepare(command).await?;
            debug!(
                statement = %statement,
                params = command.params.len(),
                "Executing command"
            );
            Ok::<_, ShapeError>(scope.fetch(statement, &command.params))
        })
        .try_flatten()
        .boxed();
        cancellable(rows, self.cancel.clone())
    }

    /// Streams the results projected into `T`.
    pub fn fetch<T: Shape>(&mut self) -> ShapedRows<'_, T> {
        let resolved = ShapeResolver::resolve::<T>();
        let template = match resolved.mode {
            ProjectionMode::Columnar => None,
            _ if self.options.trailing_template => resolved.template,
            _ => None,
        };
        let metadata = self.options.column_metadata.clone();

        let rows = self.raw_rows();
        let projected: BoxStream<'_, Result<T>> = match resolved.projection {
            Projection::Scalar(decode) => rows
                .map(move |row| row.and_then(|row| decode(row.into_first_value())))
                .boxed(),
            Projection::Record(projector) => rows
                .map(move |row| row.and_then(|row| projector.project(row)))
                .boxed(),
            Projection::Columnar(finish) => accumulate(rows, metadata)
                .map(move |result| result.map(finish))
                .boxed(),
        };

        let projected = end_after_error(projected);
        match template {
            Some(template) => ShapedRows::new(with_trailing(projected, template)),
            None => ShapedRows::new(projected),
        }
    }
}

/// Ends the stream with `Cancelled` once `cancel` fires.
///
/// The token is checked before every pull, so a query cancelled before its
/// first pull never opens a connection.
fn cancellable(rows: RowStream<'_>, cancel: CancellationToken) -> RowStream<'_> {
    stream::unfold(Some(rows), move |state| {
        let cancel = cancel.clone();
        async move {
            let mut rows = state?;
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = rows.next() => Some(next),
            };

            match next {
                None => {
                    debug!("Query cancelled at fetch boundary");
                    Some((Err(ShapeError::Cancelled), None))
                }
                Some(Some(Ok(row))) => Some((Ok(row), Some(rows))),
                Some(Some(Err(e))) => Some((Err(e), None)),
                Some(None) => None,
            }
        }
    })
    .boxed()
}

/// Yields the first error and then ends.
fn end_after_error<'a, T: Send + 'a>(items: BoxStream<'a, Result<T>>) -> BoxStream<'a, Result<T>> {
    stream::unfold(Some(items), |state| async move {
        let mut items = state?;
        match items.next().await? {
            Ok(item) => Some((Ok(item), Some(items))),
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}

/// Appends `template` after the last element, unless the stream failed.
fn with_trailing<'a, T: Send + 'a>(
    rows: BoxStream<'a, Result<T>>,
    template: T,
) -> BoxStream<'a, Result<T>> {
    stream::unfold(Some((rows, template)), |state| async move {
        let (mut rows, template) = state?;
        match rows.next().await {
            Some(Ok(item)) => Some((Ok(item), Some((rows, template)))),
            Some(Err(e)) => Some((Err(e), None)),
            None => Some((Ok(template), None)),
        }
    })
    .boxed()
}

/// Returns true if exactly one procedure named `name` exists.
///
/// Zero matches, several matches (overloads), and a failing catalog query all
/// answer false; a failure is logged, never returned.
pub async fn stored_procedure_exists<S: ConnectionScope + ?Sized>(
    scope: &mut S,
    name: &str,
) -> bool {
    let probe = scope.procedure_probe(name);
    let mut executor = QueryExecutor::new(scope, probe);
    match executor.fetch::<Value>().count().await {
        Ok(found) => {
            debug!(procedure = name, found, "Procedure probe finished");
            found == 1
        }
        Err(e) => {
            warn!("Procedure probe for '{}' failed: {}", name, e);
            false
        }
    }
}

/// Collects every raw row of `command`.
pub async fn fetch_raw<S: ConnectionScope + ?Sized>(
    scope: &mut S,
    command: Command,
) -> Result<Vec<RawRow>> {
    let mut executor = QueryExecutor::new(scope, command);
    let mut rows = executor.raw_rows();
    let mut collected = Vec::new();
    while let Some(row) = rows.next().await {
        collected.push(row?);
    }
    Ok(collected)
}
