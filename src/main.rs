//! dbshape: run one query and export the result.

mod cli;

use cli::{Action, Cli, OutputFormat};
use db_shape::config::{Config, ConnectionConfig};
use db_shape::db::{self, ConnectionScope};
use db_shape::error::{Result, ShapeError};
use db_shape::export::{to_json_report, write_csv, ExportConfig};
use db_shape::logging;
use db_shape::query::{stored_procedure_exists, ColumnMetadata, ColumnarResult, QueryExecutor};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    match &cli.log_file {
        Some(Some(path)) => logging::init_file_logging(path),
        Some(None) => logging::init_file_logging(&logging::default_log_path()),
        None => logging::init_stderr_logging(),
    }

    if let Err(e) = run(cli).await {
        error!("{}: {}", e.category(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let action = cli.action()?;
    let format = cli.parse_output_format().map_err(ShapeError::config)?;

    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;

    let connection = resolve_connection(&cli, &config)?.ok_or_else(|| {
        ShapeError::config("No database connection configured. Use --help for usage information.")
    })?;
    info!("Connection: {}", connection.display_string());

    let mut scope = db::connect(&connection)?;
    let result = match action {
        Action::CheckProcedure(name) => {
            let exists = stored_procedure_exists(&mut scope, &name).await;
            println!("{exists}");
            Ok(())
        }
        Action::Run(command) => {
            let metadata = match &cli.headers {
                Some(path) => ColumnMetadata::load(path)?,
                None => ColumnMetadata::default(),
            };

            let cancel = CancellationToken::new();
            spawn_interrupt_handler(cancel.clone());

            let columns = QueryExecutor::new(&mut scope, command)
                .with_cancellation(cancel)
                .with_column_metadata(metadata)
                .fetch::<ColumnarResult>()
                .single()
                .await?;

            let export = cli.export_config(&config.export);
            write_output(&cli, format, &columns, &export)
        }
    };

    if let Err(e) = scope.close().await {
        warn!("Failed to close connection pool: {}", e);
    }
    result
}

/// Resolves the final connection configuration from CLI args, config file, and environment.
fn resolve_connection(cli: &Cli, config: &Config) -> Result<Option<ConnectionConfig>> {
    // Start with CLI connection config if provided
    let mut connection = cli.to_connection_config()?;

    // If no CLI connection, try named connection from config
    if connection.is_none() {
        if let Some(name) = cli.connection_name() {
            connection = config.get_connection(Some(name)).cloned();
            if connection.is_none() {
                return Err(ShapeError::config(format!(
                    "Connection '{}' not found in config file",
                    name
                )));
            }
        }
    }

    // If still no connection, try default from config
    if connection.is_none() {
        connection = config.get_connection(None).cloned();
    }

    if let Some(ref mut conn) = connection {
        if let Some(secs) = cli.acquire_timeout {
            conn.acquire_timeout_secs = Some(secs);
        }
        conn.apply_env_defaults();
    }

    Ok(connection)
}

/// Cancels the running query on Ctrl-C.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling query");
            cancel.cancel();
        }
    });
}

fn write_output(
    cli: &Cli,
    format: OutputFormat,
    columns: &ColumnarResult,
    export: &ExportConfig,
) -> Result<()> {
    let mut out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(File::create(path).map_err(|e| {
            ShapeError::export(format!("Failed to create {}: {e}", path.display()))
        })?)),
        None => Box::new(io::stdout().lock()),
    };

    match format {
        OutputFormat::Csv => write_csv(&mut out, columns, export),
        OutputFormat::Json => {
            let records = to_json_report(columns, export.columns.as_deref())?;
            serde_json::to_writer_pretty(&mut out, &records)
                .map_err(|e| ShapeError::export(format!("Failed to write JSON: {e}")))?;
            writeln!(out).map_err(|e| ShapeError::export(format!("Failed to write JSON: {e}")))
        }
    }
}
