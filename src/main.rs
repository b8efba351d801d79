//! Spark Worker - Backend service for the lead import pipeline
//!
//! This worker connects to NATS and handles messages from the frontend.
//! The same binary imports files from disk and flushes the mailer backlog.

mod cli;
mod config;
mod db;
mod handlers;
mod services;
mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::services::contact_import::{preview, ContactImporter, LogProgressSink};
use crate::services::mailer_sync::{
    create_mailer_sync, sync_pending_contacts_throttled, MailerSync, NoopMailerSync,
};
use crate::services::stores::{
    CompanyStore, ContactStore, InMemoryCompanyStore, InMemoryContactStore, PgCompanyStore,
    PgContactStore,
};
use crate::services::tokenizer::{parse_csv, read_spreadsheet_file, RawGrid};
use crate::types::ImportDefaults;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs directory - use LOGS_DIR env var or default to ../logs
    let logs_dir = std::env::var("LOGS_DIR")
        .unwrap_or_else(|_| "../logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,spark_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())  // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))  // file
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Migrate => {
            let config = Config::from_env()?;
            let pool = db::create_pool(&config.database_url).await?;
            db::run_migrations(&pool).await?;
            info!("Database migrations complete");
            Ok(())
        }
        Command::Import { file, source, event_tag, skip_sync, dry_run } => {
            let defaults = ImportDefaults {
                source,
                event_tag,
                skip_downstream_sync: skip_sync,
            };
            import_file(&file, defaults, dry_run).await
        }
        Command::SyncMailer => {
            let config = Config::from_env()?;
            let pool = db::create_pool(&config.database_url).await?;
            let contacts = PgContactStore::new(pool);
            let mailer = create_mailer_sync(config.mailer_sync_url.as_deref())?;
            if config.mailer_sync_url.is_none() {
                warn!("MAILER_SYNC_URL is not set; contacts will be flagged without being sent");
            }
            let summary = sync_pending_contacts_throttled(&contacts, mailer.as_ref()).await?;
            println!("Synced {} of {} contacts ({} failed)", summary.synced, summary.total, summary.failed);
            Ok(())
        }
    }
}

async fn serve() -> Result<()> {
    info!("Starting Spark Worker...");

    let config = Config::from_env()?;
    info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url).await?;
    info!("Connected to PostgreSQL");

    db::run_migrations(&pool).await?;
    info!("Database migrations complete");

    let nats_client = match config.nats_credentials() {
        Some((user, password)) => {
            async_nats::ConnectOptions::new()
                .user_and_password(user.to_string(), password.to_string())
                .connect(&config.nats_url)
                .await?
        }
        None => async_nats::connect(&config.nats_url).await?,
    };
    info!("Connected to NATS at {}", config.nats_url);

    let handler_result = handlers::start_handlers(nats_client, pool, &config).await;

    if let Err(e) = handler_result {
        error!("Handler error: {}", e);
        return Err(e);
    }

    Ok(())
}

/// Spreadsheets go through calamine, everything else is read as CSV text
fn read_grid(path: &Path) -> Result<RawGrid> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let grid = match extension.as_deref() {
        Some("xlsx" | "xlsm" | "xls" | "ods") => read_spreadsheet_file(path)?,
        _ => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            parse_csv(&String::from_utf8_lossy(&bytes))?
        }
    };
    Ok(grid)
}

async fn import_file(path: &Path, defaults: ImportDefaults, dry_run: bool) -> Result<()> {
    let grid = read_grid(path)?;

    let preview = preview(&grid);
    if preview.column_map.is_empty() {
        warn!("No column of {} was recognized", path.display());
    } else {
        info!(
            "{} data rows, {} of {} columns mapped: {:?}",
            preview.total_rows,
            preview.column_map.len(),
            preview.headers.len(),
            preview.column_map
        );
    }
    for warning in &preview.warnings {
        warn!("{}", warning);
    }

    let (companies, contacts, mailer): (Arc<dyn CompanyStore>, Arc<dyn ContactStore>, Arc<dyn MailerSync>) =
        if dry_run {
            info!("Dry run: importing into memory");
            (
                Arc::new(InMemoryCompanyStore::new()),
                Arc::new(InMemoryContactStore::new()),
                Arc::new(NoopMailerSync),
            )
        } else {
            let config = Config::from_env()?;
            let pool = db::create_pool(&config.database_url).await?;
            (
                Arc::new(PgCompanyStore::new(pool.clone())),
                Arc::new(PgContactStore::new(pool)),
                Arc::from(create_mailer_sync(config.mailer_sync_url.as_deref())?),
            )
        };

    let importer = ContactImporter::new(companies, contacts, mailer);

    // Ctrl-C stops the import between rows
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current row");
            on_signal.cancel();
        }
    });

    let result = importer
        .import_grid(&grid, &defaults, &LogProgressSink, &cancel)
        .await;

    println!("{}", result.summary());
    if result.cancelled {
        println!("Cancelled after {} of {} rows", result.processed_rows, result.total_rows);
    }
    Ok(())
}
