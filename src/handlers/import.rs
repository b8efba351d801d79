//! Lead import handlers
//!
//! `spark.import.preview` answers with the detected mapping and warnings,
//! `spark.import.submit` validates the file, replies with a job id and runs
//! the import in a background task that publishes its status on
//! `spark.job.import.status.<jobId>`, `spark.import.cancel` stops a running
//! job between rows.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::services::cancellation::{CancellationRegistry, JobGuard};
use crate::services::column_mapper::auto_map_columns;
use crate::services::contact_import::{preflight_warnings, preview, ContactImporter, ProgressSink};
use crate::services::tokenizer::{read_import_file, RawGrid};
use crate::types::{
    CancelImportRequest, CancelImportResponse, ErrorResponse, ImportDefaults, ImportJobRequest,
    ImportJobStatus, ImportJobStatusUpdate, ImportJobSubmitResponse, ImportPreviewRequest, Request,
    SuccessResponse,
};

const STATUS_PREFIX: &str = "spark.job.import.status";

/// Publish progress every N rows
const PROGRESS_EVERY: u32 = 10;

fn status_subject(job_id: Uuid) -> String {
    format!("{}.{}", STATUS_PREFIX, job_id)
}

/// Publish an import job status update
async fn publish_status(client: &Client, job_id: Uuid, status: ImportJobStatus) -> Result<()> {
    let update = ImportJobStatusUpdate::new(job_id, status);
    let payload = serde_json::to_vec(&update)?;
    client.publish(status_subject(job_id), payload.into()).await?;
    Ok(())
}

/// Publishes `importing` updates for a job
struct NatsProgressSink {
    client: Client,
    job_id: Uuid,
}

#[async_trait]
impl ProgressSink for NatsProgressSink {
    async fn report(&self, processed: u32, total: u32) {
        if processed % PROGRESS_EVERY != 0 && processed != total {
            return;
        }
        if let Err(e) = publish_status(&self.client, self.job_id, ImportJobStatus::Importing { processed, total }).await {
            warn!("Failed to publish progress for import job {}: {}", self.job_id, e);
        }
    }
}

// =============================================================================
// PREVIEW
// =============================================================================

pub async fn handle_import_preview(client: Client, mut subscriber: Subscriber) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received import.preview message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<ImportPreviewRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse import preview request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match read_import_file(&request.payload.file) {
            Ok(grid) => {
                let success = SuccessResponse::new(request.id, preview(&grid));
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => {
                debug!("Rejected import preview: {}", e);
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

// =============================================================================
// SUBMIT
// =============================================================================

pub async fn handle_import_submit(
    client: Client,
    mut subscriber: Subscriber,
    importer: Arc<ContactImporter>,
    registry: CancellationRegistry,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<ImportJobRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse import submit request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };
        let ImportJobRequest { file, defaults, filename } = request.payload;

        // Pre-flight: unreadable files and files without data rows never become jobs
        let grid = match read_import_file(&file) {
            Ok(grid) => grid,
            Err(e) => {
                info!("Rejected import of {:?}: {}", filename, e);
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let job_id = Uuid::new_v4();
        let total_rows = grid.data_row_count() as u32;
        let warnings = preflight_warnings(&auto_map_columns(grid.header()));
        let guard = registry.register(job_id);

        info!(
            "Import job {} accepted: {} rows from {}",
            job_id,
            total_rows,
            filename.as_deref().unwrap_or("upload")
        );

        let response = ImportJobSubmitResponse {
            job_id,
            total_rows,
            warnings,
            message: "Import job started".to_string(),
        };
        let success = SuccessResponse::new(request.id, response);
        let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;

        tokio::spawn(run_import_job(client.clone(), Arc::clone(&importer), guard, job_id, grid, defaults));
    }

    Ok(())
}

async fn run_import_job(
    client: Client,
    importer: Arc<ContactImporter>,
    guard: JobGuard,
    job_id: Uuid,
    grid: RawGrid,
    defaults: ImportDefaults,
) {
    let start = Instant::now();

    if let Err(e) = publish_status(&client, job_id, ImportJobStatus::Parsing).await {
        warn!("Failed to publish status for import job {}: {}", job_id, e);
    }

    let progress = NatsProgressSink {
        client: client.clone(),
        job_id,
    };
    let token = guard.token().clone();
    let task = tokio::spawn(async move {
        importer.import_grid(&grid, &defaults, &progress, &token).await
    });

    let status = match task.await {
        Ok(result) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            info!("Import job {} finished in {}ms: {}", job_id, duration_ms, result.summary());
            if result.cancelled {
                ImportJobStatus::Cancelled { result }
            } else {
                ImportJobStatus::Completed { result, duration_ms }
            }
        }
        Err(e) => {
            error!("Import job {} aborted: {}", job_id, e);
            ImportJobStatus::Failed { error: e.to_string() }
        }
    };
    drop(guard);

    if let Err(e) = publish_status(&client, job_id, status).await {
        error!("Failed to publish final status for import job {}: {}", job_id, e);
    }
}

// =============================================================================
// CANCEL
// =============================================================================

pub async fn handle_import_cancel(
    client: Client,
    mut subscriber: Subscriber,
    registry: CancellationRegistry,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => continue,
        };

        let request: Request<CancelImportRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse import cancel request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let job_id = request.payload.job_id;
        let cancelled = registry.cancel(&job_id);
        info!("Cancel requested for import job {}: {}", job_id, if cancelled { "cancelling" } else { "not running" });

        let response = CancelImportResponse {
            job_id,
            cancelled,
            message: if cancelled {
                "Import cancellation requested".to_string()
            } else {
                "Import job is not running".to_string()
            },
        };
        let success = SuccessResponse::new(request.id, response);
        let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
    }

    Ok(())
}
