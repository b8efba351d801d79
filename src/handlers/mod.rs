//! NATS message handlers

pub mod contact;
pub mod import;
pub mod ping;

use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use sqlx::PgPool;
use tokio::select;
use tracing::{error, info};

use crate::config::Config;
use crate::services::cancellation::CancellationRegistry;
use crate::services::contact_import::ContactImporter;
use crate::services::mailer_sync::{create_mailer_sync, MailerSync};
use crate::services::stores::{CompanyStore, ContactStore, PgCompanyStore, PgContactStore};

/// Subscribe to all subjects and run the handlers until one of them stops
pub async fn start_handlers(client: Client, pool: PgPool, config: &Config) -> Result<()> {
    info!("Starting message handlers...");

    let companies: Arc<dyn CompanyStore> = Arc::new(PgCompanyStore::new(pool.clone()));
    let contacts: Arc<dyn ContactStore> = Arc::new(PgContactStore::new(pool));

    let mailer: Arc<dyn MailerSync> = Arc::from(create_mailer_sync(config.mailer_sync_url.as_deref())?);
    info!("Mailer sync initialized: {}", mailer.name());

    let importer = Arc::new(ContactImporter::new(
        Arc::clone(&companies),
        Arc::clone(&contacts),
        Arc::clone(&mailer),
    ));
    let registry = CancellationRegistry::new();

    // Subscribe to all subjects
    let ping_sub = client.subscribe("spark.ping").await?;
    let import_preview_sub = client.subscribe("spark.import.preview").await?;
    let import_submit_sub = client.subscribe("spark.import.submit").await?;
    let import_cancel_sub = client.subscribe("spark.import.cancel").await?;
    let event_tags_sub = client.subscribe("spark.contact.event_tags").await?;
    let sync_pending_sub = client.subscribe("spark.contact.sync_pending").await?;

    info!("Subscribed to NATS subjects");

    let client_ping = client.clone();
    let registry_ping = registry.clone();
    let ping_handle = tokio::spawn(async move {
        ping::handle_ping(client_ping, ping_sub, registry_ping).await
    });

    let client_preview = client.clone();
    let import_preview_handle = tokio::spawn(async move {
        import::handle_import_preview(client_preview, import_preview_sub).await
    });

    let client_submit = client.clone();
    let importer_submit = Arc::clone(&importer);
    let registry_submit = registry.clone();
    let import_submit_handle = tokio::spawn(async move {
        import::handle_import_submit(client_submit, import_submit_sub, importer_submit, registry_submit).await
    });

    let client_cancel = client.clone();
    let registry_cancel = registry.clone();
    let import_cancel_handle = tokio::spawn(async move {
        import::handle_import_cancel(client_cancel, import_cancel_sub, registry_cancel).await
    });

    let client_tags = client.clone();
    let contacts_tags = Arc::clone(&contacts);
    let event_tags_handle = tokio::spawn(async move {
        contact::handle_event_tags(client_tags, event_tags_sub, contacts_tags).await
    });

    let client_sync = client.clone();
    let sync_pending_handle = tokio::spawn(async move {
        contact::handle_sync_pending(client_sync, sync_pending_sub, contacts, mailer).await
    });

    info!("All handlers started, waiting for messages...");

    select! {
        result = ping_handle => {
            error!("Ping handler finished: {:?}", result);
        }
        result = import_preview_handle => {
            error!("Import preview handler finished: {:?}", result);
        }
        result = import_submit_handle => {
            error!("Import submit handler finished: {:?}", result);
        }
        result = import_cancel_handle => {
            error!("Import cancel handler finished: {:?}", result);
        }
        result = event_tags_handle => {
            error!("Event tags handler finished: {:?}", result);
        }
        result = sync_pending_handle => {
            error!("Sync pending handler finished: {:?}", result);
        }
    }

    Ok(())
}
