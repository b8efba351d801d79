//! Contact handlers used around imports

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::services::mailer_sync::{sync_pending_contacts_throttled, MailerSync};
use crate::services::stores::ContactStore;
use crate::types::{EmptyPayload, ErrorResponse, EventTagsResponse, Request, SuccessResponse};

/// Handle spark.contact.event_tags: distinct event tags for the import form
pub async fn handle_event_tags(
    client: Client,
    mut subscriber: Subscriber,
    contacts: Arc<dyn ContactStore>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received contact.event_tags message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<EmptyPayload> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match contacts.list_event_tags().await {
            Ok(tags) => {
                let success = SuccessResponse::new(request.id, EventTagsResponse { tags });
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => {
                error!("Failed to list event tags: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle spark.contact.sync_pending: push every unsynced contact to the mailer
pub async fn handle_sync_pending(
    client: Client,
    mut subscriber: Subscriber,
    contacts: Arc<dyn ContactStore>,
    mailer: Arc<dyn MailerSync>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => continue,
        };

        let request: Request<EmptyPayload> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match sync_pending_contacts_throttled(contacts.as_ref(), mailer.as_ref()).await {
            Ok(summary) => {
                let success = SuccessResponse::new(request.id, summary);
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => {
                error!("Mailer backlog sync failed: {:#}", e);
                let error = ErrorResponse::new(request.id, "SYNC_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}
