//! Outbound mailer sync
//!
//! Imported contacts are pushed to the email-campaign provider through the
//! site's sync endpoint. `HttpMailerSync` talks to that endpoint,
//! `NoopMailerSync` is used when none is configured and `FakeMailerSync`
//! records calls in tests.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::services::stores::ContactStore;
use crate::types::{MailerSyncSummary, PendingSyncContact};

/// Pause between calls when syncing a backlog, to stay under provider rate limits
const BATCH_SYNC_DELAY: Duration = Duration::from_millis(200);

/// Contact as sent to the outbound mailer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailerContact {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub company: String,
    pub source: String,
    pub tag: String,
}

impl MailerContact {
    /// Mailer payload for a stored contact; `None` when it has no email
    pub fn from_pending(contact: &PendingSyncContact) -> Option<Self> {
        let email = contact.email.clone()?;
        Some(Self {
            email,
            first_name: contact.first_name.clone(),
            last_name: contact.last_name.clone(),
            company: contact.company_name.clone().unwrap_or_default(),
            source: contact.source.clone(),
            tag: contact.brevo_tag.clone(),
        })
    }
}

/// Abstraction over the outbound mailer
#[async_trait]
pub trait MailerSync: Send + Sync {
    async fn sync_contact(&self, contact: &MailerContact) -> Result<()>;

    fn name(&self) -> &'static str;
}

// =============================================================================
// HttpMailerSync
// =============================================================================

#[derive(Serialize)]
struct SyncRequest<'a> {
    action: &'static str,
    contact: &'a MailerContact,
}

pub struct HttpMailerSync {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMailerSync {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build mailer HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl MailerSync for HttpMailerSync {
    async fn sync_contact(&self, contact: &MailerContact) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SyncRequest { action: "sync", contact })
            .send()
            .await
            .with_context(|| format!("Mailer sync request failed for {}", contact.email))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Mailer sync for {} returned {}: {}", contact.email, status, body);
        }

        debug!("Contact synced to mailer: {}", contact.email);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

// =============================================================================
// NoopMailerSync
// =============================================================================

/// Accepts every contact without sending anything
pub struct NoopMailerSync;

#[async_trait]
impl MailerSync for NoopMailerSync {
    async fn sync_contact(&self, contact: &MailerContact) -> Result<()> {
        debug!(email = %contact.email, tag = %contact.tag, "[NoopMailerSync] Would sync contact");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Build the mailer from configuration
pub fn create_mailer_sync(endpoint: Option<&str>) -> Result<Box<dyn MailerSync>> {
    match endpoint {
        Some(url) if !url.trim().is_empty() => Ok(Box::new(HttpMailerSync::new(url.trim())?)),
        _ => Ok(Box::new(NoopMailerSync)),
    }
}

/// Push every not-yet-synced contact that has an email to the mailer
pub async fn sync_pending_contacts(
    contacts: &dyn ContactStore,
    mailer: &dyn MailerSync,
    delay: Duration,
) -> Result<MailerSyncSummary> {
    let pending = contacts.list_unsynced().await?;
    let mut summary = MailerSyncSummary::default();

    for contact in &pending {
        let Some(payload) = MailerContact::from_pending(contact) else {
            continue;
        };
        summary.total += 1;

        match mailer.sync_contact(&payload).await {
            Ok(()) => match contacts.mark_synced(contact.id).await {
                Ok(()) => summary.synced += 1,
                Err(e) => {
                    warn!("Synced {} but failed to flag it: {}", payload.email, e);
                    summary.failed += 1;
                }
            },
            Err(e) => {
                warn!("Mailer sync failed for {}: {:#}", payload.email, e);
                summary.failed += 1;
            }
        }

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    info!(
        "Mailer backlog sync: {} synced, {} failed of {}",
        summary.synced, summary.failed, summary.total
    );
    Ok(summary)
}

/// `sync_pending_contacts` with the provider-friendly default delay
pub async fn sync_pending_contacts_throttled(
    contacts: &dyn ContactStore,
    mailer: &dyn MailerSync,
) -> Result<MailerSyncSummary> {
    sync_pending_contacts(contacts, mailer, BATCH_SYNC_DELAY).await
}

// =============================================================================
// FakeMailerSync
// =============================================================================

/// Records synced contacts; fails for emails listed in `failing`.
#[cfg(test)]
#[derive(Default)]
pub struct FakeMailerSync {
    pub synced: parking_lot::Mutex<Vec<MailerContact>>,
    pub failing: Vec<String>,
}

#[cfg(test)]
#[async_trait]
impl MailerSync for FakeMailerSync {
    async fn sync_contact(&self, contact: &MailerContact) -> Result<()> {
        if self.failing.contains(&contact.email) {
            anyhow::bail!("provider rejected {}", contact.email);
        }
        self.synced.lock().push(contact.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}
