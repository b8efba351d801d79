//! Contact and company types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Source label used by the CRM for contacts that arrive through a Clay export.
pub const CLAY_IMPORT_SOURCE: &str = "Clay Import";

/// Outbound-mailer tag for sources without a dedicated tag.
pub const DEFAULT_MAILER_TAG: &str = "other-lead";

/// Known source labels and the outbound-mailer tag each one maps to.
const MAILER_TAGS: &[(&str, &str)] = &[
    ("Website (Spark)", "spark-lead"),
    ("Met In Person", "met-lead"),
    (CLAY_IMPORT_SOURCE, "clay-lead"),
    ("Direct Call", "direct-lead"),
    ("Referral", "referral-lead"),
    ("LinkedIn", "linkedin-lead"),
    ("Event", "event-lead"),
    ("Other", DEFAULT_MAILER_TAG),
];

/// Map a free-text source label to its outbound-mailer tag
pub fn mailer_tag_for_source(source: &str) -> &'static str {
    MAILER_TAGS
        .iter()
        .find(|(label, _)| *label == source)
        .map(|(_, tag)| *tag)
        .unwrap_or(DEFAULT_MAILER_TAG)
}

/// Date of the first follow-up for a freshly imported contact.
///
/// Clay exports are bulk prospect lists, so they get a longer runway.
pub fn follow_up_date(source: &str, today: NaiveDate) -> NaiveDate {
    let days = if source == CLAY_IMPORT_SOURCE { 5 } else { 1 };
    today + chrono::Duration::days(days)
}

/// Lifecycle status of a freshly imported contact
pub const NEW_CONTACT_STATUS: &str = "New";

/// First planned touchpoint for a freshly imported contact
pub const FIRST_NEXT_ACTION: &str = "Call";

/// Company entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Contact entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub job_title: Option<String>,
    pub linkedin_url: Option<String>,
    pub intent_reason: Option<String>,
    pub source_links: Vec<String>,
    pub location: Option<String>,
    pub source: String,
    pub event_tag: Option<String>,
    pub status: String,
    pub next_action: String,
    pub next_action_date: Option<NaiveDate>,
    pub brevo_tag: String,
    pub brevo_synced: bool,
    pub company_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Contact joined with its company name, as needed by the outbound mailer
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PendingSyncContact {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub source: String,
    pub brevo_tag: String,
    pub company_name: Option<String>,
}

/// Request to create a contact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContactRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub job_title: Option<String>,
    pub linkedin_url: Option<String>,
    pub intent_reason: Option<String>,
    #[serde(default)]
    pub source_links: Vec<String>,
    pub location: Option<String>,
    pub source: String,
    pub event_tag: Option<String>,
    pub next_action_date: Option<NaiveDate>,
    pub brevo_tag: String,
    pub company_id: Option<Uuid>,
}
