//! Contact database queries

use sqlx::PgPool;
use uuid::Uuid;
use anyhow::Result;

use crate::types::contact::{
    Contact, CreateContactRequest, PendingSyncContact, FIRST_NEXT_ACTION, NEW_CONTACT_STATUS,
};

/// Create a new contact
pub async fn create_contact(pool: &PgPool, req: &CreateContactRequest) -> Result<Contact> {
    let contact = sqlx::query_as::<_, Contact>(
        r#"
        INSERT INTO contacts (
            id, first_name, last_name, email, phone, job_title,
            linkedin_url, intent_reason, source_links, location,
            source, event_tag, status, next_action, next_action_date,
            brevo_tag, brevo_synced, company_id, created_at, updated_at
        )
        VALUES (
            $1, $2, $3, $4, $5, $6,
            $7, $8, $9, $10,
            $11, $12, $13, $14, $15,
            $16, FALSE, $17, NOW(), NOW()
        )
        RETURNING
            id, first_name, last_name, email, phone, job_title,
            linkedin_url, intent_reason, source_links, location,
            source, event_tag, status, next_action, next_action_date,
            brevo_tag, brevo_synced, company_id, created_at, updated_at
        "#
    )
    .bind(Uuid::new_v4())
    .bind(&req.first_name)
    .bind(&req.last_name)
    .bind(&req.email)
    .bind(&req.phone)
    .bind(&req.job_title)
    .bind(&req.linkedin_url)
    .bind(&req.intent_reason)
    .bind(&req.source_links)
    .bind(&req.location)
    .bind(&req.source)
    .bind(&req.event_tag)
    .bind(NEW_CONTACT_STATUS)
    .bind(FIRST_NEXT_ACTION)
    .bind(req.next_action_date)
    .bind(&req.brevo_tag)
    .bind(req.company_id)
    .fetch_one(pool)
    .await?;

    Ok(contact)
}

/// Flag a contact as pushed to the outbound mailer
pub async fn mark_contact_synced(pool: &PgPool, contact_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE contacts
        SET brevo_synced = TRUE, updated_at = NOW()
        WHERE id = $1
        "#
    )
    .bind(contact_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Contacts not yet pushed to the outbound mailer, oldest first
pub async fn list_unsynced_contacts(pool: &PgPool) -> Result<Vec<PendingSyncContact>> {
    let contacts = sqlx::query_as::<_, PendingSyncContact>(
        r#"
        SELECT
            c.id, c.first_name, c.last_name, c.email, c.source, c.brevo_tag,
            co.name AS company_name
        FROM contacts c
        LEFT JOIN companies co ON co.id = c.company_id
        WHERE c.brevo_synced = FALSE
        ORDER BY c.created_at ASC
        "#
    )
    .fetch_all(pool)
    .await?;

    Ok(contacts)
}

/// Distinct event tags in use, alphabetically
pub async fn list_event_tags(pool: &PgPool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT DISTINCT event_tag
        FROM contacts
        WHERE event_tag IS NOT NULL AND event_tag <> ''
        ORDER BY event_tag ASC
        "#
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(tag,)| tag).collect())
}
