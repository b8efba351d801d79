//! Persistence seams used by the lead importer
//!
//! `PgCompanyStore`/`PgContactStore` back the worker; the in-memory stores
//! back `import --dry-run` and the tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::queries;
use crate::types::{
    Company, Contact, CreateContactRequest, PendingSyncContact, FIRST_NEXT_ACTION, NEW_CONTACT_STATUS,
};

/// Store failure
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A record with the same natural key already exists
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    /// Classify a query error, turning unique violations into `Conflict`
    fn from_query(err: anyhow::Error) -> Self {
        let unique_violation = err
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| e.as_database_error())
            .map_or(false, |db| db.is_unique_violation());
        if unique_violation {
            StoreError::Conflict(err.to_string())
        } else {
            StoreError::Backend(err)
        }
    }
}

/// Companies, keyed by exact name
#[async_trait]
pub trait CompanyStore: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<Company>, StoreError>;

    /// Create a company; `StoreError::Conflict` if the name was taken meanwhile
    async fn create(&self, name: &str) -> Result<Company, StoreError>;
}

/// Contacts
#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn create(&self, req: &CreateContactRequest) -> Result<Contact, StoreError>;

    async fn mark_synced(&self, contact_id: Uuid) -> Result<(), StoreError>;

    async fn list_unsynced(&self) -> Result<Vec<PendingSyncContact>, StoreError>;

    async fn list_event_tags(&self) -> Result<Vec<String>, StoreError>;
}

// =============================================================================
// Postgres
// =============================================================================

pub struct PgCompanyStore {
    pool: PgPool,
}

impl PgCompanyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CompanyStore for PgCompanyStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<Company>, StoreError> {
        queries::company::find_company_by_name(&self.pool, name)
            .await
            .map_err(StoreError::from_query)
    }

    async fn create(&self, name: &str) -> Result<Company, StoreError> {
        queries::company::create_company(&self.pool, name)
            .await
            .map_err(StoreError::from_query)
    }
}

pub struct PgContactStore {
    pool: PgPool,
}

impl PgContactStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactStore for PgContactStore {
    async fn create(&self, req: &CreateContactRequest) -> Result<Contact, StoreError> {
        queries::contact::create_contact(&self.pool, req)
            .await
            .map_err(StoreError::from_query)
    }

    async fn mark_synced(&self, contact_id: Uuid) -> Result<(), StoreError> {
        queries::contact::mark_contact_synced(&self.pool, contact_id)
            .await
            .map_err(StoreError::from_query)
    }

    async fn list_unsynced(&self) -> Result<Vec<PendingSyncContact>, StoreError> {
        queries::contact::list_unsynced_contacts(&self.pool)
            .await
            .map_err(StoreError::from_query)
    }

    async fn list_event_tags(&self) -> Result<Vec<String>, StoreError> {
        queries::contact::list_event_tags(&self.pool)
            .await
            .map_err(StoreError::from_query)
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Company store held in memory
#[derive(Default)]
pub struct InMemoryCompanyStore {
    companies: Mutex<HashMap<String, Company>>,
}

impl InMemoryCompanyStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.companies.lock().len()
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<Company> {
        self.companies.lock().get(name).cloned()
    }
}

#[async_trait]
impl CompanyStore for InMemoryCompanyStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<Company>, StoreError> {
        Ok(self.companies.lock().get(name).cloned())
    }

    async fn create(&self, name: &str) -> Result<Company, StoreError> {
        let mut companies = self.companies.lock();
        if companies.contains_key(name) {
            return Err(StoreError::Conflict(format!("company '{}' already exists", name)));
        }
        let company = Company {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: "Prospect".to_string(),
            created_at: Utc::now(),
        };
        companies.insert(name.to_string(), company.clone());
        Ok(company)
    }
}

/// Contact store held in memory, in insertion order
#[derive(Default)]
pub struct InMemoryContactStore {
    contacts: Mutex<Vec<Contact>>,
}

impl InMemoryContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn contacts(&self) -> Vec<Contact> {
        self.contacts.lock().clone()
    }
}

#[async_trait]
impl ContactStore for InMemoryContactStore {
    async fn create(&self, req: &CreateContactRequest) -> Result<Contact, StoreError> {
        let now = Utc::now();
        let contact = Contact {
            id: Uuid::new_v4(),
            first_name: req.first_name.clone(),
            last_name: req.last_name.clone(),
            email: req.email.clone(),
            phone: req.phone.clone(),
            job_title: req.job_title.clone(),
            linkedin_url: req.linkedin_url.clone(),
            intent_reason: req.intent_reason.clone(),
            source_links: req.source_links.clone(),
            location: req.location.clone(),
            source: req.source.clone(),
            event_tag: req.event_tag.clone(),
            status: NEW_CONTACT_STATUS.to_string(),
            next_action: FIRST_NEXT_ACTION.to_string(),
            next_action_date: req.next_action_date,
            brevo_tag: req.brevo_tag.clone(),
            brevo_synced: false,
            company_id: req.company_id,
            created_at: now,
            updated_at: now,
        };
        self.contacts.lock().push(contact.clone());
        Ok(contact)
    }

    async fn mark_synced(&self, contact_id: Uuid) -> Result<(), StoreError> {
        let mut contacts = self.contacts.lock();
        match contacts.iter_mut().find(|c| c.id == contact_id) {
            Some(contact) => {
                contact.brevo_synced = true;
                contact.updated_at = Utc::now();
                Ok(())
            }
            None => Err(StoreError::Backend(anyhow::anyhow!("contact {} not found", contact_id))),
        }
    }

    async fn list_unsynced(&self) -> Result<Vec<PendingSyncContact>, StoreError> {
        Ok(self
            .contacts
            .lock()
            .iter()
            .filter(|c| !c.brevo_synced)
            .map(|c| PendingSyncContact {
                id: c.id,
                first_name: c.first_name.clone(),
                last_name: c.last_name.clone(),
                email: c.email.clone(),
                source: c.source.clone(),
                brevo_tag: c.brevo_tag.clone(),
                company_name: None,
            })
            .collect())
    }

    async fn list_event_tags(&self) -> Result<Vec<String>, StoreError> {
        let mut tags: Vec<String> = self
            .contacts
            .lock()
            .iter()
            .filter_map(|c| c.event_tag.clone())
            .filter(|tag| !tag.is_empty())
            .collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(first: &str, event_tag: Option<&str>) -> CreateContactRequest {
        CreateContactRequest {
            first_name: first.to_string(),
            last_name: String::new(),
            email: None,
            phone: None,
            job_title: None,
            linkedin_url: None,
            intent_reason: None,
            source_links: vec![],
            location: None,
            source: "Referral".to_string(),
            event_tag: event_tag.map(str::to_string),
            next_action_date: None,
            brevo_tag: "referral-lead".to_string(),
            company_id: None,
        }
    }

    #[tokio::test]
    async fn test_in_memory_company_create_conflicts_on_same_name() {
        let store = InMemoryCompanyStore::new();
        store.create("Acme").await.unwrap();

        let err = store.create("Acme").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Names are matched case-sensitively
        assert!(store.find_by_name("acme").await.unwrap().is_none());
        assert!(store.create("acme").await.is_ok());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_in_memory_contact_starts_unsynced() {
        let store = InMemoryContactStore::new();
        let contact = store.create(&request("Ann", None)).await.unwrap();
        assert!(!contact.brevo_synced);
        assert_eq!(contact.status, "New");
        assert_eq!(contact.next_action, "Call");
        assert_eq!(store.list_unsynced().await.unwrap().len(), 1);

        store.mark_synced(contact.id).await.unwrap();
        assert!(store.list_unsynced().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_event_tags_are_distinct_and_sorted() {
        let store = InMemoryContactStore::new();
        store.create(&request("A", Some("webinar"))).await.unwrap();
        store.create(&request("B", Some("expo"))).await.unwrap();
        store.create(&request("C", Some("webinar"))).await.unwrap();
        store.create(&request("D", None)).await.unwrap();

        assert_eq!(store.list_event_tags().await.unwrap(), vec!["expo", "webinar"]);
    }

    #[test]
    fn test_non_database_error_is_backend() {
        let err = StoreError::from_query(anyhow::anyhow!("connection reset"));
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
