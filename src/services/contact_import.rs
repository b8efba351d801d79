//! Lead import pipeline
//!
//! Rows are imported strictly one after another: company resolution and the
//! contact insert of a row finish before the next row starts, so two rows
//! naming the same new company can never both create it. A bad row never
//! aborts the batch; it is counted and the loop moves on.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::services::column_mapper::auto_map_columns;
use crate::services::mailer_sync::{MailerContact, MailerSync};
use crate::services::stores::{CompanyStore, ContactStore, StoreError};
use crate::services::tokenizer::RawGrid;
use crate::types::{
    follow_up_date, mailer_tag_for_source, ColumnMap, Contact, ContactField,
    CreateContactRequest, ImportDefaults, ImportPreview, ImportResult,
};

/// Rows shown in an upload preview
const PREVIEW_ROWS: usize = 5;

/// Rows whose mapping is logged at debug level
const LOGGED_SAMPLE_ROWS: usize = 5;

// =============================================================================
// PROGRESS
// =============================================================================

/// Receives `(processed, total)` after every finished row. Fire-and-forget.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, processed: u32, total: u32);
}

/// Logs progress every 10 rows and on the last row
pub struct LogProgressSink;

#[async_trait]
impl ProgressSink for LogProgressSink {
    async fn report(&self, processed: u32, total: u32) {
        if processed % 10 == 0 || processed == total {
            info!("Importing... {} of {}", processed, total);
        }
    }
}

// =============================================================================
// PREVIEW
// =============================================================================

/// Non-blocking problems the user should confirm before importing
pub fn preflight_warnings(map: &ColumnMap) -> Vec<String> {
    let mut warnings = Vec::new();
    if !map.contains(ContactField::Email) {
        warnings.push(
            "Could not find email column. Contacts will be imported without email addresses."
                .to_string(),
        );
    }
    let has_name = map.contains(ContactField::FirstName)
        || map.contains(ContactField::LastName)
        || map.contains(ContactField::FullName);
    if !has_name {
        warnings.push(
            "Could not find a name column. Rows without a name are skipped.".to_string(),
        );
    }
    warnings
}

/// Header, detected mapping and the first rows of an upload
pub fn preview(grid: &RawGrid) -> ImportPreview {
    let column_map = auto_map_columns(grid.header());
    ImportPreview {
        headers: grid.header().to_vec(),
        warnings: preflight_warnings(&column_map),
        column_map,
        sample_rows: grid.data_rows().iter().take(PREVIEW_ROWS).cloned().collect(),
        total_rows: grid.data_row_count() as u32,
    }
}

// =============================================================================
// ROW NORMALIZATION
// =============================================================================

/// A data row turned into a contact payload (company not yet resolved)
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub contact: CreateContactRequest,
    pub company_name: Option<String>,
    /// Email cell that was dropped because it has no `@`
    pub invalid_email: Option<String>,
}

/// Split "Jean Paul Martin" into ("Jean", "Paul Martin")
pub fn split_full_name(full_name: &str) -> (String, String) {
    let mut parts = full_name.split_whitespace();
    let first = parts.next().unwrap_or_default().to_string();
    let last = parts.collect::<Vec<_>>().join(" ");
    (first, last)
}

/// Source links cell -> list; links may be separated by commas, semicolons or whitespace
pub fn parse_source_links(cell: &str) -> Vec<String> {
    cell.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|link| !link.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build the contact payload of a data row.
///
/// Returns `None` when the row has neither a first nor a last name.
pub fn normalize_row(
    row: &[String],
    map: &ColumnMap,
    defaults: &ImportDefaults,
    today: NaiveDate,
) -> Option<NormalizedRow> {
    let cell = |field| map.cell(row, field).map(str::to_string);

    let mut first_name = cell(ContactField::FirstName).unwrap_or_default();
    let mut last_name = cell(ContactField::LastName).unwrap_or_default();
    if first_name.is_empty() && last_name.is_empty() {
        if let Some(full_name) = map.cell(row, ContactField::FullName) {
            (first_name, last_name) = split_full_name(full_name);
        }
    }
    if first_name.is_empty() && last_name.is_empty() {
        return None;
    }

    let (email, invalid_email) = match cell(ContactField::Email) {
        Some(email) if email.contains('@') => (Some(email), None),
        Some(email) => (None, Some(email)),
        None => (None, None),
    };

    let event_tag = cell(ContactField::EventTag)
        .or_else(|| defaults.fallback_event_tag().map(str::to_string));

    let contact = CreateContactRequest {
        first_name,
        last_name,
        email,
        phone: cell(ContactField::Phone),
        job_title: cell(ContactField::JobTitle),
        linkedin_url: cell(ContactField::LinkedinUrl),
        intent_reason: cell(ContactField::IntentReason),
        source_links: map
            .cell(row, ContactField::SourceLinks)
            .map(parse_source_links)
            .unwrap_or_default(),
        location: cell(ContactField::Location),
        source: defaults.source.clone(),
        event_tag,
        next_action_date: Some(follow_up_date(&defaults.source, today)),
        brevo_tag: mailer_tag_for_source(&defaults.source).to_string(),
        company_id: None,
    };

    Some(NormalizedRow {
        contact,
        company_name: cell(ContactField::Company),
        invalid_email,
    })
}

// =============================================================================
// IMPORTER
// =============================================================================

/// Imports contact rows through the injected stores and mailer
pub struct ContactImporter {
    companies: Arc<dyn CompanyStore>,
    contacts: Arc<dyn ContactStore>,
    mailer: Arc<dyn MailerSync>,
}

impl ContactImporter {
    pub fn new(
        companies: Arc<dyn CompanyStore>,
        contacts: Arc<dyn ContactStore>,
        mailer: Arc<dyn MailerSync>,
    ) -> Self {
        Self {
            companies,
            contacts,
            mailer,
        }
    }

    /// Map the grid's header and import all of its data rows
    pub async fn import_grid(
        &self,
        grid: &RawGrid,
        defaults: &ImportDefaults,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> ImportResult {
        let map = auto_map_columns(grid.header());
        info!("Column mapping: {:?}", map);
        self.import_rows(grid.data_rows(), &map, defaults, progress, cancel).await
    }

    /// Import data rows with an explicit column map.
    ///
    /// The cancellation token is checked before each row; once it fires the
    /// loop stops and the result covers the rows processed so far.
    pub async fn import_rows(
        &self,
        rows: &[Vec<String>],
        map: &ColumnMap,
        defaults: &ImportDefaults,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> ImportResult {
        let total = rows.len() as u32;
        let today = Utc::now().date_naive();
        let mut result = ImportResult {
            total_rows: total,
            ..Default::default()
        };
        let mut company_ids: HashMap<String, Uuid> = HashMap::new();

        if !map.contains(ContactField::Email) {
            warn!("No email column mapped; contacts will be imported without email");
        }

        for (index, row) in rows.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Import cancelled after {} of {} rows", index, total);
                result.cancelled = true;
                break;
            }

            // Row numbers as the user sees them in the file (header is row 1)
            let row_number = index + 2;

            match normalize_row(row, map, defaults, today) {
                None => {
                    if index < LOGGED_SAMPLE_ROWS {
                        debug!("Row {}: skipped, no name data", row_number);
                    }
                    result.skipped += 1;
                    result.skip_reasons.no_identifying_info += 1;
                }
                Some(normalized) => {
                    if index < LOGGED_SAMPLE_ROWS {
                        debug!("Row {}: {:?}", row_number, normalized.contact);
                    }
                    self.import_row(row_number, normalized, &mut company_ids, defaults, &mut result)
                        .await;
                }
            }

            result.processed_rows = index as u32 + 1;
            progress.report(result.processed_rows, total).await;
        }

        info!("Import finished: {}", result.summary());
        result
    }

    async fn import_row(
        &self,
        row_number: usize,
        normalized: NormalizedRow,
        company_ids: &mut HashMap<String, Uuid>,
        defaults: &ImportDefaults,
        result: &mut ImportResult,
    ) {
        let NormalizedRow {
            mut contact,
            company_name,
            invalid_email,
        } = normalized;

        if let Some(email) = invalid_email {
            debug!("Row {}: invalid email \"{}\", importing without email", row_number, email);
            result.skip_reasons.invalid_email_format += 1;
        }

        if let Some(name) = company_name.as_deref() {
            match self.resolve_company(name, company_ids).await {
                Ok((id, created)) => {
                    contact.company_id = Some(id);
                    if created {
                        result.companies_created += 1;
                    }
                }
                Err(e) => {
                    error!("Row {}: failed to resolve company '{}': {}", row_number, name, e);
                }
            }
        }

        let created = match self.contacts.create(&contact).await {
            Ok(created) => created,
            Err(e) => {
                error!(
                    "Row {}: failed to import {} {}: {}",
                    row_number, contact.first_name, contact.last_name, e
                );
                result.skipped += 1;
                result.skip_reasons.persistence_error += 1;
                return;
            }
        };
        result.imported += 1;

        if defaults.skip_downstream_sync || created.email.is_none() {
            return;
        }
        match self.sync_to_mailer(&created, company_name.as_deref()).await {
            Ok(()) => result.mailer_synced += 1,
            Err(e) => {
                warn!("Row {}: mailer sync failed (will retry later): {:#}", row_number, e);
                result.mailer_sync_failed += 1;
            }
        }
    }

    /// Find a company by exact name or create it.
    ///
    /// A uniqueness conflict on create means another importer won the race;
    /// the company is fetched again. Returns the id and whether it was created.
    async fn resolve_company(
        &self,
        name: &str,
        company_ids: &mut HashMap<String, Uuid>,
    ) -> Result<(Uuid, bool), StoreError> {
        if let Some(id) = company_ids.get(name) {
            return Ok((*id, false));
        }

        let (id, created) = match self.companies.find_by_name(name).await? {
            Some(company) => (company.id, false),
            None => match self.companies.create(name).await {
                Ok(company) => {
                    info!("Created company '{}'", name);
                    (company.id, true)
                }
                Err(StoreError::Conflict(_)) => {
                    debug!("Company '{}' was created concurrently, fetching it", name);
                    let company = self.companies.find_by_name(name).await?.ok_or_else(|| {
                        StoreError::Backend(anyhow::anyhow!(
                            "company '{}' conflicted on create but cannot be found",
                            name
                        ))
                    })?;
                    (company.id, false)
                }
                Err(e) => return Err(e),
            },
        };

        company_ids.insert(name.to_string(), id);
        Ok((id, created))
    }

    /// Push a freshly created contact to the mailer and flag it as synced
    async fn sync_to_mailer(&self, contact: &Contact, company_name: Option<&str>) -> Result<()> {
        let Some(email) = contact.email.clone() else {
            return Ok(());
        };
        let payload = MailerContact {
            email,
            first_name: contact.first_name.clone(),
            last_name: contact.last_name.clone(),
            company: company_name.unwrap_or_default().to_string(),
            source: contact.source.clone(),
            tag: contact.brevo_tag.clone(),
        };
        self.mailer.sync_contact(&payload).await?;
        self.contacts.mark_synced(contact.id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mailer_sync::{FakeMailerSync, NoopMailerSync};
    use crate::services::stores::{InMemoryCompanyStore, InMemoryContactStore};
    use crate::services::tokenizer::parse_csv;
    use crate::types::{Company, PendingSyncContact};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    // ==========================================================================
    // Helpers
    // ==========================================================================

    fn defaults(source: &str) -> ImportDefaults {
        ImportDefaults {
            source: source.to_string(),
            event_tag: None,
            skip_downstream_sync: true,
        }
    }

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 4).unwrap()
    }

    struct Harness {
        companies: Arc<InMemoryCompanyStore>,
        contacts: Arc<InMemoryContactStore>,
        importer: ContactImporter,
    }

    fn harness() -> Harness {
        harness_with_mailer(Arc::new(NoopMailerSync))
    }

    fn harness_with_mailer(mailer: Arc<dyn MailerSync>) -> Harness {
        let companies = Arc::new(InMemoryCompanyStore::new());
        let contacts = Arc::new(InMemoryContactStore::new());
        let importer = ContactImporter::new(companies.clone(), contacts.clone(), mailer);
        Harness {
            companies,
            contacts,
            importer,
        }
    }

    async fn run(importer: &ContactImporter, csv: &str, defaults: &ImportDefaults) -> ImportResult {
        let grid = parse_csv(csv).unwrap();
        importer
            .import_grid(&grid, defaults, &NullProgress, &CancellationToken::new())
            .await
    }

    fn assert_accounting(result: &ImportResult) {
        assert_eq!(result.imported + result.skipped, result.processed_rows);
        assert_eq!(
            result.skipped,
            result.skip_reasons.no_identifying_info + result.skip_reasons.persistence_error
        );
    }

    struct NullProgress;

    #[async_trait]
    impl ProgressSink for NullProgress {
        async fn report(&self, _processed: u32, _total: u32) {}
    }

    #[derive(Default)]
    struct RecordingProgress {
        reports: Mutex<Vec<(u32, u32)>>,
    }

    #[async_trait]
    impl ProgressSink for RecordingProgress {
        async fn report(&self, processed: u32, total: u32) {
            self.reports.lock().push((processed, total));
        }
    }

    /// Cancels the token once the given number of rows was reported
    struct CancelAfter {
        rows: u32,
        token: CancellationToken,
    }

    #[async_trait]
    impl ProgressSink for CancelAfter {
        async fn report(&self, processed: u32, _total: u32) {
            if processed >= self.rows {
                self.token.cancel();
            }
        }
    }

    /// Contact store that rejects contacts with a given first name
    struct RejectingContactStore {
        inner: InMemoryContactStore,
        reject_first_name: String,
    }

    #[async_trait]
    impl ContactStore for RejectingContactStore {
        async fn create(&self, req: &CreateContactRequest) -> Result<Contact, StoreError> {
            if req.first_name == self.reject_first_name {
                return Err(StoreError::Backend(anyhow::anyhow!("value too long for column")));
            }
            self.inner.create(req).await
        }

        async fn mark_synced(&self, contact_id: Uuid) -> Result<(), StoreError> {
            self.inner.mark_synced(contact_id).await
        }

        async fn list_unsynced(&self) -> Result<Vec<PendingSyncContact>, StoreError> {
            self.inner.list_unsynced().await
        }

        async fn list_event_tags(&self) -> Result<Vec<String>, StoreError> {
            self.inner.list_event_tags().await
        }
    }

    /// Company store where someone else creates the company between our
    /// lookup and our insert
    struct RacingCompanyStore {
        inner: InMemoryCompanyStore,
        lookups: AtomicU32,
    }

    #[async_trait]
    impl CompanyStore for RacingCompanyStore {
        async fn find_by_name(&self, name: &str) -> Result<Option<Company>, StoreError> {
            if self.lookups.fetch_add(1, Ordering::SeqCst) == 0 {
                // First lookup misses; a concurrent importer inserts right after
                self.inner.create(name).await?;
                return Ok(None);
            }
            self.inner.find_by_name(name).await
        }

        async fn create(&self, name: &str) -> Result<Company, StoreError> {
            self.inner.create(name).await
        }
    }

    struct BrokenCompanyStore;

    #[async_trait]
    impl CompanyStore for BrokenCompanyStore {
        async fn find_by_name(&self, _name: &str) -> Result<Option<Company>, StoreError> {
            Err(StoreError::Backend(anyhow::anyhow!("connection refused")))
        }

        async fn create(&self, _name: &str) -> Result<Company, StoreError> {
            Err(StoreError::Backend(anyhow::anyhow!("connection refused")))
        }
    }

    // ==========================================================================
    // Row normalization
    // ==========================================================================

    #[test]
    fn test_split_full_name() {
        assert_eq!(
            split_full_name("Jean Paul Martin"),
            ("Jean".to_string(), "Paul Martin".to_string())
        );
        assert_eq!(split_full_name("  Cher  "), ("Cher".to_string(), String::new()));
        assert_eq!(
            split_full_name("Ann   van   Dijk"),
            ("Ann".to_string(), "van Dijk".to_string())
        );
    }

    #[test]
    fn test_full_name_used_only_when_first_and_last_are_empty() {
        let headers = row(&["First", "Full Name"]);
        let map = auto_map_columns(&headers);

        let normalized =
            normalize_row(&row(&["Ann", "Bob Smith"]), &map, &defaults("Referral"), today()).unwrap();
        assert_eq!(normalized.contact.first_name, "Ann");
        assert_eq!(normalized.contact.last_name, "");

        let normalized =
            normalize_row(&row(&["", "Jean Paul Martin"]), &map, &defaults("Referral"), today()).unwrap();
        assert_eq!(normalized.contact.first_name, "Jean");
        assert_eq!(normalized.contact.last_name, "Paul Martin");
    }

    #[test]
    fn test_row_without_name_is_not_normalized() {
        let map = auto_map_columns(&row(&["Email", "First", "Last"]));
        assert!(normalize_row(&row(&["a@x.com", "", ""]), &map, &defaults("Event"), today()).is_none());
    }

    #[test]
    fn test_normalize_row_builds_payload() {
        let map = auto_map_columns(&row(&[
            "Email", "First", "Last", "Phone", "Title", "LinkedIn", "Reason", "Sources", "City",
        ]));
        let normalized = normalize_row(
            &row(&[
                "ann@x.com",
                "Ann",
                "Lee",
                "",
                "CTO",
                "https://linkedin.com/in/ann",
                "Hiring",
                "https://a.example, https://b.example",
                "Austin",
            ]),
            &map,
            &defaults("Referral"),
            today(),
        )
        .unwrap();

        let contact = normalized.contact;
        assert_eq!(contact.email.as_deref(), Some("ann@x.com"));
        assert_eq!(contact.phone, None);
        assert_eq!(contact.job_title.as_deref(), Some("CTO"));
        assert_eq!(contact.intent_reason.as_deref(), Some("Hiring"));
        assert_eq!(contact.source_links, vec!["https://a.example", "https://b.example"]);
        assert_eq!(contact.location.as_deref(), Some("Austin"));
        assert_eq!(contact.next_action_date, NaiveDate::from_ymd_opt(2026, 5, 5));
        assert_eq!(contact.brevo_tag, "referral-lead");
        assert_eq!(contact.source, "Referral");
        assert_eq!(normalized.company_name, None);
        assert_eq!(normalized.invalid_email, None);
    }

    #[test]
    fn test_event_tag_prefers_mapped_column_over_fallback() {
        let map = auto_map_columns(&row(&["First", "Campaign"]));
        let mut defaults = defaults("Event");
        defaults.event_tag = Some("spring-expo".to_string());

        let tagged = normalize_row(&row(&["Ann", "webinar-q2"]), &map, &defaults, today()).unwrap();
        assert_eq!(tagged.contact.event_tag.as_deref(), Some("webinar-q2"));

        let untagged = normalize_row(&row(&["Bob", ""]), &map, &defaults, today()).unwrap();
        assert_eq!(untagged.contact.event_tag.as_deref(), Some("spring-expo"));

        defaults.event_tag = None;
        let none = normalize_row(&row(&["Cy", ""]), &map, &defaults, today()).unwrap();
        assert_eq!(none.contact.event_tag, None);
    }

    #[test]
    fn test_unknown_source_gets_other_lead_tag() {
        let map = auto_map_columns(&row(&["First"]));
        let normalized = normalize_row(&row(&["Ann"]), &map, &defaults("Podcast"), today()).unwrap();
        assert_eq!(normalized.contact.brevo_tag, "other-lead");
    }

    // ==========================================================================
    // Preview
    // ==========================================================================

    #[test]
    fn test_preview_warns_when_email_is_unmapped() {
        let grid = parse_csv("First,Last\nAnn,Lee\n").unwrap();
        let preview = preview(&grid);
        assert_eq!(preview.total_rows, 1);
        assert_eq!(preview.warnings.len(), 1);
        assert!(preview.warnings[0].contains("email"));
    }

    #[test]
    fn test_preview_limits_sample_rows() {
        let mut csv = String::from("Email,Full Name\n");
        for i in 0..8 {
            csv.push_str(&format!("p{}@x.com,Person {}\n", i, i));
        }
        let grid = parse_csv(&csv).unwrap();
        let preview = preview(&grid);
        assert_eq!(preview.total_rows, 8);
        assert_eq!(preview.sample_rows.len(), 5);
        assert!(preview.warnings.is_empty());
        assert_eq!(preview.column_map.get(ContactField::FullName), Some(1));
    }

    #[test]
    fn test_preview_warns_when_no_name_column() {
        let grid = parse_csv("Email,Company\na@x.com,Acme\n").unwrap();
        let preview = preview(&grid);
        assert!(preview.warnings.iter().any(|w| w.contains("name")));
    }

    // ==========================================================================
    // Import scenarios
    // ==========================================================================

    #[tokio::test]
    async fn test_imports_row_with_company() {
        let h = harness();
        let result = run(
            &h.importer,
            "Email,First,Last,Company\na@x.com,Ann,Lee,Acme\n",
            &defaults("Referral"),
        )
        .await;

        assert_eq!(result.imported, 1);
        assert_eq!(result.skipped, 0);
        assert_eq!(result.companies_created, 1);

        let contacts = h.contacts.contacts();
        let acme = h.companies.get("Acme").unwrap();
        assert_eq!(contacts[0].email.as_deref(), Some("a@x.com"));
        assert_eq!(contacts[0].company_id, Some(acme.id));
        assert!(!contacts[0].brevo_synced);
    }

    #[tokio::test]
    async fn test_imports_full_name_column() {
        let h = harness();
        let result = run(&h.importer, "Full Name,Email\nBob Smith,bob@x.com\n", &defaults("Event")).await;

        assert_eq!(result.imported, 1);
        let contact = &h.contacts.contacts()[0];
        assert_eq!(contact.first_name, "Bob");
        assert_eq!(contact.last_name, "Smith");
    }

    #[tokio::test]
    async fn test_row_without_name_is_skipped() {
        let h = harness();
        let result = run(&h.importer, "Email,Company\na@x.com,Acme\n", &defaults("Event")).await;

        assert_eq!(result.imported, 0);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.skip_reasons.no_identifying_info, 1);
        assert!(h.contacts.contacts().is_empty());
        // Skipped rows never touch the company store
        assert_eq!(h.companies.len(), 0);
    }

    #[tokio::test]
    async fn test_invalid_email_is_imported_without_email() {
        let h = harness();
        let result = run(
            &h.importer,
            "Email,First,Last\nnot-an-email,Ann,Lee\n",
            &defaults("LinkedIn"),
        )
        .await;

        assert_eq!(result.imported, 1);
        assert_eq!(result.skipped, 0);
        assert_eq!(result.skip_reasons.invalid_email_format, 1);
        assert_eq!(h.contacts.contacts()[0].email, None);
        assert_accounting(&result);
    }

    #[tokio::test]
    async fn test_shared_company_is_created_once() {
        let h = harness();
        let result = run(
            &h.importer,
            "Email,First,Company\na@x.com,Ann,Acme\nb@x.com,Bob,Acme\n",
            &defaults("Referral"),
        )
        .await;

        assert_eq!(result.imported, 2);
        assert_eq!(result.companies_created, 1);
        assert_eq!(h.companies.len(), 1);

        let contacts = h.contacts.contacts();
        assert!(contacts[0].company_id.is_some());
        assert_eq!(contacts[0].company_id, contacts[1].company_id);
    }

    #[tokio::test]
    async fn test_company_names_are_case_sensitive() {
        let h = harness();
        run(
            &h.importer,
            "First,Company\nAnn,Acme\nBob,ACME\n",
            &defaults("Referral"),
        )
        .await;
        assert_eq!(h.companies.len(), 2);
    }

    #[tokio::test]
    async fn test_existing_company_is_reused() {
        let h = harness();
        let existing = h.companies.create("Acme").await.unwrap();

        let result = run(&h.importer, "First,Company\nAnn,Acme\n", &defaults("Referral")).await;

        assert_eq!(result.companies_created, 0);
        assert_eq!(h.contacts.contacts()[0].company_id, Some(existing.id));
    }

    #[tokio::test]
    async fn test_company_conflict_recovers_by_refetching() {
        let companies = Arc::new(RacingCompanyStore {
            inner: InMemoryCompanyStore::new(),
            lookups: AtomicU32::new(0),
        });
        let contacts = Arc::new(InMemoryContactStore::new());
        let importer = ContactImporter::new(companies.clone(), contacts.clone(), Arc::new(NoopMailerSync));

        let result = run(&importer, "First,Company\nAnn,Acme\n", &defaults("Referral")).await;

        assert_eq!(result.imported, 1);
        assert_eq!(result.companies_created, 0);
        let acme = companies.inner.get("Acme").unwrap();
        assert_eq!(contacts.contacts()[0].company_id, Some(acme.id));
    }

    #[tokio::test]
    async fn test_company_failure_does_not_fail_row() {
        let contacts = Arc::new(InMemoryContactStore::new());
        let importer = ContactImporter::new(
            Arc::new(BrokenCompanyStore),
            contacts.clone(),
            Arc::new(NoopMailerSync),
        );

        let result = run(&importer, "First,Company\nAnn,Acme\n", &defaults("Referral")).await;

        assert_eq!(result.imported, 1);
        assert_eq!(result.skipped, 0);
        assert_eq!(contacts.contacts()[0].company_id, None);
    }

    #[tokio::test]
    async fn test_persistence_failure_skips_only_that_row() {
        let contacts = Arc::new(RejectingContactStore {
            inner: InMemoryContactStore::new(),
            reject_first_name: "Bob".to_string(),
        });
        let importer = ContactImporter::new(
            Arc::new(InMemoryCompanyStore::new()),
            contacts.clone(),
            Arc::new(NoopMailerSync),
        );

        let result = run(
            &importer,
            "First,Last\nAnn,Lee\nBob,Smith\nCy,Young\n",
            &defaults("Referral"),
        )
        .await;

        assert_eq!(result.imported, 2);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.skip_reasons.persistence_error, 1);
        assert_eq!(result.processed_rows, 3);
        assert!(!result.cancelled);
        assert_accounting(&result);

        let names: Vec<String> = contacts.inner.contacts().into_iter().map(|c| c.first_name).collect();
        assert_eq!(names, vec!["Ann", "Cy"]);
    }

    #[tokio::test]
    async fn test_accounting_over_mixed_batch() {
        let contacts = Arc::new(RejectingContactStore {
            inner: InMemoryContactStore::new(),
            reject_first_name: "Dee".to_string(),
        });
        let importer = ContactImporter::new(
            Arc::new(InMemoryCompanyStore::new()),
            contacts,
            Arc::new(NoopMailerSync),
        );

        let csv = "\
Email,First,Last,Company
a@x.com,Ann,Lee,Acme
bad-email,Bob,Smith,Acme
c@x.com,,,Globex
d@x.com,Dee,Dee,Globex
,Eve,,
";
        let result = run(&importer, csv, &defaults("Clay Import")).await;

        assert_eq!(result.total_rows, 5);
        assert_eq!(result.processed_rows, 5);
        assert_eq!(result.imported, 3);
        assert_eq!(result.skipped, 2);
        assert_eq!(result.skip_reasons.no_identifying_info, 1);
        assert_eq!(result.skip_reasons.persistence_error, 1);
        assert_eq!(result.skip_reasons.invalid_email_format, 1);
        assert_accounting(&result);
    }

    #[tokio::test]
    async fn test_progress_is_reported_for_every_row() {
        let h = harness();
        let grid = parse_csv("First\nAnn\n\n,\nBob\nCy\n").unwrap();
        let progress = RecordingProgress::default();

        h.importer
            .import_grid(&grid, &defaults("Referral"), &progress, &CancellationToken::new())
            .await;

        assert_eq!(*progress.reports.lock(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_rows() {
        let h = harness();
        let grid = parse_csv("First\nA\nB\nC\nD\nE\n").unwrap();
        let token = CancellationToken::new();
        let progress = CancelAfter { rows: 2, token: token.clone() };

        let result = h
            .importer
            .import_grid(&grid, &defaults("Referral"), &progress, &token)
            .await;

        assert!(result.cancelled);
        assert_eq!(result.total_rows, 5);
        assert_eq!(result.processed_rows, 2);
        assert_eq!(result.imported, 2);
        assert_eq!(h.contacts.contacts().len(), 2);
        assert_accounting(&result);
    }

    #[tokio::test]
    async fn test_already_cancelled_imports_nothing() {
        let h = harness();
        let grid = parse_csv("First\nA\nB\n").unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result = h
            .importer
            .import_grid(&grid, &defaults("Referral"), &NullProgress, &token)
            .await;

        assert!(result.cancelled);
        assert_eq!(result.processed_rows, 0);
        assert_eq!(result.imported, 0);
    }

    // ==========================================================================
    // Mailer sync
    // ==========================================================================

    #[tokio::test]
    async fn test_imported_contacts_are_synced_unless_skipped() {
        let mailer = Arc::new(FakeMailerSync {
            failing: vec!["bob@x.com".to_string()],
            ..Default::default()
        });
        let h = harness_with_mailer(mailer.clone());
        let defaults = ImportDefaults {
            source: "Referral".to_string(),
            event_tag: None,
            skip_downstream_sync: false,
        };

        let result = run(
            &h.importer,
            "Email,First,Company\nann@x.com,Ann,Acme\nbob@x.com,Bob,\n,Cy,\n",
            &defaults,
        )
        .await;

        assert_eq!(result.imported, 3);
        assert_eq!(result.mailer_synced, 1);
        assert_eq!(result.mailer_sync_failed, 1);

        let synced = mailer.synced.lock();
        assert_eq!(synced.len(), 1);
        assert_eq!(synced[0].company, "Acme");
        assert_eq!(synced[0].tag, "referral-lead");

        let flags: Vec<bool> = h.contacts.contacts().iter().map(|c| c.brevo_synced).collect();
        assert_eq!(flags, vec![true, false, false]);
    }

    #[tokio::test]
    async fn test_skip_downstream_sync_leaves_mailer_untouched() {
        let mailer = Arc::new(FakeMailerSync::default());
        let h = harness_with_mailer(mailer.clone());

        let result = run(&h.importer, "Email,First\nann@x.com,Ann\n", &defaults("Referral")).await;

        assert_eq!(result.imported, 1);
        assert_eq!(result.mailer_synced, 0);
        assert!(mailer.synced.lock().is_empty());
    }
}
