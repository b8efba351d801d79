//! Lead import types: column mapping, defaults, results and job messages

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// COLUMN MAPPING
// =============================================================================

/// Semantic contact field that a spreadsheet column can be mapped onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactField {
    Email,
    FirstName,
    LastName,
    FullName,
    Company,
    Phone,
    JobTitle,
    LinkedinUrl,
    IntentReason,
    SourceLinks,
    Location,
    EventTag,
}

impl ContactField {
    pub const ALL: [ContactField; 12] = [
        ContactField::Email,
        ContactField::FirstName,
        ContactField::LastName,
        ContactField::FullName,
        ContactField::Company,
        ContactField::Phone,
        ContactField::JobTitle,
        ContactField::LinkedinUrl,
        ContactField::IntentReason,
        ContactField::SourceLinks,
        ContactField::Location,
        ContactField::EventTag,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContactField::Email => "email",
            ContactField::FirstName => "first_name",
            ContactField::LastName => "last_name",
            ContactField::FullName => "full_name",
            ContactField::Company => "company",
            ContactField::Phone => "phone",
            ContactField::JobTitle => "job_title",
            ContactField::LinkedinUrl => "linkedin_url",
            ContactField::IntentReason => "intent_reason",
            ContactField::SourceLinks => "source_links",
            ContactField::Location => "location",
            ContactField::EventTag => "event_tag",
        }
    }
}

/// Field -> 0-based header index. Unmatched fields have no entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMap(BTreeMap<ContactField, usize>);

impl ColumnMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: ContactField, index: usize) {
        self.0.insert(field, index);
    }

    pub fn get(&self, field: ContactField) -> Option<usize> {
        self.0.get(&field).copied()
    }

    pub fn contains(&self, field: ContactField) -> bool {
        self.0.contains_key(&field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Mapped cell of a data row; blank cells read as `None`
    pub fn cell<'a>(&self, row: &'a [String], field: ContactField) -> Option<&'a str> {
        self.get(field)
            .and_then(|index| row.get(index))
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

// =============================================================================
// IMPORT INPUT
// =============================================================================

/// Uploaded file payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "camelCase")]
pub enum ImportFile {
    /// UTF-8 CSV text
    Csv { content: String },
    /// Base64-encoded .xlsx workbook; the first worksheet is read
    #[serde(rename_all = "camelCase")]
    Xlsx { content_base64: String },
    /// Spreadsheet already parsed client-side into a 2-D cell array
    Rows { rows: Vec<Vec<serde_json::Value>> },
}

/// Caller-supplied defaults applied to every imported row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportDefaults {
    pub source: String,
    #[serde(default)]
    pub event_tag: Option<String>,
    #[serde(default)]
    pub skip_downstream_sync: bool,
}

impl ImportDefaults {
    /// Fallback event tag with blank input treated as absent
    pub fn fallback_event_tag(&self) -> Option<&str> {
        self.event_tag
            .as_deref()
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
    }
}

// =============================================================================
// IMPORT RESULT
// =============================================================================

/// Why rows were not imported (plus the informational invalid-email count)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipReasons {
    pub no_identifying_info: u32,
    /// Rows imported without their malformed email; not counted as skipped
    pub invalid_email_format: u32,
    pub persistence_error: u32,
}

/// Outcome of an import run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub imported: u32,
    pub skipped: u32,
    pub skip_reasons: SkipReasons,
    pub total_rows: u32,
    pub processed_rows: u32,
    pub cancelled: bool,
    pub companies_created: u32,
    pub mailer_synced: u32,
    pub mailer_sync_failed: u32,
}

impl ImportResult {
    /// Human-readable one-line summary
    pub fn summary(&self) -> String {
        let mut summary = format!("Imported {} contacts", self.imported);
        if self.skipped > 0 {
            let mut parts = Vec::new();
            if self.skip_reasons.no_identifying_info > 0 {
                parts.push(format!("{} missing name", self.skip_reasons.no_identifying_info));
            }
            if self.skip_reasons.persistence_error > 0 {
                parts.push(format!("{} DB errors", self.skip_reasons.persistence_error));
            }
            summary.push_str(&format!(" ({} skipped: {})", self.skipped, parts.join(", ")));
        }
        if self.skip_reasons.invalid_email_format > 0 {
            summary.push_str(&format!(
                "; {} imported without invalid email",
                self.skip_reasons.invalid_email_format
            ));
        }
        if self.cancelled {
            summary.push_str(&format!(
                "; cancelled after {} of {} rows",
                self.processed_rows, self.total_rows
            ));
        }
        summary
    }
}

/// Import pre-flight error
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("file has no data rows")]
    NoDataRows,
    #[error("failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to read spreadsheet: {0}")]
    Spreadsheet(String),
    #[error("invalid file payload: {0}")]
    InvalidPayload(String),
}

impl ImportError {
    /// Error code used in NATS error responses
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::NoDataRows => "NO_DATA_ROWS",
            _ => "INVALID_FILE",
        }
    }
}

// =============================================================================
// PREVIEW
// =============================================================================

/// Request to preview an upload before importing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPreviewRequest {
    pub file: ImportFile,
}

/// Header, detected mapping and sample rows of an upload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPreview {
    pub headers: Vec<String>,
    pub column_map: ColumnMap,
    pub sample_rows: Vec<Vec<String>>,
    pub total_rows: u32,
    pub warnings: Vec<String>,
}

// =============================================================================
// JOBS
// =============================================================================

/// Request to run an import job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobRequest {
    pub file: ImportFile,
    pub defaults: ImportDefaults,
    #[serde(default)]
    pub filename: Option<String>,
}

/// Response after an import job was accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobSubmitResponse {
    pub job_id: Uuid,
    pub total_rows: u32,
    pub warnings: Vec<String>,
    pub message: String,
}

/// Status of an import job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ImportJobStatus {
    /// File accepted, rows about to be processed
    Parsing,
    /// Rows being imported
    #[serde(rename_all = "camelCase")]
    Importing { processed: u32, total: u32 },
    /// All rows processed
    #[serde(rename_all = "camelCase")]
    Completed { result: ImportResult, duration_ms: u64 },
    /// Stopped by the user; counts cover the processed rows
    #[serde(rename_all = "camelCase")]
    Cancelled { result: ImportResult },
    /// Job could not run
    #[serde(rename_all = "camelCase")]
    Failed { error: String },
}

/// Status update published on `spark.job.import.status.<jobId>`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobStatusUpdate {
    pub job_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub status: ImportJobStatus,
}

impl ImportJobStatusUpdate {
    pub fn new(job_id: Uuid, status: ImportJobStatus) -> Self {
        Self {
            job_id,
            timestamp: Utc::now(),
            status,
        }
    }
}

/// Request to cancel a running import job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelImportRequest {
    pub job_id: Uuid,
}

/// Response to a cancel request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelImportResponse {
    pub job_id: Uuid,
    pub cancelled: bool,
    pub message: String,
}

/// Outcome of pushing pending contacts to the outbound mailer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailerSyncSummary {
    pub synced: u32,
    pub failed: u32,
    pub total: u32,
}

/// Distinct event tags already in use
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTagsResponse {
    pub tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_map_serializes_with_snake_case_keys() {
        let mut map = ColumnMap::new();
        map.insert(ContactField::Email, 0);
        map.insert(ContactField::FirstName, 2);
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json, serde_json::json!({ "email": 0, "first_name": 2 }));
    }

    #[test]
    fn test_column_map_cell_treats_blank_as_absent() {
        let mut map = ColumnMap::new();
        map.insert(ContactField::Email, 0);
        map.insert(ContactField::Phone, 1);
        let row = vec!["a@x.com".to_string(), "   ".to_string()];
        assert_eq!(map.cell(&row, ContactField::Email), Some("a@x.com"));
        assert_eq!(map.cell(&row, ContactField::Phone), None);
        assert_eq!(map.cell(&row, ContactField::Company), None);
    }

    #[test]
    fn test_import_defaults_deserialize_camel_case() {
        let json = r#"{"source":"Referral","eventTag":"  ","skipDownstreamSync":true}"#;
        let defaults: ImportDefaults = serde_json::from_str(json).unwrap();
        assert_eq!(defaults.source, "Referral");
        assert!(defaults.skip_downstream_sync);
        assert_eq!(defaults.fallback_event_tag(), None);
    }

    #[test]
    fn test_import_result_serializes_skip_reasons() {
        let result = ImportResult {
            imported: 3,
            skipped: 1,
            skip_reasons: SkipReasons {
                no_identifying_info: 1,
                invalid_email_format: 2,
                persistence_error: 0,
            },
            ..Default::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["skipReasons"]["noIdentifyingInfo"], 1);
        assert_eq!(json["skipReasons"]["invalidEmailFormat"], 2);
        assert_eq!(json["skipReasons"]["persistenceError"], 0);
    }

    #[test]
    fn test_import_result_summary_mentions_skips() {
        let result = ImportResult {
            imported: 8,
            skipped: 2,
            skip_reasons: SkipReasons {
                no_identifying_info: 1,
                invalid_email_format: 0,
                persistence_error: 1,
            },
            total_rows: 10,
            processed_rows: 10,
            ..Default::default()
        };
        assert_eq!(
            result.summary(),
            "Imported 8 contacts (2 skipped: 1 missing name, 1 DB errors)"
        );
    }

    #[test]
    fn test_import_file_csv_deserializes() {
        let json = r#"{"format":"csv","content":"Email\na@x.com"}"#;
        let file: ImportFile = serde_json::from_str(json).unwrap();
        assert!(matches!(file, ImportFile::Csv { .. }));
    }

    #[test]
    fn test_import_file_xlsx_uses_camel_case() {
        let json = r#"{"format":"xlsx","contentBase64":"AAAA"}"#;
        let file: ImportFile = serde_json::from_str(json).unwrap();
        assert!(matches!(file, ImportFile::Xlsx { .. }));
    }

    #[test]
    fn test_import_job_status_importing_serializes() {
        let status = ImportJobStatus::Importing { processed: 10, total: 40 };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"type\":\"importing\""));
        assert!(json.contains("\"processed\":10"));
    }

    #[test]
    fn test_import_job_status_completed_serializes() {
        let status = ImportJobStatus::Completed {
            result: ImportResult::default(),
            duration_ms: 1200,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("completed"));
        assert!(json.contains("durationMs"));
        assert!(json.contains("skipReasons"));
    }

    #[test]
    fn test_import_error_codes() {
        assert_eq!(ImportError::NoDataRows.code(), "NO_DATA_ROWS");
        assert_eq!(ImportError::InvalidPayload("x".into()).code(), "INVALID_FILE");
        assert_eq!(ImportError::NoDataRows.to_string(), "file has no data rows");
    }
}
