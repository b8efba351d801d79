//! Header auto-mapping
//!
//! Each header is normalized (lowercase, only `[a-z0-9]` kept) and compared
//! by exact match against a fixed keyword list per contact field, which
//! covers the usual CRM and Clay export column names. The leftmost matching
//! column wins.

use tracing::debug;

use crate::types::{ColumnMap, ContactField};

fn keywords(field: ContactField) -> &'static [&'static str] {
    match field {
        ContactField::Email => &["email", "emailaddress", "mail", "workemail", "personalemail", "emailwork"],
        ContactField::FirstName => &["firstname", "first", "fname", "givenname"],
        ContactField::LastName => &["lastname", "last", "lname", "surname", "familyname"],
        ContactField::FullName => &["fullname", "name", "contactname", "personname", "contact"],
        ContactField::Company => &[
            "company",
            "companyname",
            "organization",
            "org",
            "employer",
            "companytabledata",
            "companydomain",
        ],
        ContactField::Phone => &["phone", "phonenumber", "mobile", "cell", "telephone", "mobilephone", "workphone"],
        ContactField::JobTitle => &["title", "jobtitle", "position", "role", "jobrole"],
        ContactField::LinkedinUrl => &["linkedin", "linkedinurl", "linkedinprofile", "linkedinlink"],
        ContactField::IntentReason => &["reason", "intentreason", "reasoning", "notes", "whyhighintent"],
        ContactField::SourceLinks => &["formula", "sourcelinks", "links", "sources", "researchlinks"],
        ContactField::Location => &["location", "city", "address", "region"],
        ContactField::EventTag => &["eventtag", "event", "campaign", "campaigntag", "tag"],
    }
}

/// Lowercase and drop everything outside `[a-z0-9]`
pub fn normalize_header(header: &str) -> String {
    header
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// Detect which column holds each contact field
pub fn auto_map_columns(headers: &[String]) -> ColumnMap {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();

    let mut map = ColumnMap::new();
    for field in ContactField::ALL {
        let words = keywords(field);
        if let Some(index) = normalized.iter().position(|h| words.contains(&h.as_str())) {
            debug!("Column {:?} -> {}", headers[index], field.as_str());
            map.insert(field, index);
        }
    }
    map
}
