//! Business logic services

pub mod cancellation;
pub mod column_mapper;
pub mod contact_import;
pub mod mailer_sync;
pub mod stores;
pub mod tokenizer;
