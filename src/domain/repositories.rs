//! Collaborator interfaces used by the observation pipeline
//!
//! Implementations live in the infrastructure layer; tests substitute
//! in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;

use super::fields::{FieldUpdates, StoredRecord};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All records of a collection
    async fn fetch_records(&self, collection_id: &str) -> Result<Vec<StoredRecord>>;

    /// Write the given fields of one record
    async fn update_record(&self, record_id: &str, fields: &FieldUpdates) -> Result<()>;
}

/// Platform-level reachability pre-flight, independent of the blocklist
#[async_trait]
pub trait AccessibilityCheck: Send + Sync {
    /// `Ok(false)` means permanently unobservable; `Err` means the check
    /// itself could not be performed
    async fn is_post_accessible(&self, url: &str) -> Result<bool>;
}

/// Accessibility check that admits every URL
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAccessible;

#[async_trait]
impl AccessibilityCheck for AlwaysAccessible {
    async fn is_post_accessible(&self, _url: &str) -> Result<bool> {
        Ok(true)
    }
}
