//! Domain module - records, snapshots and the reconciliation rules
//!
//! Nothing in here performs I/O. Store and browser access go through the
//! traits in [`repositories`] and the infrastructure layer.

pub mod blocklist;
pub mod fields;
pub mod reconciliation;
pub mod record;
pub mod repositories;
pub mod snapshot;

// Re-export commonly used items
pub use blocklist::{BlockClassification, BlockRule, Blocklist};
pub use fields::{FieldMapping, FieldUpdates, FieldValue, StatusLabels, StoredRecord};
pub use reconciliation::{
    Admission, Observation, ObservedMetrics, PersistenceInstruction, RecencyWindow, RecordUpdate,
    SkipReason, Transition, admit, has_new_activity, reconcile,
};
pub use record::{ObservedRecord, RecordStatus};
pub use repositories::{AccessibilityCheck, AlwaysAccessible, RecordStore};
pub use snapshot::{CommentSource, CommentTally, MetricsSnapshot, TerminalSignal};
