//! Reconciliation engine
//!
//! Decides, from a record's stored state and a fresh observation, which
//! status transition to apply and which fields to persist. Everything here
//! is pure: the caller supplies `now` and applies the returned instruction.
//!
//! Transitions:
//!
//! ```text
//! Waiting ──blocked/inaccessible──▶ Unavailable   (status + last_run only)
//! Waiting ──extracted: Deleted────▶ Deleted       (status + last_run only)
//! Waiting ──extracted: None───────▶ Confirmed     (all metrics)
//! Waiting ──extracted: Transient──▶ Waiting       (nothing persisted)
//! ```

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{ObservedRecord, RecordStatus};
use super::snapshot::{MetricsSnapshot, TerminalSignal};

/// Why a record was not observed in this cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Status is not Waiting and no force override was given
    NotWaiting(Option<RecordStatus>),
    /// The record has no URL to observe
    MissingUrl,
    /// The post is older than the recency cutoff
    Stale { post_date: NaiveDate },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotWaiting(Some(status)) => write!(f, "status is {status}"),
            Self::NotWaiting(None) => f.write_str("status is unrecognised"),
            Self::MissingUrl => f.write_str("record has no url"),
            Self::Stale { post_date } => {
                write!(f, "post dated {post_date} is past the recency cutoff")
            }
        }
    }
}

/// Gate decision for a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    Skip(SkipReason),
}

/// Status and URL gate. `force` lets any status through.
#[must_use]
pub fn admit(record: &ObservedRecord, force: bool) -> Admission {
    if !force && record.status != Some(RecordStatus::Waiting) {
        return Admission::Skip(SkipReason::NotWaiting(record.status));
    }
    if record.url.trim().is_empty() {
        return Admission::Skip(SkipReason::MissingUrl);
    }
    Admission::Proceed
}

/// Rolling window bounding observation to recently written posts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecencyWindow {
    pub days: u32,
}

impl RecencyWindow {
    #[must_use]
    pub const fn days(days: u32) -> Self {
        Self { days }
    }

    #[must_use]
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.days))
    }

    /// Records without a post date are never stale
    #[must_use]
    pub fn check(&self, record: &ObservedRecord, now: DateTime<Utc>) -> Admission {
        match record.post_date {
            Some(post_date) if post_date.and_time(NaiveTime::MIN).and_utc() < self.cutoff(now) => {
                Admission::Skip(SkipReason::Stale { post_date })
            }
            _ => Admission::Proceed,
        }
    }
}

impl Default for RecencyWindow {
    fn default() -> Self {
        Self::days(90)
    }
}

/// What was learned about a post in this cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Blocklist or accessibility check ruled the post unobservable
    Blocked { reason: String },
    Extracted(MetricsSnapshot),
}

/// Metrics persisted on a confirmed observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedMetrics {
    pub total_comment_count: u64,
    pub external_comment_count: u64,
    pub view_count: u64,
    pub title: String,
}

/// Status change carried by a write; Waiting is never written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    Confirmed {
        metrics: ObservedMetrics,
        /// Set-only; clearing the flag belongs to the notification side
        new_activity: bool,
    },
    Deleted,
    Unavailable {
        reason: String,
    },
}

impl Transition {
    #[must_use]
    pub const fn status(&self) -> RecordStatus {
        match self {
            Self::Confirmed { .. } => RecordStatus::Confirmed,
            Self::Deleted => RecordStatus::Deleted,
            Self::Unavailable { .. } => RecordStatus::Unavailable,
        }
    }
}

/// Fields to write for one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub transition: Transition,
    pub last_run_at: DateTime<Utc>,
}

impl RecordUpdate {
    #[must_use]
    pub const fn status(&self) -> RecordStatus {
        self.transition.status()
    }

    /// Only present on a confirmed observation
    #[must_use]
    pub const fn metrics(&self) -> Option<&ObservedMetrics> {
        match &self.transition {
            Transition::Confirmed { metrics, .. } => Some(metrics),
            _ => None,
        }
    }

    #[must_use]
    pub const fn raises_new_activity(&self) -> bool {
        matches!(
            self.transition,
            Transition::Confirmed {
                new_activity: true,
                ..
            }
        )
    }

    #[must_use]
    pub fn block_reason(&self) -> Option<&str> {
        match &self.transition {
            Transition::Unavailable { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Output of reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceInstruction {
    /// Leave the record untouched
    Skip,
    Write(RecordUpdate),
}

impl PersistenceInstruction {
    #[must_use]
    pub const fn update(&self) -> Option<&RecordUpdate> {
        match self {
            Self::Skip => None,
            Self::Write(update) => Some(update),
        }
    }
}

/// Strictly greater external count means new external activity
#[must_use]
pub const fn has_new_activity(previous_external: u64, observed_external: u64) -> bool {
    observed_external > previous_external
}

/// Reconcile a record against this cycle's observation
#[must_use]
pub fn reconcile(
    record: &ObservedRecord,
    observation: &Observation,
    now: DateTime<Utc>,
) -> PersistenceInstruction {
    match observation {
        Observation::Blocked { reason } => PersistenceInstruction::Write(RecordUpdate {
            transition: Transition::Unavailable {
                reason: reason.clone(),
            },
            last_run_at: now,
        }),
        Observation::Extracted(snapshot) => match snapshot.terminal_signal {
            TerminalSignal::TransientError => PersistenceInstruction::Skip,
            TerminalSignal::Deleted => PersistenceInstruction::Write(RecordUpdate {
                transition: Transition::Deleted,
                last_run_at: now,
            }),
            TerminalSignal::None => PersistenceInstruction::Write(RecordUpdate {
                transition: Transition::Confirmed {
                    metrics: ObservedMetrics {
                        total_comment_count: snapshot.total_comment_count,
                        external_comment_count: snapshot.external_comment_count,
                        view_count: snapshot.view_count,
                        title: snapshot.title.clone(),
                    },
                    new_activity: has_new_activity(
                        record.external_comment_count,
                        snapshot.external_comment_count,
                    ),
                },
                last_run_at: now,
            }),
        },
    }
}
