//! Observed record - one tracked forum post as mirrored in the record store

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Observation status of a tracked post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordStatus {
    /// 대기 - the only state normal observation proceeds from
    Waiting,
    /// 확인완료 - metrics were observed at least once
    Confirmed,
    /// 삭제 - the post was removed on the platform
    Deleted,
    /// 불가 - the post can never be observed (blocked or inaccessible)
    Unavailable,
}

impl RecordStatus {
    /// Terminal statuses are only left through an external reset or force
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Deleted | Self::Unavailable)
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Waiting => "waiting",
            Self::Confirmed => "confirmed",
            Self::Deleted => "deleted",
            Self::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

/// A tracked forum post with its last known metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedRecord {
    /// Opaque store identifier
    pub id: String,

    /// Post locator; empty when the store has no URL for the record
    pub url: String,

    /// `None` when the stored label is missing or not in the status mapping
    pub status: Option<RecordStatus>,

    pub total_comment_count: u64,
    pub external_comment_count: u64,
    pub view_count: u64,
    pub title: String,
    pub post_date: Option<NaiveDate>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub new_activity_flag: bool,

    /// Collection-level manual refresh checkbox
    pub refresh_requested: bool,
}

impl ObservedRecord {
    /// Create a waiting record with zeroed metrics
    pub fn waiting(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            status: Some(RecordStatus::Waiting),
            total_comment_count: 0,
            external_comment_count: 0,
            view_count: 0,
            title: String::new(),
            post_date: None,
            last_run_at: None,
            new_activity_flag: false,
            refresh_requested: false,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: Option<RecordStatus>) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub const fn with_comments(mut self, total: u64, external: u64) -> Self {
        self.total_comment_count = total;
        self.external_comment_count = external;
        self
    }

    #[must_use]
    pub const fn with_post_date(mut self, post_date: NaiveDate) -> Self {
        self.post_date = Some(post_date);
        self
    }

    #[must_use]
    pub const fn with_refresh_requested(mut self, requested: bool) -> Self {
        self.refresh_requested = requested;
        self
    }
}
