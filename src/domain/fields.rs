//! Store-facing record shape and the configurable field mapping
//!
//! The record store speaks in named, typed properties. Field names and
//! status labels differ per collection, so they are never hard-coded here;
//! [`FieldMapping`] translates between store properties and domain types.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::reconciliation::RecordUpdate;
use super::record::{ObservedRecord, RecordStatus};

/// A typed property value as the store understands it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    Number(u64),
    Text(String),
    Checkbox(bool),
    Date(DateTime<Utc>),
    /// Status/select label
    Status(String),
}

impl FieldValue {
    #[must_use]
    pub const fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_checkbox(&self) -> Option<bool> {
        match self {
            Self::Checkbox(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_status(&self) -> Option<&str> {
        match self {
            Self::Status(s) => Some(s),
            _ => None,
        }
    }
}

/// Field name → value; ordered so writes are deterministic
pub type FieldUpdates = BTreeMap<String, FieldValue>;

/// A record as returned by the store
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub properties: HashMap<String, FieldValue>,
}

impl StoredRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: FieldValue) -> Self {
        self.properties.insert(field.into(), value);
        self
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.properties.get(field)
    }
}

/// Store labels for each record status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLabels {
    pub waiting: String,
    pub confirmed: String,
    pub deleted: String,
    pub unavailable: String,
}

impl Default for StatusLabels {
    fn default() -> Self {
        Self {
            waiting: "대기".to_string(),
            confirmed: "확인완료".to_string(),
            deleted: "삭제".to_string(),
            unavailable: "불가".to_string(),
        }
    }
}

impl StatusLabels {
    #[must_use]
    pub fn label(&self, status: RecordStatus) -> &str {
        match status {
            RecordStatus::Waiting => &self.waiting,
            RecordStatus::Confirmed => &self.confirmed,
            RecordStatus::Deleted => &self.deleted,
            RecordStatus::Unavailable => &self.unavailable,
        }
    }

    #[must_use]
    pub fn parse(&self, label: &str) -> Option<RecordStatus> {
        [
            RecordStatus::Waiting,
            RecordStatus::Confirmed,
            RecordStatus::Deleted,
            RecordStatus::Unavailable,
        ]
        .into_iter()
        .find(|status| self.label(*status) == label)
    }
}

/// Per-collection mapping from record attributes to store field names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub url: String,
    pub status: String,
    pub total_comments: String,
    pub external_comments: String,
    pub views: String,
    pub title: String,
    pub post_date: String,
    pub last_run: String,
    pub new_activity: String,

    /// Collection-level manual refresh checkbox
    #[serde(default)]
    pub refresh_flag: Option<String>,

    /// Where to record why a post is unavailable
    #[serde(default)]
    pub block_reason: Option<String>,

    #[serde(default)]
    pub status_labels: StatusLabels,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            url: "URL".to_string(),
            status: "상태".to_string(),
            total_comments: "댓글".to_string(),
            external_comments: "외부 댓글 수".to_string(),
            views: "조회수".to_string(),
            title: "글 제목".to_string(),
            post_date: "날짜".to_string(),
            last_run: "마지막 수집".to_string(),
            new_activity: "NEW".to_string(),
            refresh_flag: None,
            block_reason: None,
            status_labels: StatusLabels::default(),
        }
    }
}

impl FieldMapping {
    /// Decode a stored record; absent or mistyped properties fall back to
    /// empty/zero values
    #[must_use]
    pub fn decode(&self, stored: &StoredRecord) -> ObservedRecord {
        let number = |field: &str| stored.get(field).and_then(FieldValue::as_number).unwrap_or(0);
        let text = |field: &str| {
            stored
                .get(field)
                .and_then(FieldValue::as_text)
                .unwrap_or_default()
                .to_string()
        };
        let checkbox = |field: &str| {
            stored
                .get(field)
                .and_then(FieldValue::as_checkbox)
                .unwrap_or(false)
        };

        ObservedRecord {
            id: stored.id.clone(),
            url: text(&self.url).trim().to_string(),
            status: stored
                .get(&self.status)
                .and_then(FieldValue::as_status)
                .and_then(|label| self.status_labels.parse(label)),
            total_comment_count: number(&self.total_comments),
            external_comment_count: number(&self.external_comments),
            view_count: number(&self.views),
            title: text(&self.title),
            post_date: stored
                .get(&self.post_date)
                .and_then(FieldValue::as_date)
                .map(|d| d.date_naive()),
            last_run_at: stored.get(&self.last_run).and_then(FieldValue::as_date),
            new_activity_flag: checkbox(&self.new_activity),
            refresh_requested: self.refresh_flag.as_deref().is_some_and(checkbox),
        }
    }

    /// Encode a reconciliation update as store field updates
    #[must_use]
    pub fn encode(&self, update: &RecordUpdate) -> FieldUpdates {
        let mut fields = FieldUpdates::new();
        fields.insert(
            self.status.clone(),
            FieldValue::Status(self.status_labels.label(update.status()).to_string()),
        );
        fields.insert(self.last_run.clone(), FieldValue::Date(update.last_run_at));

        if let Some(metrics) = update.metrics() {
            fields.insert(
                self.total_comments.clone(),
                FieldValue::Number(metrics.total_comment_count),
            );
            fields.insert(
                self.external_comments.clone(),
                FieldValue::Number(metrics.external_comment_count),
            );
            fields.insert(self.views.clone(), FieldValue::Number(metrics.view_count));
            fields.insert(self.title.clone(), FieldValue::Text(metrics.title.clone()));
        }

        if update.raises_new_activity() {
            fields.insert(self.new_activity.clone(), FieldValue::Checkbox(true));
        }

        if let (Some(field), Some(reason)) = (&self.block_reason, update.block_reason()) {
            fields.insert(field.clone(), FieldValue::Text(reason.to_string()));
        }

        fields
    }

    /// Update clearing the refresh checkbox, if one is mapped
    #[must_use]
    pub fn clear_refresh(&self) -> Option<FieldUpdates> {
        self.refresh_flag.as_ref().map(|field| {
            let mut fields = FieldUpdates::new();
            fields.insert(field.clone(), FieldValue::Checkbox(false));
            fields
        })
    }
}
