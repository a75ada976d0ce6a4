//! Notion-backed record store
//!
//! Collections are Notion databases and records are their pages. Property
//! values are translated to and from [`FieldValue`]; the Notion property
//! type of every field seen while fetching is remembered per database so
//! updates are encoded as the type the database actually uses.

#![allow(clippy::uninlined_format_args)]

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use reqwest::{
    Client, Method, StatusCode,
    header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER},
};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::config::StoreConfig;
use crate::domain::{FieldUpdates, FieldValue, RecordStore, StoredRecord};

/// Notion rejects rich text segments longer than this
const MAX_TEXT_LENGTH: usize = 2000;
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Notion API error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected Notion response: {0}")]
    Decode(String),
}

impl StoreError {
    fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }
}

/// Notion property types the store reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Number,
    Title,
    RichText,
    Url,
    Status,
    Select,
    Checkbox,
    Date,
    Other,
}

impl PropertyKind {
    fn from_type(name: &str) -> Self {
        match name {
            "number" => Self::Number,
            "title" => Self::Title,
            "rich_text" => Self::RichText,
            "url" => Self::Url,
            "status" => Self::Status,
            "select" => Self::Select,
            "checkbox" => Self::Checkbox,
            "date" => Self::Date,
            _ => Self::Other,
        }
    }
}

pub type PropertyKinds = HashMap<String, PropertyKind>;

fn plain_text(segments: &Value) -> String {
    segments
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["plain_text"].as_str())
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// Date-only values become midnight UTC; a date-time keeps its wall-clock
/// time, so the calendar date is the one written in Notion
fn parse_notion_date(start: &str) -> Option<DateTime<chrono::Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(start, "%Y-%m-%d") {
        return Some(date.and_time(chrono::NaiveTime::MIN).and_utc());
    }
    DateTime::parse_from_rfc3339(start)
        .ok()
        .map(|dt| dt.naive_local().and_utc())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn decode_number(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|n| n.round() as u64)
    })
}

/// Decode one Notion property; `None` for empty or unsupported values
pub fn decode_property(property: &Value) -> (PropertyKind, Option<FieldValue>) {
    let type_name = property["type"].as_str().unwrap_or_default();
    let kind = PropertyKind::from_type(type_name);
    let body = &property[type_name];

    let value = match kind {
        PropertyKind::Number => decode_number(body).map(FieldValue::Number),
        PropertyKind::Title | PropertyKind::RichText => Some(FieldValue::Text(plain_text(body))),
        PropertyKind::Url => body.as_str().map(|url| FieldValue::Text(url.to_string())),
        PropertyKind::Status | PropertyKind::Select => body["name"]
            .as_str()
            .map(|name| FieldValue::Status(name.to_string())),
        PropertyKind::Checkbox => body.as_bool().map(FieldValue::Checkbox),
        PropertyKind::Date => body["start"]
            .as_str()
            .and_then(parse_notion_date)
            .map(FieldValue::Date),
        PropertyKind::Other => None,
    };

    (kind, value)
}

/// Decode a Notion page into a stored record plus its property types
pub fn decode_page(page: &Value) -> Result<(StoredRecord, PropertyKinds), StoreError> {
    let id = page["id"]
        .as_str()
        .ok_or_else(|| StoreError::decode("page without id"))?;
    let properties = page["properties"]
        .as_object()
        .ok_or_else(|| StoreError::decode(format!("page {} has no properties", id)))?;

    let mut record = StoredRecord::new(id);
    let mut kinds = PropertyKinds::new();
    for (name, property) in properties {
        let (kind, value) = decode_property(property);
        kinds.insert(name.clone(), kind);
        if let Some(value) = value {
            record.properties.insert(name.clone(), value);
        }
    }

    Ok((record, kinds))
}

fn truncated(text: &str) -> String {
    text.chars().take(MAX_TEXT_LENGTH).collect()
}

/// Encode a value as the Notion property payload for `kind`.
///
/// Without a known kind, text is written as rich text and labels as status.
pub fn encode_property(value: &FieldValue, kind: Option<PropertyKind>) -> Value {
    match value {
        FieldValue::Number(n) => json!({ "number": n }),
        FieldValue::Checkbox(b) => json!({ "checkbox": b }),
        FieldValue::Date(dt) => json!({
            "date": { "start": dt.to_rfc3339_opts(SecondsFormat::Secs, true) }
        }),
        FieldValue::Status(name) => match kind {
            Some(PropertyKind::Select) => json!({ "select": { "name": name } }),
            _ => json!({ "status": { "name": name } }),
        },
        FieldValue::Text(text) => match kind {
            Some(PropertyKind::Url) if text.is_empty() => json!({ "url": null }),
            Some(PropertyKind::Url) => json!({ "url": text }),
            Some(PropertyKind::Title) => json!({
                "title": [{ "type": "text", "text": { "content": truncated(text) } }]
            }),
            _ => json!({
                "rich_text": [{ "type": "text", "text": { "content": truncated(text) } }]
            }),
        },
    }
}

/// `PATCH /pages/{id}` body for a set of field updates
pub fn encode_updates(fields: &FieldUpdates, kinds: Option<&PropertyKinds>) -> Value {
    let properties: Map<String, Value> = fields
        .iter()
        .map(|(name, value)| {
            let kind = kinds.and_then(|k| k.get(name)).copied();
            (name.clone(), encode_property(value, kind))
        })
        .collect();
    json!({ "properties": properties })
}

fn api_error(status: StatusCode, body: &str) -> StoreError {
    let payload: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    StoreError::Api {
        status: status.as_u16(),
        code: payload["code"].as_str().unwrap_or("unknown").to_string(),
        message: payload["message"]
            .as_str()
            .map_or_else(|| body.chars().take(200).collect(), str::to_string),
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[derive(Debug, Default)]
struct SchemaCache {
    kinds_by_database: HashMap<String, PropertyKinds>,
    database_by_page: HashMap<String, String>,
}

pub struct NotionRecordStore {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    api_base: String,
    page_size: u32,
    schema: Mutex<SchemaCache>,
}

impl NotionRecordStore {
    pub fn new(config: &StoreConfig) -> anyhow::Result<Self> {
        if config.token.trim().is_empty() {
            anyhow::bail!("Notion token is not configured (set CAFE_WATCH__STORE__TOKEN)");
        }

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.token.trim()))
            .context("Invalid Notion token")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            "notion-version",
            HeaderValue::from_str(&config.notion_version).context("Invalid Notion version")?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .build()
            .context("Failed to create Notion HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.requests_per_second)
                .context("Rate limit must be greater than 0")?,
        );

        Ok(Self {
            client,
            rate_limiter: RateLimiter::direct(quota),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            page_size: config.page_size.clamp(1, 100),
            schema: Mutex::new(SchemaCache::default()),
        })
    }

    async fn call(&self, method: Method, path: &str, body: &Value) -> Result<Value, StoreError> {
        let url = format!("{}/{}", self.api_base, path);
        let mut attempt = 0;

        loop {
            self.rate_limiter.until_ready().await;
            debug!("Notion {} {}", method, path);

            let response = self
                .client
                .request(method.clone(), &url)
                .json(body)
                .send()
                .await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RATE_LIMIT_RETRIES {
                let wait = retry_after(response.headers()).unwrap_or(Duration::from_secs(1));
                attempt += 1;
                warn!("Notion rate limit hit, retrying in {:?} (attempt {})", wait, attempt);
                tokio::time::sleep(wait).await;
                continue;
            }

            let text = response.text().await?;
            if !status.is_success() {
                return Err(api_error(status, &text));
            }
            return serde_json::from_str(&text).map_err(|e| StoreError::decode(e.to_string()));
        }
    }

    fn remember_schema(&self, database_id: &str, page_ids: &[String], kinds: PropertyKinds) {
        let Ok(mut schema) = self.schema.lock() else {
            return;
        };
        schema
            .kinds_by_database
            .entry(database_id.to_string())
            .or_default()
            .extend(kinds);
        for page_id in page_ids {
            schema
                .database_by_page
                .insert(page_id.clone(), database_id.to_string());
        }
    }

    fn kinds_for_page(&self, page_id: &str) -> Option<PropertyKinds> {
        let schema = self.schema.lock().ok()?;
        let database_id = schema.database_by_page.get(page_id)?;
        schema.kinds_by_database.get(database_id).cloned()
    }
}

#[async_trait]
impl RecordStore for NotionRecordStore {
    async fn fetch_records(&self, collection_id: &str) -> anyhow::Result<Vec<StoredRecord>> {
        let path = format!("databases/{}/query", collection_id);
        let mut records = Vec::new();
        let mut kinds = PropertyKinds::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut body = json!({ "page_size": self.page_size });
            if let Some(cursor) = &cursor {
                body["start_cursor"] = json!(cursor);
            }

            let payload = self.call(Method::POST, &path, &body).await?;
            let results = payload["results"]
                .as_array()
                .ok_or_else(|| StoreError::decode("query response without results"))?;

            for page in results {
                let (record, page_kinds) = decode_page(page)?;
                kinds.extend(page_kinds);
                records.push(record);
            }

            cursor = payload["next_cursor"].as_str().map(str::to_string);
            if payload["has_more"].as_bool() != Some(true) || cursor.is_none() {
                break;
            }
        }

        let page_ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        self.remember_schema(collection_id, &page_ids, kinds);

        info!("Fetched {} records from database {}", records.len(), collection_id);
        Ok(records)
    }

    async fn update_record(&self, record_id: &str, fields: &FieldUpdates) -> anyhow::Result<()> {
        let kinds = self.kinds_for_page(record_id);
        let body = encode_updates(fields, kinds.as_ref());

        self.call(Method::PATCH, &format!("pages/{}", record_id), &body)
            .await?;
        debug!("Updated record {} ({} fields)", record_id, fields.len());
        Ok(())
    }
}
