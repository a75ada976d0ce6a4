//! Configuration infrastructure
//!
//! Configuration is layered with the `config` crate:
//! 1. Built-in defaults (`AppConfig::default()`)
//! 2. Optional TOML file (`config/default.toml` or `--config <path>`)
//! 3. Environment variables, e.g. `CAFE_WATCH__STORE__TOKEN`

#![allow(clippy::derivable_impls)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{BlockRule, Blocklist, FieldMapping, RecencyWindow};

pub const ENV_PREFIX: &str = "CAFE_WATCH";
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

impl ConfigError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub browser: BrowserConfig,
    pub extraction: ExtractionConfig,
    pub accessibility: AccessibilityConfig,
    pub run: RunConfig,
    pub logging: LoggingConfig,

    /// Known-unobservable domains, first match wins
    pub blocklist: Vec<BlockRule>,

    /// Record store collections observed on every run
    pub collections: Vec<CollectionConfig>,
}

/// Notion record store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub api_base: String,

    /// Integration token; supply through `CAFE_WATCH__STORE__TOKEN`
    pub token: String,

    pub notion_version: String,
    pub requests_per_second: u32,
    pub timeout_seconds: u64,
    pub page_size: u32,
}

/// Browser session waits and frame location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    pub user_agent: String,
    pub page_load_timeout_secs: u64,

    /// Selector of the iframe holding the post body
    pub frame_selector: String,
    pub frame_timeout_secs: u64,

    /// Settle delay after switching into the frame
    pub settle_delay_ms: u64,
}

/// Selector chains and marker phrase lists used by the page extractor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub title_selectors: Vec<String>,
    pub comment_selectors: Vec<String>,

    /// Phrases marking a comment as written by the post's author
    pub author_markers: Vec<String>,

    /// Descendant selectors of an author badge inside a comment
    pub author_badge_selectors: Vec<String>,

    /// Attribute checked for author markers as a last resort
    pub author_label_attribute: String,

    /// Dialog phrases meaning the post was removed
    pub deletion_markers: Vec<String>,

    /// Labels preceding the view count in page text
    pub view_labels: Vec<String>,

    /// Labels preceding the comment total in page text
    pub comment_labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessibilityConfig {
    pub enabled: bool,
    pub timeout_seconds: u64,

    /// Redirect targets meaning the post sits behind a login wall
    pub login_markers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub recency_days: u32,
    pub inter_record_delay_ms: u64,
    pub lock_path: PathBuf,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// JSON formatted file logs
    pub json_format: bool,

    pub console_output: bool,
    pub file_output: bool,

    /// Log directory; defaults to `logs/` next to the executable
    pub log_dir: Option<PathBuf>,

    pub file_name: String,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,

    /// Enable automatic log cleanup on startup
    pub auto_cleanup_logs: bool,

    /// Module-specific log level filters (e.g., "reqwest": "warn")
    pub module_filters: HashMap<String, String>,
}

/// One observed collection (Notion database)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    pub database_id: String,
    #[serde(default)]
    pub fields: FieldMapping,
}

pub mod defaults {
    pub const NOTION_API_BASE: &str = "https://api.notion.com/v1";
    pub const NOTION_VERSION: &str = "2022-06-28";
    /// Notion allows an average of three requests per second
    pub const STORE_REQUESTS_PER_SECOND: u32 = 3;
    pub const STORE_TIMEOUT_SECONDS: u64 = 30;
    pub const STORE_PAGE_SIZE: u32 = 100;

    pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
    pub const PAGE_LOAD_TIMEOUT_SECS: u64 = 20;
    pub const FRAME_SELECTOR: &str = "iframe#cafe_main";
    pub const FRAME_TIMEOUT_SECS: u64 = 15;
    pub const SETTLE_DELAY_MS: u64 = 700;

    pub const ACCESSIBILITY_TIMEOUT_SECONDS: u64 = 10;

    pub const RECENCY_DAYS: u32 = 90;
    pub const INTER_RECORD_DELAY_MS: u64 = 600;
    pub const LOCK_PATH: &str = "cafe-watch.lock";

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_FILE_NAME: &str = "cafe-watch.log";
    pub const LOG_MAX_FILES: u32 = 10;
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            browser: BrowserConfig::default(),
            extraction: ExtractionConfig::default(),
            accessibility: AccessibilityConfig::default(),
            run: RunConfig::default(),
            logging: LoggingConfig::default(),
            blocklist: Blocklist::default_rules(),
            collections: Vec::new(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            api_base: defaults::NOTION_API_BASE.to_string(),
            token: String::new(),
            notion_version: defaults::NOTION_VERSION.to_string(),
            requests_per_second: defaults::STORE_REQUESTS_PER_SECOND,
            timeout_seconds: defaults::STORE_TIMEOUT_SECONDS,
            page_size: defaults::STORE_PAGE_SIZE,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::USER_AGENT.to_string(),
            page_load_timeout_secs: defaults::PAGE_LOAD_TIMEOUT_SECS,
            frame_selector: defaults::FRAME_SELECTOR.to_string(),
            frame_timeout_secs: defaults::FRAME_TIMEOUT_SECS,
            settle_delay_ms: defaults::SETTLE_DELAY_MS,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            title_selectors: strings(&["h3.title_text", "strong.title_text", "div.title_text"]),
            comment_selectors: strings(&[
                "li.comment_item",
                "li.CommentItem",
                "div.comment_box li",
                "div.comment_area li",
            ]),
            author_markers: strings(&["작성자"]),
            author_badge_selectors: strings(&["[class*='writer']", "[class*='author']"]),
            author_label_attribute: "aria-label".to_string(),
            deletion_markers: strings(&[
                "삭제",
                "존재하지",
                "removed",
                "does not exist",
                "was deleted",
            ]),
            view_labels: strings(&["조회"]),
            comment_labels: strings(&["댓글"]),
        }
    }
}

impl Default for AccessibilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_seconds: defaults::ACCESSIBILITY_TIMEOUT_SECONDS,
            login_markers: strings(&["nid.naver.com/nidlogin"]),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            recency_days: defaults::RECENCY_DAYS,
            inter_record_delay_ms: defaults::INTER_RECORD_DELAY_MS,
            lock_path: PathBuf::from(defaults::LOCK_PATH),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            log_dir: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: true,
            module_filters: {
                let mut filters = HashMap::new();
                filters.insert("reqwest".to_string(), "warn".to_string());
                filters.insert("hyper".to_string(), "warn".to_string());
                filters.insert("html5ever".to_string(), "warn".to_string());
                filters.insert("selectors".to_string(), "warn".to_string());
                filters
            },
        }
    }
}

impl BrowserConfig {
    pub const fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs)
    }

    pub const fn frame_timeout(&self) -> Duration {
        Duration::from_secs(self.frame_timeout_secs)
    }

    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl RunConfig {
    pub const fn inter_record_delay(&self) -> Duration {
        Duration::from_millis(self.inter_record_delay_ms)
    }

    pub const fn recency_window(&self) -> RecencyWindow {
        RecencyWindow::days(self.recency_days)
    }
}

impl AppConfig {
    /// Load defaults, then `path` (or the default file if present), then env
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file_source = match path {
            Some(path) => config::File::from(path.to_path_buf()).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_PATH).required(false),
        };

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(file_source)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.browser.page_load_timeout_secs == 0 || self.browser.frame_timeout_secs == 0 {
            return Err(ConfigError::validation("browser timeouts must be greater than 0"));
        }

        if self.extraction.comment_selectors.is_empty() {
            return Err(ConfigError::validation("at least one comment selector is required"));
        }

        if self.store.requests_per_second == 0 {
            return Err(ConfigError::validation("store.requests_per_second must be greater than 0"));
        }

        for collection in &self.collections {
            if collection.database_id.trim().is_empty() {
                return Err(ConfigError::validation(format!(
                    "collection '{}' has no database_id",
                    collection.name
                )));
            }
            if collection.fields.url.is_empty() || collection.fields.status.is_empty() {
                return Err(ConfigError::validation(format!(
                    "collection '{}' must map url and status fields",
                    collection.name
                )));
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn blocklist(&self) -> Blocklist {
        Blocklist::new(self.blocklist.clone())
    }

    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&CollectionConfig> {
        self.collections.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.browser.page_load_timeout(), Duration::from_secs(20));
        assert_eq!(config.browser.frame_timeout(), Duration::from_secs(15));
        assert_eq!(config.run.recency_window(), RecencyWindow::days(90));
        assert_eq!(config.blocklist().rules().len(), 5);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[run]
recency_days = 30
inter_record_delay_ms = 100
lock_path = "/tmp/cafe-watch-test.lock"

[[collections]]
name = "강남"
database_id = "db-1"

[collections.fields]
url = "URL"
status = "상태"
total_comments = "댓글"
external_comments = "외부 댓글 수"
views = "조회수"
title = "글 제목"
post_date = "날짜"
last_run = "마지막 수집"
new_activity = "NEW"
refresh_flag = "DB 새로고침"
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.run.recency_days, 30);
        assert_eq!(config.collections.len(), 1);
        let collection = config.collection("강남").unwrap();
        assert_eq!(collection.fields.refresh_flag.as_deref(), Some("DB 새로고침"));
        assert_eq!(collection.fields.status_labels.waiting, "대기");
        // untouched sections keep their defaults
        assert_eq!(config.browser.frame_selector, defaults::FRAME_SELECTOR);
    }

    #[test]
    fn test_collection_without_database_id_is_rejected() {
        let mut config = AppConfig::default();
        config.collections.push(CollectionConfig {
            name: "empty".into(),
            database_id: " ".into(),
            fields: FieldMapping::default(),
        });
        assert!(matches!(config.validate(), Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_empty_comment_selectors_are_rejected() {
        let mut config = AppConfig::default();
        config.extraction.comment_selectors.clear();
        assert!(config.validate().is_err());
    }
}
