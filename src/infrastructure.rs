//! Infrastructure layer for the browser session, the Notion store and the
//! process-level collaborators (configuration, logging, run lock).

pub mod accessibility;
pub mod browser; // Browser driver interface
pub mod config; // Layered configuration
pub mod extraction; // Post page extractor
pub mod html_driver;
pub mod logging;
pub mod notion_store;
pub mod run_lock;

// Re-export commonly used items
pub use accessibility::HttpAccessibilityCheck;
pub use browser::{BrowserDriver, Dialog, DriverError, DriverResult, ElementHandle};
pub use config::{AppConfig, CollectionConfig, ConfigError};
pub use extraction::{ExtractionError, PostExtractor, SelectorChain};
pub use html_driver::{FetchedPage, HtmlPageDriver, HttpPageFetcher, PageFetcher, StaticPageFetcher};
pub use logging::{get_log_directory, init_logging, init_logging_with_config};
pub use notion_store::{NotionRecordStore, StoreError};
pub use run_lock::{LockError, RunLock};
