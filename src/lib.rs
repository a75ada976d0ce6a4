//! Cafe Watch - engagement observer for Naver Cafe posts
//!
//! Observes tracked cafe posts, extracts comment and view counts, and
//! mirrors them into Notion databases, flagging new external comments.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{BatchReport, RunOrchestrator};
pub use infrastructure::AppConfig;
