//! Browser driver interface
//!
//! The page extractor talks to the browser session only through
//! [`BrowserDriver`]. A session is exclusively owned by one caller and its
//! navigation context persists between calls, so every method takes
//! `&mut self`.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout { url: String, timeout: Duration },

    #[error("Frame '{selector}' not available after {timeout:?}")]
    FrameTimeout { selector: String, timeout: Duration },

    #[error("Frame '{selector}' not found in current document")]
    FrameNotFound { selector: String },

    /// A modal dialog interrupted the operation
    #[error("Unexpected dialog: {text}")]
    UnexpectedDialog { text: String },

    #[error("HTTP request failed: {status} - {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid CSS selector: {selector} - {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("No page loaded")]
    NoPage,

    #[error("Stale element handle")]
    StaleElement,
}

impl DriverError {
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::NavigationTimeout { .. } | Self::FrameTimeout { .. })
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// A modal dialog (alert/confirm) currently shown by the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialog {
    pub text: String,
}

/// Driver-defined reference to an element in the current document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(String);

impl ElementHandle {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.0
    }
}

#[async_trait]
pub trait BrowserDriver: Send {
    /// Load `url` in the top-level context, bounded by `timeout`
    async fn navigate(&mut self, url: &str, timeout: Duration) -> DriverResult<()>;

    async fn current_dialog(&mut self) -> DriverResult<Option<Dialog>>;

    async fn accept_dialog(&mut self) -> DriverResult<()>;

    /// Wait up to `timeout` for the frame matching `selector` and enter it
    async fn switch_to_frame(&mut self, selector: &str, timeout: Duration) -> DriverResult<()>;

    /// Return to the top-level browsing context
    async fn switch_to_top(&mut self) -> DriverResult<()>;

    async fn query_elements(&mut self, selector: &str) -> DriverResult<Vec<ElementHandle>>;

    /// Descendants of `element` matching `selector`
    async fn query_within(
        &mut self,
        element: &ElementHandle,
        selector: &str,
    ) -> DriverResult<Vec<ElementHandle>>;

    async fn element_text(&mut self, element: &ElementHandle) -> DriverResult<String>;

    async fn element_attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> DriverResult<Option<String>>;

    /// Rendered text of the current context
    async fn page_text(&mut self) -> DriverResult<String>;
}
