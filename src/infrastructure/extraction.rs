//! Page extractor for cafe posts
//!
//! Drives a [`BrowserDriver`] to a post, handles the platform's modal
//! dialogs, enters the content frame and reads title, view count and
//! comments through ordered selector chains with a page-text fallback.
//! Every failure ends up in the snapshot's terminal signal; nothing is
//! raised to the caller.

#![allow(clippy::uninlined_format_args)]

use std::time::Duration;

use anyhow::{Result, anyhow};
use regex::Regex;
use scraper::Selector;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::browser::{BrowserDriver, DriverError, ElementHandle};
use super::config::{BrowserConfig, ExtractionConfig};
use crate::domain::{CommentSource, CommentTally, MetricsSnapshot};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("Driver fault: {0}")]
    Driver(#[from] DriverError),

    /// A dialog without a deletion marker blocked the page
    #[error("Page blocked by dialog: {text}")]
    BlockingDialog { text: String },
}

/// Candidate selectors tried in order; the first usable result wins
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorChain {
    selectors: Vec<String>,
}

impl SelectorChain {
    /// Validate selector strings, dropping invalid ones with a warning
    pub fn compile(name: &str, candidates: &[String]) -> Result<Self> {
        let mut selectors = Vec::new();
        let mut errors = Vec::new();

        for candidate in candidates {
            match Selector::parse(candidate) {
                Ok(_) => selectors.push(candidate.clone()),
                Err(e) => {
                    warn!("Failed to compile {} selector '{}': {}", name, candidate, e);
                    errors.push(format!("'{}': {}", candidate, e));
                }
            }
        }

        if selectors.is_empty() && !candidates.is_empty() {
            return Err(anyhow!(
                "No valid {} selectors compiled from {} attempts. Errors: {}",
                name,
                candidates.len(),
                errors.join(", ")
            ));
        }

        Ok(Self { selectors })
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.selectors.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }
}

/// `<label> 1,234` patterns, one per label
fn label_patterns(labels: &[String]) -> Result<Vec<Regex>> {
    labels
        .iter()
        .filter(|label| !label.trim().is_empty())
        .map(|label| {
            Regex::new(&format!(r"{}\s*([0-9][0-9,]*)", regex::escape(label.trim())))
                .map_err(|e| anyhow!("Invalid count label '{}': {}", label, e))
        })
        .collect()
}

/// First labeled count found in `text`; thousands separators are ignored
pub fn labeled_count(patterns: &[Regex], text: &str) -> Option<u64> {
    patterns.iter().find_map(|pattern| {
        let digits = pattern.captures(text)?.get(1)?.as_str().replace(',', "");
        digits.parse().ok()
    })
}

pub struct PostExtractor {
    page_load_timeout: Duration,
    frame_selector: String,
    frame_timeout: Duration,
    settle_delay: Duration,
    title_selectors: SelectorChain,
    comment_selectors: SelectorChain,
    author_markers: Vec<String>,
    author_badge_selectors: SelectorChain,
    author_label_attribute: String,
    deletion_markers: Vec<String>,
    view_patterns: Vec<Regex>,
    comment_patterns: Vec<Regex>,
}

impl PostExtractor {
    pub fn new(browser: &BrowserConfig, extraction: &ExtractionConfig) -> Result<Self> {
        Selector::parse(&browser.frame_selector)
            .map_err(|e| anyhow!("Invalid frame selector '{}': {}", browser.frame_selector, e))?;

        Ok(Self {
            page_load_timeout: browser.page_load_timeout(),
            frame_selector: browser.frame_selector.clone(),
            frame_timeout: browser.frame_timeout(),
            settle_delay: browser.settle_delay(),
            title_selectors: SelectorChain::compile("title", &extraction.title_selectors)?,
            comment_selectors: SelectorChain::compile("comment", &extraction.comment_selectors)?,
            author_markers: non_empty(&extraction.author_markers),
            author_badge_selectors: SelectorChain::compile(
                "author badge",
                &extraction.author_badge_selectors,
            )?,
            author_label_attribute: extraction.author_label_attribute.clone(),
            deletion_markers: non_empty(&extraction.deletion_markers),
            view_patterns: label_patterns(&extraction.view_labels)?,
            comment_patterns: label_patterns(&extraction.comment_labels)?,
        })
    }

    /// Observe the post at `url`.
    ///
    /// The driver is always returned to the top-level context before this
    /// returns, whatever the outcome.
    pub async fn extract(&self, driver: &mut dyn BrowserDriver, url: &str) -> MetricsSnapshot {
        let outcome = match self.observe(driver, url).await {
            Err(ExtractionError::Driver(DriverError::UnexpectedDialog { text })) => {
                self.resolve_dialog(driver, text).await
            }
            other => other,
        };

        if let Err(e) = driver.switch_to_top().await {
            warn!("Failed to reset browser context after {}: {}", url, e);
        }

        match outcome {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Extraction failed for {}: {}", url, e);
                MetricsSnapshot::transient_error()
            }
        }
    }

    async fn observe(
        &self,
        driver: &mut dyn BrowserDriver,
        url: &str,
    ) -> Result<MetricsSnapshot, ExtractionError> {
        debug!("Navigating to {}", url);
        driver.navigate(url, self.page_load_timeout).await?;

        if let Some(dialog) = driver.current_dialog().await? {
            return self.resolve_dialog(driver, dialog.text).await;
        }

        driver
            .switch_to_frame(&self.frame_selector, self.frame_timeout)
            .await?;
        if let Some(dialog) = driver.current_dialog().await? {
            return self.resolve_dialog(driver, dialog.text).await;
        }
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let title = self.extract_title(driver).await;
        let page_text = driver.page_text().await?;
        let view_count = labeled_count(&self.view_patterns, &page_text).unwrap_or(0);
        let (comments, source) = self.extract_comments(driver, &page_text).await;

        info!(
            "Observed {}: title='{}' comments={}/{} views={} ({:?})",
            url,
            title,
            comments.external(),
            comments.total(),
            view_count,
            source
        );
        Ok(MetricsSnapshot::observed(title, comments, view_count, source))
    }

    /// Dismiss the dialog and decide between deletion and a blocked page
    async fn resolve_dialog(
        &self,
        driver: &mut dyn BrowserDriver,
        text: String,
    ) -> Result<MetricsSnapshot, ExtractionError> {
        if let Err(e) = driver.accept_dialog().await {
            debug!("Failed to dismiss dialog: {}", e);
        }

        if self.is_deletion_notice(&text) {
            info!("Post reported as deleted: {}", text);
            return Ok(MetricsSnapshot::deleted());
        }
        Err(ExtractionError::BlockingDialog { text })
    }

    #[must_use]
    pub fn is_deletion_notice(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.deletion_markers
            .iter()
            .any(|marker| lowered.contains(&marker.to_lowercase()))
    }

    async fn extract_title(&self, driver: &mut dyn BrowserDriver) -> String {
        for (i, selector) in self.title_selectors.iter().enumerate() {
            let Ok(elements) = driver.query_elements(selector).await else {
                continue;
            };
            let Some(element) = elements.first() else {
                continue;
            };
            if let Ok(text) = driver.element_text(element).await {
                let text = text.trim();
                if !text.is_empty() {
                    debug!("Extracted title using selector {}: {}", i, text);
                    return text.to_string();
                }
            }
        }

        debug!("Failed to extract title using {} selectors", self.title_selectors.len());
        String::new()
    }

    async fn extract_comments(
        &self,
        driver: &mut dyn BrowserDriver,
        page_text: &str,
    ) -> (CommentTally, CommentSource) {
        for selector in self.comment_selectors.iter() {
            let elements = match driver.query_elements(selector).await {
                Ok(elements) if !elements.is_empty() => elements,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Comment selector '{}' failed: {}", selector, e);
                    continue;
                }
            };

            let mut authorship = Vec::with_capacity(elements.len());
            for element in &elements {
                let by_author = self.is_author_comment(driver, element).await.unwrap_or_else(|e| {
                    debug!("Author check failed, counting comment as external: {}", e);
                    false
                });
                authorship.push(by_author);
            }

            return (
                CommentTally::from_authorship(authorship),
                CommentSource::Dom {
                    selector: selector.to_string(),
                },
            );
        }

        match labeled_count(&self.comment_patterns, page_text) {
            Some(total) => {
                debug!("Comment list not found, using labeled total {}", total);
                (CommentTally::undifferentiated(total), CommentSource::TextFallback)
            }
            None => (CommentTally::default(), CommentSource::NotFound),
        }
    }

    /// Text marker, then badge element, then accessibility label
    async fn is_author_comment(
        &self,
        driver: &mut dyn BrowserDriver,
        element: &ElementHandle,
    ) -> Result<bool, DriverError> {
        let text = driver.element_text(element).await?;
        if self.has_author_marker(&text) {
            return Ok(true);
        }

        for badge in self.author_badge_selectors.iter() {
            if !driver.query_within(element, badge).await?.is_empty() {
                return Ok(true);
            }
        }

        let label = driver
            .element_attribute(element, &self.author_label_attribute)
            .await?;
        Ok(label.is_some_and(|label| self.has_author_marker(&label)))
    }

    fn has_author_marker(&self, text: &str) -> bool {
        self.author_markers.iter().any(|marker| text.contains(marker.as_str()))
    }
}

fn non_empty(values: &[String]) -> Vec<String> {
    values
        .iter()
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .collect()
}
