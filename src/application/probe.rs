//! Single-URL probe
//!
//! Runs the gates and the extractor against one URL without reading from
//! or writing to the record store. Used to check selectors and markers
//! against a live post.

use serde::Serialize;
use tracing::warn;

use crate::domain::{AccessibilityCheck, BlockClassification, Blocklist, MetricsSnapshot};
use crate::infrastructure::browser::BrowserDriver;
use crate::infrastructure::extraction::PostExtractor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub url: String,
    pub blocked_reason: Option<String>,
    /// `None` when the check was not run or could not be performed
    pub accessible: Option<bool>,
    pub snapshot: Option<MetricsSnapshot>,
}

pub async fn probe(
    driver: &mut dyn BrowserDriver,
    extractor: &PostExtractor,
    blocklist: &Blocklist,
    accessibility: &dyn AccessibilityCheck,
    url: &str,
) -> ProbeReport {
    let mut report = ProbeReport {
        url: url.to_string(),
        blocked_reason: None,
        accessible: None,
        snapshot: None,
    };

    if let BlockClassification::Blocked { reason } = blocklist.classify(url) {
        report.blocked_reason = Some(reason);
        return report;
    }

    match accessibility.is_post_accessible(url).await {
        Ok(accessible) => report.accessible = Some(accessible),
        Err(e) => warn!("Accessibility check failed for {}: {:#}", url, e),
    }
    if report.accessible == Some(false) {
        return report;
    }

    report.snapshot = Some(extractor.extract(driver, url).await);
    report
}
