//! HTTP pre-flight reachability check for cafe posts
//!
//! One GET without following redirects, before a browser session is spent
//! on the post. Login walls and gone/forbidden posts are reported as
//! inaccessible; anything ambiguous is left to the page extractor.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{
    Client, StatusCode,
    header::{HeaderMap, HeaderValue, LOCATION, USER_AGENT},
};
use tracing::debug;

use super::config::AccessibilityConfig;
use crate::domain::AccessibilityCheck;

pub struct HttpAccessibilityCheck {
    client: Client,
    login_markers: Vec<String>,
}

impl HttpAccessibilityCheck {
    pub fn new(config: &AccessibilityConfig, user_agent: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent).context("Invalid user agent")?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create accessibility HTTP client")?;

        Ok(Self {
            client,
            login_markers: config.login_markers.clone(),
        })
    }

    /// Verdict for a response status and its redirect target, if any
    #[must_use]
    pub fn verdict(&self, status: StatusCode, location: Option<&str>) -> bool {
        if status.is_success() {
            return true;
        }
        if status.is_redirection() {
            let to_login = location.is_some_and(|target| {
                self.login_markers
                    .iter()
                    .any(|marker| target.contains(marker.as_str()))
            });
            return !to_login;
        }
        !matches!(
            status,
            StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
                | StatusCode::NOT_FOUND
                | StatusCode::GONE
        )
    }
}

#[async_trait]
impl AccessibilityCheck for HttpAccessibilityCheck {
    async fn is_post_accessible(&self, url: &str) -> Result<bool> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Accessibility check failed for {url}"))?;

        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok());
        let accessible = self.verdict(status, location);

        debug!("Accessibility of {}: {} ({})", url, accessible, status);
        Ok(accessible)
    }
}
