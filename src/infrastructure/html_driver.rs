//! Static HTML browser driver
//!
//! Implements [`BrowserDriver`] over fetched HTML documents: pages are
//! fetched through a [`PageFetcher`], frames are followed by fetching the
//! iframe's `src`, and a JavaScript `alert("...")` in the document's scripts
//! is surfaced as the page's modal dialog. Element handles are the element's
//! outer HTML, so they stay valid independently of the current document.
//!
//! `scraper::Html` is not `Send`; documents are kept as strings and parsed
//! inside synchronous helpers so no parsed tree is held across an await.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{
    Client,
    header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT},
};
use scraper::{ElementRef, Html, Selector};
use tokio::sync::Mutex;
use tracing::{debug, trace};
use url::Url;

use super::browser::{BrowserDriver, Dialog, DriverError, DriverResult, ElementHandle};

/// A fetched document and the URL it was finally served from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub body: String,
}

/// Source of HTML documents for [`HtmlPageDriver`]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> DriverResult<FetchedPage>;
}

/// Fetches documents over HTTP with a browser-like user agent
pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("ko-KR,ko;q=0.9,en;q=0.8"));

        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> DriverResult<FetchedPage> {
        debug!("Fetching URL: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DriverError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DriverError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| DriverError::Network(e.to_string()))?;

        Ok(FetchedPage { url: final_url, body })
    }
}

#[derive(Debug, Clone)]
enum CannedResponse {
    Page { body: String, delay: Duration },
    Failure(DriverError),
}

/// Serves canned documents keyed by URL; unknown URLs fail with a 404
#[derive(Debug, Clone, Default)]
pub struct StaticPageFetcher {
    pages: Arc<Mutex<HashMap<String, CannedResponse>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StaticPageFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, url: impl Into<String>, body: impl Into<String>) {
        self.insert_delayed(url, body, Duration::ZERO).await;
    }

    /// Serve `body` only after `delay`, to exercise load timeouts
    pub async fn insert_delayed(
        &self,
        url: impl Into<String>,
        body: impl Into<String>,
        delay: Duration,
    ) {
        self.pages.lock().await.insert(
            url.into(),
            CannedResponse::Page {
                body: body.into(),
                delay,
            },
        );
    }

    pub async fn insert_failure(&self, url: impl Into<String>, error: DriverError) {
        self.pages
            .lock()
            .await
            .insert(url.into(), CannedResponse::Failure(error));
    }

    /// URLs requested so far, in order
    pub async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl PageFetcher for StaticPageFetcher {
    async fn fetch(&self, url: &str) -> DriverResult<FetchedPage> {
        self.requests.lock().await.push(url.to_string());
        let canned = self.pages.lock().await.get(url).cloned();

        match canned {
            Some(CannedResponse::Page { body, delay }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(FetchedPage {
                    url: url.to_string(),
                    body,
                })
            }
            Some(CannedResponse::Failure(error)) => Err(error),
            None => Err(DriverError::HttpStatus {
                status: 404,
                url: url.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
struct Document {
    url: String,
    html: String,
}

/// Browser session over fetched HTML
pub struct HtmlPageDriver<F: PageFetcher> {
    fetcher: F,
    top: Option<Document>,
    current: Option<Document>,
    dialog: Option<Dialog>,
    alert_pattern: Regex,
}

impl<F: PageFetcher> HtmlPageDriver<F> {
    pub fn new(fetcher: F) -> anyhow::Result<Self> {
        Ok(Self {
            fetcher,
            top: None,
            current: None,
            dialog: None,
            // alert("...") or alert('...'); escaped quotes are allowed inside
            alert_pattern: Regex::new(
                r#"\balert\s*\(\s*(?:"((?:[^"\\]|\\.)*)"|'((?:[^'\\]|\\.)*)')\s*\)"#,
            )?,
        })
    }

    pub const fn fetcher(&self) -> &F {
        &self.fetcher
    }

    fn current_document(&self) -> DriverResult<&Document> {
        if let Some(dialog) = &self.dialog {
            return Err(DriverError::UnexpectedDialog {
                text: dialog.text.clone(),
            });
        }
        self.current.as_ref().ok_or(DriverError::NoPage)
    }

    async fn fetch_within(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Option<DriverResult<FetchedPage>> {
        tokio::time::timeout(timeout, self.fetcher.fetch(url)).await.ok()
    }

    /// Text of the first `alert(...)` that runs when its script loads.
    ///
    /// Calls nested in a block, argument list or function body are handlers
    /// that may never fire and are ignored.
    fn find_alert(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let script = Selector::parse("script").ok()?;

        document.select(&script).find_map(|element| {
            let code = element.text().collect::<String>();
            self.alert_pattern.captures_iter(&code).find_map(|captures| {
                let call = captures.get(0)?;
                if !runs_at_top_level(&code, call.start()) {
                    trace!("Ignoring nested alert at offset {}", call.start());
                    return None;
                }
                let raw = captures.get(1).or_else(|| captures.get(2))?.as_str();
                Some(unescape_js(raw))
            })
        })
    }
}

/// Whether `offset` in `code` lies outside every bracket, string and comment
fn runs_at_top_level(code: &str, offset: usize) -> bool {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut line_comment = false;
    let mut block_comment = false;
    let mut chars = code[..offset].chars().peekable();

    while let Some(c) = chars.next() {
        if line_comment {
            line_comment = c != '\n';
            continue;
        }
        if block_comment {
            if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                block_comment = false;
            }
            continue;
        }
        if let Some(q) = quote {
            if c == '\\' {
                chars.next();
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '/' if chars.peek() == Some(&'/') => line_comment = true,
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                block_comment = true;
            }
            '{' | '(' | '[' => depth += 1,
            '}' | ')' | ']' => depth -= 1,
            _ => {}
        }
    }

    depth == 0 && quote.is_none() && !line_comment && !block_comment
}

fn unescape_js(raw: &str) -> String {
    raw.replace("\\n", "\n")
        .replace("\\\"", "\"")
        .replace("\\'", "'")
        .replace("\\\\", "\\")
}

fn parse_selector(selector: &str) -> DriverResult<Selector> {
    Selector::parse(selector).map_err(|e| DriverError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// The single element a handle's fragment was built from
fn fragment_element(fragment: &Html) -> Option<ElementRef<'_>> {
    fragment
        .root_element()
        .children()
        .find_map(ElementRef::wrap)
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Visible text of a document, script and style bodies excluded
fn visible_text(document: &Html) -> String {
    document
        .root_element()
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let parent = node.parent().and_then(ElementRef::wrap)?;
            let hidden = matches!(parent.value().name(), "script" | "style" | "noscript");
            (!hidden).then(|| text.trim().to_string())
        })
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn frame_source(html: &str, selector: &str) -> DriverResult<Option<String>> {
    let selector_parsed = parse_selector(selector)?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&selector_parsed)
        .next()
        .and_then(|frame| frame.value().attr("src"))
        .map(str::to_string))
}

#[async_trait]
impl<F: PageFetcher> BrowserDriver for HtmlPageDriver<F> {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> DriverResult<()> {
        self.top = None;
        self.current = None;
        self.dialog = None;

        let page = self
            .fetch_within(url, timeout)
            .await
            .ok_or_else(|| DriverError::NavigationTimeout {
                url: url.to_string(),
                timeout,
            })??;

        self.dialog = self.find_alert(&page.body).map(|text| Dialog { text });
        let document = Document {
            url: page.url,
            html: page.body,
        };
        self.top = Some(document.clone());
        self.current = Some(document);
        Ok(())
    }

    async fn current_dialog(&mut self) -> DriverResult<Option<Dialog>> {
        Ok(self.dialog.clone())
    }

    async fn accept_dialog(&mut self) -> DriverResult<()> {
        if let Some(dialog) = self.dialog.take() {
            trace!("Accepted dialog: {}", dialog.text);
        }
        Ok(())
    }

    async fn switch_to_frame(&mut self, selector: &str, timeout: Duration) -> DriverResult<()> {
        let document = self.current_document()?;
        let base_url = document.url.clone();

        let src = frame_source(&document.html, selector)?.ok_or_else(|| DriverError::FrameNotFound {
            selector: selector.to_string(),
        })?;

        let frame_url = Url::parse(&base_url)
            .and_then(|base| base.join(&src))
            .map_err(|e| DriverError::Network(format!("invalid frame url '{src}': {e}")))?;

        let page = self
            .fetch_within(frame_url.as_str(), timeout)
            .await
            .ok_or_else(|| DriverError::FrameTimeout {
                selector: selector.to_string(),
                timeout,
            })??;

        self.dialog = self.find_alert(&page.body).map(|text| Dialog { text });
        self.current = Some(Document {
            url: page.url,
            html: page.body,
        });
        Ok(())
    }

    async fn switch_to_top(&mut self) -> DriverResult<()> {
        self.current.clone_from(&self.top);
        Ok(())
    }

    async fn query_elements(&mut self, selector: &str) -> DriverResult<Vec<ElementHandle>> {
        let selector = parse_selector(selector)?;
        let document = Html::parse_document(&self.current_document()?.html);
        Ok(document
            .select(&selector)
            .map(|element| ElementHandle::new(element.html()))
            .collect())
    }

    async fn query_within(
        &mut self,
        element: &ElementHandle,
        selector: &str,
    ) -> DriverResult<Vec<ElementHandle>> {
        let selector = parse_selector(selector)?;
        let fragment = Html::parse_fragment(element.key());
        let root = fragment_element(&fragment).ok_or(DriverError::StaleElement)?;
        Ok(root
            .select(&selector)
            .map(|child| ElementHandle::new(child.html()))
            .collect())
    }

    async fn element_text(&mut self, element: &ElementHandle) -> DriverResult<String> {
        let fragment = Html::parse_fragment(element.key());
        let root = fragment_element(&fragment).ok_or(DriverError::StaleElement)?;
        Ok(normalize_whitespace(&root.text().collect::<Vec<_>>().join(" ")))
    }

    async fn element_attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> DriverResult<Option<String>> {
        let fragment = Html::parse_fragment(element.key());
        let root = fragment_element(&fragment).ok_or(DriverError::StaleElement)?;
        Ok(root.value().attr(name).map(str::to_string))
    }

    async fn page_text(&mut self) -> DriverResult<String> {
        let document = Html::parse_document(&self.current_document()?.html);
        Ok(visible_text(&document))
    }
}
