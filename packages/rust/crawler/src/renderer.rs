//! Rendering capability: load a page, wait for content, select elements.
//!
//! The fetcher only needs this minimal surface, so any engine that can
//! produce rendered HTML (a headless browser session, a plain HTTP client,
//! a fixture server) can sit behind [`Renderer`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use scraper::Html;
use tracing::{debug, instrument};
use url::Url;

use quizharvest_shared::{HarvestError, Result, parse_selector};

/// User-Agent string for page requests.
const USER_AGENT: &str = concat!("quizharvest/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Page / element handles
// ---------------------------------------------------------------------------

/// A loaded page and its current rendered HTML.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    url: Url,
    html: String,
}

impl RenderedPage {
    pub fn new(url: Url, html: impl Into<String>) -> Self {
        Self {
            url,
            html: html.into(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn html(&self) -> &str {
        &self.html
    }
}

/// One element matched on a rendered page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedElement {
    outer_html: String,
}

impl RenderedElement {
    pub fn new(outer_html: impl Into<String>) -> Self {
        Self {
            outer_html: outer_html.into(),
        }
    }

    /// The element's outer HTML.
    pub fn raw_html(&self) -> &str {
        &self.outer_html
    }
}

/// Result of waiting for a selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// At least one element matches.
    Ready,
    /// The timeout elapsed with no match.
    TimedOut,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// An exclusive rendering session.
///
/// Methods take `&mut self`: one session serves one page at a time.
#[async_trait]
pub trait Renderer: Send {
    /// Load `url` and return a handle to the rendered page.
    async fn load(&mut self, url: &Url) -> Result<RenderedPage>;

    /// Wait until `selector` matches at least one element, up to `timeout`.
    async fn wait_for(
        &mut self,
        page: &mut RenderedPage,
        selector: &str,
        timeout: Duration,
    ) -> Result<WaitOutcome>;

    /// All elements matching `selector`, in document order.
    fn find_all(&self, page: &RenderedPage, selector: &str) -> Result<Vec<RenderedElement>> {
        select_all(page.html(), selector)
    }
}

/// Outer HTML of every element of `html` matching `selector`.
pub fn select_all(html: &str, selector: &str) -> Result<Vec<RenderedElement>> {
    let sel = parse_selector(selector)?;
    let doc = Html::parse_document(html);
    Ok(doc
        .select(&sel)
        .map(|el| RenderedElement::new(el.html()))
        .collect())
}

fn matches_any(html: &str, selector: &str) -> Result<bool> {
    let sel = parse_selector(selector)?;
    Ok(Html::parse_document(html).select(&sel).next().is_some())
}

// ---------------------------------------------------------------------------
// HttpRenderer
// ---------------------------------------------------------------------------

/// Renderer backed by plain HTTP requests.
///
/// "Rendering" is the server response. While waiting for a selector the page
/// is re-fetched every `poll_interval`, which covers listings that are filled
/// in shortly after the first request.
pub struct HttpRenderer {
    client: Client,
    poll_interval: Duration,
}

impl HttpRenderer {
    /// Create a renderer with the given per-request timeout and poll interval.
    pub fn new(request_timeout: Duration, poll_interval: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(request_timeout)
            .build()
            .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            poll_interval,
        })
    }

    async fn get(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Network(format!("{url}: HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: body read failed: {e}")))
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    #[instrument(skip_all, fields(url = %url))]
    async fn load(&mut self, url: &Url) -> Result<RenderedPage> {
        let html = self.get(url).await?;
        debug!(bytes = html.len(), "page loaded");
        Ok(RenderedPage::new(url.clone(), html))
    }

    async fn wait_for(
        &mut self,
        page: &mut RenderedPage,
        selector: &str,
        timeout: Duration,
    ) -> Result<WaitOutcome> {
        let deadline = Instant::now() + timeout;

        loop {
            if matches_any(page.html(), selector)? {
                return Ok(WaitOutcome::Ready);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;

            debug!(url = %page.url(), selector, "selector not present yet, reloading");
            page.html = self.get(page.url()).await?;
        }
    }
}
