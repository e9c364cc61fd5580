//! Paginated fetch engine.
//!
//! Walks the page range of one (category, query), loads each page through a
//! [`Renderer`], and persists every item block as a raw item file. Pages are
//! fetched strictly one after another: the renderer is an exclusive session
//! and item numbering continues across pages and across fetch runs.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};
use url::Url;

use quizharvest_connectivity::ConnectivityGuard;
use quizharvest_shared::{
    AppConfig, HarvestError, PageRequest, Result, StepOutcome, UnitOfWork,
};
use quizharvest_storage::{HarvestStore, RawItemLog};

use crate::renderer::{Renderer, WaitOutcome};

// ---------------------------------------------------------------------------
// Config & report
// ---------------------------------------------------------------------------

/// Runtime fetch configuration, merged from the config file and CLI flags.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Site root that page paths are appended to.
    pub base_url: Url,
    /// CSS selector of one item block.
    pub item_selector: String,
    /// Upper bound on waiting for the first item block of a page.
    pub wait_timeout: Duration,
    /// Pause after a failed page before moving on.
    pub page_backoff: Duration,
    /// Probe connectivity before every page instead of once per fetch.
    pub check_every_page: bool,
}

impl FetchConfig {
    pub fn from_app(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.source.base_url()?,
            item_selector: config.source.item_selector.clone(),
            wait_timeout: config.source.wait_timeout(),
            page_backoff: config.retry.page_backoff(),
            check_every_page: config.connectivity.check_every_page,
        })
    }
}

/// A page that failed and was skipped.
#[derive(Debug, Clone)]
pub struct PageFailure {
    pub page_index: u32,
    pub url: String,
    pub error: String,
}

/// Summary of one fetch call.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    /// Pages whose item blocks were all persisted.
    pub pages_ok: usize,
    /// Pages that failed and were skipped.
    pub failures: Vec<PageFailure>,
    /// Raw item files written by this run.
    pub items_written: u64,
    /// Item blocks skipped because an earlier run already stored them.
    pub items_known: u64,
    /// Wall-clock duration of the fetch.
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Fetches a page range and persists raw items.
pub struct Fetcher {
    config: FetchConfig,
    guard: ConnectivityGuard,
}

impl Fetcher {
    pub fn new(config: FetchConfig, guard: ConnectivityGuard) -> Self {
        Self { config, guard }
    }

    /// Fetch every page of `unit` into its unit directory.
    ///
    /// A failing page is logged, followed by the page backoff, and skipped.
    /// Only unrecoverable problems (an unusable base number, a storage write
    /// failure, an invalid selector) abort the fetch.
    pub async fn fetch<R: Renderer>(
        &self,
        renderer: &mut R,
        store: &HarvestStore,
        unit: &UnitOfWork,
    ) -> Result<FetchReport> {
        self.fetch_with(renderer, store, unit, &mut |_, _| {}).await
    }

    /// Like [`fetch`](Self::fetch), calling `on_page(page_index, items)`
    /// after each page whose items were persisted, with the count of items
    /// new to this unit.
    #[instrument(skip_all, fields(unit = %unit, pages = ?unit.pages()))]
    pub async fn fetch_with<R: Renderer>(
        &self,
        renderer: &mut R,
        store: &HarvestStore,
        unit: &UnitOfWork,
        on_page: &mut (dyn FnMut(u32, usize) + Send),
    ) -> Result<FetchReport> {
        let start = Instant::now();
        let paths = store.ensure_unit(&unit.category, &unit.query)?;
        let mut log = RawItemLog::open(&paths.dir)?;

        self.guard.wait_until_online().await?;

        info!(
            base_number = %unit.base_number,
            start_page = unit.start_page,
            end_page = unit.end_page,
            first_index = log.next_index(),
            "starting fetch"
        );

        let mut report = FetchReport::default();

        for request in unit.requests() {
            match self.fetch_page(renderer, &request, &mut log).await {
                StepOutcome::Ok(items) => {
                    info!(
                        page = request.page_index,
                        new = items.written,
                        known = items.known,
                        "page fetched"
                    );
                    report.pages_ok += 1;
                    report.items_written += items.written as u64;
                    report.items_known += items.known as u64;
                    on_page(request.page_index, items.written);
                }
                StepOutcome::Dropped(reason) => {
                    debug!(page = request.page_index, %reason, "page skipped");
                }
                StepOutcome::Retryable(e) => {
                    let url = request
                        .url(&self.config.base_url)
                        .map(|u| u.to_string())
                        .unwrap_or_default();
                    error!(
                        page = request.page_index,
                        %url,
                        error = %e,
                        retry_in_secs = self.config.page_backoff.as_secs(),
                        "page failed, moving on"
                    );
                    report.failures.push(PageFailure {
                        page_index: request.page_index,
                        url,
                        error: e.to_string(),
                    });
                    tokio::time::sleep(self.config.page_backoff).await;
                }
                StepOutcome::Fatal(e) => {
                    error!(page = request.page_index, error = %e, "fetch aborted");
                    return Err(e);
                }
            }
        }

        report.duration = start.elapsed();

        info!(
            pages_ok = report.pages_ok,
            pages_failed = report.failures.len(),
            items = report.items_written,
            known = report.items_known,
            duration_ms = report.duration.as_millis(),
            "fetch completed"
        );

        Ok(report)
    }

    /// Load one page and append its item blocks to `log`.
    async fn fetch_page<R: Renderer>(
        &self,
        renderer: &mut R,
        request: &PageRequest,
        log: &mut RawItemLog,
    ) -> StepOutcome<PageItems> {
        let url = match request.url(&self.config.base_url) {
            Ok(url) => url,
            Err(e) => return StepOutcome::Fatal(e),
        };

        if self.config.check_every_page {
            if let Err(e) = self.guard.wait_until_online().await {
                return StepOutcome::Retryable(e);
            }
        }

        debug!(%url, page = request.page_index, "loading page");
        let mut page = match renderer.load(&url).await {
            Ok(page) => page,
            Err(e) => return StepOutcome::from_error(e),
        };

        match renderer
            .wait_for(&mut page, &self.config.item_selector, self.config.wait_timeout)
            .await
        {
            Ok(WaitOutcome::Ready) => {}
            Ok(WaitOutcome::TimedOut) => {
                return StepOutcome::Retryable(HarvestError::Render(format!(
                    "{url}: no {} within {}s",
                    self.config.item_selector,
                    self.config.wait_timeout.as_secs()
                )));
            }
            Err(e) => return StepOutcome::from_error(e),
        }

        let elements = match renderer.find_all(&page, &self.config.item_selector) {
            Ok(elements) => elements,
            Err(e) => return StepOutcome::from_error(e),
        };
        if elements.is_empty() {
            warn!(%url, "items disappeared after wait");
        }

        let mut items = PageItems::default();
        for element in &elements {
            match log.append(element.raw_html()) {
                Ok(Some(_)) => items.written += 1,
                Ok(None) => items.known += 1,
                Err(e) => return StepOutcome::Fatal(e),
            }
        }

        StepOutcome::Ok(items)
    }
}

/// Item blocks of one page, split by whether they were new.
#[derive(Debug, Default, Clone, Copy)]
struct PageItems {
    written: usize,
    known: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use quizharvest_connectivity::ReachabilityProbe;
    use quizharvest_storage::{list_raw_items, read_raw_item};

    use crate::renderer::{HttpRenderer, RenderedPage};

    fn test_root() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("qh-fetch-{}", uuid::Uuid::now_v7()))
    }

    fn config(base_url: &str) -> FetchConfig {
        FetchConfig {
            base_url: Url::parse(base_url).unwrap(),
            item_selector: ".bix-div-container".into(),
            wait_timeout: Duration::from_millis(20),
            page_backoff: Duration::ZERO,
            check_every_page: false,
        }
    }

    fn unit(start: u32, end: u32) -> UnitOfWork {
        UnitOfWork {
            category: "aptitude".into(),
            query: "trains".into(),
            base_number: "00100".into(),
            start_page: start,
            end_page: end,
        }
    }

    fn listing(items: &[&str]) -> String {
        let blocks: String = items
            .iter()
            .map(|i| format!(r#"<div class="bix-div-container">{i}</div>"#))
            .collect();
        format!("<html><body>{blocks}</body></html>")
    }

    /// Serves canned HTML per URL path; unknown paths fail like a dropped connection.
    struct ScriptedRenderer {
        pages: HashMap<String, String>,
        loaded: Vec<String>,
    }

    #[async_trait]
    impl Renderer for ScriptedRenderer {
        async fn load(&mut self, url: &Url) -> Result<RenderedPage> {
            self.loaded.push(url.path().to_string());
            match self.pages.get(url.path()) {
                Some(html) => Ok(RenderedPage::new(url.clone(), html.clone())),
                None => Err(HarvestError::Network(format!("{url}: connection reset"))),
            }
        }

        async fn wait_for(
            &mut self,
            page: &mut RenderedPage,
            selector: &str,
            _timeout: Duration,
        ) -> Result<WaitOutcome> {
            Ok(if self.find_all(page, selector)?.is_empty() {
                WaitOutcome::TimedOut
            } else {
                WaitOutcome::Ready
            })
        }
    }

    #[tokio::test]
    async fn sequence_continues_across_pages_and_skips_failures() {
        let root = test_root();
        let store = HarvestStore::new(&root);
        let mut renderer = ScriptedRenderer {
            pages: HashMap::from([
                ("/aptitude/trains/001008".to_string(), listing(&["a", "b"])),
                // 001009 missing: network failure
                ("/aptitude/trains/001010".to_string(), listing(&[])), // times out
                ("/aptitude/trains/001011".to_string(), listing(&["c"])),
                ("/aptitude/trains/001012".to_string(), listing(&["d", "e"])),
            ]),
            loaded: Vec::new(),
        };

        let fetcher = Fetcher::new(config("https://quiz.example.com"), ConnectivityGuard::disabled());
        let report = fetcher.fetch(&mut renderer, &store, &unit(8, 12)).await.unwrap();

        assert_eq!(
            renderer.loaded,
            [
                "/aptitude/trains/001008",
                "/aptitude/trains/001009",
                "/aptitude/trains/001010",
                "/aptitude/trains/001011",
                "/aptitude/trains/001012",
            ]
        );
        assert_eq!(report.pages_ok, 3);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].page_index, 9);
        assert!(report.failures[0].url.ends_with("/001009"));
        assert_eq!(report.failures[1].page_index, 10);
        assert_eq!(report.items_written, 5);

        let dir = store.unit("aptitude", "trains").dir;
        let items = list_raw_items(&dir).unwrap();
        let indices: Vec<u64> = items.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, [0, 1, 2, 3, 4]);
        let third = read_raw_item(2, &items[2].1).unwrap();
        assert!(third.content.contains(">c<"));

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn refetch_appends_after_existing_items() {
        let root = test_root();
        let store = HarvestStore::new(&root);
        let fetcher = Fetcher::new(config("https://quiz.example.com"), ConnectivityGuard::disabled());
        let mut renderer = ScriptedRenderer {
            // Page 1 is down on the first run.
            pages: HashMap::from([(
                "/aptitude/trains/001002".to_string(),
                listing(&["p2a", "p2b"]),
            )]),
            loaded: Vec::new(),
        };

        let first = fetcher.fetch(&mut renderer, &store, &unit(1, 2)).await.unwrap();
        assert_eq!(first.items_written, 2);
        assert_eq!(first.failures.len(), 1);

        renderer
            .pages
            .insert("/aptitude/trains/001001".to_string(), listing(&["p1a", "p1b"]));
        let second = fetcher.fetch(&mut renderer, &store, &unit(1, 2)).await.unwrap();
        assert_eq!(second.items_written, 2);
        assert_eq!(second.items_known, 2);
        assert!(second.failures.is_empty());

        let dir = store.unit("aptitude", "trains").dir;
        let contents: Vec<String> = list_raw_items(&dir)
            .unwrap()
            .into_iter()
            .map(|(i, p)| read_raw_item(i, &p).unwrap().content)
            .collect();
        assert_eq!(contents.len(), 4);
        for (content, expected) in contents.iter().zip(["p2a", "p2b", "p1a", "p1b"]) {
            assert!(content.contains(&format!(">{expected}<")), "{content}");
        }

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn non_numeric_base_aborts_past_page_nine() {
        let root = test_root();
        let store = HarvestStore::new(&root);
        let mut renderer = ScriptedRenderer {
            pages: HashMap::new(),
            loaded: Vec::new(),
        };
        let mut bad = unit(10, 11);
        bad.base_number = "abc".into();

        let fetcher = Fetcher::new(config("https://quiz.example.com"), ConnectivityGuard::disabled());
        let err = fetcher.fetch(&mut renderer, &store, &bad).await.unwrap_err();
        assert!(matches!(err, HarvestError::Config { .. }));
        assert!(renderer.loaded.is_empty());

        std::fs::remove_dir_all(&root).ok();
    }

    struct CountingProbe(AtomicU32);

    #[async_trait]
    impl ReachabilityProbe for CountingProbe {
        async fn is_reachable(&self) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[tokio::test]
    async fn strict_mode_probes_before_every_page() {
        let root = test_root();
        let store = HarvestStore::new(&root);
        let probe = Arc::new(CountingProbe(AtomicU32::new(0)));
        let guard = ConnectivityGuard::new(probe.clone(), Duration::ZERO);
        let mut renderer = ScriptedRenderer {
            pages: HashMap::from([
                ("/aptitude/trains/001001".to_string(), listing(&["a"])),
                ("/aptitude/trains/001002".to_string(), listing(&["b"])),
            ]),
            loaded: Vec::new(),
        };

        let mut cfg = config("https://quiz.example.com");
        cfg.check_every_page = true;
        Fetcher::new(cfg, guard)
            .fetch(&mut renderer, &store, &unit(1, 2))
            .await
            .unwrap();

        // Once before starting, then once per page.
        assert_eq!(probe.0.load(Ordering::SeqCst), 3);
        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn fetch_over_http_with_mock_server() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/aptitude/trains/001001"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&["q1", "q2"])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/aptitude/trains/001002"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let root = test_root();
        let store = HarvestStore::new(&root);
        let mut renderer =
            HttpRenderer::new(Duration::from_secs(5), Duration::from_millis(5)).unwrap();
        let fetcher = Fetcher::new(config(&server.uri()), ConnectivityGuard::disabled());

        let report = fetcher.fetch(&mut renderer, &store, &unit(1, 2)).await.unwrap();
        assert_eq!(report.pages_ok, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.items_written, 2);

        std::fs::remove_dir_all(&root).ok();
    }
}
