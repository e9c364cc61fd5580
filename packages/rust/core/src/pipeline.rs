//! Run driver: rows → fetch → parse → publish, one unit of work at a time.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use quizharvest_connectivity::ConnectivityGuard;
use quizharvest_crawler::{FetchConfig, FetchReport, Fetcher, Renderer};
use quizharvest_parser::{FieldSelectors, ParseReport, parse_unit};
use quizharvest_publisher::{PublishReport, Publisher, RemoteSink};
use quizharvest_shared::{AppConfig, HarvestError, Result, UnitOfWork};
use quizharvest_storage::{FileCursorStore, HarvestStore, read_record_set};

use crate::rows::load_category_rows;

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// One step of the per-unit pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Parse,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fetch => "fetch",
            Self::Parse => "parse",
            Self::Publish => "publish",
        })
    }
}

/// Which stages a run executes. Stages always run in fetch, parse,
/// publish order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSet {
    fetch: bool,
    parse: bool,
    publish: bool,
}

impl StageSet {
    pub fn all() -> Self {
        Self {
            fetch: true,
            parse: true,
            publish: true,
        }
    }

    pub fn only(stage: Stage) -> Self {
        Self {
            fetch: stage == Stage::Fetch,
            parse: stage == Stage::Parse,
            publish: stage == Stage::Publish,
        }
    }

    pub fn includes(self, stage: Stage) -> bool {
        match stage {
            Stage::Fetch => self.fetch,
            Stage::Parse => self.parse,
            Stage::Publish => self.publish,
        }
    }
}

impl Default for StageSet {
    fn default() -> Self {
        Self::all()
    }
}

// ---------------------------------------------------------------------------
// Reports & progress
// ---------------------------------------------------------------------------

/// What happened to one unit of work.
#[derive(Debug)]
pub struct UnitReport {
    pub unit: UnitOfWork,
    pub fetch: Option<FetchReport>,
    pub parse: Option<ParseReport>,
    pub publish: Option<PublishReport>,
    /// Set when a stage failed and the remaining stages were skipped.
    pub error: Option<String>,
}

impl UnitReport {
    fn new(unit: &UnitOfWork) -> Self {
        Self {
            unit: unit.clone(),
            fetch: None,
            parse: None,
            publish: None,
            error: None,
        }
    }
}

/// Summary of a whole run.
#[derive(Debug)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub units: Vec<UnitReport>,
}

impl RunSummary {
    /// Records newly published across all units.
    pub fn published(&self) -> usize {
        self.units
            .iter()
            .filter_map(|u| u.publish.as_ref())
            .map(|p| p.published)
            .sum()
    }

    /// Units that stopped on an error.
    pub fn failed(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| u.error.is_some())
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a unit enters a stage.
    fn phase(&self, unit: &UnitOfWork, stage: Stage);
    /// Called after a page's items were persisted.
    fn page_fetched(&self, page: u32, items: usize);
    /// Called after each recorded push; `cursor` is the new published count.
    fn record_published(&self, cursor: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _unit: &UnitOfWork, _stage: Stage) {}
    fn page_fetched(&self, _page: u32, _items: usize) {}
    fn record_published(&self, _cursor: usize, _total: usize) {}
    fn done(&self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Everything a run needs, built once per process.
pub struct Pipeline {
    store: HarvestStore,
    fetcher: Fetcher,
    selectors: FieldSelectors,
    publisher: Option<Publisher>,
    config: AppConfig,
    guard: ConnectivityGuard,
    rows_dir: PathBuf,
    categories: Vec<String>,
}

impl Pipeline {
    /// Assemble the fetch and parse stages from config.
    ///
    /// The publish stage needs a sink; see [`with_sink`](Self::with_sink).
    pub fn new(config: &AppConfig, guard: ConnectivityGuard) -> Result<Self> {
        Ok(Self {
            store: HarvestStore::new(&config.defaults.data_dir),
            fetcher: Fetcher::new(FetchConfig::from_app(config)?, guard.clone()),
            selectors: FieldSelectors::site_default()?,
            publisher: None,
            config: config.clone(),
            guard,
            rows_dir: PathBuf::from(&config.defaults.rows_dir),
            categories: config.defaults.categories.clone(),
        })
    }

    /// Enable the publish stage with a sink built once for the process.
    pub fn with_sink(mut self, sink: Arc<dyn RemoteSink>) -> Self {
        self.publisher = Some(Publisher::from_app(sink, self.guard.clone(), &self.config));
        self
    }

    pub fn store(&self) -> &HarvestStore {
        &self.store
    }

    /// Run the selected stages for one unit.
    ///
    /// The first failing stage stops the unit and its error is returned.
    #[instrument(skip_all, fields(unit = %unit))]
    pub async fn run_unit<R: Renderer>(
        &self,
        renderer: &mut R,
        unit: &UnitOfWork,
        stages: StageSet,
        progress: &dyn ProgressReporter,
    ) -> Result<UnitReport> {
        let mut report = UnitReport::new(unit);
        let paths = self.store.ensure_unit(&unit.category, &unit.query)?;

        if stages.includes(Stage::Fetch) {
            progress.phase(unit, Stage::Fetch);
            let fetched = self
                .fetcher
                .fetch_with(renderer, &self.store, unit, &mut |page, items| {
                    progress.page_fetched(page, items)
                })
                .await?;
            report.fetch = Some(fetched);
        }

        if stages.includes(Stage::Parse) {
            progress.phase(unit, Stage::Parse);
            let (paths, selectors) = (paths.clone(), self.selectors.clone());
            let parsed = tokio::task::spawn_blocking(move || parse_unit(&paths, &selectors))
                .await
                .map_err(|e| HarvestError::parse(format!("parse task failed: {e}")))??;
            report.parse = Some(parsed);
        }

        if stages.includes(Stage::Publish) {
            let publisher = self
                .publisher
                .as_ref()
                .ok_or_else(|| HarvestError::config("publish stage requested without a sink"))?;
            progress.phase(unit, Stage::Publish);
            let records = read_record_set(&paths.record_set)?;
            let total = records.len();
            let cursor = FileCursorStore::new(&paths.cursor);
            let published = publisher
                .publish_with(&unit.category, &unit.query, &records, &cursor, &mut |c| {
                    progress.record_published(c, total)
                })
                .await?;
            report.publish = Some(published);
        }

        Ok(report)
    }

    /// Run every row of every configured category, or only `category`.
    ///
    /// A unit that fails is logged and recorded; the run moves on to the
    /// next row.
    pub async fn run_all<R: Renderer>(
        &self,
        renderer: &mut R,
        category: Option<&str>,
        stages: StageSet,
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let started_at = Utc::now();
        let start = Instant::now();

        let categories: Vec<String> = match category {
            Some(c) => vec![c.to_string()],
            None => self.categories.clone(),
        };

        let mut units = Vec::new();
        for category in &categories {
            let rows = load_category_rows(&self.rows_dir, category)?;
            info!(category = %category, units = rows.len(), "processing category");

            for unit in &rows {
                match self.run_unit(renderer, unit, stages, progress).await {
                    Ok(report) => {
                        if let Some(p) = report.publish.as_ref().filter(|p| p.stop.is_paused()) {
                            warn!(unit = %unit, stop = ?p.stop, "publish paused, resumes next run");
                        }
                        info!(unit = %unit, "unit completed");
                        units.push(report);
                    }
                    Err(e) => {
                        error!(unit = %unit, error = %e, "unit failed, moving on");
                        let mut report = UnitReport::new(unit);
                        report.error = Some(e.to_string());
                        units.push(report);
                    }
                }
            }
        }

        let summary = RunSummary {
            started_at,
            elapsed: start.elapsed(),
            units,
        };
        info!(
            units = summary.units.len(),
            failed = summary.failed().count(),
            published = summary.published(),
            elapsed_ms = summary.elapsed.as_millis(),
            "run finished"
        );
        progress.done(&summary);
        Ok(summary)
    }
}
