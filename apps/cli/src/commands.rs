//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

use quizharvest_connectivity::{ConnectivityGuard, TcpProbe};
use quizharvest_core::{Pipeline, ProgressReporter, RunSummary, Stage, StageSet, UnitReport};
use quizharvest_crawler::HttpRenderer;
use quizharvest_publisher::build_sink;
use quizharvest_shared::{
    AppConfig, SinkKind, UnitOfWork, config_file_path, init_config, load_config,
    load_config_from,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// quizharvest: harvest quiz questions and publish each one exactly once.
#[derive(Parser)]
#[command(
    name = "quizharvest",
    version,
    about = "Crawl paginated quiz listings, normalize the questions, and publish them incrementally.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.quizharvest/quizharvest.toml.
    #[arg(long, global = true, env = "QUIZHARVEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override `defaults.data_dir`.
    #[arg(long, global = true)]
    pub data_dir: Option<String>,

    /// Override `sink.kind`.
    #[arg(long, global = true)]
    pub sink: Option<SinkArg>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Sink selection on the command line.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum SinkArg {
    Firebase,
    File,
}

impl From<SinkArg> for SinkKind {
    fn from(arg: SinkArg) -> Self {
        match arg {
            SinkArg::Firebase => SinkKind::Firebase,
            SinkArg::File => SinkKind::File,
        }
    }
}

/// A single pipeline stage.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum StageArg {
    Fetch,
    Parse,
    Publish,
}

impl From<StageArg> for Stage {
    fn from(arg: StageArg) -> Self {
        match arg {
            StageArg::Fetch => Stage::Fetch,
            StageArg::Parse => Stage::Parse,
            StageArg::Publish => Stage::Publish,
        }
    }
}

/// Identifies one (category, query).
#[derive(Args, Debug)]
pub(crate) struct UnitArgs {
    /// Category path segment, e.g. `aptitude`.
    #[arg(long)]
    pub category: String,

    /// Query path segment, e.g. `problems-on-trains`.
    #[arg(long)]
    pub query: String,
}

/// Page range of one listing.
#[derive(Args, Debug)]
pub(crate) struct RangeArgs {
    /// Numeric base the page tokens are derived from, e.g. `00100`.
    #[arg(long)]
    pub base_number: String,

    /// First page index (inclusive).
    #[arg(long)]
    pub start: u32,

    /// Last page index (inclusive).
    #[arg(long)]
    pub end: u32,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Process every row of every configured category.
    Run {
        /// Only process this category.
        #[arg(long)]
        category: Option<String>,

        /// Only run this stage.
        #[arg(long)]
        stage: Option<StageArg>,
    },

    /// Fetch one query's pages into raw items.
    Fetch {
        #[command(flatten)]
        unit: UnitArgs,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Parse one query's raw items into its record set.
    Parse {
        #[command(flatten)]
        unit: UnitArgs,
    },

    /// Publish one query's unpublished records.
    Publish {
        #[command(flatten)]
        unit: UnitArgs,
    },

    /// Print the page tokens and URLs for a page range.
    Token {
        #[command(flatten)]
        range: RangeArgs,

        /// Category used to build URLs.
        #[arg(long, default_value = "aptitude")]
        category: String,

        /// Query used to build URLs.
        #[arg(long, default_value = "query")]
        query: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "quizharvest=info",
        1 => "quizharvest=debug",
        _ => "quizharvest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;

    match cli.command {
        Command::Run { category, stage } => {
            let stages = stage.map_or_else(StageSet::all, |s| StageSet::only(s.into()));
            cmd_run(&config, category.as_deref(), stages).await
        }
        Command::Fetch { unit, range } => {
            let unit = UnitOfWork {
                category: unit.category,
                query: unit.query,
                base_number: range.base_number,
                start_page: range.start,
                end_page: range.end,
            };
            cmd_unit(&config, unit, Stage::Fetch).await
        }
        Command::Parse { unit } => cmd_unit(&config, bare_unit(unit), Stage::Parse).await,
        Command::Publish { unit } => cmd_unit(&config, bare_unit(unit), Stage::Publish).await,
        Command::Token {
            range,
            category,
            query,
        } => cmd_token(&config, &range, category, query),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

/// Load the config file, then apply command-line overrides.
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)
            .wrap_err_with(|| format!("failed to load config from {}", path.display()))?,
        None => load_config()?,
    };
    if let Some(dir) = &cli.data_dir {
        config.defaults.data_dir = dir.clone();
    }
    if let Some(sink) = cli.sink {
        config.sink.kind = sink.into();
    }
    Ok(config)
}

/// A unit for the parse and publish stages, which only need its location.
fn bare_unit(args: UnitArgs) -> UnitOfWork {
    UnitOfWork {
        category: args.category,
        query: args.query,
        base_number: String::new(),
        start_page: 0,
        end_page: 0,
    }
}

fn connectivity_guard(config: &AppConfig) -> Result<ConnectivityGuard> {
    let probe = TcpProbe::from_config(&config.connectivity)?;
    Ok(
        ConnectivityGuard::new(Arc::new(probe), config.retry.connectivity_backoff())
            .with_max_attempts(config.connectivity.max_attempts),
    )
}

/// Build the pipeline, attaching a sink only when publishing.
///
/// Sink credential problems abort here, before any unit is touched.
fn build_pipeline(config: &AppConfig, stages: StageSet) -> Result<(Pipeline, HttpRenderer)> {
    let mut pipeline = Pipeline::new(config, connectivity_guard(config)?)?;
    if stages.includes(Stage::Publish) {
        let sink = build_sink(&config.sink, config.source.request_timeout())
            .wrap_err("cannot initialize the remote sink")?;
        pipeline = pipeline.with_sink(sink);
    }
    let renderer = HttpRenderer::new(
        config.source.request_timeout(),
        config.source.poll_interval(),
    )?;
    Ok((pipeline, renderer))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config: &AppConfig, category: Option<&str>, stages: StageSet) -> Result<()> {
    let (pipeline, mut renderer) = build_pipeline(config, stages)?;

    info!(
        category = category.unwrap_or("all"),
        data_dir = %config.defaults.data_dir,
        "starting run"
    );

    let reporter = CliProgress::new();
    let summary = pipeline
        .run_all(&mut renderer, category, stages, &reporter)
        .await?;

    print_summary(&summary);
    if summary.failed().next().is_some() {
        return Err(eyre!(
            "{} unit(s) failed; see the log for details",
            summary.failed().count()
        ));
    }
    Ok(())
}

async fn cmd_unit(config: &AppConfig, unit: UnitOfWork, stage: Stage) -> Result<()> {
    let stages = StageSet::only(stage);
    let (pipeline, mut renderer) = build_pipeline(config, stages)?;

    info!(unit = %unit, %stage, "running single stage");
    let reporter = CliProgress::new();
    let result = pipeline
        .run_unit(&mut renderer, &unit, stages, &reporter)
        .await;
    reporter.spinner.finish_and_clear();

    let report = result.wrap_err_with(|| format!("{stage} failed for {unit}"))?;
    println!();
    print_unit(&report);
    println!();
    Ok(())
}

fn cmd_token(config: &AppConfig, range: &RangeArgs, category: String, query: String) -> Result<()> {
    let base_url = config.source.base_url()?;
    let unit = UnitOfWork {
        category,
        query,
        base_number: range.base_number.clone(),
        start_page: range.start,
        end_page: range.end,
    };

    for request in unit.requests() {
        let token = request.token()?;
        let url = request.url(&base_url)?;
        println!("{:>4}  {token}  {url}", request.page_index);
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    if let Ok(path) = config_file_path() {
        println!("# default location: {}", path.display());
    }
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_summary(summary: &RunSummary) {
    println!();
    println!("  Run finished");
    println!("  Started:   {}", summary.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Units:     {}", summary.units.len());
    println!("  Failed:    {}", summary.failed().count());
    println!("  Published: {}", summary.published());
    println!("  Time:      {:.1}s", summary.elapsed.as_secs_f64());
    println!();
    for unit in &summary.units {
        print_unit(unit);
    }
}

fn print_unit(report: &UnitReport) {
    println!("  {}", report.unit);
    if let Some(fetch) = &report.fetch {
        println!(
            "    fetch:   {} pages ok, {} failed, {} new items, {} already stored",
            fetch.pages_ok,
            fetch.failures.len(),
            fetch.items_written,
            fetch.items_known
        );
    }
    if let Some(parse) = &report.parse {
        println!(
            "    parse:   {} kept, {} dropped",
            parse.kept,
            parse.dropped.len()
        );
    }
    if let Some(publish) = &report.publish {
        println!(
            "    publish: {} new, cursor {}, {:?}",
            publish.published, publish.cursor, publish.stop
        );
    }
    if let Some(err) = &report.error {
        error!(unit = %report.unit, "{err}");
        println!("    error:   {err}");
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, unit: &UnitOfWork, stage: Stage) {
        self.spinner.set_message(format!("{unit}: {stage}"));
    }

    fn page_fetched(&self, page: u32, items: usize) {
        self.spinner
            .set_message(format!("Fetched page {page} ({items} items)"));
    }

    fn record_published(&self, cursor: usize, total: usize) {
        self.spinner
            .set_message(format!("Publishing [{cursor}/{total}]"));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_category_and_stage() {
        let cli = Cli::try_parse_from([
            "quizharvest",
            "run",
            "--category",
            "aptitude",
            "--stage",
            "publish",
            "--sink",
            "file",
        ])
        .unwrap();

        assert!(matches!(cli.sink, Some(SinkArg::File)));
        match cli.command {
            Command::Run { category, stage } => {
                assert_eq!(category.as_deref(), Some("aptitude"));
                assert!(matches!(stage, Some(StageArg::Publish)));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn fetch_requires_a_page_range() {
        let missing = Cli::try_parse_from([
            "quizharvest",
            "fetch",
            "--category",
            "aptitude",
            "--query",
            "ages",
        ]);
        assert!(missing.is_err());

        let cli = Cli::try_parse_from([
            "quizharvest",
            "fetch",
            "--category",
            "aptitude",
            "--query",
            "ages",
            "--base-number",
            "00100",
            "--start",
            "8",
            "--end",
            "12",
        ])
        .unwrap();
        match cli.command {
            Command::Fetch { unit, range } => {
                assert_eq!(unit.query, "ages");
                assert_eq!((range.start, range.end), (8, 12));
            }
            _ => panic!("expected fetch"),
        }
    }
}
