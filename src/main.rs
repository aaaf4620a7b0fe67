use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod config;
mod controller;
mod error;
mod filters;
mod matrix;
mod models;
mod render;
mod report;
mod session;
mod source;

use crate::config::ApiConfig;
use crate::controller::{FetchOutcome, HeatmapController};
use crate::filters::FilterState;
use crate::render::RendererConfig;
use crate::source::{FileRecordSource, HttpRecordSource, RecordSource};

#[derive(Parser)]
#[command(name = "cohort-heatmap")]
#[command(version, about = "Cohort retention heatmaps from the cohorts backend", long_about = None)]
struct Cli {
    /// Base URL of the cohorts backend
    #[arg(long, env = "COHORTS_API_URL", default_value = config::DEFAULT_API_URL)]
    api_url: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = config::DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Read records from a JSON or CSV snapshot instead of the backend
    #[arg(long)]
    input: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct FilterArgs {
    #[arg(long)]
    start_date: Option<NaiveDate>,
    #[arg(long)]
    end_date: Option<NaiveDate>,
    /// Restrict to a single fortnight (1-based)
    #[arg(long)]
    period: Option<i64>,
    /// Start from the earliest available date when no start date is given
    #[arg(long)]
    default_start: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the selectable date range
    Range,
    /// Fetch records and print the heatmap
    Heatmap {
        #[command(flatten)]
        filters: FilterArgs,
        #[arg(long, default_value_t = render::DEFAULT_PERIOD_COLUMNS)]
        columns: usize,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        filters: FilterArgs,
        #[arg(long, default_value_t = render::DEFAULT_PERIOD_COLUMNS)]
        columns: usize,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Interactive filter session on stdin
    Session {
        #[arg(long, default_value_t = render::DEFAULT_PERIOD_COLUMNS)]
        columns: usize,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn open_source(cli: &Cli) -> anyhow::Result<Arc<dyn RecordSource>> {
    if let Some(path) = &cli.input {
        info!(path = %path.display(), "reading records from snapshot");
        return Ok(Arc::new(FileRecordSource::new(path)));
    }

    let config = ApiConfig::new(&cli.api_url, cli.timeout_secs);
    let source = HttpRecordSource::new(config).context("failed to set up the backend client")?;
    Ok(Arc::new(source))
}

async fn prepare_controller(
    source: Arc<dyn RecordSource>,
    filters: &FilterArgs,
) -> anyhow::Result<HeatmapController> {
    let mut state = FilterState::default();
    state.set_start_date(filters.start_date)?;
    state.set_end_date(filters.end_date)?;
    state.set_period(filters.period)?;

    let mut controller = HeatmapController::new(source, state);
    if filters.default_start && filters.start_date.is_none() {
        controller
            .load_bounds()
            .await
            .context("failed to load the available date range")?;
    }
    Ok(controller)
}

/// One fetch for the applied filters; a failure here has no previous matrix to fall back on.
async fn fetch_once(controller: &mut HeatmapController) -> anyhow::Result<()> {
    controller.filters_mut().apply();
    if let FetchOutcome::KeptPrevious { .. } = controller.refresh().await {
        if let Some(err) = controller.last_error() {
            anyhow::bail!("{}: {err}", err.kind());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let source = open_source(&cli)?;

    match &cli.command {
        Commands::Range => {
            let range = source
                .fetch_date_range()
                .await
                .context("failed to load the available date range")?;
            println!("Available dates: {range}");
        }
        Commands::Heatmap {
            filters,
            columns,
            format,
            out,
        } => {
            let mut controller = prepare_controller(source, filters).await?;
            fetch_once(&mut controller).await?;
            let snapshot = controller
                .snapshot()
                .context("no heatmap was produced")?;
            let renderer = RendererConfig::with_columns(*columns);

            let rendered = match format {
                OutputFormat::Table => render::render_table(&snapshot.matrix, &renderer),
                OutputFormat::Json => {
                    let payload = render::build_payload(&snapshot.matrix, &renderer);
                    serde_json::to_string_pretty(&payload)?
                }
            };

            match out {
                Some(path) => {
                    std::fs::write(path, &rendered)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Heatmap written to {}.", path.display());
                }
                None => print!("{rendered}"),
            }
        }
        Commands::Report {
            filters,
            columns,
            out,
        } => {
            let mut controller = prepare_controller(source, filters).await?;
            fetch_once(&mut controller).await?;
            let snapshot = controller
                .snapshot()
                .context("no heatmap was produced")?;

            if !snapshot.matrix.duplicate_keys().is_empty() {
                warn!("report contains duplicate cohort/fortnight records");
            }

            let report = report::build_report(
                &controller.source().describe(),
                &snapshot.criteria,
                Utc::now(),
                &snapshot.matrix,
                &RendererConfig::with_columns(*columns),
            );
            std::fs::write(out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Session { columns } => {
            let controller = HeatmapController::new(source, FilterState::default());
            let mut session = session::Session::new(
                controller,
                RendererConfig::with_columns(*columns),
                std::io::stdout(),
            );
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            session.run(stdin).await?;
        }
    }

    Ok(())
}
