//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use paperconcepts_core::{
    AnalysisPipeline, AnalyzeOptions, ConsolidationEngine, PaperIngestor, PaperReport,
    PipelineConfig, ProgressReporter, RunReport,
};
use paperconcepts_extraction::{CallRateLimiter, ExtractionClient, OpenAiProvider, PromptTemplate};
use paperconcepts_shared::{
    AppConfig, ClientConfig, ConsolidationConfig, Paper, PaperId, PaperStatus, init_config,
    load_config, validate_api_key,
};
use paperconcepts_source::FileTextSource;
use paperconcepts_storage::Storage;
use tracing::info;

use crate::query::{QueryCommand, run_query};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// paperconcepts: find the concepts exam papers test, and how they trend.
#[derive(Parser)]
#[command(
    name = "paperconcepts",
    version,
    about = "Extract and consolidate the concepts tested by exam papers.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Database file (overrides config and DATABASE_PATH).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// A stage of `run`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum Step {
    Ingest,
    Analyze,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Register new paper files from the PDF directory.
    Ingest {
        /// Directory to scan (defaults to PDF_DIR).
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Extract and consolidate concepts from registered papers.
    Analyze {
        /// Maximum number of papers to analyze.
        #[arg(short, long)]
        limit: Option<usize>,

        /// Re-analyze papers already processed, superseding old results.
        #[arg(long)]
        reprocess: bool,

        /// Only these paper ids (repeatable).
        #[arg(long = "paper")]
        papers: Vec<i64>,
    },

    /// Run several stages in order.
    Run {
        /// Stages to run (comma-separated).
        #[arg(long, value_delimiter = ',', default_value = "ingest,analyze")]
        steps: Vec<Step>,

        /// Maximum number of papers to analyze.
        #[arg(short, long)]
        limit: Option<usize>,

        /// Re-analyze papers already processed.
        #[arg(long)]
        reprocess: bool,
    },

    /// Query the concept database.
    Query {
        #[command(subcommand)]
        query: QueryCommand,
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
        0 => "paperconcepts=info",
        1 => "paperconcepts=debug",
        _ => "paperconcepts=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let db = cli.db;
    match cli.command {
        Command::Ingest { dir } => {
            let config = settings(db.as_deref())?;
            let storage = open_storage(&config).await?;
            cmd_ingest(&config, &storage, dir).await
        }
        Command::Analyze {
            limit,
            reprocess,
            papers,
        } => {
            let config = settings(db.as_deref())?;
            let options = AnalyzeOptions {
                limit,
                reprocess,
                papers: papers.into_iter().map(PaperId).collect(),
            };
            cmd_analyze(&config, &options).await
        }
        Command::Run {
            steps,
            limit,
            reprocess,
        } => {
            let config = settings(db.as_deref())?;
            cmd_run(&config, &steps, limit, reprocess).await
        }
        Command::Query { query } => {
            let config = settings(db.as_deref())?;
            let path = PathBuf::from(&config.paths.database);
            let storage = Storage::open_readonly(&path).await?;
            run_query(Arc::new(storage), query).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(db.as_deref()).await,
        },
    }
}

/// Resolved configuration with the `--db` override applied.
fn settings(db: Option<&Path>) -> Result<AppConfig> {
    let mut config = load_config()?;
    if let Some(db) = db {
        config.paths.database = db.to_string_lossy().into_owned();
    }
    Ok(config)
}

async fn open_storage(config: &AppConfig) -> Result<Arc<Storage>> {
    let path = PathBuf::from(&config.paths.database);
    let storage = Storage::open(&path).await?;
    info!(db = %path.display(), "opened database");
    Ok(Arc::new(storage))
}

/// Wire the provider, rate limiter, text source and engine into a pipeline.
async fn build_pipeline(config: &AppConfig, storage: Arc<Storage>) -> Result<AnalysisPipeline> {
    let api_key = validate_api_key(config)?;
    let provider = OpenAiProvider::from_config(config, api_key)?;
    let limiter = CallRateLimiter::per_minute(config.extraction.calls_per_minute)?;
    let client = ExtractionClient::new(
        Arc::new(provider),
        Arc::new(limiter),
        &ClientConfig::from(config),
    );

    let prompts_dir = config.paths.prompts_dir.as_deref().map(Path::new);
    let prompt = PromptTemplate::load(prompts_dir).await?;
    let source = FileTextSource::new(&config.source);

    Ok(AnalysisPipeline::new(
        storage,
        Arc::new(source),
        client,
        ConsolidationEngine::new(ConsolidationConfig::from(config)),
        prompt,
        PipelineConfig::from(config),
    ))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_ingest(config: &AppConfig, storage: &Storage, dir: Option<PathBuf>) -> Result<()> {
    let dir = dir.unwrap_or_else(|| PathBuf::from(&config.paths.pdf_dir));
    if !dir.is_dir() {
        return Err(eyre!("paper directory '{}' does not exist", dir.display()));
    }

    let report = PaperIngestor::new(&dir).ingest(storage).await?;

    println!();
    println!("  Registered:   {}", report.registered.len());
    println!("  Already known: {}", report.already_known);
    if !report.unparseable.is_empty() {
        println!("  Skipped (unrecognized filename):");
        for name in &report.unparseable {
            println!("    {name}");
        }
    }
    println!();
    Ok(())
}

async fn cmd_analyze(config: &AppConfig, options: &AnalyzeOptions) -> Result<()> {
    let storage = open_storage(config).await?;
    let pipeline = build_pipeline(config, storage).await?;

    info!(
        limit = ?options.limit,
        reprocess = options.reprocess,
        papers = options.papers.len(),
        "analyzing papers"
    );

    let reporter = CliProgress::new();
    let report = pipeline.analyze(options, &reporter).await;
    reporter.finish();
    print_run_report(&report?);
    Ok(())
}

async fn cmd_run(
    config: &AppConfig,
    steps: &[Step],
    limit: Option<usize>,
    reprocess: bool,
) -> Result<()> {
    let storage = open_storage(config).await?;

    if steps.contains(&Step::Ingest) {
        cmd_ingest(config, &storage, None).await?;
    }
    if steps.contains(&Step::Analyze) {
        let pipeline = build_pipeline(config, storage).await?;
        let options = AnalyzeOptions {
            limit,
            reprocess,
            papers: Vec::new(),
        };
        let reporter = CliProgress::new();
        let report = pipeline.analyze(&options, &reporter).await;
        reporter.finish();
        print_run_report(&report?);
    }
    Ok(())
}

fn print_run_report(report: &RunReport) {
    println!();
    println!("  Analysis complete");
    println!("  Papers:    {}", report.papers.len());
    println!("  Analyzed:  {}", report.analyzed());
    println!("  Failed:    {}", report.failed());
    println!("  Gaps:      {}", report.gaps());
    println!(
        "  Concepts:  {} new, {} updated",
        report.papers.iter().map(|p| p.summary.new_concepts).sum::<usize>(),
        report.papers.iter().map(|p| p.summary.updated_concepts).sum::<usize>(),
    );
    println!("  Time:      {:.1}s", report.elapsed.as_secs_f64());

    let failed: Vec<&PaperReport> = report
        .papers
        .iter()
        .filter(|p| p.status == PaperStatus::Failed)
        .collect();
    if !failed.is_empty() {
        println!();
        println!("  Failed papers:");
        for paper in failed {
            println!(
                "    {} ({}): {}",
                paper.filename,
                paper.paper_id,
                paper.failure.as_deref().unwrap_or("unknown")
            );
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{spinner:.cyan} [{pos}/{len}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    fn finish(&self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn paper_started(&self, paper: &Paper, _current: usize, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_message(paper.filename.clone());
    }

    fn paper_finished(&self, report: &PaperReport) {
        self.bar.inc(1);
        if report.status == PaperStatus::Failed {
            self.bar.println(format!(
                "  failed: {} ({})",
                report.filename,
                report.failure.as_deref().unwrap_or("unknown")
            ));
        }
    }

    fn done(&self, _report: &RunReport) {
        self.bar.finish_and_clear();
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(db: Option<&Path>) -> Result<()> {
    let config = settings(db)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
