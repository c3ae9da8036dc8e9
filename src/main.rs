//! CLI entry point for the state briefing pipeline.
//!
//! Provides subcommands for normalizing raw source drops, building the
//! per-state briefing artifacts, and generating coverage and QA reports.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use state_briefing::config::PipelineConfig;
use state_briefing::{build, coverage, normalize, qa};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "state_briefing")]
#[command(about = "Builds per-state Medicare briefing artifacts from public data drops", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SharedArgs {
    /// Config file with thresholds, roles, and tolerances
    #[arg(long, default_value = "data/config/pipeline.json")]
    config: PathBuf,

    /// Read raw inputs from the bundled sample drop instead of data/raw
    #[arg(long, default_value_t = false)]
    use_samples: bool,

    /// Run date stamped into artifacts and report names (YYYY-MM-DD);
    /// defaults to today
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Directory with the raw source drops
    #[arg(long, default_value = "data/raw")]
    raw_dir: PathBuf,

    /// Directory for the normalized state-keyed tables
    #[arg(long, default_value = "data/processed")]
    processed_dir: PathBuf,

    /// Directory for the finished state artifacts and index.json
    #[arg(long, default_value = "data/states")]
    states_dir: PathBuf,

    /// Web data directory the artifacts are mirrored into
    #[arg(long, default_value = "web/data")]
    web_dir: PathBuf,

    /// Directory for coverage and QA reports
    #[arg(long, default_value = "reports")]
    reports_dir: PathBuf,
}

impl SharedArgs {
    fn raw_dir(&self) -> PathBuf {
        if self.use_samples {
            PathBuf::from("data/samples/raw")
        } else {
            self.raw_dir.clone()
        }
    }

    fn run_date(&self) -> NaiveDate {
        self.date.unwrap_or_else(|| Utc::now().date_naive())
    }

    fn load_config(&self) -> Result<PipelineConfig> {
        PipelineConfig::load(&self.config).context("loading pipeline config")
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize the raw source drops into state-keyed tables
    Process {
        #[command(flatten)]
        shared: SharedArgs,
    },
    /// Build one briefing artifact per state plus index.json
    Build {
        #[command(flatten)]
        shared: SharedArgs,
    },
    /// Generate the per-metric coverage report
    Coverage {
        #[command(flatten)]
        shared: SharedArgs,

        /// How many states each ranking lists (overrides the config)
        #[arg(long)]
        top: Option<usize>,
    },
    /// Run QA checks over the processed tables and artifacts
    Qa {
        #[command(flatten)]
        shared: SharedArgs,

        /// Treat QA warnings as errors
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Process, build, coverage, and QA in one pass
    Run {
        #[command(flatten)]
        shared: SharedArgs,

        /// Treat QA warnings as errors
        #[arg(long, default_value_t = false)]
        strict: bool,

        /// Skip the QA stage
        #[arg(long, default_value_t = false)]
        skip_qa: bool,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/state_briefing.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("state_briefing.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Process { shared } => {
            let config = shared.load_config()?;
            normalize::run_all(&shared.raw_dir(), &shared.processed_dir, &config)?;
        }
        Commands::Build { shared } => {
            let config = shared.load_config()?;
            build::run(
                &shared.processed_dir,
                &shared.states_dir,
                &shared.web_dir,
                &config,
                shared.run_date(),
            )?;
        }
        Commands::Coverage { shared, top } => {
            let config = shared.load_config()?;
            coverage::run(
                &shared.states_dir,
                &shared.reports_dir.join("coverage"),
                top.unwrap_or(config.top_n),
                shared.run_date(),
            )?;
        }
        Commands::Qa { shared, strict } => {
            let config = shared.load_config()?;
            qa::run(
                &shared.states_dir,
                &shared.processed_dir,
                &shared.reports_dir.join("qa"),
                &config,
                shared.run_date(),
                strict,
            )?;
        }
        Commands::Run {
            shared,
            strict,
            skip_qa,
        } => {
            let config = shared.load_config()?;
            let run_date = shared.run_date();

            normalize::run_all(&shared.raw_dir(), &shared.processed_dir, &config)?;
            build::run(
                &shared.processed_dir,
                &shared.states_dir,
                &shared.web_dir,
                &config,
                run_date,
            )?;
            coverage::run(
                &shared.states_dir,
                &shared.reports_dir.join("coverage"),
                config.top_n,
                run_date,
            )?;
            if skip_qa {
                info!("QA stage skipped");
            } else {
                qa::run(
                    &shared.states_dir,
                    &shared.processed_dir,
                    &shared.reports_dir.join("qa"),
                    &config,
                    run_date,
                    strict,
                )?;
            }
            info!(%run_date, "pipeline run complete");
        }
    }

    Ok(())
}
