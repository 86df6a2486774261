//! tsdbinfo command line

use clap::{Parser, Subcommand};
use std::{
    io::{self, BufWriter, Write},
    path::PathBuf,
    process::ExitCode,
};
use tracing_subscriber::EnvFilter;
use tsdbinfo::{
    commands,
    errors::{ConfigurationError, TsdbInfoResult, UsageError},
    InspectConfig,
};

/// Understand the series and labels stored in a Prometheus TSDB
#[derive(Parser)]
#[command(name = "tsdbinfo")]
#[command(about = "Cardinality statistics for Prometheus TSDB data directories")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base path for metrics storage
    #[arg(long = "storage.tsdb.path", global = true)]
    storage_path: Option<PathBuf>,

    /// Silence log output of the storage reader
    #[arg(long = "no-prom-logs", global = true)]
    no_prom_logs: bool,

    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the blocks of the storage
    Blocks,

    /// Samples, series and labels of one metric in a block
    Metric {
        /// Block ID
        #[arg(long)]
        block: Option<String>,

        /// Metric name
        #[arg(long)]
        metric: Option<String>,

        /// Also list every series with its sample count
        #[arg(long)]
        series: bool,
    },

    /// Metrics of a block with the most samples
    Metrics {
        /// Block ID
        #[arg(long)]
        block: Option<String>,

        /// Number of metrics to show [default: 100]
        #[arg(long)]
        top: Option<usize>,

        /// Number of labels to show per metric [default: 5]
        #[arg(long = "top-labels")]
        top_labels: Option<usize>,

        /// Don't draw the progress bar
        #[arg(long = "no-bar")]
        no_bar: bool,

        /// Scan threads, 0 for one per CPU [default: 0]
        #[arg(long)]
        workers: Option<usize>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.no_prom_logs);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn init_logging(verbose: bool, no_prom_logs: bool) {
    let default = if verbose { "debug" } else { "info" };
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    if no_prom_logs {
        if let Ok(directive) = "tsdbinfo::tsdb=off".parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> TsdbInfoResult<()> {
    let mut config = if let Some(config_path) = &cli.config {
        load_config_from_file(config_path)?
    } else {
        InspectConfig::default()
    };

    // Override with CLI options
    if let Some(path) = cli.storage_path {
        config.storage.path = Some(path);
    }
    commands::storage_path(&config)?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    match cli.command {
        Commands::Blocks => {
            let db = commands::open_storage(&config)?;
            commands::run_blocks(&db, &mut out)?;
        }
        Commands::Metric {
            block,
            metric,
            series,
        } => {
            let block = required(block, UsageError::MissingBlock)?;
            let metric = required(metric, UsageError::MissingMetric)?;
            let db = commands::open_storage(&config)?;
            commands::run_metric(&db, &block, &metric, series, &mut out)?;
        }
        Commands::Metrics {
            block,
            top,
            top_labels,
            no_bar,
            workers,
        } => {
            let block = required(block, UsageError::MissingBlock)?;
            if let Some(top) = top {
                config.report.top = top;
            }
            if let Some(top_labels) = top_labels {
                config.report.top_labels = top_labels;
            }
            if let Some(workers) = workers {
                config.report.workers = workers;
            }
            let show_progress = config.report.progress && !no_bar;

            let db = commands::open_storage(&config)?;
            commands::run_metrics(&db, &block, &config.report_options(), show_progress, &mut out)?;
        }
    }

    out.flush()?;
    Ok(())
}

/// Unset and empty flags are both missing
fn required(value: Option<String>, missing: UsageError) -> Result<String, UsageError> {
    value.filter(|v| !v.is_empty()).ok_or(missing)
}

fn load_config_from_file(path: &PathBuf) -> TsdbInfoResult<InspectConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigurationError::LoadFailed {
        path: path.clone(),
        reason: e.to_string(),
    })?;

    let config: InspectConfig = toml::from_str(&content).map_err(|e| {
        ConfigurationError::LoadFailed {
            path: path.clone(),
            reason: e.to_string(),
        }
    })?;

    config.validate()?;

    Ok(config)
}
