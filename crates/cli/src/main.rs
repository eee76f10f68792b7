mod job_commands;
mod log_commands;
mod runtime;
mod sample_jobs;
mod stats_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    jobkeeper_config::{JobkeeperConfig, Severity},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "jobkeeper", about = "jobkeeper: scheduled job lifecycle manager")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to load instead of searching the standard locations.
    #[arg(long, global = true, env = "JOBKEEPER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler (default when no subcommand is provided).
    Run,
    /// Job definition management.
    Jobs {
        #[command(subcommand)]
        action: job_commands::JobAction,
    },
    /// Execution log management.
    Logs {
        #[command(subcommand)]
        action: log_commands::LogAction,
    },
    /// Execution statistics.
    Stats {
        /// today, yesterday, this-week, this-month or last-7-days.
        #[arg(long, default_value = "last-7-days")]
        range: String,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<JobkeeperConfig> {
    let config = match &cli.config {
        Some(path) => {
            let mut config = jobkeeper_config::load_config(path)?;
            jobkeeper_config::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
            config
        },
        None => jobkeeper_config::discover_and_load(),
    };

    let result = jobkeeper_config::validate(&config);
    for diag in &result.diagnostics {
        match diag.severity {
            Severity::Error | Severity::Warning => {
                warn!(path = diag.path, severity = %diag.severity, "{}", diag.message);
            },
            Severity::Info => info!(path = diag.path, "{}", diag.message),
        }
    }
    if result.has_errors() {
        anyhow::bail!(
            "invalid configuration ({} errors)",
            result.count(Severity::Error)
        );
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = load_config(&cli)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        storage = ?config.storage.kind,
        "jobkeeper starting"
    );

    let rt = runtime::Runtime::open(config).await?;
    match cli.command {
        None | Some(Commands::Run) => runtime::run(rt).await,
        Some(Commands::Jobs { action }) => job_commands::handle_jobs(&rt, action).await,
        Some(Commands::Logs { action }) => log_commands::handle_logs(&rt, action).await,
        Some(Commands::Stats { range }) => stats_commands::handle_stats(&rt, &range).await,
    }
}

/// Pretty-print a command result to stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
