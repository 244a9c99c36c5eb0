mod assemble;
mod commands;
mod export;
mod footprint;
mod migrations;
mod runner;
mod state;
mod store;
mod sync;
mod util;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use commands::agent::AgentCommands;
use commands::ml::MlCommands;
use commands::run::RunArgs;

#[derive(Parser)]
#[command(
    name = "devtrace",
    version,
    about = "DevTrace: capture per-command execution telemetry and sync it to an ingest service"
)]
struct Cli {
    /// Storage directory for the local telemetry database
    #[arg(long, short = 'p', global = true, env = "DEVTRACE_HOME", default_value = ".devtrace")]
    path: PathBuf,

    /// Ingest service base URL
    #[arg(long, global = true, env = "DEVTRACE_API_URL", default_value = "http://localhost:8000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the storage directory and schema
    Init,
    /// Run a command and record its telemetry
    Run(RunArgs),
    /// List stored events, oldest first
    Events {
        /// Maximum number of events to return
        #[arg(long, short = 'n')]
        limit: Option<u32>,
    },
    /// Export event metrics to a file
    Export {
        /// Output file
        #[arg(long, short = 'o')]
        out: PathBuf,
        /// csv or jsonl
        #[arg(long, short = 'f', default_value = "csv")]
        format: String,
    },
    /// Deliver one batch of pending events to the ingest service
    Sync {
        /// Maximum events per request (capped at 5000)
        #[arg(long, env = "DEVTRACE_SYNC_BATCH", default_value_t = sync::DEFAULT_BATCH_SIZE)]
        batch_size: u32,
        /// Request timeout in seconds
        #[arg(long, env = "DEVTRACE_SYNC_TIMEOUT", default_value_t = sync::DEFAULT_TIMEOUT.as_secs())]
        timeout_secs: u64,
    },
    /// Show local event and sync queue counts
    Status {
        /// Include every sync queue entry
        #[arg(long)]
        entries: bool,
    },
    /// Check ingest service health
    Health {
        /// Request timeout in seconds
        #[arg(long, default_value_t = 5)]
        timeout_secs: u64,
    },
    /// Manage the default agent for new events
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },
    /// Synthetic data, training and batch scoring
    Ml {
        #[command(subcommand)]
        command: MlCommands,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("DEVTRACE_LOG").unwrap_or_else(|_| "warn".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Init => commands::init::run(&cli.path).await,
        Commands::Run(args) => commands::run::run(&cli.path, args).await,
        Commands::Events { limit } => commands::events::run(&cli.path, limit).await,
        Commands::Export { out, format } => commands::export::run(&cli.path, &out, &format).await,
        Commands::Sync {
            batch_size,
            timeout_secs,
        } => {
            commands::sync::run(
                &cli.path,
                &cli.api_url,
                batch_size,
                Duration::from_secs(timeout_secs),
            )
            .await
        }
        Commands::Status { entries } => commands::status::run(&cli.path, entries).await,
        Commands::Health { timeout_secs } => {
            commands::health::run(&cli.api_url, Duration::from_secs(timeout_secs)).await
        }
        Commands::Agent { command } => commands::agent::run(&cli.path, command).await,
        Commands::Ml { command } => commands::ml::run(command).await,
    };

    std::process::exit(code);
}
