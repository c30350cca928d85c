use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

mod app;
mod config;

const DEFAULT_LOG_FILTER: &str = "tp=info,tp_core=info,tp_vcs=info,tp_tracker=info,tp_agent=info";

/// Turns assigned tickets into pull requests.
#[derive(Parser)]
#[command(name = "tp", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "tp.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll for tickets until interrupted
    Run,
    /// Run a single poll cycle and print the metrics
    Once,
    /// Write a sample config and an empty state file
    Init,
    /// Show the processed-ticket ledger and a config summary
    Status,
    /// Remove a ticket from the ledger so it is picked up again
    Forget { key: String },
    /// Validate the config and probe the tracker and hosting service
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run => app::run(&cli.config).await,
        Command::Once => app::once(&cli.config).await,
        Command::Init => app::init(&cli.config),
        Command::Status => app::status(&cli.config),
        Command::Forget { key } => app::forget(&cli.config, &key),
        Command::Check => app::check(&cli.config).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
