use crate::config::{AppConfig, GeneratorConfig, HostingConfig, SAMPLE_CONFIG, TrackerConfig};
use owo_colors::{OwoColorize as _, Stream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tp_agent::{AgentError, CommandGenerator};
use tp_core::error::{ConfigError, CycleError, StateError};
use tp_core::services::{Generator, Repository, Ticketing};
use tp_core::types::{TicketKey, TicketKeyError};
use tp_core::{Coordinator, ProcessedSet, RunMetrics};
use tp_tracker::{FileTracker, JiraTracker, TrackerError};
use tp_vcs::{GitConfig, GitHubHost, GitRepository, LocalHost, PullRequestHost, VcsError};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Vcs(#[from] VcsError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error("invalid ticket key: {0}")]
    Key(#[from] TicketKeyError),
    #[error("write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{failed} health check(s) failed")]
    Unhealthy { failed: usize },
}

/// Collaborators selected by the config's `kind` fields.
pub struct Services {
    pub ticketing: Arc<dyn Ticketing>,
    pub repository: Arc<dyn Repository>,
    pub generator: Arc<dyn Generator>,
}

pub fn build_services(cfg: &AppConfig) -> Result<Services, CliError> {
    let ticketing: Arc<dyn Ticketing> = match &cfg.tracker {
        TrackerConfig::Jira(jira) => Arc::new(JiraTracker::new(jira.clone())?),
        TrackerConfig::File { path } => Arc::new(FileTracker::new(path)),
    };

    let host: Arc<dyn PullRequestHost> = match &cfg.hosting {
        HostingConfig::Github(github) => Arc::new(GitHubHost::new(github.api())?),
        HostingConfig::Local { ledger, .. } => Arc::new(LocalHost::new(
            ledger.clone().unwrap_or_else(|| cfg.default_ledger()),
        )),
    };
    let git = GitConfig::new(
        cfg.core.checkout_dir(),
        cfg.core.worktrees_dir(),
        cfg.remote_url(),
    )
    .with_credentials(cfg.git_credentials());
    let repository: Arc<dyn Repository> = Arc::new(GitRepository::new(git, host));

    let GeneratorConfig::Command(command) = &cfg.generator;
    let generator: Arc<dyn Generator> = Arc::new(CommandGenerator::new(command.clone())?);

    Ok(Services {
        ticketing,
        repository,
        generator,
    })
}

/// Ledger load failures are not fatal: the run starts with an empty set.
fn open_ledger(cfg: &AppConfig) -> Arc<ProcessedSet> {
    let processed = ProcessedSet::new(&cfg.core.state_file);
    match processed.load() {
        Ok(()) => info!(
            path = %processed.path().display(),
            count = processed.keys().len(),
            "loaded processed tickets"
        ),
        Err(err) => warn!(error = %err, "could not load processed tickets; starting empty"),
    }
    Arc::new(processed)
}

fn coordinator(cfg: AppConfig) -> Result<Coordinator, CliError> {
    let services = build_services(&cfg)?;
    let processed = open_ledger(&cfg);
    Ok(Coordinator::new(
        Arc::new(cfg.core),
        services.ticketing,
        services.repository,
        services.generator,
        processed,
        Arc::new(RunMetrics::new()),
    ))
}

/// Cancelled on the first Ctrl-C so in-flight tickets drain.
fn interrupt_token() -> CancellationToken {
    cancel_on(tokio::signal::ctrl_c())
}

fn cancel_on<F>(signal: F) -> CancellationToken
where
    F: Future<Output = std::io::Result<()>> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        match signal.await {
            Ok(()) => {
                info!("interrupt received; finishing in-flight work");
                trigger.cancel();
            }
            Err(err) => warn!(error = %err, "could not listen for interrupts"),
        }
    });
    cancel
}

pub async fn run(config: &Path) -> Result<(), CliError> {
    let coordinator = coordinator(AppConfig::load(config)?)?;
    coordinator.run(&interrupt_token()).await;
    Ok(())
}

pub async fn once(config: &Path) -> Result<(), CliError> {
    let coordinator = coordinator(AppConfig::load(config)?)?;
    let report = coordinator.run_cycle(&interrupt_token()).await?;
    println!(
        "cycle {}: fetched={} launched={} skipped={} succeeded={} failed={}",
        report.cycle,
        report.fetched,
        report.dispatch.launched,
        report.dispatch.skipped,
        report.dispatch.succeeded,
        report.dispatch.failed
    );
    for warning in &report.prepare.warnings {
        println!("warning: {warning}");
    }
    println!("{}", report.metrics);
    Ok(())
}

pub fn init(config: &Path) -> Result<(), CliError> {
    for line in init_files(config)? {
        println!("{line}");
    }
    Ok(())
}

fn init_files(config: &Path) -> Result<Vec<String>, CliError> {
    let mut lines = Vec::new();
    if config.exists() {
        lines.push(format!("{} exists, leaving it alone", config.display()));
    } else {
        std::fs::write(config, SAMPLE_CONFIG).map_err(|source| CliError::Write {
            path: config.to_path_buf(),
            source,
        })?;
        lines.push(format!("wrote {}", config.display()));
    }

    let cfg = AppConfig::parse(config, &read_config(config)?)?;
    let state = &cfg.core.state_file;
    if state.exists() {
        lines.push(format!("{} exists, leaving it alone", state.display()));
    } else {
        ProcessedSet::new(state).save()?;
        lines.push(format!("wrote {}", state.display()));
    }
    Ok(lines)
}

fn read_config(config: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(config).map_err(|source| {
        CliError::Config(ConfigError::Read {
            path: config.to_path_buf(),
            source,
        })
    })
}

/// Like [`AppConfig::load`] but without validation, so inspection commands
/// work before secrets are in place.
fn inspect_config(config: &Path) -> Result<AppConfig, CliError> {
    let mut cfg = AppConfig::parse(config, &read_config(config)?)?;
    cfg.apply_env(|name| std::env::var(name).ok());
    Ok(cfg)
}

pub fn status(config: &Path) -> Result<(), CliError> {
    let cfg = inspect_config(config)?;
    let processed = ProcessedSet::new(&cfg.core.state_file);
    processed.load()?;

    let heading = |text: &'static str| {
        text.if_supports_color(Stream::Stdout, |t| t.bold())
            .to_string()
    };
    println!("{}", heading("config"));
    println!("  project   {}", cfg.core.project);
    println!("  assignee  {}", cfg.core.assignee);
    println!("  checkout  {}", cfg.core.checkout_dir().display());
    println!("  base      {}", cfg.core.base_branch);
    println!("  tracker   {}", tracker_kind(&cfg.tracker));
    println!("  hosting   {}", hosting_kind(&cfg.hosting));
    println!(
        "  gates     {}",
        cfg.core
            .gates
            .iter()
            .map(|gate| if gate.enabled {
                gate.name.clone()
            } else {
                format!("{} (off)", gate.name)
            })
            .collect::<Vec<_>>()
            .join(", ")
    );

    let keys = processed.keys();
    println!(
        "{} ({})",
        heading("processed"),
        processed.path().display()
    );
    if keys.is_empty() {
        println!("  {}", "none".if_supports_color(Stream::Stdout, |t| t.dimmed()));
    }
    for key in keys {
        println!("  {}", key.if_supports_color(Stream::Stdout, |t| t.green()));
    }
    Ok(())
}

pub fn forget(config: &Path, key: &str) -> Result<(), CliError> {
    let cfg = inspect_config(config)?;
    let key = TicketKey::new(key)?;
    let processed = ProcessedSet::new(&cfg.core.state_file);
    processed.load()?;
    if processed.forget(&key)? {
        println!("forgot {key}; it will be picked up on the next cycle");
    } else {
        println!("{key} was not in the ledger");
    }
    Ok(())
}

pub async fn check(config: &Path) -> Result<(), CliError> {
    let cfg = AppConfig::load(config)?;
    println!("config ok: {}", config.display());
    let services = build_services(&cfg)?;

    let mut failed = 0;
    let probes = [
        ("tracker", services.ticketing.health_check().await),
        ("hosting", services.repository.health_check().await),
    ];
    for (name, result) in probes {
        match result {
            Ok(()) => println!(
                "{} {name}",
                "ok  ".if_supports_color(Stream::Stdout, |t| t.green())
            ),
            Err(err) => {
                failed += 1;
                println!(
                    "{} {name}: {err}",
                    "FAIL".if_supports_color(Stream::Stdout, |t| t.red())
                );
            }
        }
    }
    if failed > 0 {
        return Err(CliError::Unhealthy { failed });
    }
    Ok(())
}

fn tracker_kind(tracker: &TrackerConfig) -> String {
    match tracker {
        TrackerConfig::Jira(jira) => format!("jira ({})", jira.base_url),
        TrackerConfig::File { path } => format!("file ({})", path.display()),
    }
}

fn hosting_kind(hosting: &HostingConfig) -> String {
    match hosting {
        HostingConfig::Github(github) => format!("github ({}/{})", github.owner, github.repo),
        HostingConfig::Local { remote_url, .. } => format!("local ({remote_url})"),
    }
}
