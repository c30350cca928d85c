use crate::backoff::retry;
use crate::config::Config;
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::error::{ClassifiedError, CycleError, RetryError};
use crate::metrics::{MetricsSnapshot, RunMetrics};
use crate::services::{Generator, Repository, Ticketing};
use crate::state::ProcessedSet;
use crate::workflow::{TicketRunner, Workflow};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, error, info, info_span, warn};
use ulid::Ulid;

const MIN_DEFERRAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrepareReport {
    pub cloned: bool,
    /// Best-effort steps that failed without deferring the cycle.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: String,
    pub prepare: PrepareReport,
    pub fetched: usize,
    pub dispatch: DispatchReport,
    pub metrics: MetricsSnapshot,
}

pub struct Coordinator {
    cfg: Arc<Config>,
    ticketing: Arc<dyn Ticketing>,
    repository: Arc<dyn Repository>,
    dispatcher: Dispatcher,
    metrics: Arc<RunMetrics>,
}

impl Coordinator {
    pub fn new(
        cfg: Arc<Config>,
        ticketing: Arc<dyn Ticketing>,
        repository: Arc<dyn Repository>,
        generator: Arc<dyn Generator>,
        processed: Arc<ProcessedSet>,
        metrics: Arc<RunMetrics>,
    ) -> Self {
        let workflow = Workflow::new(
            Arc::clone(&cfg),
            Arc::clone(&ticketing),
            Arc::clone(&repository),
            generator,
            Arc::clone(&metrics),
        );
        Self::with_runner(cfg, ticketing, repository, Arc::new(workflow), processed, metrics)
    }

    pub fn with_runner(
        cfg: Arc<Config>,
        ticketing: Arc<dyn Ticketing>,
        repository: Arc<dyn Repository>,
        runner: Arc<dyn TicketRunner>,
        processed: Arc<ProcessedSet>,
        metrics: Arc<RunMetrics>,
    ) -> Self {
        let dispatcher = Dispatcher::new(runner, processed, cfg.max_concurrent_tickets);
        Self {
            cfg,
            ticketing,
            repository,
            dispatcher,
            metrics,
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Polls until `cancel` fires.
    pub async fn run(&self, cancel: &CancellationToken) {
        let interval = self.cfg.poll_interval();
        info!(interval_secs = interval.as_secs(), "coordinator started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let wait = match self.run_cycle(cancel).await {
                Ok(report) => {
                    if report.fetched == 0 {
                        info!(interval_secs = interval.as_secs(), "no tickets to process");
                    }
                    interval
                }
                Err(CycleError::Cancelled) => break,
                Err(err) => {
                    let wait = deferral(interval);
                    error!(error = %err, wait_secs = wait.as_secs(), "cycle deferred");
                    wait
                }
            };
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(wait) => {}
            }
        }
        info!(summary = %self.metrics.snapshot(), "coordinator stopped");
    }

    /// One PREPARE_REPO, FETCH_TICKETS, DISPATCH pass.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport, CycleError> {
        let cycle = Ulid::new().to_string();
        let span = info_span!("cycle", cycle = %cycle);
        self.cycle_inner(cycle, cancel).instrument(span).await
    }

    async fn cycle_inner(
        &self,
        cycle: String,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, CycleError> {
        let prepare = self
            .prepare_repository()
            .await
            .map_err(CycleError::Prepare)?;

        let ticketing = &self.ticketing;
        let (assignee, project) = (self.cfg.assignee.as_str(), self.cfg.project.as_str());
        let fetched = retry(cancel, &self.cfg.retry, move || {
            ticketing.fetch_tickets(assignee, project)
        })
        .await;
        self.metrics.add_retries(fetched.retries);
        let tickets = match fetched.result {
            Ok(tickets) => tickets,
            Err(RetryError::Cancelled) => return Err(CycleError::Cancelled),
            Err(RetryError::Failed(source)) => {
                return Err(CycleError::Fetch {
                    retries: fetched.retries,
                    source,
                });
            }
        };
        info!(count = tickets.len(), "fetched tickets");

        let fetched = tickets.len();
        let dispatch = if tickets.is_empty() {
            DispatchReport::default()
        } else {
            self.dispatcher.dispatch(tickets, cancel).await
        };

        let metrics = self.metrics.snapshot();
        info!(
            launched = dispatch.launched,
            skipped = dispatch.skipped,
            succeeded = dispatch.succeeded,
            failed = dispatch.failed,
            summary = %metrics,
            "cycle finished"
        );
        Ok(CycleReport {
            cycle,
            prepare,
            fetched,
            dispatch,
            metrics,
        })
    }

    /// Clones when needed, then best-effort switches to the base branch and
    /// syncs. Only a failed clone is fatal for the cycle.
    pub async fn prepare_repository(&self) -> Result<PrepareReport, ClassifiedError> {
        let mut report = PrepareReport::default();
        if !self.repository.is_cloned().await {
            info!("cloning repository");
            self.repository.clone_repository().await?;
            report.cloned = true;
        }

        let base = &self.cfg.base_branch;
        if let Err(err) = self.repository.switch_branch(base).await {
            warn!(branch = %base, error = %err, "could not switch to base branch");
            report.warnings.push(format!("switch to {base}: {err}"));
        }
        if let Err(err) = self.repository.sync_with_remote().await {
            warn!(error = %err, "sync with remote failed; continuing with local state");
            report.warnings.push(format!("sync: {err}"));
        }
        Ok(report)
    }
}

fn deferral(interval: Duration) -> Duration {
    interval.max(MIN_DEFERRAL)
}
