use crate::error::{WorkflowError, classify};
use crate::state::ProcessedSet;
use crate::types::{Ticket, TicketKey};
use crate::workflow::TicketRunner;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, error, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DispatchReport {
    pub launched: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Fans tickets out to a [`TicketRunner`], at most `limit` at a time, and
/// records successes in the [`ProcessedSet`].
pub struct Dispatcher {
    runner: Arc<dyn TicketRunner>,
    processed: Arc<ProcessedSet>,
    limit: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(runner: Arc<dyn TicketRunner>, processed: Arc<ProcessedSet>, limit: usize) -> Self {
        Self {
            runner,
            processed,
            limit: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    pub async fn dispatch(&self, tickets: Vec<Ticket>, cancel: &CancellationToken) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut seen = HashSet::new();
        let mut tasks = JoinSet::new();

        for ticket in tickets {
            if !seen.insert(ticket.key.clone()) {
                report.skipped += 1;
                continue;
            }
            if self.processed.is_processed(&ticket.key) {
                info!(ticket = %ticket.key, "already processed; skipping");
                report.skipped += 1;
                continue;
            }

            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("cancellation requested; not launching further tickets");
                    break;
                }
                permit = Arc::clone(&self.limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let runner = Arc::clone(&self.runner);
            let cancel = cancel.clone();
            let key = ticket.key.clone();
            let span = info_span!("ticket", ticket = %key);
            tasks.spawn(async move {
                let _permit = permit;
                // A nested task turns a panicking workflow into a JoinError we
                // can attribute to its ticket.
                let handle =
                    tokio::spawn(async move { runner.run(&ticket, &cancel).await }.instrument(span));
                (key, handle.await)
            });
            report.launched += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, Ok(Ok(outcome)))) => match self.processed.mark_processed(&key) {
                    Ok(()) => {
                        info!(ticket = %key, pr = %outcome.pr_url, "ticket completed");
                        report.succeeded += 1;
                    }
                    Err(err) => {
                        error!(ticket = %key, error = %err, "pull request opened but ledger update failed");
                        report.failed += 1;
                    }
                },
                Ok((key, Ok(Err(err)))) => {
                    log_failure(&key, &err);
                    report.failed += 1;
                }
                Ok((key, Err(join_err))) => {
                    error!(ticket = %key, panic = join_err.is_panic(), "ticket workflow aborted");
                    report.failed += 1;
                }
                Err(join_err) => {
                    error!(panic = join_err.is_panic(), "dispatch task aborted");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

fn log_failure(key: &TicketKey, err: &WorkflowError) {
    match err {
        WorkflowError::NoEffectiveChanges { .. } => {
            info!(ticket = %key, "no effective changes; ticket left for a later cycle");
        }
        WorkflowError::Cancelled { step } => {
            warn!(ticket = %key, %step, "ticket workflow cancelled");
        }
        _ => {
            error!(
                ticket = %key,
                step = %err.step(),
                class = %classify(err),
                error = %err,
                "ticket workflow failed"
            );
        }
    }
}
