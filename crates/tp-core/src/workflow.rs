use crate::backoff::{Retried, retry};
use crate::config::Config;
use crate::context::build_repo_context;
use crate::error::{ClassifiedError, RetryError, WorkflowError};
use crate::gates::{GateStatus, run_gates};
use crate::metrics::RunMetrics;
use crate::pr::{branch_name, commit_message, pr_body, pr_title};
use crate::sandbox::{ValidatedChangeSet, validate};
use crate::services::{Generator, Repository, Ticketing, Workspace};
use crate::types::Ticket;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Branch,
    Generate,
    Validate,
    Write,
    Commit,
    Gate,
    Push,
    OpenPr,
    Transition,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Branch => "branch",
            Self::Generate => "generate",
            Self::Validate => "validate",
            Self::Write => "write",
            Self::Commit => "commit",
            Self::Gate => "gate",
            Self::Push => "push",
            Self::OpenPr => "open_pr",
            Self::Transition => "transition",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketOutcome {
    pub branch: String,
    pub pr_url: String,
    pub files: usize,
    /// False when the status transition failed after the PR was opened.
    pub transitioned: bool,
}

#[async_trait]
pub trait TicketRunner: Send + Sync {
    async fn run(
        &self,
        ticket: &Ticket,
        cancel: &CancellationToken,
    ) -> Result<TicketOutcome, WorkflowError>;
}

pub struct Workflow {
    cfg: Arc<Config>,
    ticketing: Arc<dyn Ticketing>,
    repository: Arc<dyn Repository>,
    generator: Arc<dyn Generator>,
    metrics: Arc<RunMetrics>,
}

impl Workflow {
    pub fn new(
        cfg: Arc<Config>,
        ticketing: Arc<dyn Ticketing>,
        repository: Arc<dyn Repository>,
        generator: Arc<dyn Generator>,
        metrics: Arc<RunMetrics>,
    ) -> Self {
        Self {
            cfg,
            ticketing,
            repository,
            generator,
            metrics,
        }
    }

    async fn run_in(
        &self,
        ticket: &Ticket,
        workspace: &dyn Workspace,
        cancel: &CancellationToken,
    ) -> Result<TicketOutcome, WorkflowError> {
        let branch = workspace.branch().to_string();

        let context = self.repo_context(workspace).await;
        let generator = &self.generator;
        let context = context.as_str();
        let planned = retry(cancel, &self.cfg.retry, move || {
            generator.plan_changes(ticket, context)
        })
        .await;
        let changes = self
            .settle(Step::Generate, planned, |source, retries| {
                WorkflowError::Generate { retries, source }
            })
            .inspect_err(|err| {
                if !err.is_cancelled() {
                    self.metrics.inc_generation_failures();
                }
            })?;
        debug!(proposed = changes.len(), "generator proposed changes");

        let validated = validate(
            workspace.root(),
            changes,
            &self.cfg.allowed_dirs,
            self.cfg.plan_max_files,
        )
        .inspect_err(|_| self.metrics.inc_validation_failures())?;
        info!(
            accepted = validated.len(),
            rejected = validated.rejected.len(),
            truncated = validated.truncated,
            "changeset validated"
        );

        self.write_and_commit(ticket, workspace, &validated).await?;

        let report = run_gates(cancel, &self.cfg.gates, workspace.root()).await;
        if report
            .outcomes
            .iter()
            .any(|outcome| outcome.status == GateStatus::Cancelled)
        {
            return Err(WorkflowError::Cancelled { step: Step::Gate });
        }
        if !report.passed() {
            self.metrics.inc_gate_failures();
            return Err(WorkflowError::GatesFailed { report });
        }

        let pushed = retry(cancel, &self.cfg.retry, move || workspace.push()).await;
        self.settle(Step::Push, pushed, |source, retries| WorkflowError::Push {
            branch: branch.clone(),
            retries,
            source,
        })?;
        info!(branch = %branch, "pushed ticket branch");

        let title = pr_title(ticket);
        let body = pr_body(ticket, &validated.changes, &report.notes);
        let repository = &self.repository;
        let (base, head) = (self.cfg.base_branch.as_str(), branch.as_str());
        let (title_ref, body_ref) = (title.as_str(), body.as_str());
        let opened = retry(cancel, &self.cfg.retry, move || {
            repository.create_pull_request(base, head, title_ref, body_ref)
        })
        .await;
        let pr_url = self.settle(Step::OpenPr, opened, |source, retries| {
            WorkflowError::OpenPr { retries, source }
        })?;
        self.metrics.inc_prs_created();
        info!(pr = %pr_url, "opened pull request");

        let transitioned = self.transition(ticket, cancel).await;
        self.metrics.inc_tickets_processed();

        Ok(TicketOutcome {
            branch,
            pr_url,
            files: validated.len(),
            transitioned,
        })
    }

    async fn repo_context(&self, workspace: &dyn Workspace) -> String {
        let root = workspace.root().to_path_buf();
        let (max_files, max_bytes) = (self.cfg.context_max_files, self.cfg.context_max_bytes);
        match tokio::task::spawn_blocking(move || build_repo_context(&root, max_files, max_bytes))
            .await
        {
            Ok(context) => context,
            Err(err) => {
                warn!(error = %err, "building repository context failed; continuing without it");
                String::new()
            }
        }
    }

    async fn write_and_commit(
        &self,
        ticket: &Ticket,
        workspace: &dyn Workspace,
        validated: &ValidatedChangeSet,
    ) -> Result<(), WorkflowError> {
        for change in &validated.changes {
            let target = workspace.root().join(&change.path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| WorkflowError::Write {
                        path: change.path.clone(),
                        source,
                    })?;
            }
            tokio::fs::write(&target, change.content.as_bytes())
                .await
                .map_err(|source| WorkflowError::Write {
                    path: change.path.clone(),
                    source,
                })?;
            workspace
                .add_file(&change.path)
                .await
                .map_err(|source| WorkflowError::Stage {
                    path: change.path.clone(),
                    source,
                })?;
        }

        let changed = match workspace.has_local_changes().await {
            Ok(changed) => changed,
            Err(err) => {
                warn!(error = %err, "could not inspect working tree; attempting commit");
                true
            }
        };
        if !changed {
            info!("staged files match the base branch; nothing to commit");
            return Err(WorkflowError::NoEffectiveChanges {
                key: ticket.key.clone(),
            });
        }

        workspace
            .commit(&commit_message(&ticket.key))
            .await
            .map_err(WorkflowError::Commit)?;
        debug!(files = validated.len(), "committed changes");
        Ok(())
    }

    /// Failures are logged, not returned.
    async fn transition(&self, ticket: &Ticket, cancel: &CancellationToken) -> bool {
        let ticketing = &self.ticketing;
        let status = self.cfg.done_status.as_str();
        let transitions = &self.cfg.transitions;
        let key = &ticket.key;
        let moved = retry(cancel, &self.cfg.retry, move || {
            ticketing.update_status(key, status, transitions)
        })
        .await;
        self.metrics.add_retries(moved.retries);
        match moved.result {
            Ok(()) => {
                info!(status, "ticket transitioned");
                true
            }
            Err(err) => {
                warn!(
                    step = %Step::Transition,
                    status,
                    retries = moved.retries,
                    error = %err,
                    "ticket transition failed; pull request stays open"
                );
                false
            }
        }
    }

    fn settle<T>(
        &self,
        step: Step,
        retried: Retried<T>,
        fail: impl FnOnce(ClassifiedError, u32) -> WorkflowError,
    ) -> Result<T, WorkflowError> {
        self.metrics.add_retries(retried.retries);
        match retried.result {
            Ok(value) => Ok(value),
            Err(RetryError::Cancelled) => Err(WorkflowError::Cancelled { step }),
            Err(RetryError::Failed(source)) => Err(fail(source, retried.retries)),
        }
    }
}

#[async_trait]
impl TicketRunner for Workflow {
    #[instrument(skip_all, fields(ticket = %ticket.key))]
    async fn run(
        &self,
        ticket: &Ticket,
        cancel: &CancellationToken,
    ) -> Result<TicketOutcome, WorkflowError> {
        let branch = branch_name(&self.cfg.branch_prefix, &ticket.key);
        let workspace = self
            .repository
            .create_branch(&branch, &self.cfg.base_branch)
            .await
            .map_err(|source| WorkflowError::Branch {
                branch: branch.clone(),
                source,
            })?;
        info!(branch = %branch, root = %workspace.root().display(), "workspace ready");

        let result = self.run_in(ticket, workspace.as_ref(), cancel).await;

        if let Err(err) = workspace.release().await {
            warn!(branch = %branch, error = %err, "failed to release workspace");
        }
        result
    }
}
