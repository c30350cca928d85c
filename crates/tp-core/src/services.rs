use crate::error::ClassifiedError;
use crate::types::{CodeChange, Ticket, TicketKey};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

/// Status name to tracker transition id.
pub type TransitionMap = BTreeMap<String, String>;

#[async_trait]
pub trait Ticketing: Send + Sync {
    async fn fetch_tickets(
        &self,
        assignee: &str,
        project: &str,
    ) -> Result<Vec<Ticket>, ClassifiedError>;

    async fn update_status(
        &self,
        key: &TicketKey,
        status: &str,
        transitions: &TransitionMap,
    ) -> Result<(), ClassifiedError>;

    async fn health_check(&self) -> Result<(), ClassifiedError> {
        Ok(())
    }
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn is_cloned(&self) -> bool;

    async fn clone_repository(&self) -> Result<(), ClassifiedError>;

    async fn switch_branch(&self, branch: &str) -> Result<(), ClassifiedError>;

    async fn sync_with_remote(&self) -> Result<(), ClassifiedError>;

    /// Creates (or resets) `branch` at `base` in an isolated working tree.
    async fn create_branch(
        &self,
        branch: &str,
        base: &str,
    ) -> Result<Box<dyn Workspace>, ClassifiedError>;

    /// Returns the URL of the opened (or already open) pull request.
    async fn create_pull_request(
        &self,
        base: &str,
        head: &str,
        title: &str,
        body: &str,
    ) -> Result<String, ClassifiedError>;

    async fn health_check(&self) -> Result<(), ClassifiedError> {
        Ok(())
    }
}

/// A working tree checked out on a single ticket branch.
#[async_trait]
pub trait Workspace: Send + Sync {
    fn root(&self) -> &Path;

    fn branch(&self) -> &str;

    /// Stages `path`, relative to [`root`](Self::root).
    async fn add_file(&self, path: &str) -> Result<(), ClassifiedError>;

    async fn has_local_changes(&self) -> Result<bool, ClassifiedError>;

    async fn commit(&self, message: &str) -> Result<(), ClassifiedError>;

    async fn push(&self) -> Result<(), ClassifiedError>;

    /// Removes the working tree. Safe to call more than once.
    async fn release(&self) -> Result<(), ClassifiedError>;
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn plan_changes(
        &self,
        ticket: &Ticket,
        repo_context: &str,
    ) -> Result<Vec<CodeChange>, ClassifiedError>;
}
