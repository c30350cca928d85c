use async_trait::async_trait;
use tp_core::error::ClassifiedError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullRequest<'a> {
    pub base: &'a str,
    pub head: &'a str,
    pub title: &'a str,
    pub body: &'a str,
}

/// Where pull requests get opened. Implementations must be idempotent for a
/// given head branch: reopening returns the existing URL.
#[async_trait]
pub trait PullRequestHost: Send + Sync {
    async fn open_pull_request(&self, request: PullRequest<'_>) -> Result<String, ClassifiedError>;

    async fn health_check(&self) -> Result<(), ClassifiedError> {
        Ok(())
    }
}
