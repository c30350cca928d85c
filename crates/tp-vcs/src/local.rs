use crate::error::VcsError;
use crate::host::{PullRequest, PullRequestHost};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt as _;
use tokio::sync::Mutex;
use tp_core::error::ClassifiedError;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub number: usize,
    pub base: String,
    pub head: String,
    pub title: String,
    pub body: String,
    pub opened_at: DateTime<Utc>,
}

/// Records pull requests in a JSONL ledger instead of a hosting service.
/// Useful for dry runs against a plain git remote.
pub struct LocalHost {
    ledger: PathBuf,
    lock: Mutex<()>,
}

impl LocalHost {
    pub fn new(ledger: impl Into<PathBuf>) -> Self {
        Self {
            ledger: ledger.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn ledger(&self) -> &Path {
        &self.ledger
    }

    pub async fn entries(&self) -> Result<Vec<LedgerEntry>, VcsError> {
        let raw = match tokio::fs::read_to_string(&self.ledger).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(VcsError::Io {
                    op: "read pull request ledger",
                    source,
                });
            }
        };
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|err| VcsError::BackendError {
                    reason: format!("corrupt ledger line: {err}"),
                })
            })
            .collect()
    }

    fn url_for(&self, number: usize) -> String {
        format!("file://{}#{number}", self.ledger.display())
    }
}

#[async_trait]
impl PullRequestHost for LocalHost {
    async fn open_pull_request(&self, request: PullRequest<'_>) -> Result<String, ClassifiedError> {
        let _guard = self.lock.lock().await;
        let entries = self.entries().await?;
        if let Some(existing) = entries.iter().find(|entry| entry.head == request.head) {
            return Ok(self.url_for(existing.number));
        }

        let entry = LedgerEntry {
            number: entries.len() + 1,
            base: request.base.to_string(),
            head: request.head.to_string(),
            title: request.title.to_string(),
            body: request.body.to_string(),
            opened_at: Utc::now(),
        };
        let mut line = serde_json::to_string(&entry).map_err(|err| VcsError::BackendError {
            reason: format!("encode ledger entry: {err}"),
        })?;
        line.push('\n');

        if let Some(parent) = self.ledger.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| VcsError::Io {
                    op: "create ledger dir",
                    source,
                })?;
        }
        let io = |source| VcsError::Io {
            op: "append pull request ledger",
            source,
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.ledger)
            .await
            .map_err(io)?;
        file.write_all(line.as_bytes()).await.map_err(io)?;
        file.sync_all().await.map_err(io)?;

        let url = self.url_for(entry.number);
        info!(url = %url, head = request.head, "recorded pull request");
        Ok(url)
    }
}
