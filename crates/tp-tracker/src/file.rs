use crate::error::TrackerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tp_core::error::ClassifiedError;
use tp_core::fsutil::write_atomic;
use tp_core::services::{Ticketing, TransitionMap};
use tp_core::types::{Ticket, TicketKey};
use tracing::debug;

pub const TODO_STATUS: &str = "To Do";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTicket {
    pub key: TicketKey,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub assignee: String,
    /// Falls back to the key prefix (`PROJ` for `PROJ-12`) when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project: String,
}

fn default_status() -> String {
    TODO_STATUS.to_string()
}

impl FileTicket {
    pub fn project(&self) -> &str {
        if !self.project.is_empty() {
            return &self.project;
        }
        let key = self.key.as_str();
        key.split_once('-').map_or(key, |(prefix, _)| prefix)
    }

    fn is_todo_for(&self, assignee: &str, project: &str) -> bool {
        self.status.eq_ignore_ascii_case(TODO_STATUS)
            && (assignee.is_empty() || self.assignee == assignee)
            && (project.is_empty() || self.project() == project)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TicketFile {
    #[serde(default)]
    tickets: Vec<FileTicket>,
}

/// Ticket source backed by a JSON document on disk, for local runs and
/// demos without a tracker account.
pub struct FileTracker {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn tickets(&self) -> Result<Vec<FileTicket>, TrackerError> {
        Ok(self.read().await?.tickets)
    }

    async fn read(&self) -> Result<TicketFile, TrackerError> {
        let display = self.path.display().to_string();
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| TrackerError::Io {
                op: "read",
                path: display.clone(),
                source,
            })?;
        serde_json::from_str(&raw).map_err(|source| TrackerError::Parse {
            path: display,
            source,
        })
    }

    async fn write(&self, file: &TicketFile) -> Result<(), TrackerError> {
        let display = self.path.display().to_string();
        let mut bytes = serde_json::to_vec_pretty(file).map_err(|source| TrackerError::Parse {
            path: display.clone(),
            source,
        })?;
        bytes.push(b'\n');
        let path = self.path.clone();
        let written = tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|err| TrackerError::Io {
                op: "write",
                path: display.clone(),
                source: std::io::Error::other(err),
            })?;
        written.map_err(|source| TrackerError::Io {
            op: "write",
            path: display,
            source,
        })
    }
}

#[async_trait]
impl Ticketing for FileTracker {
    async fn fetch_tickets(
        &self,
        assignee: &str,
        project: &str,
    ) -> Result<Vec<Ticket>, ClassifiedError> {
        let file = self.read().await?;
        let tickets: Vec<Ticket> = file
            .tickets
            .into_iter()
            .filter(|ticket| ticket.is_todo_for(assignee, project))
            .map(|ticket| Ticket::new(ticket.key, ticket.summary, ticket.description))
            .collect();
        debug!(count = tickets.len(), path = %self.path.display(), "read tickets from file");
        Ok(tickets)
    }

    async fn update_status(
        &self,
        key: &TicketKey,
        status: &str,
        transitions: &TransitionMap,
    ) -> Result<(), ClassifiedError> {
        if !transitions.contains_key(status) {
            return Err(TrackerError::MissingTransition {
                status: status.to_string(),
            }
            .into());
        }
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        let Some(ticket) = file.tickets.iter_mut().find(|ticket| &ticket.key == key) else {
            return Err(TrackerError::UnknownTicket {
                key: key.to_string(),
            }
            .into());
        };
        ticket.status = status.to_string();
        self.write(&file).await?;
        debug!(key = %key, status, "updated ticket status");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ClassifiedError> {
        self.read().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_tickets(dir: &Path) -> PathBuf {
        let path = dir.join("tickets.json");
        let doc = json!({
            "tickets": [
                {"key": "PROJ-1", "summary": "First", "assignee": "bot"},
                {"key": "PROJ-2", "summary": "Started", "assignee": "bot", "status": "In Progress"},
                {"key": "PROJ-3", "summary": "Someone else", "assignee": "alice"},
                {"key": "OTHER-4", "summary": "Other project", "assignee": "bot"},
                {"key": "X-5", "summary": "Explicit project", "assignee": "bot", "project": "PROJ", "status": "to do"}
            ]
        });
        std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();
        path
    }

    fn done() -> TransitionMap {
        TransitionMap::from([("Done".to_string(), "31".to_string())])
    }

    #[tokio::test]
    async fn filters_todo_tickets_for_assignee_and_project() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = FileTracker::new(write_tickets(dir.path()));
        let keys: Vec<String> = tracker
            .fetch_tickets("bot", "PROJ")
            .await
            .unwrap()
            .into_iter()
            .map(|ticket| ticket.key.to_string())
            .collect();
        assert_eq!(keys, ["PROJ-1", "X-5"]);
    }

    #[tokio::test]
    async fn status_update_persists() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = FileTracker::new(write_tickets(dir.path()));
        let key = TicketKey::new("PROJ-1").unwrap();
        tracker.update_status(&key, "Done", &done()).await.unwrap();

        let reloaded = FileTracker::new(tracker.path());
        let ticket = reloaded
            .tickets()
            .await
            .unwrap()
            .into_iter()
            .find(|ticket| ticket.key == key)
            .unwrap();
        assert_eq!(ticket.status, "Done");
        let remaining = reloaded.fetch_tickets("bot", "PROJ").await.unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn status_update_requires_a_transition_and_known_ticket() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = FileTracker::new(write_tickets(dir.path()));
        let key = TicketKey::new("PROJ-1").unwrap();
        let err = tracker
            .update_status(&key, "Done", &TransitionMap::new())
            .await
            .unwrap_err();
        assert!(err.is_permanent());

        let missing = TicketKey::new("PROJ-99").unwrap();
        let err = tracker
            .update_status(&missing, "Done", &done())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TrackerError>(),
            Some(TrackerError::UnknownTicket { .. })
        ));
    }

    #[tokio::test]
    async fn missing_or_corrupt_file_fails_health_check() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = FileTracker::new(dir.path().join("absent.json"));
        assert!(tracker.health_check().await.is_err());

        let path = dir.path().join("corrupt.json");
        std::fs::write(&path, "{").unwrap();
        let err = FileTracker::new(path).fetch_tickets("bot", "PROJ").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TrackerError>(),
            Some(TrackerError::Parse { .. })
        ));
    }
}
