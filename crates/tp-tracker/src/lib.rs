pub mod error;
pub mod file;
pub mod jira;

pub use crate::error::TrackerError;
pub use crate::file::{FileTicket, FileTracker};
pub use crate::jira::{JiraConfig, JiraTracker};
