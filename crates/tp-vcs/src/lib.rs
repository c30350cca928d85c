pub mod error;
pub mod git;
pub mod github;
pub mod host;
pub mod local;

pub use crate::error::VcsError;
pub use crate::git::{GitConfig, GitRepository, GitWorkspace};
pub use crate::github::{GitHubConfig, GitHubHost};
pub use crate::host::{PullRequest, PullRequestHost};
pub use crate::local::LocalHost;
