use crate::backoff::BackoffConfig;
use crate::error::ConfigError;
use crate::gates::{GateConfig, default_gates};
use crate::services::TransitionMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const JIRA_TOKEN_ENV: &str = "TP_JIRA_API_TOKEN";
pub const GITHUB_TOKEN_ENV: &str = "TP_GITHUB_TOKEN";
/// Stripped from the environment of anything that runs generated code.
pub const SECRET_ENV_VARS: [&str; 2] = [JIRA_TOKEN_ENV, GITHUB_TOKEN_ENV];

/// Engine settings. Adapter-specific sections live in the binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tracker user whose tickets are picked up.
    pub assignee: String,
    pub project: String,
    /// Name of the checkout directory under `working_dir`.
    pub repo_name: String,
    pub poll_interval_secs: u64,
    pub max_concurrent_tickets: usize,
    pub working_dir: PathBuf,
    pub state_file: PathBuf,
    pub base_branch: String,
    pub branch_prefix: String,
    pub allowed_dirs: Vec<String>,
    pub plan_max_files: usize,
    pub context_max_files: usize,
    pub context_max_bytes: usize,
    pub done_status: String,
    pub transitions: TransitionMap,
    pub retry: BackoffConfig,
    #[serde(rename = "gate")]
    pub gates: Vec<GateConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            assignee: String::new(),
            project: String::new(),
            repo_name: "repo".to_string(),
            poll_interval_secs: 30,
            max_concurrent_tickets: 1,
            working_dir: PathBuf::from("./workspace"),
            state_file: PathBuf::from("tp_state.json"),
            base_branch: "main".to_string(),
            branch_prefix: "feature/".to_string(),
            allowed_dirs: ["internal", "cmd", "pkg", "docs"]
                .into_iter()
                .map(String::from)
                .collect(),
            plan_max_files: 20,
            context_max_files: 40,
            context_max_bytes: 32 * 1024,
            done_status: "Done".to_string(),
            transitions: TransitionMap::new(),
            retry: BackoffConfig::default(),
            gates: default_gates(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::InvalidInput {
                message: message.to_string(),
            })
        };
        if self.assignee.trim().is_empty() {
            return invalid("assignee must be set");
        }
        if self.project.trim().is_empty() {
            return invalid("project must be set");
        }
        if self.repo_name.trim().is_empty() || self.repo_name.contains(['/', '\\']) {
            return invalid("repo_name must be a plain directory name");
        }
        if self.poll_interval_secs == 0 {
            return invalid("poll_interval_secs must be > 0");
        }
        if self.max_concurrent_tickets == 0 {
            return invalid("max_concurrent_tickets must be > 0");
        }
        if self.base_branch.trim().is_empty() {
            return invalid("base_branch must be set");
        }
        if self.allowed_dirs.is_empty() {
            return invalid("allowed_dirs must not be empty");
        }
        if self.plan_max_files == 0 || self.context_max_files == 0 || self.context_max_bytes == 0 {
            return invalid("plan and context limits must be > 0");
        }
        if let Some(gate) = self.gates.iter().find(|gate| gate.name.trim().is_empty()) {
            return Err(ConfigError::InvalidInput {
                message: format!("gate with command {:?} has no name", gate.command),
            });
        }
        self.retry.validate()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Main checkout of the target repository.
    pub fn checkout_dir(&self) -> PathBuf {
        self.working_dir.join(&self.repo_name)
    }

    /// Parent directory of per-ticket worktrees, kept outside the checkout.
    pub fn worktrees_dir(&self) -> PathBuf {
        self.working_dir.join(".worktrees").join(&self.repo_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            assignee: "bot".to_string(),
            project: "PROJ".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn defaults_validate_once_identity_is_set() {
        assert!(Config::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: Config = toml::from_str(
            r#"
            assignee = "bot"
            project = "PROJ"
            repo_name = "service"
            max_concurrent_tickets = 3

            [transitions]
            Done = "31"

            [retry]
            max_retries = 5

            [[gate]]
            name = "tests"
            command = "cargo test"
            enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.max_concurrent_tickets, 3);
        assert_eq!(cfg.transitions.get("Done").map(String::as_str), Some("31"));
        assert_eq!(cfg.retry.max_retries, 5);
        assert_eq!(cfg.retry.initial, Duration::from_secs(1));
        assert_eq!(cfg.gates.len(), 1);
        assert_eq!(cfg.checkout_dir(), PathBuf::from("./workspace/service"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_bad_limits() {
        let cfg = Config {
            max_concurrent_tickets: 0,
            ..valid()
        };
        assert!(cfg.validate().is_err());
        let cfg = Config {
            repo_name: "a/b".to_string(),
            ..valid()
        };
        assert!(cfg.validate().is_err());
        let mut cfg = valid();
        cfg.retry.jitter = 2.0;
        assert!(cfg.validate().is_err());
    }
}
