use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tp_agent::CommandGeneratorConfig;
use tp_core::Config;
use tp_core::error::ConfigError;
use tp_tracker::JiraConfig;
use tp_vcs::GitHubConfig;
use tp_vcs::git::HttpCredentials;
use tp_vcs::github::DEFAULT_API_BASE;

pub use tp_core::config::{GITHUB_TOKEN_ENV, JIRA_TOKEN_ENV};

/// Contents of `tp.toml`: engine settings at the top level plus one table per
/// collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub core: Config,
    pub tracker: TrackerConfig,
    pub hosting: HostingConfig,
    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TrackerConfig {
    Jira(JiraConfig),
    File { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HostingConfig {
    Github(GitHubSection),
    /// Plain git remote; pull requests are recorded in a local ledger.
    Local {
        remote_url: String,
        #[serde(default)]
        ledger: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubSection {
    pub api_base: Option<String>,
    pub owner: String,
    pub repo: String,
    #[serde(skip_serializing)]
    pub token: String,
    /// Overrides the https clone URL derived from owner and repo.
    pub remote_url: Option<String>,
}

impl GitHubSection {
    pub fn api(&self) -> GitHubConfig {
        GitHubConfig {
            api_base: self
                .api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            token: self.token.clone(),
        }
    }

    pub fn remote_url(&self) -> String {
        self.remote_url
            .clone()
            .unwrap_or_else(|| self.api().clone_url())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GeneratorConfig {
    Command(CommandGeneratorConfig),
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg = Self::parse(path, &raw)?;
        cfg.apply_env(|name| std::env::var(name).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn parse(path: &Path, raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Secrets from the environment win over the file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let TrackerConfig::Jira(jira) = &mut self.tracker
            && let Some(token) = lookup(JIRA_TOKEN_ENV).filter(|t| !t.is_empty())
        {
            jira.api_token = token;
        }
        if let HostingConfig::Github(github) = &mut self.hosting
            && let Some(token) = lookup(GITHUB_TOKEN_ENV).filter(|t| !t.is_empty())
        {
            github.token = token;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.core.validate()?;
        let invalid = |message: String| Err(ConfigError::InvalidInput { message });
        match &self.tracker {
            TrackerConfig::Jira(jira) => {
                if let Err(err) = jira.validate() {
                    return invalid(err.to_string());
                }
            }
            TrackerConfig::File { path } if path.as_os_str().is_empty() => {
                return invalid("tracker.path must be set".to_string());
            }
            TrackerConfig::File { .. } => {}
        }
        match &self.hosting {
            HostingConfig::Github(github) if github.owner.is_empty() || github.repo.is_empty() => {
                return invalid("hosting.owner and hosting.repo must be set".to_string());
            }
            HostingConfig::Local { remote_url, .. } if remote_url.trim().is_empty() => {
                return invalid("hosting.remote_url must be set".to_string());
            }
            _ => {}
        }
        let GeneratorConfig::Command(generator) = &self.generator;
        if generator.command.trim().is_empty() {
            return invalid("generator.command must be set".to_string());
        }
        Ok(())
    }

    pub fn remote_url(&self) -> String {
        match &self.hosting {
            HostingConfig::Github(github) => github.remote_url(),
            HostingConfig::Local { remote_url, .. } => remote_url.clone(),
        }
    }

    pub fn git_credentials(&self) -> Option<HttpCredentials> {
        match &self.hosting {
            HostingConfig::Github(github) => github.api().git_credentials(),
            HostingConfig::Local { .. } => None,
        }
    }

    pub fn ledger_path(&self) -> Option<PathBuf> {
        match &self.hosting {
            HostingConfig::Github(_) => None,
            HostingConfig::Local { ledger, .. } => {
                Some(ledger.clone().unwrap_or_else(|| self.default_ledger()))
            }
        }
    }

    pub fn default_ledger(&self) -> PathBuf {
        self.core.working_dir.join("pull_requests.jsonl")
    }
}

pub const SAMPLE_CONFIG: &str = r#"# ticketpilot configuration
assignee = "bot@example.com"
project = "PROJ"
repo_name = "service"
poll_interval_secs = 30
max_concurrent_tickets = 1
working_dir = "./workspace"
state_file = "tp_state.json"
base_branch = "main"
branch_prefix = "feature/"
allowed_dirs = ["internal", "cmd", "pkg", "docs"]
plan_max_files = 20
done_status = "Done"

[transitions]
Done = "31"

[retry]
initial_ms = 1000
max_ms = 10000
multiplier = 2.0
jitter = 0.2
max_retries = 3

[[gate]]
name = "static-check"
command = "go vet ./..."
enabled = false

[[gate]]
name = "tests"
command = "go test ./..."
enabled = false

[tracker]
kind = "jira"
base_url = "https://example.atlassian.net"
email = "bot@example.com"
# api_token is read from TP_JIRA_API_TOKEN

[hosting]
kind = "github"
owner = "example"
repo = "service"
# token is read from TP_GITHUB_TOKEN

[generator]
kind = "command"
command = "python3 planner.py"
timeout_secs = 300
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AppConfig {
        AppConfig::parse(Path::new("tp.toml"), SAMPLE_CONFIG).unwrap()
    }

    #[test]
    fn sample_config_parses() {
        let cfg = sample();
        assert_eq!(cfg.core.project, "PROJ");
        assert_eq!(cfg.core.repo_name, "service");
        assert_eq!(cfg.core.gates.len(), 2);
        assert_eq!(cfg.core.transitions["Done"], "31");
        assert!(matches!(cfg.tracker, TrackerConfig::Jira(_)));
        assert_eq!(cfg.remote_url(), "https://github.com/example/service.git");
        let GeneratorConfig::Command(generator) = &cfg.generator;
        assert_eq!(generator.command, "python3 planner.py");
        assert!(generator.allow_base64);
    }

    #[test]
    fn sample_needs_secrets_from_env() {
        let mut cfg = sample();
        assert!(cfg.validate().is_err());

        cfg.apply_env(|name| match name {
            JIRA_TOKEN_ENV => Some("jira-secret".to_string()),
            GITHUB_TOKEN_ENV => Some("gh-secret".to_string()),
            _ => None,
        });
        cfg.validate().unwrap();
        let TrackerConfig::Jira(jira) = &cfg.tracker else {
            panic!("expected jira tracker");
        };
        assert_eq!(jira.api_token, "jira-secret");
        assert_eq!(cfg.remote_url(), "https://github.com/example/service.git");
        assert!(cfg.git_credentials().is_some());
    }

    #[test]
    fn local_setup_defaults_the_ledger() {
        let raw = r#"
assignee = "bot"
project = "PROJ"

[tracker]
kind = "file"
path = "tickets.json"

[hosting]
kind = "local"
remote_url = "/srv/git/service.git"

[generator]
kind = "command"
command = "./plan.sh"
"#;
        let cfg = AppConfig::parse(Path::new("tp.toml"), raw).unwrap();
        cfg.validate().unwrap();
        assert_eq!(
            cfg.ledger_path(),
            Some(PathBuf::from("./workspace/pull_requests.jsonl"))
        );
        assert_eq!(cfg.core.poll_interval_secs, 30);
        assert_eq!(cfg.core.max_concurrent_tickets, 1);
    }

    #[test]
    fn unknown_kinds_and_missing_sections_fail_to_parse() {
        let raw = r#"
assignee = "bot"
project = "PROJ"

[tracker]
kind = "linear"
"#;
        assert!(matches!(
            AppConfig::parse(Path::new("tp.toml"), raw),
            Err(ConfigError::Parse { .. })
        ));
    }
}
