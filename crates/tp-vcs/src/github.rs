use crate::error::VcsError;
use crate::git::HttpCredentials;
use crate::host::{PullRequest, PullRequestHost};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tp_core::error::ClassifiedError;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub api_base: String,
    pub owner: String,
    pub repo: String,
    #[serde(skip_serializing)]
    pub token: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            owner: String::new(),
            repo: String::new(),
            token: String::new(),
        }
    }
}

impl GitHubConfig {
    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.owner, self.repo)
    }

    /// The token never goes into the clone URL, which git would persist in
    /// `.git/config`; it is handed to each network call instead.
    pub fn git_credentials(&self) -> Option<HttpCredentials> {
        (!self.token.is_empty()).then(|| HttpCredentials::new("x-access-token", &self.token))
    }
}

#[derive(Debug, Serialize)]
struct CreatePull<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct Pull {
    html_url: String,
}

#[derive(Debug, Deserialize, Default)]
struct ApiMessage {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

pub struct GitHubHost {
    cfg: GitHubConfig,
    client: Client,
    base: Url,
}

impl GitHubHost {
    pub fn new(cfg: GitHubConfig) -> Result<Self, VcsError> {
        let mut base = Url::parse(&cfg.api_base).map_err(|err| VcsError::BackendError {
            reason: format!("invalid api base {:?}: {err}", cfg.api_base),
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("ticketpilot")
            .build()
            .map_err(|source| VcsError::Http {
                op: "build client",
                source,
            })?;
        Ok(Self { cfg, client, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, VcsError> {
        self.base
            .join(path)
            .map_err(|err| VcsError::BackendError {
                reason: format!("invalid endpoint {path:?}: {err}"),
            })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        if self.cfg.token.is_empty() {
            request
        } else {
            request.bearer_auth(&self.cfg.token)
        }
    }

    async fn send(&self, op: &'static str, request: RequestBuilder) -> Result<Response, VcsError> {
        self.authorized(request)
            .send()
            .await
            .map_err(|source| VcsError::Http { op, source })
    }

    async fn find_open_pull(&self, head: &str) -> Result<Option<String>, VcsError> {
        let url = self.endpoint(&format!("repos/{}/{}/pulls", self.cfg.owner, self.cfg.repo))?;
        let qualified = format!("{}:{head}", self.cfg.owner);
        let request = self
            .client
            .get(url)
            .query(&[("head", qualified.as_str()), ("state", "open")]);
        let response = self.send("list pull requests", request).await?;
        if !response.status().is_success() {
            return Err(api_error("list pull requests", response).await);
        }
        let pulls: Vec<Pull> = response
            .json()
            .await
            .map_err(|source| VcsError::Http {
                op: "list pull requests",
                source,
            })?;
        Ok(pulls.into_iter().next().map(|pull| pull.html_url))
    }
}

#[async_trait]
impl PullRequestHost for GitHubHost {
    async fn open_pull_request(&self, request: PullRequest<'_>) -> Result<String, ClassifiedError> {
        let url = self.endpoint(&format!("repos/{}/{}/pulls", self.cfg.owner, self.cfg.repo))?;
        let payload = CreatePull {
            title: request.title,
            head: request.head,
            base: request.base,
            body: request.body,
        };
        let response = self
            .send("open pull request", self.client.post(url).json(&payload))
            .await?;

        let status = response.status();
        if status.is_success() {
            let pull: Pull = response.json().await.map_err(|source| VcsError::Http {
                op: "open pull request",
                source,
            })?;
            info!(url = %pull.html_url, head = request.head, "opened pull request");
            return Ok(pull.html_url);
        }

        let err = api_error("open pull request", response).await;
        if status == StatusCode::UNPROCESSABLE_ENTITY && already_exists(&err) {
            debug!(head = request.head, "pull request already exists");
            if let Some(url) = self.find_open_pull(request.head).await? {
                return Ok(url);
            }
        }
        Err(err.into())
    }

    async fn health_check(&self) -> Result<(), ClassifiedError> {
        let url = self.endpoint(&format!("repos/{}/{}", self.cfg.owner, self.cfg.repo))?;
        let response = self.send("repository lookup", self.client.get(url)).await?;
        if !response.status().is_success() {
            return Err(api_error("repository lookup", response).await.into());
        }
        Ok(())
    }
}

fn already_exists(err: &VcsError) -> bool {
    matches!(err, VcsError::Api { message, .. } if message.to_lowercase().contains("already exists"))
}

async fn api_error(op: &'static str, response: Response) -> VcsError {
    let status = response.status().as_u16();
    let remaining_zero = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim() == "0");
    let text = response.text().await.unwrap_or_default();
    let parsed: ApiMessage = serde_json::from_str(&text).unwrap_or_default();
    let mut message = if parsed.message.is_empty() {
        text.trim().to_string()
    } else {
        parsed.message
    };
    for detail in &parsed.errors {
        if let Some(extra) = detail.get("message").and_then(|m| m.as_str()) {
            message.push_str("; ");
            message.push_str(extra);
        }
    }
    let rate_limited = status == 403
        && (remaining_zero || message.to_lowercase().contains("rate limit"));
    VcsError::Api {
        op,
        status,
        message,
        rate_limited,
    }
}
