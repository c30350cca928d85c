use crate::error::{VcsError, map_backend_error};
use crate::host::{PullRequest, PullRequestHost};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::process::Command;
use tokio::sync::Mutex;
use tp_core::error::ClassifiedError;
use tp_core::services::{Repository, Workspace};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitConfig {
    /// Main checkout, cloned from `remote_url`.
    pub checkout_dir: PathBuf,
    /// Parent directory for per-branch worktrees.
    pub worktrees_dir: PathBuf,
    pub remote_url: String,
    pub remote_name: String,
    pub author_name: String,
    pub author_email: String,
    pub credentials: Option<HttpCredentials>,
}

impl GitConfig {
    pub fn new(
        checkout_dir: impl Into<PathBuf>,
        worktrees_dir: impl Into<PathBuf>,
        remote_url: impl Into<String>,
    ) -> Self {
        Self {
            checkout_dir: checkout_dir.into(),
            worktrees_dir: worktrees_dir.into(),
            remote_url: remote_url.into(),
            remote_name: "origin".to_string(),
            author_name: "ticketpilot".to_string(),
            author_email: "ticketpilot@localhost".to_string(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<HttpCredentials>) -> Self {
        self.credentials = credentials;
        self
    }
}

/// Basic auth for HTTPS remotes. Handed to git through `GIT_CONFIG_*`
/// variables on each network call, so it is never written to `.git/config`.
#[derive(Clone, PartialEq, Eq)]
pub struct HttpCredentials {
    header: String,
}

impl HttpCredentials {
    pub fn new(username: &str, password: &str) -> Self {
        let encoded = STANDARD.encode(format!("{username}:{password}"));
        Self {
            header: format!("Authorization: Basic {encoded}"),
        }
    }

    fn env(&self) -> [(&'static str, &str); 3] {
        [
            ("GIT_CONFIG_COUNT", "1"),
            ("GIT_CONFIG_KEY_0", "http.extraHeader"),
            ("GIT_CONFIG_VALUE_0", &self.header),
        ]
    }
}

impl fmt::Debug for HttpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCredentials").finish_non_exhaustive()
    }
}

/// [`Repository`] over the git CLI. Each ticket branch gets its own linked
/// worktree, so concurrent workflows never share a working tree.
pub struct GitRepository {
    cfg: Arc<GitConfig>,
    host: Arc<dyn PullRequestHost>,
    worktree_lock: Arc<Mutex<()>>,
}

impl GitRepository {
    /// Relative paths are resolved against the current directory, since git
    /// runs from several different working directories.
    pub fn new(mut cfg: GitConfig, host: Arc<dyn PullRequestHost>) -> Self {
        cfg.checkout_dir = absolute(cfg.checkout_dir);
        cfg.worktrees_dir = absolute(cfg.worktrees_dir);
        Self {
            cfg: Arc::new(cfg),
            host,
            worktree_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &GitConfig {
        &self.cfg
    }

    pub fn head_commit(&self) -> Result<String, VcsError> {
        let repo = open_repo(&self.cfg.checkout_dir)?;
        let commit = repo
            .head_commit()
            .map_err(map_backend_error("head commit"))?;
        Ok(commit.id().to_string())
    }

    fn worktree_path(&self, branch: &str) -> PathBuf {
        let slug: String = branch
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        self.cfg.worktrees_dir.join(slug)
    }
}

#[async_trait]
impl Repository for GitRepository {
    async fn is_cloned(&self) -> bool {
        open_repo(&self.cfg.checkout_dir).is_ok()
    }

    async fn clone_repository(&self) -> Result<(), ClassifiedError> {
        if self.cfg.remote_url.trim().is_empty() {
            return Err(ClassifiedError::permanent("no remote url configured"));
        }
        let checkout = &self.cfg.checkout_dir;
        if let Some(parent) = checkout.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| VcsError::Io {
                    op: "create checkout parent",
                    source,
                })?;
        }
        let target = checkout.to_string_lossy().to_string();
        run_git(
            Path::new("."),
            "clone",
            &["clone", "--origin", &self.cfg.remote_name, &self.cfg.remote_url, &target],
            self.cfg.credentials.as_ref(),
        )
        .await?;
        info!(path = %checkout.display(), "cloned repository");
        Ok(())
    }

    async fn switch_branch(&self, branch: &str) -> Result<(), ClassifiedError> {
        git(&self.cfg.checkout_dir, "checkout", &["checkout", branch]).await?;
        Ok(())
    }

    async fn sync_with_remote(&self) -> Result<(), ClassifiedError> {
        run_git(
            &self.cfg.checkout_dir,
            "pull",
            &["pull", "--ff-only", "--no-rebase"],
            self.cfg.credentials.as_ref(),
        )
        .await?;
        match self.head_commit() {
            Ok(head) => debug!(head = %head, "synced with remote"),
            Err(err) => debug!(error = %err, "synced with remote; head unreadable"),
        }
        Ok(())
    }

    async fn create_branch(
        &self,
        branch: &str,
        base: &str,
    ) -> Result<Box<dyn Workspace>, ClassifiedError> {
        let path = self.worktree_path(branch);
        let _guard = self.worktree_lock.lock().await;

        if path.exists() {
            warn!(path = %path.display(), "removing stale worktree");
            remove_worktree(&self.cfg.checkout_dir, &path).await;
        }
        tokio::fs::create_dir_all(&self.cfg.worktrees_dir)
            .await
            .map_err(|source| VcsError::Io {
                op: "create worktrees dir",
                source,
            })?;

        let target = path.to_string_lossy().to_string();
        git(
            &self.cfg.checkout_dir,
            "worktree add",
            &["worktree", "add", "-B", branch, &target, base],
        )
        .await?;
        debug!(branch, path = %path.display(), "created worktree");

        Ok(Box::new(GitWorkspace {
            root: path,
            branch: branch.to_string(),
            cfg: Arc::clone(&self.cfg),
            worktree_lock: Arc::clone(&self.worktree_lock),
            released: AtomicBool::new(false),
        }))
    }

    async fn create_pull_request(
        &self,
        base: &str,
        head: &str,
        title: &str,
        body: &str,
    ) -> Result<String, ClassifiedError> {
        self.host
            .open_pull_request(PullRequest {
                base,
                head,
                title,
                body,
            })
            .await
    }

    async fn health_check(&self) -> Result<(), ClassifiedError> {
        git(Path::new("."), "version", &["--version"]).await?;
        self.host.health_check().await
    }
}

pub struct GitWorkspace {
    root: PathBuf,
    branch: String,
    cfg: Arc<GitConfig>,
    worktree_lock: Arc<Mutex<()>>,
    released: AtomicBool,
}

#[async_trait]
impl Workspace for GitWorkspace {
    fn root(&self) -> &Path {
        &self.root
    }

    fn branch(&self) -> &str {
        &self.branch
    }

    async fn add_file(&self, path: &str) -> Result<(), ClassifiedError> {
        git(&self.root, "add", &["add", "--", path]).await?;
        Ok(())
    }

    async fn has_local_changes(&self) -> Result<bool, ClassifiedError> {
        let status = git(&self.root, "status", &["status", "--porcelain"]).await?;
        Ok(!status.trim().is_empty())
    }

    async fn commit(&self, message: &str) -> Result<(), ClassifiedError> {
        let name = format!("user.name={}", self.cfg.author_name);
        let email = format!("user.email={}", self.cfg.author_email);
        git(
            &self.root,
            "commit",
            &["-c", &name, "-c", &email, "commit", "--no-gpg-sign", "-m", message],
        )
        .await?;
        Ok(())
    }

    async fn push(&self) -> Result<(), ClassifiedError> {
        let refspec = format!("HEAD:refs/heads/{}", self.branch);
        run_git(
            &self.root,
            "push",
            &["push", "--force", &self.cfg.remote_name, &refspec],
            self.cfg.credentials.as_ref(),
        )
        .await?;
        Ok(())
    }

    async fn release(&self) -> Result<(), ClassifiedError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.worktree_lock.lock().await;
        remove_worktree(&self.cfg.checkout_dir, &self.root).await;
        if self.root.exists() {
            return Err(ClassifiedError::permanent(format!(
                "worktree {} still present after removal",
                self.root.display()
            )));
        }
        Ok(())
    }
}

fn absolute(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

fn open_repo(path: &Path) -> Result<gix::Repository, VcsError> {
    gix::open(path).map_err(|_| VcsError::RepoNotFound {
        path: path.display().to_string(),
    })
}

async fn remove_worktree(checkout: &Path, path: &Path) {
    let target = path.to_string_lossy().to_string();
    let removed = git(
        checkout,
        "worktree remove",
        &["worktree", "remove", "--force", &target],
    )
    .await;
    if let Err(err) = removed {
        debug!(error = %err, "git worktree remove failed; deleting directory");
        if let Err(err) = tokio::fs::remove_dir_all(path).await {
            warn!(path = %path.display(), error = %err, "could not delete worktree directory");
        }
    }
    if let Err(err) = git(checkout, "worktree prune", &["worktree", "prune"]).await {
        debug!(error = %err, "git worktree prune failed");
    }
}

async fn git(dir: &Path, op: &'static str, args: &[&str]) -> Result<String, VcsError> {
    run_git(dir, op, args, None).await
}

async fn run_git(
    dir: &Path,
    op: &'static str,
    args: &[&str],
    credentials: Option<&HttpCredentials>,
) -> Result<String, VcsError> {
    let mut command = Command::new("git");
    command
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(credentials) = credentials {
        command.envs(credentials.env());
    }
    let output = command
        .output()
        .await
        .map_err(|source| VcsError::Spawn { op, source })?;
    if !output.status.success() {
        return Err(VcsError::Git {
            op,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
