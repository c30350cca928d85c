use crate::error::AgentError;
use crate::sanitize::parse_changes;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;
use tp_core::error::ClassifiedError;
use tp_core::services::Generator;
use tp_core::types::{CodeChange, Ticket};
use tracing::{debug, info, warn};

pub const DEFAULT_GENERATOR_TIMEOUT_SECS: u64 = 300;
const STDERR_BUDGET: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandGeneratorConfig {
    /// Shell-style command line, e.g. `python3 planner.py --model fast`.
    pub command: String,
    pub timeout_secs: u64,
    /// Lets the planner return `content_b64` instead of inline content.
    pub allow_base64: bool,
    /// Working directory for the planner; inherits ours when unset.
    pub working_dir: Option<PathBuf>,
}

impl Default for CommandGeneratorConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            timeout_secs: DEFAULT_GENERATOR_TIMEOUT_SECS,
            allow_base64: true,
            working_dir: None,
        }
    }
}

/// Written to the planner's stdin as a single JSON document.
#[derive(Debug, Serialize)]
pub struct GenerationRequest<'a> {
    pub ticket: &'a Ticket,
    pub repo_context: &'a str,
    pub allow_base64: bool,
}

/// [`Generator`] that delegates planning to an external process.
///
/// The process reads a [`GenerationRequest`] on stdin and prints a JSON array
/// of changes on stdout. Fenced or prose-wrapped output is tolerated.
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
    cfg: CommandGeneratorConfig,
}

impl CommandGenerator {
    pub fn new(cfg: CommandGeneratorConfig) -> Result<Self, AgentError> {
        let argv = shell_words::split(&cfg.command).map_err(|err| AgentError::InvalidCommand {
            message: err.to_string(),
        })?;
        let (program, args) = argv.split_first().ok_or_else(|| AgentError::InvalidCommand {
            message: "generator command empty".to_string(),
        })?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            cfg,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.cfg.timeout_secs.max(1))
    }

    async fn invoke(&self, ticket: &Ticket, repo_context: &str) -> Result<String, AgentError> {
        let request = serde_json::to_vec(&GenerationRequest {
            ticket,
            repo_context,
            allow_base64: self.cfg.allow_base64,
        })
        .map_err(AgentError::Encode)?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("TP_TICKET_KEY", ticket.key.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cfg.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| AgentError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        // Feed stdin concurrently so a planner that streams output early
        // cannot deadlock against a full pipe.
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                stdin.write_all(&request).await?;
                stdin.shutdown().await
            })
        });

        let timeout = self.timeout();
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| AgentError::TimedOut {
                secs: timeout.as_secs(),
            })?
            .map_err(AgentError::Io)?;

        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                // The planner may exit without draining stdin.
                Ok(Err(err)) => debug!(error = %err, "generator closed stdin early"),
                Err(err) => debug!(error = %err, "stdin writer task failed"),
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::Exited {
                code: output.status.code(),
                stderr: tail(stderr.trim(), STDERR_BUDGET).to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Generator for CommandGenerator {
    async fn plan_changes(
        &self,
        ticket: &Ticket,
        repo_context: &str,
    ) -> Result<Vec<CodeChange>, ClassifiedError> {
        let started = Instant::now();
        let stdout = match self.invoke(ticket, repo_context).await {
            Ok(stdout) => stdout,
            Err(err) => {
                warn!(key = %ticket.key, error = %err, "generator run failed");
                return Err(err.into());
            }
        };
        let changes = parse_changes(&stdout)?;
        info!(
            key = %ticket.key,
            changes = changes.len(),
            duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "generator proposed changes"
        );
        Ok(changes)
    }
}

fn tail(text: &str, budget: usize) -> &str {
    if text.len() <= budget {
        return text;
    }
    let mut start = text.len() - budget;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
