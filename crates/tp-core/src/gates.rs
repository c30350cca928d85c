use crate::config::SECRET_ENV_VARS;
use crate::error::GateError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_secs(600);
pub const OUTPUT_BUDGET: usize = 8000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl GateConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            enabled,
            timeout_secs: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_secs
            .map_or(DEFAULT_GATE_TIMEOUT, Duration::from_secs)
    }
}

pub fn default_gates() -> Vec<GateConfig> {
    vec![
        GateConfig::new("static-check", "go vet ./...", false),
        GateConfig::new("tests", "go test ./...", false),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Passed,
    Failed,
    TimedOut,
    Cancelled,
    Invalid,
    Skipped,
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::TimedOut => "timed out",
            Self::Cancelled => "cancelled",
            Self::Invalid => "invalid",
            Self::Skipped => "skipped",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateOutcome {
    pub name: String,
    pub status: GateStatus,
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr, truncated to [`OUTPUT_BUDGET`].
    pub output: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GateReport {
    /// Human-readable lines for the pull-request body.
    pub notes: Vec<String>,
    pub outcomes: Vec<GateOutcome>,
}

impl GateReport {
    pub fn passed(&self) -> bool {
        self.outcomes
            .iter()
            .all(|outcome| matches!(outcome.status, GateStatus::Passed | GateStatus::Skipped))
    }

    pub fn summary(&self) -> String {
        let failing: Vec<String> = self
            .outcomes
            .iter()
            .filter(|outcome| !matches!(outcome.status, GateStatus::Passed | GateStatus::Skipped))
            .map(|outcome| format!("{} {}", outcome.name, outcome.status))
            .collect();
        if failing.is_empty() {
            return "all gates passed".to_string();
        }
        failing.join(", ")
    }
}

/// Runs every configured gate in order inside `repo_root`. Once `cancel`
/// fires, remaining enabled gates are reported as cancelled without running.
pub async fn run_gates(
    cancel: &CancellationToken,
    gates: &[GateConfig],
    repo_root: &Path,
) -> GateReport {
    let mut report = GateReport::default();
    for gate in gates {
        let outcome = if !gate.enabled {
            skipped(gate)
        } else if cancel.is_cancelled() {
            finished(gate, GateStatus::Cancelled, None, String::new(), Instant::now())
        } else {
            run_gate(cancel, gate, repo_root).await
        };
        report.notes.extend(notes_for(&outcome));
        report.outcomes.push(outcome);
    }
    report
}

pub async fn run_gate(cancel: &CancellationToken, gate: &GateConfig, repo_root: &Path) -> GateOutcome {
    let started = Instant::now();
    let (program, args) = match parse_command(&gate.command) {
        Ok(parsed) => parsed,
        Err(err) => return finished(gate, GateStatus::Invalid, None, err.to_string(), started),
    };

    let mut command = Command::new(&program);
    command
        .args(&args)
        .current_dir(repo_root)
        .env("TP_GATE_NAME", &gate.name)
        .env("TP_REPO_PATH", repo_root.to_string_lossy().to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for name in SECRET_ENV_VARS {
        command.env_remove(name);
    }

    let child = match command.spawn() {
        Ok(child) => child,
        Err(source) => {
            let err = GateError::Spawn { program, source };
            return finished(gate, GateStatus::Invalid, None, err.to_string(), started);
        }
    };

    let timeout = gate.timeout();
    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            finished(gate, GateStatus::Cancelled, None, String::new(), started)
        }
        waited = tokio::time::timeout(timeout, child.wait_with_output()) => match waited {
            Err(_) => finished(
                gate,
                GateStatus::TimedOut,
                None,
                format!("timed out after {}s", timeout.as_secs()),
                started,
            ),
            Ok(Err(err)) => finished(gate, GateStatus::Invalid, None, err.to_string(), started),
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                let status = if output.status.success() {
                    GateStatus::Passed
                } else {
                    GateStatus::Failed
                };
                finished(gate, status, output.status.code(), combined, started)
            }
        }
    };

    if outcome.status == GateStatus::Passed {
        info!(gate = %gate.name, duration_ms = outcome.duration_ms, "quality gate passed");
    } else {
        warn!(
            gate = %gate.name,
            status = %outcome.status,
            exit_code = ?outcome.exit_code,
            "quality gate did not pass"
        );
    }
    outcome
}

fn parse_command(command: &str) -> Result<(String, Vec<String>), GateError> {
    let argv = shell_words::split(command).map_err(|err| GateError::InvalidInput {
        message: err.to_string(),
    })?;
    let (program, args) = argv.split_first().ok_or_else(|| GateError::InvalidInput {
        message: "gate command empty".to_string(),
    })?;
    Ok((program.clone(), args.to_vec()))
}

fn skipped(gate: &GateConfig) -> GateOutcome {
    GateOutcome {
        name: gate.name.clone(),
        status: GateStatus::Skipped,
        exit_code: None,
        output: String::new(),
        duration_ms: 0,
    }
}

fn finished(
    gate: &GateConfig,
    status: GateStatus,
    exit_code: Option<i32>,
    output: String,
    started: Instant,
) -> GateOutcome {
    GateOutcome {
        name: gate.name.clone(),
        status,
        exit_code,
        output: truncate_middle(output.trim(), OUTPUT_BUDGET),
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    }
}

fn notes_for(outcome: &GateOutcome) -> Vec<String> {
    let name = &outcome.name;
    match outcome.status {
        GateStatus::Skipped => vec![format!("{name}: skipped")],
        GateStatus::Passed => match outcome.output.lines().last().map(str::trim) {
            Some(last) if !last.is_empty() => vec![format!("{name}: PASSED ({last})")],
            _ => vec![format!("{name}: PASSED")],
        },
        GateStatus::Cancelled => vec![format!("{name}: CANCELLED")],
        GateStatus::Failed | GateStatus::TimedOut | GateStatus::Invalid => {
            let label = match outcome.status {
                GateStatus::TimedOut => "TIMED OUT",
                GateStatus::Invalid => "INVALID",
                _ => "FAILED",
            };
            vec![
                format!("{name}: {label}"),
                format!("```\n{}\n```", outcome.output),
            ]
        }
    }
}

/// Keeps the head and tail of `text` around a `\n...\n` marker so the result
/// is at most `max` bytes of original content plus the marker. Cuts land on
/// UTF-8 boundaries.
pub fn truncate_middle(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let head = max / 2;
    let tail = max - head;

    let mut head_end = head;
    while !text.is_char_boundary(head_end) {
        head_end -= 1;
    }
    let mut tail_start = text.len() - tail;
    while !text.is_char_boundary(tail_start) {
        tail_start += 1;
    }
    format!("{}\n...\n{}", &text[..head_end], &text[tail_start..])
}
