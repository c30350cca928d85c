use crate::error::SandboxError;
use crate::types::{ChangeOperation, CodeChange};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedChange {
    /// Normalized, `/`-separated, relative to the repository root.
    pub path: String,
    pub operation: ChangeOperation,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    EmptyPath,
    AbsolutePath,
    EscapesRoot,
    NotAllowed,
    EmptyContent,
    Symlink,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::EmptyPath => "empty path",
            Self::AbsolutePath => "absolute path",
            Self::EscapesRoot => "path escapes repository root",
            Self::NotAllowed => "directory not in allowlist",
            Self::EmptyContent => "empty content",
            Self::Symlink => "path traverses a symbolic link",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub path: String,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ValidatedChangeSet {
    pub changes: Vec<ValidatedChange>,
    pub rejected: Vec<Rejection>,
    /// Entries dropped because the proposal exceeded `max_files`.
    pub truncated: usize,
}

impl ValidatedChangeSet {
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

pub fn validate(
    repo_root: &Path,
    changes: Vec<CodeChange>,
    allowed_dirs: &[String],
    max_files: usize,
) -> Result<ValidatedChangeSet, SandboxError> {
    let proposed = changes.len();
    let truncated = proposed.saturating_sub(max_files);
    let mut set = ValidatedChangeSet {
        truncated,
        ..ValidatedChangeSet::default()
    };

    for change in changes.into_iter().take(max_files) {
        match check(repo_root, &change, allowed_dirs) {
            Ok(path) => set.changes.push(ValidatedChange {
                path,
                operation: change.operation,
                content: change.content,
            }),
            Err(reason) => {
                debug!(path = %change.path, %reason, "rejected proposed change");
                set.rejected.push(Rejection {
                    path: change.path,
                    reason,
                });
            }
        }
    }

    debug!(
        proposed,
        accepted = set.changes.len(),
        rejected = set.rejected.len(),
        truncated,
        "validated changeset"
    );

    if set.changes.is_empty() {
        return Err(SandboxError::NothingToApply {
            proposed,
            truncated,
            rejected: set.rejected,
        });
    }
    Ok(set)
}

fn check(
    repo_root: &Path,
    change: &CodeChange,
    allowed_dirs: &[String],
) -> Result<String, RejectReason> {
    let raw = change.path.trim();
    if raw.is_empty() {
        return Err(RejectReason::EmptyPath);
    }
    if is_absolute(raw) {
        return Err(RejectReason::AbsolutePath);
    }

    let cleaned = clean(raw);
    if cleaned == "." || cleaned == ".." || cleaned.starts_with("../") {
        return Err(RejectReason::EscapesRoot);
    }

    let first = cleaned.split('/').next().unwrap_or_default();
    let at_root = !cleaned.contains('/');
    let allowed = allowed_dirs.iter().any(|dir| {
        let dir = dir.trim_matches('/');
        dir == first || (at_root && dir == ".")
    });
    if !allowed {
        return Err(RejectReason::NotAllowed);
    }

    if change.content.trim().is_empty() {
        return Err(RejectReason::EmptyContent);
    }

    if traverses_symlink(repo_root, &cleaned) {
        return Err(RejectReason::Symlink);
    }

    Ok(cleaned)
}

fn is_absolute(path: &str) -> bool {
    if path.starts_with('/') || path.starts_with('\\') {
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Lexical cleanup: `\` is a separator, empty and `.` segments vanish, `..`
/// pops a segment when it can and is kept otherwise.
pub fn clean(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return ".".to_string();
    }
    parts.join("/")
}

fn traverses_symlink(repo_root: &Path, cleaned: &str) -> bool {
    let mut current = repo_root.to_path_buf();
    for segment in cleaned.split('/') {
        current.push(segment);
        match std::fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => return true,
            Ok(_) => {}
            Err(_) => return false,
        }
    }
    false
}
