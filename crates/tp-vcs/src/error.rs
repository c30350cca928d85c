use thiserror::Error;
use tp_core::error::{ClassifiedError, ErrorClass};

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("repo not found: {path}")]
    RepoNotFound { path: String },
    #[error("git {op} failed: {stderr}")]
    Git { op: &'static str, stderr: String },
    #[error("failed to run git {op}: {source}")]
    Spawn {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("backend error: {reason}")]
    BackendError { reason: String },
    #[error("{op} request failed: {source}")]
    Http {
        op: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{op} returned {status}: {message}")]
    Api {
        op: &'static str,
        status: u16,
        message: String,
        rate_limited: bool,
    },
    #[error("{op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Stderr fragments git prints when the remote could not be reached.
const NETWORK_MARKERS: &[&str] = &[
    "could not resolve host",
    "connection reset",
    "connection timed out",
    "operation timed out",
    "the remote end hung up",
    "rpc failed",
    "early eof",
    "unable to access",
    "connection refused",
    "temporary failure in name resolution",
    "http 500",
    "http 502",
    "http 503",
    "http 504",
    "returned error: 5",
];

pub fn is_network_failure(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    NETWORK_MARKERS.iter().any(|marker| lower.contains(marker))
}

impl VcsError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Git { stderr, .. } if is_network_failure(stderr) => ErrorClass::Transient,
            Self::Http { source, .. } => {
                if source.is_timeout() || source.is_connect() || source.is_request() {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }
            Self::Api {
                status,
                rate_limited,
                ..
            } => {
                if *status == 429 || *status >= 500 || (*status == 403 && *rate_limited) {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }
            _ => ErrorClass::Permanent,
        }
    }
}

impl From<VcsError> for ClassifiedError {
    fn from(err: VcsError) -> Self {
        ClassifiedError::new(err.class(), err)
    }
}

pub(crate) fn map_backend_error<E: std::fmt::Display>(
    context: &'static str,
) -> impl FnOnce(E) -> VcsError {
    move |err| VcsError::BackendError {
        reason: format!("{context}: {err}"),
    }
}
