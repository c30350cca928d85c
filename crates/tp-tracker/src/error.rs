use thiserror::Error;
use tp_core::error::{ClassifiedError, ErrorClass};

#[derive(Debug, Error)]
pub enum TrackerError {
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
    },
    #[error("no transition id configured for status {status:?}")]
    MissingTransition { status: String },
    #[error("unknown ticket {key}")]
    UnknownTicket { key: String },
    #[error("invalid tracker config: {0}")]
    InvalidConfig(String),
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl TrackerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Http { source, .. }
                if source.is_timeout() || source.is_connect() || source.is_request() =>
            {
                ErrorClass::Transient
            }
            Self::Api { status, .. } if *status == 429 || *status >= 500 => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }
}

impl From<TrackerError> for ClassifiedError {
    fn from(err: TrackerError) -> Self {
        ClassifiedError::new(err.class(), err)
    }
}
