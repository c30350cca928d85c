use thiserror::Error;
use tp_core::error::{ClassifiedError, ErrorClass};
use tp_core::types::ChangeDecodeError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid generator command: {message}")]
    InvalidCommand { message: String },
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("generator io: {0}")]
    Io(#[source] std::io::Error),
    #[error("generator timed out after {secs}s")]
    TimedOut { secs: u64 },
    #[error("generator exited with {code:?}: {stderr}")]
    Exited { code: Option<i32>, stderr: String },
    #[error("generator output is not a changeset: {source}")]
    Parse {
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Decode(#[from] ChangeDecodeError),
    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),
}

impl AgentError {
    /// Generation is nondeterministic, so a bad run is worth repeating. A
    /// command that cannot even start is not.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidCommand { .. } | Self::Spawn { .. } | Self::Encode(_) => {
                ErrorClass::Permanent
            }
            Self::Io(_)
            | Self::TimedOut { .. }
            | Self::Exited { .. }
            | Self::Parse { .. }
            | Self::Decode(_) => ErrorClass::Transient,
        }
    }
}

impl From<AgentError> for ClassifiedError {
    fn from(err: AgentError) -> Self {
        ClassifiedError::new(err.class(), err)
    }
}
