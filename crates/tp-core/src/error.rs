use crate::gates::GateReport;
use crate::sandbox::Rejection;
use crate::types::TicketKey;
use crate::workflow::Step;
use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Retry class attached to a collaborator failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Retrying may succeed (network hiccup, rate limit).
    Transient,
    /// Retrying will not help (authorization, malformed input).
    Permanent,
    /// Nobody said whether retrying is safe; surfaced without retry.
    Unclassified,
}

impl ErrorClass {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Unclassified => "unclassified",
        };
        f.write_str(label)
    }
}

/// An error tagged with its [`ErrorClass`].
///
/// The tag is metadata over the original cause: `Display` prints the cause,
/// `source()` continues the cause's own chain, and the cause can be borrowed,
/// downcast or taken back out. Classifying an already classified error
/// replaces the tag instead of nesting.
#[derive(Debug)]
pub struct ClassifiedError {
    class: ErrorClass,
    cause: BoxError,
}

impl ClassifiedError {
    pub fn new(class: ErrorClass, cause: impl Into<BoxError>) -> Self {
        let cause: BoxError = cause.into();
        let cause = match cause.downcast::<ClassifiedError>() {
            Ok(inner) => inner.cause,
            Err(cause) => cause,
        };
        Self { class, cause }
    }

    pub fn transient(cause: impl Into<BoxError>) -> Self {
        Self::new(ErrorClass::Transient, cause)
    }

    pub fn permanent(cause: impl Into<BoxError>) -> Self {
        Self::new(ErrorClass::Permanent, cause)
    }

    pub fn unclassified(cause: impl Into<BoxError>) -> Self {
        Self::new(ErrorClass::Unclassified, cause)
    }

    pub fn class(&self) -> ErrorClass {
        self.class
    }

    pub fn is_transient(&self) -> bool {
        self.class == ErrorClass::Transient
    }

    pub fn is_permanent(&self) -> bool {
        self.class == ErrorClass::Permanent
    }

    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.cause.as_ref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.cause.downcast_ref::<E>()
    }

    pub fn into_cause(self) -> BoxError {
        self.cause
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.cause, f)
    }
}

impl StdError for ClassifiedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.source()
    }
}

pub fn make_transient(err: impl Into<BoxError>) -> ClassifiedError {
    ClassifiedError::transient(err)
}

pub fn make_permanent(err: impl Into<BoxError>) -> ClassifiedError {
    ClassifiedError::permanent(err)
}

/// Class of the first [`ClassifiedError`] found walking `err`'s source chain.
pub fn classify(err: &(dyn StdError + 'static)) -> ErrorClass {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(classified) = err.downcast_ref::<ClassifiedError>() {
            return classified.class();
        }
        current = err.source();
    }
    ErrorClass::Unclassified
}

pub fn is_transient(err: &(dyn StdError + 'static)) -> bool {
    classify(err) == ErrorClass::Transient
}

pub fn is_permanent(err: &(dyn StdError + 'static)) -> bool {
    classify(err) == ErrorClass::Permanent
}

pub trait ResultExt<T> {
    fn transient(self) -> Result<T, ClassifiedError>;
    fn permanent(self) -> Result<T, ClassifiedError>;
    fn unclassified(self) -> Result<T, ClassifiedError>;
}

impl<T, E: Into<BoxError>> ResultExt<T> for Result<T, E> {
    fn transient(self) -> Result<T, ClassifiedError> {
        self.map_err(ClassifiedError::transient)
    }

    fn permanent(self) -> Result<T, ClassifiedError> {
        self.map_err(ClassifiedError::permanent)
    }

    fn unclassified(self) -> Result<T, ClassifiedError> {
        self.map_err(ClassifiedError::unclassified)
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("cancelled while waiting to retry")]
    Cancelled,
    #[error("{0}")]
    Failed(#[source] ClassifiedError),
}

impl RetryError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(
        "no valid changes after validation ({proposed} proposed, {truncated} truncated, {} rejected)",
        .rejected.len()
    )]
    NothingToApply {
        proposed: usize,
        truncated: usize,
        rejected: Vec<Rejection>,
    },
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("read state file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse state file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("persist state file {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encode state: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("state lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {message}")]
    InvalidInput { message: String },
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("create branch {branch}: {source}")]
    Branch {
        branch: String,
        #[source]
        source: ClassifiedError,
    },
    #[error("generation failed after {retries} retries: {source}")]
    Generate {
        retries: u32,
        #[source]
        source: ClassifiedError,
    },
    #[error(transparent)]
    Validate(#[from] SandboxError),
    #[error("write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("stage {path}: {source}")]
    Stage {
        path: String,
        #[source]
        source: ClassifiedError,
    },
    #[error("no effective changes for {key}")]
    NoEffectiveChanges { key: TicketKey },
    #[error("commit: {0}")]
    Commit(#[source] ClassifiedError),
    #[error("quality gates failed: {}", .report.summary())]
    GatesFailed { report: GateReport },
    #[error("push {branch} after {retries} retries: {source}")]
    Push {
        branch: String,
        retries: u32,
        #[source]
        source: ClassifiedError,
    },
    #[error("open pull request after {retries} retries: {source}")]
    OpenPr {
        retries: u32,
        #[source]
        source: ClassifiedError,
    },
    #[error("cancelled during {step}")]
    Cancelled { step: Step },
}

impl WorkflowError {
    pub fn step(&self) -> Step {
        match self {
            Self::Branch { .. } => Step::Branch,
            Self::Generate { .. } => Step::Generate,
            Self::Validate(_) => Step::Validate,
            Self::Write { .. } | Self::Stage { .. } | Self::NoEffectiveChanges { .. } => {
                Step::Write
            }
            Self::Commit(_) => Step::Commit,
            Self::GatesFailed { .. } => Step::Gate,
            Self::Push { .. } => Step::Push,
            Self::OpenPr { .. } => Step::OpenPr,
            Self::Cancelled { step } => *step,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("prepare repository: {0}")]
    Prepare(#[source] ClassifiedError),
    #[error("fetch tickets after {retries} retries: {source}")]
    Fetch {
        retries: u32,
        #[source]
        source: ClassifiedError,
    },
    #[error("cancelled")]
    Cancelled,
}
