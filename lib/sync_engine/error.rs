use std::fmt;

use thiserror::Error;

/// Retry decision attached to every failure the engine sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Fatal,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Fatal => "fatal",
        }
    }
}

/// Implemented by error types the retry executor can act on.
pub trait Classify {
    fn class(&self) -> ErrorClass;

    fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Normalized source failure kinds. Adapters map transport and payload problems onto these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    RateLimited,
    MalformedResponse,
    Unavailable,
    InvalidInput,
    Unauthorized,
    NoData,
}

impl FetchErrorKind {
    pub fn class(self) -> ErrorClass {
        match self {
            Self::RateLimited | Self::MalformedResponse | Self::Unavailable => {
                ErrorClass::Transient
            }
            Self::InvalidInput | Self::Unauthorized | Self::NoData => ErrorClass::Fatal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::MalformedResponse => "malformed_response",
            Self::Unavailable => "unavailable",
            Self::InvalidInput => "invalid_input",
            Self::Unauthorized => "unauthorized",
            Self::NoData => "no_data",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure from one call to the reference data source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn no_data(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::NoData, message)
    }
}

impl Classify for FetchError {
    fn class(&self) -> ErrorClass {
        self.kind.class()
    }
}

/// Failed write of a deduplicated batch. The engine never retries writes itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PersistError {
    pub class: ErrorClass,
    pub message: String,
}

impl PersistError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Transient,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Fatal,
            message: message.into(),
        }
    }
}

impl Classify for PersistError {
    fn class(&self) -> ErrorClass {
        self.class
    }
}

/// Failure before any entity work starts. This is the only error that aborts a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    #[error("target resolution failed: {0}")]
    TargetResolution(String),

    #[error("existence query failed: {0}")]
    ExistenceQuery(String),
}

/// Terminal outcome of [`RetryExecutor::execute`](super::RetryExecutor::execute).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryFailure<E> {
    #[error("{error} (fatal, after {attempts} attempt(s))")]
    Fatal { error: E, attempts: u32 },

    #[error("max attempts exceeded after {attempts} attempt(s): {last_error}")]
    Exhausted { last_error: E, attempts: u32 },
}

impl<E> RetryFailure<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Fatal { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn error(&self) -> &E {
        match self {
            Self::Fatal { error, .. } => error,
            Self::Exhausted { last_error, .. } => last_error,
        }
    }

    pub fn into_error(self) -> E {
        match self {
            Self::Fatal { error, .. } => error,
            Self::Exhausted { last_error, .. } => last_error,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}
