use std::fmt;

use thiserror::Error;

/// Status codes reported by the broker API (gRPC numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl From<i32> for StatusCode {
    fn from(value: i32) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::Cancelled,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Whether a failed remote call is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFailure {
    Retryable,
    Fatal,
}

impl StreamFailure {
    /// The one place that decides reconnect versus abort.
    pub fn classify(code: StatusCode) -> Self {
        match code {
            StatusCode::Cancelled
            | StatusCode::DeadlineExceeded
            | StatusCode::ResourceExhausted
            | StatusCode::FailedPrecondition
            | StatusCode::Aborted
            | StatusCode::Internal
            | StatusCode::Unavailable
            | StatusCode::DataLoss
            | StatusCode::Unknown => Self::Retryable,
            _ => Self::Fatal,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("remote call failed: code={code} message={message}")]
pub struct RemoteError {
    pub code: StatusCode,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    pub fn failure(&self) -> StreamFailure {
        StreamFailure::classify(self.code)
    }

    pub fn is_retryable(&self) -> bool {
        self.failure() == StreamFailure::Retryable
    }
}

/// Errors surfaced to the consumer of an order book stream. Transient
/// failures are absorbed by reconnects and never reach the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("fatal stream failure: {0}")]
    Fatal(RemoteError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for setting {key}")]
    Invalid { key: &'static str, value: String },
    #[error("failed to read strategies file {path}: {source}")]
    StrategiesFile {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse strategies file {path}: {source}")]
    StrategiesFormat {
        path: String,
        source: serde_json::Error,
    },
}
