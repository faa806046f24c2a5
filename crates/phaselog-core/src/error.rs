//! Error taxonomy for log aggregation.

use phaselog_state::StateError;

/// Message appended to request errors for executions that never produce logs.
pub const NO_LOGS_MESSAGE: &str = "No logs are available.";

/// Classified status of a request-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    BadRequest,
    NotFound,
    Timeout,
    Unavailable,
    Cancelled,
    Internal,
}

impl ErrorClass {
    /// HTTP-style status code a transport can answer with.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorClass::BadRequest => 400,
            ErrorClass::NotFound => 404,
            ErrorClass::Cancelled => 499,
            ErrorClass::Internal => 500,
            ErrorClass::Unavailable => 503,
            ErrorClass::Timeout => 504,
        }
    }
}

/// Errors returned synchronously from a stream request, before any byte of
/// the stream has been produced.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("state error: {0}")]
    State(StateError),
}

impl StreamError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StreamError::BadRequest(_) => ErrorClass::BadRequest,
            StreamError::NotFound(_) => ErrorClass::NotFound,
            StreamError::Timeout(_) => ErrorClass::Timeout,
            StreamError::Unavailable(_) => ErrorClass::Unavailable,
            StreamError::Cancelled => ErrorClass::Cancelled,
            StreamError::State(err) if err.is_not_found() => ErrorClass::NotFound,
            StreamError::State(StateError::Unavailable(_)) => ErrorClass::Unavailable,
            StreamError::State(_) => ErrorClass::Internal,
        }
    }
}

impl From<StateError> for StreamError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::ExecutionNotFound { .. } | StateError::LogNotFound { .. } => {
                StreamError::NotFound(err.to_string())
            }
            StateError::Unavailable(msg) => StreamError::Unavailable(msg),
            other => StreamError::State(other),
        }
    }
}

/// Errors surfaced by the stream pipe.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipeError {
    /// The other end is gone (consumer dropped, or producer already closed).
    #[error("pipe closed")]
    Closed,

    /// Producer stopped because the caller cancelled the request.
    #[error("stream cancelled")]
    Cancelled,

    /// Producer stopped with a terminal error.
    #[error("stream aborted: {0}")]
    Aborted(String),
}

impl PipeError {
    pub(crate) fn into_io(self) -> std::io::Error {
        let kind = match self {
            PipeError::Closed => std::io::ErrorKind::BrokenPipe,
            PipeError::Cancelled => std::io::ErrorKind::ConnectionAborted,
            PipeError::Aborted(_) => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, self)
    }
}

/// Errors from fetching a single phase's log into the pipe.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The log source could not be opened.
    #[error("could not open log for {container}: {source}")]
    Open {
        container: String,
        #[source]
        source: StateError,
    },

    /// Reading from the log source failed mid-copy.
    #[error("log read failed for {container}: {source}")]
    Read {
        container: String,
        #[source]
        source: std::io::Error,
    },

    /// The consumer end of the pipe is gone.
    #[error("sink write failed: {0}")]
    Sink(#[from] PipeError),

    #[error("fetch cancelled")]
    Cancelled,
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Result type for stream requests.
pub type Result<T> = std::result::Result<T, StreamError>;
