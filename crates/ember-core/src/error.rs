//! Error types for the Ember bridge

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for the Ember bridge
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Interpreter construction or per-request startup failed
    #[error("Interpreter startup failed: {0}")]
    StartupFailure(String),

    /// A buffer or the composed response could not be allocated
    #[error("Allocation failure: {0}")]
    AllocationFailure(String),

    /// Script raised an unrecoverable error
    #[error("Script error: {0}")]
    Script(String),

    /// An operation needs a seeded request but none is active
    #[error("No active request")]
    NoActiveRequest,

    /// Malformed request description or response bytes
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Composed response bytes could not be parsed
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ambient environment error
    #[error("Environment error: {0}")]
    Environment(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    HttpError(#[from] http::Error),

    /// Internal error (should not happen in production)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convert error to HTTP status code
    pub fn to_status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::NoActiveRequest => StatusCode::CONFLICT,
            Error::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error leaves the interpreter unusable until re-initialized
    pub fn is_startup_failure(&self) -> bool {
        matches!(self, Error::StartupFailure(_))
    }
}
