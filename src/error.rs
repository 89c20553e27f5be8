use thiserror::Error;

/// Type alias for Result with TriageError
pub type Result<T> = std::result::Result<T, TriageError>;

/// Error types for the triage engine
#[derive(Error, Debug)]
pub enum TriageError {
    /// Provider API returned an error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    Network(String),

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Invalid message format or header parsing error
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Label-related errors
    #[error("Label error: {0}")]
    Label(String),

    /// Filter-rule errors
    #[error("Rule error: {0}")]
    Rule(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Checkpoint persistence errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic catch-all error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl TriageError {
    /// Fatal errors abort the run immediately and are never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TriageError::Auth(_) | TriageError::NotFound(_))
    }

    /// Rate-limit rejections get a steeper backoff curve than other failures.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TriageError::RateLimited { .. })
    }

    /// Check if the error is transient in nature
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TriageError::RateLimited { .. }
                | TriageError::Server { .. }
                | TriageError::Network(_)
        )
    }
}
