use std::time::Duration;
use thiserror::Error;

/// Error categorization for the resilient calling core
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("No API keys configured: set {source_hint}")]
    NoCredentials { source_hint: String },

    // I/O errors (potentially transient)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors (usually permanent)
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    // Network errors (transient - should retry)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Network timeout after {timeout:?}: {message}")]
    NetworkTimeout { timeout: Duration, message: String },

    #[error("Connection refused: {endpoint}")]
    ConnectionRefused { endpoint: String },

    // Provider errors, classified by status code
    #[error("Provider error: {status:?} - {message}")]
    Provider {
        status: Option<u16>,
        message: String,
    },

    #[error("Rate limit exceeded: retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Option<Duration> },

    // Client errors (permanent - don't retry)
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    // Server errors (transient - should retry)
    #[error("Service temporarily unavailable: {service} - {reason}")]
    ServiceUnavailable { service: String, reason: String },

    #[error("Timeout error: operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    // Circuit breaker errors
    #[error("Circuit breaker open for service: {service}")]
    CircuitBreakerOpen { service: String },

    #[error("Circuit breaker not found: {name}")]
    UnknownBreaker { name: String },

    // Every key attempt failed; the last provider error is the source
    #[error("Operation '{operation}' failed after {attempts} key attempts: {source}")]
    ProviderExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    // General service error
    #[error("Service error: {0}")]
    Service(String),
}

/// Error categorization for retry and key-health decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network blips and 5xx responses - retried within one key attempt
    Transient,
    /// 429-class responses - the key is cooled down and rotated out
    RateLimited,
    /// Auth and other 4xx failures - count toward key disablement
    Persistent,
    /// Configuration problems - never retried
    Fatal,
}

impl Error {
    /// Categorize error using structural information only.
    ///
    /// Provider-specific message matching lives in
    /// [`crate::resilience::classifier`].
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) | Self::NoCredentials { .. } => ErrorCategory::Fatal,

            Self::InvalidInput { .. }
            | Self::AuthenticationFailed(_)
            | Self::Serde(_)
            | Self::UnknownBreaker { .. } => ErrorCategory::Persistent,

            Self::RateLimitExceeded { .. } => ErrorCategory::RateLimited,

            Self::Provider { status, .. } => match status {
                Some(429) => ErrorCategory::RateLimited,
                // 408 is a request timeout, not a client mistake
                Some(408) => ErrorCategory::Transient,
                Some(400..=499) => ErrorCategory::Persistent,
                _ => ErrorCategory::Transient,
            },

            Self::Http(e) => match e.status() {
                Some(status) if status.as_u16() == 429 => ErrorCategory::RateLimited,
                Some(status) if status.is_client_error() => ErrorCategory::Persistent,
                _ => ErrorCategory::Transient,
            },

            Self::ProviderExhausted { .. }
            | Self::NetworkTimeout { .. }
            | Self::ConnectionRefused { .. }
            | Self::ServiceUnavailable { .. }
            | Self::CircuitBreakerOpen { .. }
            | Self::Timeout { .. }
            | Self::Io(_)
            | Self::Service(_) => ErrorCategory::Transient,
        }
    }

    /// Check if the caller may try the same request again later
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::RateLimited
        )
    }

    /// Get suggested retry delay for rate limited errors
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// The provider error behind an exhausted call, or `self` otherwise
    #[must_use]
    pub fn last_error(&self) -> &Self {
        match self {
            Self::ProviderExhausted { source, .. } => source,
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
