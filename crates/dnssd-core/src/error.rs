//! Error types for the DNS-SD resolver
//!
//! Errors never reach callers of `Resolver::resolve` or
//! `Resolver::resolve_async`: those collapse every failure into a
//! `resolved(false)` notification. The types here are used by backends,
//! configuration and the registry.

use thiserror::Error;

/// Result type alias for DNS-SD operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the DNS-SD resolver
#[derive(Error, Debug)]
pub enum Error {
    /// Backend-specific failure
    #[error("Backend error ({backend}): {message}")]
    Backend {
        /// Backend name
        backend: String,
        /// Error message
        message: String,
    },

    /// The backend refused to open a resolve query
    #[error("Failed to start resolve query for {service}: {reason}")]
    QueryStart {
        /// Service the query was for
        service: String,
        /// Why the backend refused
        reason: String,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown backend or factory
    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors surfaced by backends
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a backend error
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a query-start error
    pub fn query_start(service: impl ToString, reason: impl Into<String>) -> Self {
        Self::QueryStart {
            service: service.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
