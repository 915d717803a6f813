//! Error handling for the loader
//!
//! This module defines all error types used throughout the loader.

use thiserror::Error;

/// Result type alias for the loader
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Main error type for the loader
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Configuration errors (missing or malformed environment values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication errors (credential loading or token exchange)
    #[error("Authentication error: {0}")]
    Auth(String),

    /// HTTP client errors
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Object storage errors (listing, download stream, delete)
    #[error("Storage error: {operation} on {object}: {message}")]
    Storage {
        /// Which storage call failed
        operation: &'static str,
        /// Bucket or object the call addressed
        object: String,
        /// Upstream detail
        message: String,
    },

    /// Malformed bundle payload
    #[error("Parse error for {object}: {source}")]
    Parse {
        /// Staged object whose content failed to parse
        object: String,
        /// Underlying JSON error
        source: serde_json::Error,
    },

    /// FHIR store rejected or failed a request
    #[error("Repository error ({status}): {message}")]
    Repository {
        /// HTTP status returned by the FHIR store
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL construction errors
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl LoaderError {
    /// Build a storage error for a failed call against one object or bucket.
    pub fn storage(
        operation: &'static str,
        object: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Storage {
            operation,
            object: object.into(),
            message: message.to_string(),
        }
    }
}
