//! Error types for logzio-sender operations.

use std::io;
use thiserror::Error;

/// The error type for logzio-sender operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A builder was given a missing or unusable parameter.
    #[error("Problem with Logzio parameter(s): {property} : {explanation}")]
    Parameter {
        /// The parameter (or parameters) that were rejected.
        property: String,
        /// Why the value could not be used.
        explanation: String,
    },

    /// The listener did not accept a batch after all retries.
    #[error("{0}")]
    Server(String),

    /// IO error occurred while reading or writing the buffer.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Builds an [`Error::Parameter`].
    pub fn parameter(property: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self::Parameter {
            property: property.into(),
            explanation: explanation.into(),
        }
    }
}

/// A specialized Result type for logzio-sender operations.
pub type Result<T> = std::result::Result<T, Error>;
