//! Error types for the takeoff engine.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::models::{CacheTier, SuggestionStatus};

/// Result type alias using takeoff's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for takeoff operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Suggestion not found
    #[error("Suggestion not found: {0}")]
    SuggestionNotFound(Uuid),

    /// Element could not be folded into a pattern (non-fatal, counted)
    #[error("Aggregation error: {0}")]
    Aggregation(String),

    /// One cache tier is down; callers degrade to the next tier
    #[error("Cache tier {tier} unavailable: {reason}")]
    CacheUnavailable { tier: CacheTier, reason: String },

    /// Generation collaborator did not answer in time
    #[error("Generation timed out after {}s", .0.as_secs())]
    GenerationTimeout(Duration),

    /// Generation collaborator answered with something that is not a valid suggestion
    #[error("Generation returned invalid output: {0}")]
    GenerationInvalidOutput(String),

    /// Approval workflow misuse
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: SuggestionStatus,
        to: SuggestionStatus,
    },

    /// Batch was cancelled before the item started
    #[error("Batch cancelled")]
    BatchCancelled,

    /// Inference/generation request failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
