//! Error types for the experiment engine

use thiserror::Error;

/// Errors surfaced by engine operations.
///
/// Every operation is a single deterministic computation over already-durable
/// data, so there is no transient-failure class and nothing is retried
/// internally. State mutations are only applied after the whole transition
/// computation succeeds.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Unknown experiment: {0}")]
    NotFound(String),

    #[error("Invalid experiment state: {0}")]
    InvalidState(String),

    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("Failed to parse feed payload: {0}")]
    Parse(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
