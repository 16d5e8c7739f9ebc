//! Engine error taxonomy.
//!
//! Only two things are errors here: malformed input and system failure.
//! Ambiguous matches are low-confidence successes, detected conflicts are
//! reported data on a committed write, and unique-constraint races are
//! recovered internally by re-running the operation as a lookup. None of
//! those surface as `Err`.

use coigraph_graph::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input (empty name, out-of-range strength, ...). Surfaced
    /// synchronously; nothing was written.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Storage failure or retry budget exhausted. The transaction rolled
    /// back; nothing was written.
    #[error("system failure: {0}")]
    System(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        // Commit conflicts are handled by the retry loop before conversion;
        // anything that still reaches here is a genuine system fault.
        EngineError::System(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
