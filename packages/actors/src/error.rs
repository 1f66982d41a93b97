//! Engine error taxonomy.

use db::DbError;

use crate::queue::QueueError;
use crate::transport::TransportError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the engine to its callers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad input or an illegal state transition. Nothing was changed.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Store error: {0}")]
    Store(DbError),

    #[error("Actor error: {0}")]
    Actor(String),
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => EngineError::NotFound(msg),
            DbError::Conflict(msg) => EngineError::Validation(msg),
            other => EngineError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_caller_errors() {
        let err: EngineError = DbError::Conflict("Cannot pause campaign x while draft".into()).into();
        assert!(matches!(err, EngineError::Validation(_)));

        let err: EngineError = DbError::NotFound("Job not found: y".into()).into();
        assert!(matches!(err, EngineError::NotFound(_)));

        let err: EngineError = DbError::Query("boom".into()).into();
        assert!(matches!(err, EngineError::Store(_)));
    }
}
