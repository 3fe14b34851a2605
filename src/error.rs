use crate::amm::AmmError;
use thiserror::Error;

/// Engine-level error taxonomy.
///
/// Transient failures are retried with backoff; validation errors are
/// rejected synchronously at submission; storage errors skip the current
/// manager cycle (the next timer tick retries) and never crash the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("oracle: {0}")]
    Oracle(String),

    #[error(transparent)]
    Amm(#[from] AmmError),

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Whether a bounded retry with backoff is worth attempting.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Amm(e) => e.is_transient(),
            EngineError::Oracle(_) => true,
            EngineError::Validation(_) | EngineError::Storage(_) | EngineError::Other(_) => false,
        }
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(e: redis::RedisError) -> Self {
        EngineError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Storage(format!("bad stored record: {}", e))
    }
}
