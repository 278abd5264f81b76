//! Shared error types for the Engram memory engine.

use thiserror::Error;

/// Top-level error type surfaced to callers of the memory engine.
///
/// Collaborator failures are wrapped into a specific variant with the original
/// cause preserved as a message; callers never see a raw collaborator error.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Caller input failed validation (blank content, bad kind, etc.).
    #[error("Validation error: {0}")]
    Validation(String),

    /// An engine operation was attempted before `initialize()` completed.
    #[error("Memory engine not initialized (state: {0})")]
    NotInitialized(String),

    /// The embedding service failed to produce a vector.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The storage adapter failed a read or write.
    #[error("Storage error: {0}")]
    Storage(String),

    /// An index became inconsistent or an index operation failed.
    #[error("Index error: {0}")]
    Index(String),

    /// A cache tier failed. Never fatal: callers treat this as a miss.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Query plan generation or bookkeeping failed. Never fatal.
    #[error("Optimization error: {0}")]
    Optimization(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An internal error occurred (poisoned lock, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MemoryError {
    /// Whether this error is fatal to the call that produced it.
    ///
    /// Cache and optimization failures degrade gracefully (treated as a miss
    /// or no-op); everything else aborts the operation.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, MemoryError::Cache(_) | MemoryError::Optimization(_))
    }
}

/// Alias for Result with MemoryError.
pub type MemoryResult<T> = Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_errors_are_non_fatal() {
        assert!(!MemoryError::Cache("tier down".into()).is_fatal());
        assert!(!MemoryError::Optimization("plan lost".into()).is_fatal());
    }

    #[test]
    fn test_engine_errors_are_fatal() {
        assert!(MemoryError::Validation("blank".into()).is_fatal());
        assert!(MemoryError::Storage("disk full".into()).is_fatal());
        assert!(MemoryError::NotInitialized("uninitialized".into()).is_fatal());
    }
}
