//! Controller error type.

use thiserror::Error;

use crate::store::StoreError;

/// Result type for reconcile operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Errors returned from a reconcile. All of them are retried by the
/// dispatcher with backoff.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The store rejected or failed a read or write.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A materialized spec could not be serialized for fingerprinting.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
