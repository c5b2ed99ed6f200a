//! Error types for the resource model.

use thiserror::Error;

/// Errors that can occur when parsing resource enums from their wire form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// A status string is not one of the known values.
    #[error("unknown role status: {0}")]
    UnknownRoleStatus(String),

    /// A scaling policy string is not one of the known values.
    #[error("unknown scaling policy: {0}")]
    UnknownScalingPolicy(String),

    /// A resource kind string is not one of the known values.
    #[error("unknown resource kind: {0}")]
    UnknownKind(String),
}
