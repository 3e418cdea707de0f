//! Error types for ctfd-state

use thiserror::Error;

/// Errors raised by a single remote operation.
///
/// Every gateway call either succeeds with a usable value or fails with one
/// of these; an empty or null result is never used to signal failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The request never produced an HTTP response
    #[error("Transport failed: {0}")]
    Transport(String),

    /// CTFd answered with a non-success status or `success: false`
    #[error("CTFd rejected {operation} (status {status}): {message}")]
    Rejected {
        operation: String,
        status: u16,
        message: String,
    },

    /// The addressed entity does not exist remotely
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The response could not be mapped onto a remote record
    #[error("Unexpected response for {operation}: {detail}")]
    UnexpectedResponse { operation: String, detail: String },

    /// The entity kind has no such remote operation
    #[error("Operation not supported: {operation}")]
    Unsupported { operation: String },

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Digest string is not 64 lowercase hex characters
    #[error("Invalid content digest: {digest}")]
    InvalidDigest { digest: String },
}

impl GatewayError {
    /// Build a `NotFound` error for the given entity and id.
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        GatewayError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}
