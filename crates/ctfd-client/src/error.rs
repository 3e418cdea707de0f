//! Error types for ctfd-client

use ctfd_state::GatewayError;
use thiserror::Error;

/// Errors raised while talking to the CTFd API
#[derive(Error, Debug)]
pub enum ClientError {
    /// The HTTP client could not be built
    #[error("HTTP client setup failed: {0}")]
    Setup(String),

    /// The request did not complete
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-success HTTP status
    #[error("CTFd returned status {status} for {operation}: {message}")]
    Status {
        operation: String,
        status: u16,
        message: String,
    },

    /// HTTP success but `success: false` in the envelope
    #[error("CTFd reported failure for {operation}: {message}")]
    Api { operation: String, message: String },

    /// 404 on an addressed entity
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Response body did not have the expected shape
    #[error("Malformed response for {operation}: {detail}")]
    Decode { operation: String, detail: String },

    /// A remote id that CTFd cannot accept (not an integer)
    #[error("Invalid CTFd id: {0}")]
    InvalidId(String),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Http(err.to_string())
    }
}

impl From<ClientError> for GatewayError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Setup(msg) | ClientError::Http(msg) => GatewayError::Transport(msg),
            ClientError::Status {
                operation,
                status,
                message,
            } => GatewayError::Rejected {
                operation,
                status,
                message,
            },
            ClientError::Api { operation, message } => GatewayError::Rejected {
                operation,
                status: 200,
                message,
            },
            ClientError::NotFound { entity, id } => GatewayError::NotFound { entity, id },
            ClientError::Decode { operation, detail } => {
                GatewayError::UnexpectedResponse { operation, detail }
            }
            ClientError::InvalidId(id) => GatewayError::UnexpectedResponse {
                operation: "encode id".to_string(),
                detail: format!("{id} is not a CTFd integer id"),
            },
            ClientError::Json(err) => GatewayError::Serialization(err.to_string()),
        }
    }
}
