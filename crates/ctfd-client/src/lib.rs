//! ctfd-client: CTFd REST API gateway
//!
//! Implements `ctfd_state::CtfdGateway` against a live CTFd instance.
//!
//! ## Layer 1 - Remote I/O
//!
//! Focus: one HTTP round trip per gateway call, faithful error mapping.
//! Requests and responses are logged at debug level; nothing else here logs.

mod config;
mod error;
mod http;
mod wire;

pub use config::ClientConfig;
pub use error::ClientError;
pub use http::HttpGateway;

/// Result type for client construction
pub type Result<T> = std::result::Result<T, ClientError>;
