//! Gateway trait for the CTFd remote
//!
//! `CtfdGateway` is the only way the reconciler touches a CTFd instance.
//! Each method is one remote call. Sub-entity operations are scoped to a
//! parent challenge on create/list and addressed by their own id afterwards.
//!
//! Implementations:
//! - `ctfd_client::HttpGateway`: the CTFd REST API (v1)
//! - `fakes::MemoryGateway`: in-memory, for tests

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::schema::*;

/// Result type for gateway operations
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Remote CRUD boundary for one CTFd instance.
///
/// Guarantees:
/// - `create_*` returns the record as stored, including the assigned id.
/// - `list_*` returns every row attached to the parent challenge.
/// - An unknown id surfaces as `GatewayError::NotFound`, never as an empty value.
#[async_trait]
pub trait CtfdGateway: Send + Sync {
    // -- challenges --

    async fn create_challenge(&self, fields: &ChallengeFields) -> GatewayResult<RemoteChallenge>;

    async fn get_challenge(&self, id: &RemoteId) -> GatewayResult<RemoteChallenge>;

    async fn update_challenge(
        &self,
        id: &RemoteId,
        fields: &ChallengeFields,
    ) -> GatewayResult<RemoteChallenge>;

    /// Delete a challenge. CTFd removes its attached rows with it.
    async fn delete_challenge(&self, id: &RemoteId) -> GatewayResult<()>;

    // -- flags --

    async fn list_flags(&self, challenge: &RemoteId) -> GatewayResult<Vec<RemoteFlag>>;

    async fn create_flag(
        &self,
        challenge: &RemoteId,
        fields: &FlagFields,
    ) -> GatewayResult<RemoteFlag>;

    async fn update_flag(&self, id: &RemoteId, fields: &FlagFields) -> GatewayResult<RemoteFlag>;

    async fn delete_flag(&self, id: &RemoteId) -> GatewayResult<()>;

    // -- hints --

    async fn list_hints(&self, challenge: &RemoteId) -> GatewayResult<Vec<RemoteHint>>;

    async fn create_hint(
        &self,
        challenge: &RemoteId,
        fields: &HintFields,
    ) -> GatewayResult<RemoteHint>;

    async fn update_hint(&self, id: &RemoteId, fields: &HintFields) -> GatewayResult<RemoteHint>;

    async fn delete_hint(&self, id: &RemoteId) -> GatewayResult<()>;

    // -- files --

    async fn list_files(&self, challenge: &RemoteId) -> GatewayResult<Vec<RemoteFile>>;

    /// Upload a file. Files have no update operation.
    async fn create_file(
        &self,
        challenge: &RemoteId,
        upload: &FileUpload,
    ) -> GatewayResult<RemoteFile>;

    /// Download the bytes behind a listed file.
    async fn fetch_file_content(&self, file: &RemoteFile) -> GatewayResult<Vec<u8>>;

    async fn delete_file(&self, id: &RemoteId) -> GatewayResult<()>;

    // -- tags --

    async fn list_tags(&self, challenge: &RemoteId) -> GatewayResult<Vec<RemoteTag>>;

    async fn create_tag(&self, challenge: &RemoteId, value: &str) -> GatewayResult<RemoteTag>;

    async fn delete_tag(&self, id: &RemoteId) -> GatewayResult<()>;

    // -- topics --

    async fn list_topics(&self, challenge: &RemoteId) -> GatewayResult<Vec<RemoteTopic>>;

    async fn create_topic(&self, challenge: &RemoteId, value: &str)
        -> GatewayResult<RemoteTopic>;

    async fn delete_topic(&self, id: &RemoteId) -> GatewayResult<()>;
}
