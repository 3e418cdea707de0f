//! Per-kind adapters between the generic engine and the gateway.
//!
//! The matcher, planner and executor are written once, generic over
//! [`SubEntityKind`] (flags, hints, files) or [`UnkeyedKind`] (tags, topics).
//! Each adapter is a unit struct that knows how to list, create, update and
//! delete its rows and how to compare declared fields with remote ones.

use std::fmt::Debug;

use async_trait::async_trait;
use ctfd_state::{
    CtfdGateway, GatewayError, GatewayResult, RemoteFile, RemoteFlag, RemoteHint, RemoteId,
    RemoteTag, RemoteTopic,
};
use serde::{Deserialize, Serialize};

use crate::detect::{self, ChangeDecision};
use crate::domain::{FileSpec, FlagSpec, HintSpec};

/// What a plan, diagnostic or summary is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Challenge,
    Files,
    Flags,
    Tags,
    Topics,
    Hints,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Challenge => "challenge",
            EntityKind::Files => "files",
            EntityKind::Flags => "flags",
            EntityKind::Tags => "tags",
            EntityKind::Topics => "topics",
            EntityKind::Hints => "hints",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A keyed sub-entity kind: identity assigned by CTFd on create.
#[async_trait]
pub trait SubEntityKind: Send + Sync {
    type Fields: Clone + PartialEq + Debug + Send + Sync;
    type Remote: Clone + Debug + Send + Sync;

    const KIND: EntityKind;

    fn remote_id(remote: &Self::Remote) -> &RemoteId;

    /// Change detection for a matched pair.
    fn decide(
        &self,
        desired: &Self::Fields,
        remote: &Self::Remote,
        recorded: Option<&Self::Fields>,
    ) -> ChangeDecision;

    /// Recorded view of `remote` after it was created, updated or kept for `desired`.
    fn settle(&self, desired: &Self::Fields, remote: &Self::Remote) -> Self::Fields;

    /// Recorded view of a row the pass could not bring up to date, if one
    /// can be stated truthfully.
    fn fallback(
        &self,
        desired: &Self::Fields,
        remote: &Self::Remote,
        recorded: Option<&Self::Fields>,
    ) -> Option<Self::Fields>;

    /// Whether a fresh declaration plausibly describes the recorded entity.
    fn binds_to(&self, declared: &Self::Fields, recorded: &Self::Fields) -> bool;

    async fn list(
        &self,
        gw: &dyn CtfdGateway,
        parent: &RemoteId,
    ) -> GatewayResult<Vec<Self::Remote>>;

    async fn create(
        &self,
        gw: &dyn CtfdGateway,
        parent: &RemoteId,
        desired: &Self::Fields,
    ) -> GatewayResult<Self::Remote>;

    async fn update(
        &self,
        gw: &dyn CtfdGateway,
        desired: &Self::Fields,
        current: &Self::Remote,
    ) -> GatewayResult<Self::Remote>;

    async fn delete(&self, gw: &dyn CtfdGateway, id: &RemoteId) -> GatewayResult<()>;
}

/// A value-only sub-entity kind, rebuilt wholesale on every pass.
#[async_trait]
pub trait UnkeyedKind: Send + Sync {
    type Remote: Clone + Debug + Send + Sync;

    const KIND: EntityKind;

    fn remote_id(remote: &Self::Remote) -> &RemoteId;

    fn remote_value(remote: &Self::Remote) -> &str;

    async fn list(
        &self,
        gw: &dyn CtfdGateway,
        parent: &RemoteId,
    ) -> GatewayResult<Vec<Self::Remote>>;

    async fn create(
        &self,
        gw: &dyn CtfdGateway,
        parent: &RemoteId,
        value: &str,
    ) -> GatewayResult<Self::Remote>;

    async fn delete(&self, gw: &dyn CtfdGateway, id: &RemoteId) -> GatewayResult<()>;
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct Flags;

#[async_trait]
impl SubEntityKind for Flags {
    type Fields = FlagSpec;
    type Remote = RemoteFlag;

    const KIND: EntityKind = EntityKind::Flags;

    fn remote_id(remote: &RemoteFlag) -> &RemoteId {
        &remote.id
    }

    fn decide(
        &self,
        desired: &FlagSpec,
        remote: &RemoteFlag,
        _recorded: Option<&FlagSpec>,
    ) -> ChangeDecision {
        detect::decide_flag(desired, remote)
    }

    fn settle(&self, _desired: &FlagSpec, remote: &RemoteFlag) -> FlagSpec {
        FlagSpec::observed(remote)
    }

    fn fallback(
        &self,
        _desired: &FlagSpec,
        remote: &RemoteFlag,
        _recorded: Option<&FlagSpec>,
    ) -> Option<FlagSpec> {
        Some(FlagSpec::observed(remote))
    }

    fn binds_to(&self, declared: &FlagSpec, recorded: &FlagSpec) -> bool {
        declared.content == recorded.content
    }

    async fn list(&self, gw: &dyn CtfdGateway, parent: &RemoteId) -> GatewayResult<Vec<RemoteFlag>> {
        gw.list_flags(parent).await
    }

    async fn create(
        &self,
        gw: &dyn CtfdGateway,
        parent: &RemoteId,
        desired: &FlagSpec,
    ) -> GatewayResult<RemoteFlag> {
        gw.create_flag(parent, &desired.resolve(None)).await
    }

    async fn update(
        &self,
        gw: &dyn CtfdGateway,
        desired: &FlagSpec,
        current: &RemoteFlag,
    ) -> GatewayResult<RemoteFlag> {
        gw.update_flag(&current.id, &desired.resolve(Some(&current.fields)))
            .await
    }

    async fn delete(&self, gw: &dyn CtfdGateway, id: &RemoteId) -> GatewayResult<()> {
        gw.delete_flag(id).await
    }
}

// ---------------------------------------------------------------------------
// Hints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct Hints;

#[async_trait]
impl SubEntityKind for Hints {
    type Fields = HintSpec;
    type Remote = RemoteHint;

    const KIND: EntityKind = EntityKind::Hints;

    fn remote_id(remote: &RemoteHint) -> &RemoteId {
        &remote.id
    }

    fn decide(
        &self,
        desired: &HintSpec,
        remote: &RemoteHint,
        _recorded: Option<&HintSpec>,
    ) -> ChangeDecision {
        detect::decide_hint(desired, remote)
    }

    fn settle(&self, _desired: &HintSpec, remote: &RemoteHint) -> HintSpec {
        HintSpec::observed(remote)
    }

    fn fallback(
        &self,
        _desired: &HintSpec,
        remote: &RemoteHint,
        _recorded: Option<&HintSpec>,
    ) -> Option<HintSpec> {
        Some(HintSpec::observed(remote))
    }

    fn binds_to(&self, declared: &HintSpec, recorded: &HintSpec) -> bool {
        declared.content == recorded.content
    }

    async fn list(&self, gw: &dyn CtfdGateway, parent: &RemoteId) -> GatewayResult<Vec<RemoteHint>> {
        gw.list_hints(parent).await
    }

    async fn create(
        &self,
        gw: &dyn CtfdGateway,
        parent: &RemoteId,
        desired: &HintSpec,
    ) -> GatewayResult<RemoteHint> {
        gw.create_hint(parent, &desired.resolve(None)).await
    }

    async fn update(
        &self,
        gw: &dyn CtfdGateway,
        desired: &HintSpec,
        current: &RemoteHint,
    ) -> GatewayResult<RemoteHint> {
        gw.update_hint(&current.id, &desired.resolve(Some(&current.fields)))
            .await
    }

    async fn delete(&self, gw: &dyn CtfdGateway, id: &RemoteId) -> GatewayResult<()> {
        gw.delete_hint(id).await
    }
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Files are replace-only: CTFd has no way to change a stored file.
#[derive(Debug, Clone, Copy, Default)]
pub struct Files;

#[async_trait]
impl SubEntityKind for Files {
    type Fields = FileSpec;
    type Remote = RemoteFile;

    const KIND: EntityKind = EntityKind::Files;

    fn remote_id(remote: &RemoteFile) -> &RemoteId {
        &remote.id
    }

    fn decide(
        &self,
        desired: &FileSpec,
        remote: &RemoteFile,
        recorded: Option<&FileSpec>,
    ) -> ChangeDecision {
        detect::decide_file(desired, remote, recorded)
    }

    fn settle(&self, desired: &FileSpec, remote: &RemoteFile) -> FileSpec {
        desired.stored_at(&remote.location)
    }

    // The remote bytes are unknown without a fetch; only the recorded
    // entry can vouch for them.
    fn fallback(
        &self,
        _desired: &FileSpec,
        _remote: &RemoteFile,
        recorded: Option<&FileSpec>,
    ) -> Option<FileSpec> {
        recorded.cloned()
    }

    fn binds_to(&self, declared: &FileSpec, recorded: &FileSpec) -> bool {
        declared.name == recorded.name
    }

    async fn list(&self, gw: &dyn CtfdGateway, parent: &RemoteId) -> GatewayResult<Vec<RemoteFile>> {
        gw.list_files(parent).await
    }

    async fn create(
        &self,
        gw: &dyn CtfdGateway,
        parent: &RemoteId,
        desired: &FileSpec,
    ) -> GatewayResult<RemoteFile> {
        gw.create_file(parent, &desired.upload()).await
    }

    async fn update(
        &self,
        _gw: &dyn CtfdGateway,
        _desired: &FileSpec,
        _current: &RemoteFile,
    ) -> GatewayResult<RemoteFile> {
        Err(GatewayError::Unsupported {
            operation: "update file".to_string(),
        })
    }

    async fn delete(&self, gw: &dyn CtfdGateway, id: &RemoteId) -> GatewayResult<()> {
        gw.delete_file(id).await
    }
}

// ---------------------------------------------------------------------------
// Tags & Topics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct Tags;

#[async_trait]
impl UnkeyedKind for Tags {
    type Remote = RemoteTag;

    const KIND: EntityKind = EntityKind::Tags;

    fn remote_id(remote: &RemoteTag) -> &RemoteId {
        &remote.id
    }

    fn remote_value(remote: &RemoteTag) -> &str {
        &remote.value
    }

    async fn list(&self, gw: &dyn CtfdGateway, parent: &RemoteId) -> GatewayResult<Vec<RemoteTag>> {
        gw.list_tags(parent).await
    }

    async fn create(
        &self,
        gw: &dyn CtfdGateway,
        parent: &RemoteId,
        value: &str,
    ) -> GatewayResult<RemoteTag> {
        gw.create_tag(parent, value).await
    }

    async fn delete(&self, gw: &dyn CtfdGateway, id: &RemoteId) -> GatewayResult<()> {
        gw.delete_tag(id).await
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Topics;

#[async_trait]
impl UnkeyedKind for Topics {
    type Remote = RemoteTopic;

    const KIND: EntityKind = EntityKind::Topics;

    fn remote_id(remote: &RemoteTopic) -> &RemoteId {
        &remote.id
    }

    fn remote_value(remote: &RemoteTopic) -> &str {
        &remote.value
    }

    async fn list(
        &self,
        gw: &dyn CtfdGateway,
        parent: &RemoteId,
    ) -> GatewayResult<Vec<RemoteTopic>> {
        gw.list_topics(parent).await
    }

    async fn create(
        &self,
        gw: &dyn CtfdGateway,
        parent: &RemoteId,
        value: &str,
    ) -> GatewayResult<RemoteTopic> {
        gw.create_topic(parent, value).await
    }

    async fn delete(&self, gw: &dyn CtfdGateway, id: &RemoteId) -> GatewayResult<()> {
        gw.delete_topic(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctfd_state::fakes::MemoryGateway;
    use ctfd_state::ChallengeFields;

    #[tokio::test]
    async fn test_flag_update_keeps_unset_attributes() {
        let gw = MemoryGateway::new();
        let chal = gw
            .create_challenge(&ChallengeFields::new("c", "misc", "d", 10))
            .await
            .unwrap();
        let mut declared = FlagSpec::new("CTF{a}");
        declared.data = Some(ctfd_state::FlagSensitivity::CaseInsensitive);
        let created = Flags.create(&gw, &chal.id, &declared).await.unwrap();

        let updated = Flags
            .update(&gw, &FlagSpec::new("CTF{b}"), &created)
            .await
            .unwrap();
        assert_eq!(updated.fields.content, "CTF{b}");
        assert_eq!(
            updated.fields.data,
            ctfd_state::FlagSensitivity::CaseInsensitive
        );
    }

    #[tokio::test]
    async fn test_files_cannot_be_updated() {
        let gw = MemoryGateway::new();
        let remote = RemoteFile {
            id: RemoteId::from(1),
            location: "x/a.txt".into(),
        };
        let err = Files
            .update(&gw, &FileSpec::new("a.txt", "x"), &remote)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unsupported { .. }));
        assert!(gw.calls().is_empty());
    }

    #[test]
    fn test_file_fallback_never_invents_content() {
        let remote = RemoteFile {
            id: RemoteId::from(1),
            location: "x/a.txt".into(),
        };
        assert!(Files
            .fallback(&FileSpec::new("a.txt", "new"), &remote, None)
            .is_none());
    }

    #[test]
    fn test_entity_kind_display() {
        assert_eq!(EntityKind::Topics.to_string(), "topics");
        assert_eq!(
            serde_json::to_string(&EntityKind::Challenge).unwrap(),
            "\"challenge\""
        );
    }
}
