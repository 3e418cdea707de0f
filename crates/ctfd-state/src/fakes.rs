//! In-memory fake of the CTFd gateway (testing only)
//!
//! `MemoryGateway` satisfies the `CtfdGateway` contract without a network.
//! It also records every call it receives and can be told to fail specific
//! operations, which is how partial-failure and cancellation paths are tested.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::gateway::{CtfdGateway, GatewayResult};
use crate::schema::*;

/// Entity kind addressed by a gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Challenge,
    Flag,
    Hint,
    File,
    Tag,
    Topic,
}

/// Operation performed by a gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Create,
    Get,
    List,
    Update,
    Delete,
    Fetch,
}

/// One call received by the fake, in arrival order.
///
/// `target` is the addressed row for get/update/delete/fetch and the parent
/// challenge for create/list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCall {
    pub entity: Entity,
    pub verb: Verb,
    pub target: Option<RemoteId>,
}

type CallHook = Box<dyn Fn(&GatewayCall) + Send + Sync>;

#[derive(Debug, Clone)]
struct Row<T> {
    parent: RemoteId,
    record: T,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    challenges: BTreeMap<RemoteId, ChallengeFields>,
    flags: Vec<Row<RemoteFlag>>,
    hints: Vec<Row<RemoteHint>>,
    files: Vec<Row<(RemoteFile, Vec<u8>)>>,
    tags: Vec<Row<RemoteTag>>,
    topics: Vec<Row<RemoteTopic>>,
    fail_next: Vec<(Entity, Verb)>,
    fail_always: HashSet<(Entity, Verb)>,
    calls: Vec<GatewayCall>,
}

impl Inner {
    fn allocate_id(&mut self) -> RemoteId {
        self.next_id += 1;
        RemoteId::from(self.next_id)
    }

    fn require_challenge(&self, id: &RemoteId) -> GatewayResult<()> {
        if self.challenges.contains_key(id) {
            Ok(())
        } else {
            Err(GatewayError::not_found("challenge", id))
        }
    }
}

/// In-memory CTFd instance with call recording and failure injection.
#[derive(Default)]
pub struct MemoryGateway {
    inner: Mutex<Inner>,
    hook: Mutex<Option<CallHook>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call matching `entity` and `verb`, once.
    pub fn fail_next(&self, entity: Entity, verb: Verb) {
        self.inner.lock().unwrap().fail_next.push((entity, verb));
    }

    /// Fail every call matching `entity` and `verb` until `heal` is called.
    pub fn fail_always(&self, entity: Entity, verb: Verb) {
        self.inner.lock().unwrap().fail_always.insert((entity, verb));
    }

    /// Clear all pending failure injections.
    pub fn heal(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next.clear();
        inner.fail_always.clear();
    }

    /// Run `hook` on every call, before the call takes effect.
    pub fn set_call_hook(&self, hook: impl Fn(&GatewayCall) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// All calls received so far, failed ones included.
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Calls that change remote state (create/update/delete).
    pub fn mutating_calls(&self) -> Vec<GatewayCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c.verb, Verb::Create | Verb::Update | Verb::Delete))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    /// Number of challenges currently stored.
    pub fn challenge_count(&self) -> usize {
        self.inner.lock().unwrap().challenges.len()
    }

    /// Record the call, run the hook and apply any injected failure.
    fn enter(&self, entity: Entity, verb: Verb, target: Option<&RemoteId>) -> GatewayResult<()> {
        let call = GatewayCall {
            entity,
            verb,
            target: target.cloned(),
        };
        self.inner.lock().unwrap().calls.push(call.clone());

        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(&call);
        }

        let mut inner = self.inner.lock().unwrap();
        let injected = if let Some(pos) = inner.fail_next.iter().position(|f| *f == (entity, verb)) {
            inner.fail_next.remove(pos);
            true
        } else {
            inner.fail_always.contains(&(entity, verb))
        };
        if injected {
            return Err(GatewayError::Rejected {
                operation: format!("{:?} {:?}", verb, entity).to_lowercase(),
                status: 500,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

fn list_rows<T: Clone>(rows: &[Row<T>], parent: &RemoteId) -> Vec<T> {
    rows.iter()
        .filter(|r| &r.parent == parent)
        .map(|r| r.record.clone())
        .collect()
}

fn remove_row<T>(
    rows: &mut Vec<Row<T>>,
    entity: &'static str,
    id: &RemoteId,
    id_of: impl Fn(&T) -> &RemoteId,
) -> GatewayResult<()> {
    let pos = rows
        .iter()
        .position(|r| id_of(&r.record) == id)
        .ok_or_else(|| GatewayError::not_found(entity, id))?;
    rows.remove(pos);
    Ok(())
}

#[async_trait]
impl CtfdGateway for MemoryGateway {
    async fn create_challenge(&self, fields: &ChallengeFields) -> GatewayResult<RemoteChallenge> {
        self.enter(Entity::Challenge, Verb::Create, None)?;
        let mut inner = self.inner.lock().unwrap();
        let id = inner.allocate_id();
        inner.challenges.insert(id.clone(), fields.clone());
        Ok(RemoteChallenge {
            id,
            fields: fields.clone(),
        })
    }

    async fn get_challenge(&self, id: &RemoteId) -> GatewayResult<RemoteChallenge> {
        self.enter(Entity::Challenge, Verb::Get, Some(id))?;
        let inner = self.inner.lock().unwrap();
        inner
            .challenges
            .get(id)
            .map(|fields| RemoteChallenge {
                id: id.clone(),
                fields: fields.clone(),
            })
            .ok_or_else(|| GatewayError::not_found("challenge", id))
    }

    async fn update_challenge(
        &self,
        id: &RemoteId,
        fields: &ChallengeFields,
    ) -> GatewayResult<RemoteChallenge> {
        self.enter(Entity::Challenge, Verb::Update, Some(id))?;
        let mut inner = self.inner.lock().unwrap();
        let stored = inner
            .challenges
            .get_mut(id)
            .ok_or_else(|| GatewayError::not_found("challenge", id))?;
        *stored = fields.clone();
        Ok(RemoteChallenge {
            id: id.clone(),
            fields: fields.clone(),
        })
    }

    async fn delete_challenge(&self, id: &RemoteId) -> GatewayResult<()> {
        self.enter(Entity::Challenge, Verb::Delete, Some(id))?;
        let mut inner = self.inner.lock().unwrap();
        inner
            .challenges
            .remove(id)
            .ok_or_else(|| GatewayError::not_found("challenge", id))?;
        inner.flags.retain(|r| &r.parent != id);
        inner.hints.retain(|r| &r.parent != id);
        inner.files.retain(|r| &r.parent != id);
        inner.tags.retain(|r| &r.parent != id);
        inner.topics.retain(|r| &r.parent != id);
        Ok(())
    }

    async fn list_flags(&self, challenge: &RemoteId) -> GatewayResult<Vec<RemoteFlag>> {
        self.enter(Entity::Flag, Verb::List, Some(challenge))?;
        let inner = self.inner.lock().unwrap();
        inner.require_challenge(challenge)?;
        Ok(list_rows(&inner.flags, challenge))
    }

    async fn create_flag(
        &self,
        challenge: &RemoteId,
        fields: &FlagFields,
    ) -> GatewayResult<RemoteFlag> {
        self.enter(Entity::Flag, Verb::Create, Some(challenge))?;
        let mut inner = self.inner.lock().unwrap();
        inner.require_challenge(challenge)?;
        let record = RemoteFlag {
            id: inner.allocate_id(),
            fields: fields.clone(),
        };
        inner.flags.push(Row {
            parent: challenge.clone(),
            record: record.clone(),
        });
        Ok(record)
    }

    async fn update_flag(&self, id: &RemoteId, fields: &FlagFields) -> GatewayResult<RemoteFlag> {
        self.enter(Entity::Flag, Verb::Update, Some(id))?;
        let mut inner = self.inner.lock().unwrap();
        let row = inner
            .flags
            .iter_mut()
            .find(|r| &r.record.id == id)
            .ok_or_else(|| GatewayError::not_found("flag", id))?;
        row.record.fields = fields.clone();
        Ok(row.record.clone())
    }

    async fn delete_flag(&self, id: &RemoteId) -> GatewayResult<()> {
        self.enter(Entity::Flag, Verb::Delete, Some(id))?;
        let mut inner = self.inner.lock().unwrap();
        remove_row(&mut inner.flags, "flag", id, |f| &f.id)
    }

    async fn list_hints(&self, challenge: &RemoteId) -> GatewayResult<Vec<RemoteHint>> {
        self.enter(Entity::Hint, Verb::List, Some(challenge))?;
        let inner = self.inner.lock().unwrap();
        inner.require_challenge(challenge)?;
        Ok(list_rows(&inner.hints, challenge))
    }

    async fn create_hint(
        &self,
        challenge: &RemoteId,
        fields: &HintFields,
    ) -> GatewayResult<RemoteHint> {
        self.enter(Entity::Hint, Verb::Create, Some(challenge))?;
        let mut inner = self.inner.lock().unwrap();
        inner.require_challenge(challenge)?;
        let record = RemoteHint {
            id: inner.allocate_id(),
            fields: fields.clone(),
        };
        inner.hints.push(Row {
            parent: challenge.clone(),
            record: record.clone(),
        });
        Ok(record)
    }

    async fn update_hint(&self, id: &RemoteId, fields: &HintFields) -> GatewayResult<RemoteHint> {
        self.enter(Entity::Hint, Verb::Update, Some(id))?;
        let mut inner = self.inner.lock().unwrap();
        let row = inner
            .hints
            .iter_mut()
            .find(|r| &r.record.id == id)
            .ok_or_else(|| GatewayError::not_found("hint", id))?;
        row.record.fields = fields.clone();
        Ok(row.record.clone())
    }

    async fn delete_hint(&self, id: &RemoteId) -> GatewayResult<()> {
        self.enter(Entity::Hint, Verb::Delete, Some(id))?;
        let mut inner = self.inner.lock().unwrap();
        remove_row(&mut inner.hints, "hint", id, |h| &h.id)
    }

    async fn list_files(&self, challenge: &RemoteId) -> GatewayResult<Vec<RemoteFile>> {
        self.enter(Entity::File, Verb::List, Some(challenge))?;
        let inner = self.inner.lock().unwrap();
        inner.require_challenge(challenge)?;
        Ok(list_rows(&inner.files, challenge)
            .into_iter()
            .map(|(file, _)| file)
            .collect())
    }

    async fn create_file(
        &self,
        challenge: &RemoteId,
        upload: &FileUpload,
    ) -> GatewayResult<RemoteFile> {
        self.enter(Entity::File, Verb::Create, Some(challenge))?;
        let mut inner = self.inner.lock().unwrap();
        inner.require_challenge(challenge)?;
        let id = inner.allocate_id();
        let location = format!(
            "{}/{}",
            ContentDigest::from_bytes(&upload.content).short(),
            upload.name
        );
        let record = RemoteFile { id, location };
        inner.files.push(Row {
            parent: challenge.clone(),
            record: (record.clone(), upload.content.clone()),
        });
        Ok(record)
    }

    async fn fetch_file_content(&self, file: &RemoteFile) -> GatewayResult<Vec<u8>> {
        self.enter(Entity::File, Verb::Fetch, Some(&file.id))?;
        let inner = self.inner.lock().unwrap();
        inner
            .files
            .iter()
            .find(|r| r.record.0.location == file.location)
            .map(|r| r.record.1.clone())
            .ok_or_else(|| GatewayError::not_found("file", &file.location))
    }

    async fn delete_file(&self, id: &RemoteId) -> GatewayResult<()> {
        self.enter(Entity::File, Verb::Delete, Some(id))?;
        let mut inner = self.inner.lock().unwrap();
        remove_row(&mut inner.files, "file", id, |(f, _)| &f.id)
    }

    async fn list_tags(&self, challenge: &RemoteId) -> GatewayResult<Vec<RemoteTag>> {
        self.enter(Entity::Tag, Verb::List, Some(challenge))?;
        let inner = self.inner.lock().unwrap();
        inner.require_challenge(challenge)?;
        Ok(list_rows(&inner.tags, challenge))
    }

    async fn create_tag(&self, challenge: &RemoteId, value: &str) -> GatewayResult<RemoteTag> {
        self.enter(Entity::Tag, Verb::Create, Some(challenge))?;
        let mut inner = self.inner.lock().unwrap();
        inner.require_challenge(challenge)?;
        let record = RemoteTag {
            id: inner.allocate_id(),
            value: value.to_string(),
        };
        inner.tags.push(Row {
            parent: challenge.clone(),
            record: record.clone(),
        });
        Ok(record)
    }

    async fn delete_tag(&self, id: &RemoteId) -> GatewayResult<()> {
        self.enter(Entity::Tag, Verb::Delete, Some(id))?;
        let mut inner = self.inner.lock().unwrap();
        remove_row(&mut inner.tags, "tag", id, |t| &t.id)
    }

    async fn list_topics(&self, challenge: &RemoteId) -> GatewayResult<Vec<RemoteTopic>> {
        self.enter(Entity::Topic, Verb::List, Some(challenge))?;
        let inner = self.inner.lock().unwrap();
        inner.require_challenge(challenge)?;
        Ok(list_rows(&inner.topics, challenge))
    }

    async fn create_topic(
        &self,
        challenge: &RemoteId,
        value: &str,
    ) -> GatewayResult<RemoteTopic> {
        self.enter(Entity::Topic, Verb::Create, Some(challenge))?;
        let mut inner = self.inner.lock().unwrap();
        inner.require_challenge(challenge)?;
        let record = RemoteTopic {
            id: inner.allocate_id(),
            value: value.to_string(),
        };
        inner.topics.push(Row {
            parent: challenge.clone(),
            record: record.clone(),
        });
        Ok(record)
    }

    async fn delete_topic(&self, id: &RemoteId) -> GatewayResult<()> {
        self.enter(Entity::Topic, Verb::Delete, Some(id))?;
        let mut inner = self.inner.lock().unwrap();
        remove_row(&mut inner.topics, "topic", id, |t| &t.id)
    }
}
