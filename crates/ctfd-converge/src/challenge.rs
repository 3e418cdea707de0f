//! The challenge aggregate.
//!
//! A challenge owns five sub-collections. Every pass patches the challenge
//! itself first, then reconciles the collections in a fixed order: files,
//! flags, tags, topics, hints. A failing collection never stops the ones
//! after it; its diagnostics are folded into the aggregate result.

use ctfd_state::{ChallengeFields, ChallengeType, CtfdGateway, GatewayError, RemoteId};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::diagnostics::{Diagnostic, Operation, Severity};
use crate::domain::{
    Committed, DeclarationError, FileSpec, FlagSpec, HintSpec, ReconcileError, Record, Result,
};
use crate::executor::{reconcile_keyed, reconcile_unkeyed, Completion, KindSummary, Reconciled};
use crate::kind::{EntityKind, Files, Flags, Hints, SubEntityKind, Tags, Topics, UnkeyedKind};
use crate::planner::{plan_keyed, plan_unkeyed, Plan, PlanSummary};

/// Declared configuration of one challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeSpec {
    #[serde(flatten)]
    pub fields: ChallengeFields,
    #[serde(default)]
    pub files: Vec<Record<FileSpec>>,
    #[serde(default)]
    pub flags: Vec<Record<FlagSpec>>,
    #[serde(default)]
    pub hints: Vec<Record<HintSpec>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

impl ChallengeSpec {
    pub fn new(fields: ChallengeFields) -> Self {
        ChallengeSpec {
            fields,
            files: Vec::new(),
            flags: Vec::new(),
            hints: Vec::new(),
            tags: Vec::new(),
            topics: Vec::new(),
        }
    }

    /// Reject declarations CTFd would refuse or misinterpret.
    pub fn validate(&self) -> std::result::Result<(), DeclarationError> {
        let invalid = |reason: &str| DeclarationError::InvalidChallenge {
            name: self.fields.name.clone(),
            reason: reason.to_string(),
        };
        if self.fields.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.fields.kind == ChallengeType::Dynamic {
            if self.fields.decay.is_none() {
                return Err(invalid("dynamic challenges need a decay"));
            }
            match self.fields.minimum {
                None => return Err(invalid("dynamic challenges need a minimum")),
                Some(minimum) if minimum > self.fields.value => {
                    return Err(invalid("minimum is above the initial value"))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Recorded state of one challenge after a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeState {
    pub id: RemoteId,
    #[serde(flatten)]
    pub fields: ChallengeFields,
    #[serde(default)]
    pub files: Vec<Committed<FileSpec>>,
    #[serde(default)]
    pub flags: Vec<Committed<FlagSpec>>,
    #[serde(default)]
    pub hints: Vec<Committed<HintSpec>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

impl ChallengeState {
    fn empty(id: RemoteId, fields: ChallengeFields) -> Self {
        ChallengeState {
            id,
            fields,
            files: Vec::new(),
            flags: Vec::new(),
            hints: Vec::new(),
            tags: Vec::new(),
            topics: Vec::new(),
        }
    }

    /// The declaration that would leave this state untouched.
    pub fn to_spec(&self) -> ChallengeSpec {
        fn committed<F: Clone>(entries: &[Committed<F>]) -> Vec<Record<F>> {
            entries.iter().cloned().map(Record::from).collect()
        }
        ChallengeSpec {
            fields: self.fields.clone(),
            files: committed(&self.files),
            flags: committed(&self.flags),
            hints: committed(&self.hints),
            tags: self.tags.clone(),
            topics: self.topics.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pass bookkeeping
// ---------------------------------------------------------------------------

struct Pass {
    diagnostics: Vec<Diagnostic>,
    summary: Vec<KindSummary>,
    completion: Completion,
}

impl Pass {
    fn new() -> Self {
        Pass {
            diagnostics: Vec::new(),
            summary: Vec::new(),
            completion: Completion::Completed,
        }
    }

    fn stopped(&mut self, cancel: &CancelToken) -> bool {
        if cancel.is_cancelled() {
            self.completion = Completion::Cancelled;
        }
        self.completion == Completion::Cancelled
    }

    fn absorb<S>(&mut self, out: Reconciled<S>) -> S {
        self.diagnostics.extend(out.diagnostics);
        self.summary.extend(out.summary);
        if out.completion == Completion::Cancelled {
            self.completion = Completion::Cancelled;
        }
        out.state
    }

    fn finish(self, state: ChallengeState) -> Reconciled<ChallengeState> {
        Reconciled {
            state,
            diagnostics: self.diagnostics,
            completion: self.completion,
            summary: self.summary,
        }
    }
}

/// Where a collection's remote snapshot comes from.
#[derive(Clone, Copy)]
enum Snapshot {
    /// The challenge was just created; nothing exists under it yet.
    Empty,
    List,
}

#[allow(clippy::too_many_arguments)]
async fn converge_keyed<K: SubEntityKind>(
    kind: &K,
    gw: &dyn CtfdGateway,
    parent: &RemoteId,
    desired: &[Record<K::Fields>],
    recorded: &[Committed<K::Fields>],
    snapshot: Snapshot,
    cancel: &CancelToken,
    pass: &mut Pass,
) -> Result<Vec<Committed<K::Fields>>> {
    if pass.stopped(cancel) {
        return Ok(recorded.to_vec());
    }
    let remote = match snapshot {
        Snapshot::Empty => Vec::new(),
        Snapshot::List => match kind.list(gw, parent).await {
            Ok(rows) => rows,
            Err(err) => {
                pass.diagnostics
                    .push(Diagnostic::new(K::KIND, Severity::Error, Operation::List, err));
                return Ok(recorded.to_vec());
            }
        },
    };
    match reconcile_keyed(kind, gw, parent, desired, &remote, recorded, cancel).await {
        Ok(out) => Ok(pass.absorb(out)),
        Err(ReconcileError::Match(err)) => {
            pass.diagnostics
                .push(Diagnostic::new(K::KIND, Severity::Fatal, Operation::Match, err));
            Ok(recorded.to_vec())
        }
        Err(err) => Err(err),
    }
}

#[allow(clippy::too_many_arguments)]
async fn converge_unkeyed<K: UnkeyedKind>(
    kind: &K,
    gw: &dyn CtfdGateway,
    parent: &RemoteId,
    desired: &[String],
    recorded: &[String],
    snapshot: Snapshot,
    cancel: &CancelToken,
    pass: &mut Pass,
) -> Result<Vec<String>> {
    if pass.stopped(cancel) {
        return Ok(recorded.to_vec());
    }
    let remote = match snapshot {
        Snapshot::Empty => Vec::new(),
        Snapshot::List => match kind.list(gw, parent).await {
            Ok(rows) => rows,
            Err(err) => {
                pass.diagnostics
                    .push(Diagnostic::new(K::KIND, Severity::Error, Operation::List, err));
                return Ok(recorded.to_vec());
            }
        },
    };
    let out = reconcile_unkeyed(kind, gw, parent, desired, &remote, cancel).await?;
    Ok(pass.absorb(out))
}

async fn converge_children(
    gw: &dyn CtfdGateway,
    desired: &ChallengeSpec,
    mut state: ChallengeState,
    snapshot: Snapshot,
    cancel: &CancelToken,
    pass: &mut Pass,
) -> Result<ChallengeState> {
    let id = state.id.clone();
    state.files =
        converge_keyed(&Files, gw, &id, &desired.files, &state.files, snapshot, cancel, pass).await?;
    state.flags =
        converge_keyed(&Flags, gw, &id, &desired.flags, &state.flags, snapshot, cancel, pass).await?;
    state.tags =
        converge_unkeyed(&Tags, gw, &id, &desired.tags, &state.tags, snapshot, cancel, pass).await?;
    state.topics =
        converge_unkeyed(&Topics, gw, &id, &desired.topics, &state.topics, snapshot, cancel, pass)
            .await?;
    state.hints =
        converge_keyed(&Hints, gw, &id, &desired.hints, &state.hints, snapshot, cancel, pass).await?;
    Ok(state)
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Create a challenge and everything it declares.
///
/// Fails outright only if the challenge itself cannot be created; failures
/// below it are reported as diagnostics.
pub async fn create_challenge(
    gw: &dyn CtfdGateway,
    desired: &ChallengeSpec,
    cancel: &CancelToken,
) -> Result<Reconciled<ChallengeState>> {
    desired.validate()?;
    if cancel.is_cancelled() {
        return Err(ReconcileError::Cancelled);
    }
    let created = gw
        .create_challenge(&desired.fields)
        .await
        .map_err(ReconcileError::ParentCreate)?;

    let mut pass = Pass::new();
    let mut parent = KindSummary::new(EntityKind::Challenge);
    parent.created = 1;
    pass.summary.push(parent);

    let state = ChallengeState::empty(created.id, created.fields);
    let state = converge_children(gw, desired, state, Snapshot::Empty, cancel, &mut pass).await?;
    Ok(pass.finish(state))
}

/// Bring the challenge's own fields to `desired`, comparing against what
/// CTFd holds now rather than what was last recorded.
async fn converge_parent(
    gw: &dyn CtfdGateway,
    desired: &ChallengeSpec,
    recorded: &ChallengeState,
    parent: &mut KindSummary,
    pass: &mut Pass,
) -> ChallengeFields {
    let live = match gw.get_challenge(&recorded.id).await {
        Ok(live) => live.fields,
        Err(err) => {
            parent.failed = 1;
            pass.diagnostics.push(
                Diagnostic::new(EntityKind::Challenge, Severity::Error, Operation::Read, err)
                    .with_target(&recorded.id),
            );
            return recorded.fields.clone();
        }
    };
    if live == desired.fields {
        parent.kept = 1;
        return live;
    }
    match gw.update_challenge(&recorded.id, &desired.fields).await {
        Ok(remote) => {
            parent.updated = 1;
            remote.fields
        }
        Err(err) => {
            parent.failed = 1;
            pass.diagnostics.push(
                Diagnostic::new(EntityKind::Challenge, Severity::Error, Operation::Update, err)
                    .with_target(&recorded.id),
            );
            live
        }
    }
}

/// Converge an existing challenge to `desired`.
pub async fn update_challenge(
    gw: &dyn CtfdGateway,
    desired: &ChallengeSpec,
    recorded: &ChallengeState,
    cancel: &CancelToken,
) -> Result<Reconciled<ChallengeState>> {
    desired.validate()?;
    let mut pass = Pass::new();
    let mut parent = KindSummary::new(EntityKind::Challenge);

    let fields = if pass.stopped(cancel) {
        recorded.fields.clone()
    } else {
        converge_parent(gw, desired, recorded, &mut parent, &mut pass).await
    };
    pass.summary.push(parent);

    let state = ChallengeState {
        fields,
        ..recorded.clone()
    };
    let state = converge_children(gw, desired, state, Snapshot::List, cancel, &mut pass).await?;
    Ok(pass.finish(state))
}

/// Rebuild the full state of a challenge from CTFd.
///
/// File contents are downloaded so their fingerprints can be recorded.
pub async fn read_challenge(
    gw: &dyn CtfdGateway,
    id: &RemoteId,
) -> std::result::Result<ChallengeState, GatewayError> {
    let remote = gw.get_challenge(id).await?;
    let mut state = ChallengeState::empty(remote.id, remote.fields);

    for file in gw.list_files(id).await? {
        let content = gw.fetch_file_content(&file).await?;
        let spec = FileSpec::new(file.file_name(), content).stored_at(&file.location);
        state.files.push(Committed::new(file.id, spec));
    }
    state.flags = gw
        .list_flags(id)
        .await?
        .iter()
        .map(|row| Committed::new(row.id.clone(), FlagSpec::observed(row)))
        .collect();
    state.hints = gw
        .list_hints(id)
        .await?
        .iter()
        .map(|row| Committed::new(row.id.clone(), HintSpec::observed(row)))
        .collect();
    state.tags = gw.list_tags(id).await?.into_iter().map(|t| t.value).collect();
    state.topics = gw
        .list_topics(id)
        .await?
        .into_iter()
        .map(|t| t.value)
        .collect();
    Ok(state)
}

/// Delete a challenge. CTFd removes everything nested under it.
///
/// A challenge that is already gone counts as deleted.
pub async fn delete_challenge(
    gw: &dyn CtfdGateway,
    id: &RemoteId,
) -> std::result::Result<(), GatewayError> {
    match gw.delete_challenge(id).await {
        Ok(()) | Err(GatewayError::NotFound { .. }) => Ok(()),
        Err(err) => Err(err),
    }
}

/// Bring the remote to `desired`, creating or re-creating the challenge when needed.
///
/// Changing the challenge type cannot be done in place: the challenge is
/// deleted and created again, and every sub-entity with it.
pub async fn apply_challenge(
    gw: &dyn CtfdGateway,
    desired: &ChallengeSpec,
    recorded: Option<&ChallengeState>,
    cancel: &CancelToken,
) -> Result<Reconciled<ChallengeState>> {
    match recorded {
        None => create_challenge(gw, desired, cancel).await,
        Some(recorded) if recorded.fields.kind != desired.fields.kind => {
            desired.validate()?;
            if cancel.is_cancelled() {
                return Ok(Reconciled {
                    state: recorded.clone(),
                    diagnostics: Vec::new(),
                    completion: Completion::Cancelled,
                    summary: Vec::new(),
                });
            }
            delete_challenge(gw, &recorded.id).await?;
            let mut out = create_challenge(gw, desired, cancel).await?;
            if let Some(parent) = out
                .summary
                .iter_mut()
                .find(|s| s.kind == EntityKind::Challenge)
            {
                parent.deleted = 1;
            }
            Ok(out)
        }
        Some(recorded) => update_challenge(gw, desired, recorded, cancel).await,
    }
}

// ---------------------------------------------------------------------------
// Plan preview
// ---------------------------------------------------------------------------

/// What happens to the challenge itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ParentAction {
    Create,
    /// The type changed; delete `id` and create from scratch.
    Recreate { id: RemoteId },
    Update { id: RemoteId, fields_changed: bool },
}

/// Every action a pass would take, without taking any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengePlan {
    pub parent: ParentAction,
    pub files: Plan<FileSpec>,
    pub flags: Plan<FlagSpec>,
    pub tags: Plan<String>,
    pub topics: Plan<String>,
    pub hints: Plan<HintSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChallengePlanSummary {
    pub parent: ParentAction,
    pub kinds: Vec<PlanSummary>,
}

impl ChallengePlan {
    /// True when applying would not touch the remote.
    pub fn is_noop(&self) -> bool {
        matches!(
            self.parent,
            ParentAction::Update {
                fields_changed: false,
                ..
            }
        ) && self.files.is_noop()
            && self.flags.is_noop()
            && self.tags.is_noop()
            && self.topics.is_noop()
            && self.hints.is_noop()
    }

    /// Kind plans in execution order.
    pub fn summary(&self) -> ChallengePlanSummary {
        ChallengePlanSummary {
            parent: self.parent.clone(),
            kinds: vec![
                self.files.summary(),
                self.flags.summary(),
                self.tags.summary(),
                self.topics.summary(),
                self.hints.summary(),
            ],
        }
    }
}

/// Compute what [`apply_challenge`] would do right now.
///
/// Reads the challenge and its collections but changes nothing. Unlike a pass, a list
/// failure or a duplicated identity is returned as an error: a partial
/// preview would be misleading.
pub async fn plan_challenge(
    gw: &dyn CtfdGateway,
    desired: &ChallengeSpec,
    recorded: Option<&ChallengeState>,
) -> Result<ChallengePlan> {
    desired.validate()?;
    let (parent, existing) = match recorded {
        None => (ParentAction::Create, None),
        Some(rec) if rec.fields.kind != desired.fields.kind => (
            ParentAction::Recreate {
                id: rec.id.clone(),
            },
            None,
        ),
        Some(rec) => {
            let live = gw.get_challenge(&rec.id).await?;
            (
                ParentAction::Update {
                    id: rec.id.clone(),
                    fields_changed: live.fields != desired.fields,
                },
                Some(rec),
            )
        }
    };

    let plan = match existing {
        None => ChallengePlan {
            parent,
            files: plan_keyed(&Files, &desired.files, &[], &[])?,
            flags: plan_keyed(&Flags, &desired.flags, &[], &[])?,
            tags: plan_unkeyed(&Tags, &desired.tags, &[]),
            topics: plan_unkeyed(&Topics, &desired.topics, &[]),
            hints: plan_keyed(&Hints, &desired.hints, &[], &[])?,
        },
        Some(rec) => {
            let id = &rec.id;
            ChallengePlan {
                parent,
                files: plan_keyed(&Files, &desired.files, &Files.list(gw, id).await?, &rec.files)?,
                flags: plan_keyed(&Flags, &desired.flags, &Flags.list(gw, id).await?, &rec.flags)?,
                tags: plan_unkeyed(&Tags, &desired.tags, &Tags.list(gw, id).await?),
                topics: plan_unkeyed(&Topics, &desired.topics, &Topics.list(gw, id).await?),
                hints: plan_keyed(&Hints, &desired.hints, &Hints.list(gw, id).await?, &rec.hints)?,
            }
        }
    };
    Ok(plan)
}
