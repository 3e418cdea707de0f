//! Plan execution.
//!
//! Actions run one at a time, in plan order. A failing action becomes a
//! [`Diagnostic`] and the rest of the plan still runs; there is no retry and
//! no rollback. The returned state describes what is actually on the remote
//! as far as this pass knows:
//!
//! - created/updated entities carry what CTFd echoed back
//! - kept entities carry the remote snapshot
//! - entities the pass failed to touch (or never reached) keep their last
//!   known remote truth, or are dropped when none can be stated

use std::collections::{HashMap, HashSet};

use ctfd_state::{CtfdGateway, RemoteId};
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::diagnostics::{Diagnostic, Operation, Severity};
use crate::domain::{Committed, ReconcileError, Record};
use crate::kind::{EntityKind, SubEntityKind, UnkeyedKind};
use crate::planner::{plan_keyed, plan_unkeyed, Action, DeleteCause, Plan};

/// Whether a pass ran to the end of its plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    Completed,
    Cancelled,
}

/// What a pass did to one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindSummary {
    pub kind: EntityKind,
    pub kept: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed: usize,
}

impl KindSummary {
    pub fn new(kind: EntityKind) -> Self {
        KindSummary {
            kind,
            kept: 0,
            created: 0,
            updated: 0,
            deleted: 0,
            failed: 0,
        }
    }
}

/// Outcome of a reconciliation: new state plus everything that went wrong.
#[derive(Debug, Clone)]
pub struct Reconciled<S> {
    pub state: S,
    pub diagnostics: Vec<Diagnostic>,
    pub completion: Completion,
    pub summary: Vec<KindSummary>,
}

impl<S> Reconciled<S> {
    /// True only when every action succeeded and the plan ran to the end.
    pub fn is_success(&self) -> bool {
        self.diagnostics.is_empty() && self.completion == Completion::Completed
    }

    pub fn is_cancelled(&self) -> bool {
        self.completion == Completion::Cancelled
    }
}

enum Slot<F> {
    Unrun,
    Done(Committed<F>),
    Lost,
}

impl<F> From<Option<Committed<F>>> for Slot<F> {
    fn from(entry: Option<Committed<F>>) -> Self {
        entry.map(Slot::Done).unwrap_or(Slot::Lost)
    }
}

fn invariant(kind: EntityKind, detail: String) -> ReconcileError {
    ReconcileError::Invariant { kind, detail }
}

/// Execute a keyed plan produced by [`plan_keyed`] for the same inputs.
#[allow(clippy::too_many_arguments)]
pub async fn apply_keyed<K: SubEntityKind>(
    kind: &K,
    gw: &dyn CtfdGateway,
    parent: &RemoteId,
    plan: &Plan<K::Fields>,
    desired: &[Record<K::Fields>],
    remote: &[K::Remote],
    recorded: &[Committed<K::Fields>],
    cancel: &CancelToken,
) -> Result<Reconciled<Vec<Committed<K::Fields>>>, ReconcileError> {
    plan.validate(desired.len())
        .map_err(|detail| invariant(K::KIND, detail))?;

    let remote_by_id: HashMap<&RemoteId, &K::Remote> =
        remote.iter().map(|row| (K::remote_id(row), row)).collect();
    let recorded_by_id: HashMap<&RemoteId, &K::Fields> =
        recorded.iter().map(|c| (&c.id, &c.fields)).collect();

    // Last known remote truth for a slot bound to `id`.
    let fallback = |slot: usize, id: &RemoteId| -> Slot<K::Fields> {
        let entry = remote_by_id.get(id).and_then(|row| {
            kind.fallback(
                desired[slot].fields(),
                row,
                recorded_by_id.get(id).copied(),
            )
            .map(|fields| Committed::new(id.clone(), fields))
        });
        Slot::from(entry)
    };

    let mut slots: Vec<Slot<K::Fields>> = (0..desired.len()).map(|_| Slot::Unrun).collect();
    let mut diagnostics = Vec::new();
    let mut summary = KindSummary::new(K::KIND);
    let mut completion = Completion::Completed;
    let mut broken_replace: Option<usize> = None;

    for (idx, action) in plan.actions.iter().enumerate() {
        // The create half of a replace runs even if cancellation arrived
        // during the delete, so the pair is never split by a cancel.
        let completes_replace = matches!(action, Action::Create { .. })
            && idx > 0
            && matches!(
                plan.actions[idx - 1],
                Action::Delete {
                    cause: DeleteCause::Replaced { .. },
                    ..
                }
            );
        if action.is_remote() && !completes_replace && cancel.is_cancelled() {
            completion = Completion::Cancelled;
            break;
        }

        match action {
            Action::Keep { slot, id } => {
                let row = remote_by_id.get(id).ok_or_else(|| {
                    invariant(K::KIND, format!("kept #{id} is not in the remote snapshot"))
                })?;
                let fields = kind.settle(desired[*slot].fields(), row);
                slots[*slot] = Slot::Done(Committed::new(id.clone(), fields));
                summary.kept += 1;
            }
            Action::Create { slot, fields } => {
                if completes_replace && broken_replace == Some(*slot) {
                    continue;
                }
                match kind.create(gw, parent, fields).await {
                    Ok(row) => {
                        let id = K::remote_id(&row).clone();
                        slots[*slot] = Slot::Done(Committed::new(id, kind.settle(fields, &row)));
                        summary.created += 1;
                    }
                    Err(err) => {
                        let severity = if completes_replace {
                            Severity::DataLoss
                        } else {
                            Severity::Error
                        };
                        diagnostics.push(
                            Diagnostic::new(K::KIND, severity, Operation::Create, err)
                                .with_slot(*slot),
                        );
                        slots[*slot] = Slot::Lost;
                        summary.failed += 1;
                    }
                }
            }
            Action::Update { slot, id, fields } => {
                let current = remote_by_id.get(id).ok_or_else(|| {
                    invariant(K::KIND, format!("updated #{id} is not in the remote snapshot"))
                })?;
                match kind.update(gw, fields, current).await {
                    Ok(row) => {
                        slots[*slot] =
                            Slot::Done(Committed::new(id.clone(), kind.settle(fields, &row)));
                        summary.updated += 1;
                    }
                    Err(err) => {
                        diagnostics.push(
                            Diagnostic::new(K::KIND, Severity::Error, Operation::Update, err)
                                .with_target(id)
                                .with_slot(*slot),
                        );
                        slots[*slot] = fallback(*slot, id);
                        summary.failed += 1;
                    }
                }
            }
            Action::Delete { id, cause } => match kind.delete(gw, id).await {
                Ok(()) => summary.deleted += 1,
                Err(err) => {
                    let mut diag =
                        Diagnostic::new(K::KIND, Severity::Error, Operation::Delete, err)
                            .with_target(id);
                    if let DeleteCause::Replaced { slot } = cause {
                        diag = diag.with_slot(*slot);
                        broken_replace = Some(*slot);
                        slots[*slot] = fallback(*slot, id);
                    }
                    diagnostics.push(diag);
                    summary.failed += 1;
                }
            },
        }
    }

    let state = slots
        .into_iter()
        .enumerate()
        .filter_map(|(slot, outcome)| {
            let outcome = match outcome {
                Slot::Unrun => match desired[slot].id() {
                    Some(id) => fallback(slot, id),
                    None => Slot::Lost,
                },
                other => other,
            };
            match outcome {
                Slot::Done(entry) => Some(entry),
                Slot::Unrun | Slot::Lost => None,
            }
        })
        .collect();

    Ok(Reconciled {
        state,
        diagnostics,
        completion,
        summary: vec![summary],
    })
}

/// Execute an unkeyed plan produced by [`plan_unkeyed`].
///
/// The new state lists the values still on the remote: rows whose delete
/// failed or never ran, followed by the values created.
pub async fn apply_unkeyed<K: UnkeyedKind>(
    kind: &K,
    gw: &dyn CtfdGateway,
    parent: &RemoteId,
    plan: &Plan<String>,
    desired: &[String],
    remote: &[K::Remote],
    cancel: &CancelToken,
) -> Result<Reconciled<Vec<String>>, ReconcileError> {
    plan.validate(desired.len())
        .map_err(|detail| invariant(K::KIND, detail))?;

    let mut deleted: HashSet<&RemoteId> = HashSet::new();
    let mut created = Vec::new();
    let mut diagnostics = Vec::new();
    let mut summary = KindSummary::new(K::KIND);
    let mut completion = Completion::Completed;

    for action in &plan.actions {
        if cancel.is_cancelled() {
            completion = Completion::Cancelled;
            break;
        }
        match action {
            Action::Delete { id, .. } => match kind.delete(gw, id).await {
                Ok(()) => {
                    deleted.insert(id);
                    summary.deleted += 1;
                }
                Err(err) => {
                    diagnostics.push(
                        Diagnostic::new(K::KIND, Severity::Error, Operation::Delete, err)
                            .with_target(id),
                    );
                    summary.failed += 1;
                }
            },
            Action::Create { slot, fields } => match kind.create(gw, parent, fields).await {
                Ok(row) => {
                    created.push(K::remote_value(&row).to_string());
                    summary.created += 1;
                }
                Err(err) => {
                    diagnostics.push(
                        Diagnostic::new(K::KIND, Severity::Error, Operation::Create, err)
                            .with_slot(*slot),
                    );
                    summary.failed += 1;
                }
            },
            Action::Keep { .. } | Action::Update { .. } => {
                return Err(invariant(
                    K::KIND,
                    "unkeyed collections are only deleted and created".to_string(),
                ));
            }
        }
    }

    let state = remote
        .iter()
        .filter(|row| !deleted.contains(K::remote_id(row)))
        .map(|row| K::remote_value(row).to_string())
        .chain(created)
        .collect();

    Ok(Reconciled {
        state,
        diagnostics,
        completion,
        summary: vec![summary],
    })
}

/// Plan and apply one keyed collection.
#[allow(clippy::too_many_arguments)]
pub async fn reconcile_keyed<K: SubEntityKind>(
    kind: &K,
    gw: &dyn CtfdGateway,
    parent: &RemoteId,
    desired: &[Record<K::Fields>],
    remote: &[K::Remote],
    recorded: &[Committed<K::Fields>],
    cancel: &CancelToken,
) -> Result<Reconciled<Vec<Committed<K::Fields>>>, ReconcileError> {
    let plan = plan_keyed(kind, desired, remote, recorded)?;
    apply_keyed(kind, gw, parent, &plan, desired, remote, recorded, cancel).await
}

/// Plan and apply one unkeyed collection.
pub async fn reconcile_unkeyed<K: UnkeyedKind>(
    kind: &K,
    gw: &dyn CtfdGateway,
    parent: &RemoteId,
    desired: &[String],
    remote: &[K::Remote],
    cancel: &CancelToken,
) -> Result<Reconciled<Vec<String>>, ReconcileError> {
    let plan = plan_unkeyed(kind, desired, remote);
    apply_unkeyed(kind, gw, parent, &plan, desired, remote, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::domain::{FileSpec, FlagSpec};
    use crate::kind::{Files, Flags, Tags};
    use ctfd_state::fakes::{Entity, MemoryGateway, Verb};
    use ctfd_state::{ChallengeFields, FlagFields, RemoteFlag};

    async fn setup() -> (MemoryGateway, RemoteId) {
        let gw = MemoryGateway::new();
        let chal = gw
            .create_challenge(&ChallengeFields::new("c", "misc", "d", 100))
            .await
            .unwrap();
        (gw, chal.id)
    }

    #[tokio::test]
    async fn test_create_records_assigned_id() {
        let (gw, parent) = setup().await;
        let desired = vec![Record::pending(FlagSpec::new("CTF{a}"))];

        let out = reconcile_keyed(&Flags, &gw, &parent, &desired, &[], &[], &CancelToken::never())
            .await
            .unwrap();

        assert!(out.is_success());
        assert_eq!(out.state.len(), 1);
        let remote = gw.list_flags(&parent).await.unwrap();
        assert_eq!(out.state[0].id, remote[0].id);
        assert_eq!(out.summary[0].created, 1);
    }

    #[tokio::test]
    async fn test_failed_update_keeps_pre_update_remote_fields() {
        let (gw, parent) = setup().await;
        let existing = gw
            .create_flag(&parent, &FlagFields::new("CTF{old}"))
            .await
            .unwrap();
        let remote = gw.list_flags(&parent).await.unwrap();
        let desired = vec![Record::committed(existing.id.clone(), FlagSpec::new("CTF{new}"))];

        gw.fail_next(Entity::Flag, Verb::Update);
        let out = reconcile_keyed(&Flags, &gw, &parent, &desired, &remote, &[], &CancelToken::never())
            .await
            .unwrap();

        assert!(!out.is_success());
        assert_eq!(out.diagnostics[0].severity, Severity::Error);
        assert_eq!(out.diagnostics[0].operation, Operation::Update);
        assert_eq!(out.state[0].id, existing.id);
        assert_eq!(out.state[0].fields.content, "CTF{old}");
    }

    #[tokio::test]
    async fn test_replace_create_failure_is_data_loss() {
        let (gw, parent) = setup().await;
        let file = gw
            .create_file(&parent, &FileSpec::new("a.txt", "v1").upload())
            .await
            .unwrap();
        let recorded = vec![Committed::new(
            file.id.clone(),
            FileSpec::new("a.txt", "v1").stored_at(&file.location),
        )];
        let desired = vec![Record::committed(file.id.clone(), FileSpec::new("a.txt", "v2"))];
        let remote = gw.list_files(&parent).await.unwrap();

        gw.fail_next(Entity::File, Verb::Create);
        let out = reconcile_keyed(
            &Files,
            &gw,
            &parent,
            &desired,
            &remote,
            &recorded,
            &CancelToken::never(),
        )
        .await
        .unwrap();

        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].severity, Severity::DataLoss);
        assert!(out.state.is_empty());
        assert!(gw.list_files(&parent).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_delete_failure_skips_create_and_keeps_recorded() {
        let (gw, parent) = setup().await;
        let file = gw
            .create_file(&parent, &FileSpec::new("a.txt", "v1").upload())
            .await
            .unwrap();
        let recorded = vec![Committed::new(
            file.id.clone(),
            FileSpec::new("a.txt", "v1").stored_at(&file.location),
        )];
        let desired = vec![Record::committed(file.id.clone(), FileSpec::new("a.txt", "v2"))];
        let remote = gw.list_files(&parent).await.unwrap();
        gw.clear_calls();

        gw.fail_next(Entity::File, Verb::Delete);
        let out = reconcile_keyed(
            &Files,
            &gw,
            &parent,
            &desired,
            &remote,
            &recorded,
            &CancelToken::never(),
        )
        .await
        .unwrap();

        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].operation, Operation::Delete);
        assert!(gw.calls().iter().all(|c| c.verb != Verb::Create));
        assert_eq!(out.state, recorded);
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_remote_call() {
        let (gw, parent) = setup().await;
        let (handle, token) = cancel_pair();
        gw.set_call_hook(move |call| {
            if call.verb == Verb::Create {
                handle.cancel();
            }
        });
        let desired = vec![
            Record::pending(FlagSpec::new("a")),
            Record::pending(FlagSpec::new("b")),
        ];

        let out = reconcile_keyed(&Flags, &gw, &parent, &desired, &[], &[], &token)
            .await
            .unwrap();

        assert!(out.is_cancelled());
        assert!(!out.is_success());
        assert_eq!(out.state.len(), 1);
        assert_eq!(gw.list_flags(&parent).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unkeyed_state_keeps_rows_that_failed_to_delete() {
        let (gw, parent) = setup().await;
        gw.create_tag(&parent, "old").await.unwrap();
        let remote = gw.list_tags(&parent).await.unwrap();

        gw.fail_next(Entity::Tag, Verb::Delete);
        let out = reconcile_unkeyed(
            &Tags,
            &gw,
            &parent,
            &["new".to_string()],
            &remote,
            &CancelToken::never(),
        )
        .await
        .unwrap();

        assert_eq!(out.state, vec!["old".to_string(), "new".to_string()]);
        assert_eq!(out.diagnostics.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_plan_is_fatal_before_any_call() {
        let (gw, parent) = setup().await;
        gw.clear_calls();
        let plan = Plan {
            kind: EntityKind::Flags,
            actions: vec![Action::Create {
                slot: 1,
                fields: FlagSpec::new("x"),
            }],
        };
        let desired = vec![Record::pending(FlagSpec::new("x"))];

        let err = apply_keyed(
            &Flags,
            &gw,
            &parent,
            &plan,
            &desired,
            &Vec::<RemoteFlag>::new(),
            &[],
            &CancelToken::never(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ReconcileError::Invariant { .. }));
        assert!(gw.calls().is_empty());
    }
}
