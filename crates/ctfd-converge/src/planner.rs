//! Reconciliation planning.
//!
//! Turns a match result plus change decisions into an ordered list of
//! actions. Planning is pure: no remote calls, no clock, no randomness, so
//! the same inputs always give the same plan.
//!
//! Ordering rules for keyed collections:
//! - one group of actions per declared slot, in declaration order
//! - a replace is a `Delete { Replaced }` immediately followed by the
//!   `Create` for the same slot
//! - deletes of orphaned remote rows come last
//!
//! Unkeyed collections are rebuilt: every remote row is deleted, then every
//! declared value is created.

use std::collections::HashMap;

use ctfd_state::RemoteId;
use serde::Serialize;

use crate::detect::ChangeDecision;
use crate::domain::{Committed, MatchError, Record};
use crate::kind::{EntityKind, SubEntityKind, UnkeyedKind};
use crate::matcher::{match_keyed, match_unkeyed};

/// Why a remote row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum DeleteCause {
    /// Not declared any more.
    Orphan,
    /// First half of a replace; the paired `Create` follows.
    Replaced { slot: usize },
    /// Part of an unkeyed rebuild.
    Rebuild,
}

/// One step of a plan. `slot` is the position in the declared collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action<F> {
    Keep { slot: usize, id: RemoteId },
    Create { slot: usize, fields: F },
    Update { slot: usize, id: RemoteId, fields: F },
    Delete { id: RemoteId, cause: DeleteCause },
}

impl<F> Action<F> {
    pub fn slot(&self) -> Option<usize> {
        match self {
            Action::Keep { slot, .. }
            | Action::Create { slot, .. }
            | Action::Update { slot, .. } => Some(*slot),
            Action::Delete { .. } => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, Action::Keep { .. })
    }

    /// Summary without field values; flags are secrets.
    pub fn summarize(&self) -> ActionSummary {
        match self {
            Action::Keep { slot, id } => ActionSummary {
                op: Op::Keep,
                slot: Some(*slot),
                id: Some(id.clone()),
                cause: None,
            },
            Action::Create { slot, .. } => ActionSummary {
                op: Op::Create,
                slot: Some(*slot),
                id: None,
                cause: None,
            },
            Action::Update { slot, id, .. } => ActionSummary {
                op: Op::Update,
                slot: Some(*slot),
                id: Some(id.clone()),
                cause: None,
            },
            Action::Delete { id, cause } => ActionSummary {
                op: Op::Delete,
                slot: None,
                id: Some(id.clone()),
                cause: Some(*cause),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Keep,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionSummary {
    pub op: Op,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RemoteId>,
    #[serde(flatten)]
    pub cause: Option<DeleteCause>,
}

impl std::fmt::Display for ActionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self.op {
            Op::Keep => "keep",
            Op::Create => "create",
            Op::Update => "update",
            Op::Delete => "delete",
        };
        write!(f, "{op}")?;
        if let Some(id) = &self.id {
            write!(f, " #{id}")?;
        }
        if let Some(slot) = self.slot {
            write!(f, " (slot {slot})")?;
        }
        match self.cause {
            Some(DeleteCause::Replaced { slot }) => write!(f, " (replaced by slot {slot})"),
            Some(DeleteCause::Orphan) => write!(f, " (no longer declared)"),
            Some(DeleteCause::Rebuild) => write!(f, " (rebuild)"),
            None => Ok(()),
        }
    }
}

/// Per-kind count of planned actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanCounts {
    pub keep: usize,
    pub create: usize,
    pub update: usize,
    pub delete: usize,
}

/// Ordered actions converging one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan<F> {
    pub kind: EntityKind,
    pub actions: Vec<Action<F>>,
}

/// Serializable view of a plan, safe to print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub kind: EntityKind,
    pub counts: PlanCounts,
    pub actions: Vec<ActionSummary>,
}

impl<F> Plan<F> {
    /// True when applying the plan would not call the remote at all.
    pub fn is_noop(&self) -> bool {
        !self.actions.iter().any(Action::is_remote)
    }

    pub fn counts(&self) -> PlanCounts {
        let mut counts = PlanCounts::default();
        for action in &self.actions {
            match action {
                Action::Keep { .. } => counts.keep += 1,
                Action::Create { .. } => counts.create += 1,
                Action::Update { .. } => counts.update += 1,
                Action::Delete { .. } => counts.delete += 1,
            }
        }
        counts
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            kind: self.kind,
            counts: self.counts(),
            actions: self.actions.iter().map(Action::summarize).collect(),
        }
    }

    /// Check the structural rules the executor relies on.
    ///
    /// Every declared slot in `0..desired_len` is covered by exactly one
    /// `Keep`, `Update` or `Create`; a `Delete { Replaced { slot } }` is
    /// immediately followed by that slot's `Create`.
    pub fn validate(&self, desired_len: usize) -> Result<(), String> {
        let mut covered = vec![false; desired_len];
        for (idx, action) in self.actions.iter().enumerate() {
            if let Action::Delete {
                id,
                cause: DeleteCause::Replaced { slot },
            } = action
            {
                match self.actions.get(idx + 1) {
                    Some(Action::Create { slot: next, .. }) if next == slot => {}
                    _ => {
                        return Err(format!(
                            "replace of #{id} is not followed by a create for slot {slot}"
                        ))
                    }
                }
            }
            if let Some(slot) = action.slot() {
                match covered.get_mut(slot) {
                    None => {
                        return Err(format!(
                            "action targets slot {slot} but only {desired_len} are declared"
                        ))
                    }
                    Some(true) => return Err(format!("slot {slot} is covered twice")),
                    Some(seen) => *seen = true,
                }
            }
        }
        match covered.iter().position(|c| !c) {
            Some(slot) => Err(format!("slot {slot} has no action")),
            None => Ok(()),
        }
    }
}

/// Plan a keyed collection.
pub fn plan_keyed<K: SubEntityKind>(
    kind: &K,
    desired: &[Record<K::Fields>],
    remote: &[K::Remote],
    recorded: &[Committed<K::Fields>],
) -> Result<Plan<K::Fields>, MatchError> {
    let matches = match_keyed(kind, desired, remote)?;
    let recorded_by_id: HashMap<&RemoteId, &K::Fields> =
        recorded.iter().map(|c| (&c.id, &c.fields)).collect();

    let mut per_slot: Vec<Vec<Action<K::Fields>>> = (0..desired.len()).map(|_| Vec::new()).collect();

    for m in &matches.matched {
        let recorded = recorded_by_id.get(m.id).copied();
        let group = match kind.decide(m.desired, m.remote, recorded) {
            ChangeDecision::NoChange => vec![Action::Keep {
                slot: m.slot,
                id: m.id.clone(),
            }],
            ChangeDecision::Update => vec![Action::Update {
                slot: m.slot,
                id: m.id.clone(),
                fields: m.desired.clone(),
            }],
            ChangeDecision::Replace => vec![
                Action::Delete {
                    id: m.id.clone(),
                    cause: DeleteCause::Replaced { slot: m.slot },
                },
                Action::Create {
                    slot: m.slot,
                    fields: m.desired.clone(),
                },
            ],
        };
        per_slot[m.slot] = group;
    }

    for (slot, fields) in &matches.unmatched_desired {
        per_slot[*slot] = vec![Action::Create {
            slot: *slot,
            fields: (*fields).clone(),
        }];
    }

    let mut actions: Vec<_> = per_slot.into_iter().flatten().collect();
    actions.extend(matches.unmatched_remote.iter().map(|row| Action::Delete {
        id: K::remote_id(row).clone(),
        cause: DeleteCause::Orphan,
    }));

    Ok(Plan {
        kind: K::KIND,
        actions,
    })
}

/// Plan an unkeyed collection: delete everything remote, create everything declared.
pub fn plan_unkeyed<K: UnkeyedKind>(
    kind: &K,
    desired: &[String],
    remote: &[K::Remote],
) -> Plan<String> {
    let matches = match_unkeyed(kind, desired, remote);
    let deletes = matches.unmatched_remote.iter().map(|row| Action::Delete {
        id: K::remote_id(row).clone(),
        cause: DeleteCause::Rebuild,
    });
    let creates = matches
        .unmatched_desired
        .iter()
        .map(|(slot, value)| Action::Create {
            slot: *slot,
            fields: value.to_string(),
        });
    Plan {
        kind: K::KIND,
        actions: deletes.chain(creates).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FileSpec, FlagSpec};
    use crate::kind::{Files, Flags, Tags};
    use ctfd_state::{FlagFields, RemoteFile, RemoteFlag, RemoteTag};

    fn flag(id: u64, content: &str) -> RemoteFlag {
        RemoteFlag {
            id: RemoteId::from(id),
            fields: FlagFields::new(content),
        }
    }

    #[test]
    fn test_orphan_deletes_come_last() {
        let desired = vec![
            Record::pending(FlagSpec::new("new")),
            Record::committed(RemoteId::from(2), FlagSpec::new("same")),
        ];
        let remote = vec![flag(1, "gone"), flag(2, "same")];

        let plan = plan_keyed(&Flags, &desired, &remote, &[]).unwrap();

        assert_eq!(
            plan.actions,
            vec![
                Action::Create {
                    slot: 0,
                    fields: FlagSpec::new("new")
                },
                Action::Keep {
                    slot: 1,
                    id: RemoteId::from(2)
                },
                Action::Delete {
                    id: RemoteId::from(1),
                    cause: DeleteCause::Orphan
                },
            ]
        );
        assert!(plan.validate(desired.len()).is_ok());
    }

    #[test]
    fn test_replace_pair_is_adjacent_and_in_slot_order() {
        let remote_file = RemoteFile {
            id: RemoteId::from(9),
            location: "aa/a.txt".into(),
        };
        let recorded = vec![Committed::new(
            RemoteId::from(9),
            FileSpec::new("a.txt", "v1").stored_at("aa/a.txt"),
        )];
        let desired = vec![
            Record::committed(RemoteId::from(9), FileSpec::new("a.txt", "v2")),
            Record::pending(FileSpec::new("b.txt", "b")),
        ];

        let plan = plan_keyed(&Files, &desired, &[remote_file], &recorded).unwrap();

        let ops: Vec<_> = plan.actions.iter().map(|a| a.summarize().op).collect();
        assert_eq!(ops, vec![Op::Delete, Op::Create, Op::Create]);
        assert!(matches!(
            plan.actions[0],
            Action::Delete {
                cause: DeleteCause::Replaced { slot: 0 },
                ..
            }
        ));
        assert_eq!(plan.actions[1].slot(), Some(0));
        assert!(plan.validate(2).is_ok());
    }

    #[test]
    fn test_unkeyed_plan_deletes_then_creates_without_dedup() {
        let remote = vec![
            RemoteTag {
                id: RemoteId::from(1),
                value: "web".into(),
            },
            RemoteTag {
                id: RemoteId::from(2),
                value: "easy".into(),
            },
        ];
        let desired = vec!["web".to_string(), "web".to_string(), "crypto".to_string()];

        let plan = plan_unkeyed(&Tags, &desired, &remote);
        let counts = plan.counts();
        assert_eq!(counts.delete, 2);
        assert_eq!(counts.create, 3);
        assert!(matches!(plan.actions[0], Action::Delete { .. }));
        assert!(matches!(plan.actions[1], Action::Delete { .. }));
        assert!(plan.validate(3).is_ok());
    }

    #[test]
    fn test_validate_catches_broken_plans() {
        let missing: Plan<FlagSpec> = Plan {
            kind: EntityKind::Flags,
            actions: vec![],
        };
        assert!(missing.validate(1).is_err());

        let twice = Plan {
            kind: EntityKind::Flags,
            actions: vec![
                Action::Keep {
                    slot: 0,
                    id: RemoteId::from(1),
                },
                Action::Create {
                    slot: 0,
                    fields: FlagSpec::new("x"),
                },
            ],
        };
        assert!(twice.validate(1).unwrap_err().contains("twice"));

        let split = Plan {
            kind: EntityKind::Flags,
            actions: vec![
                Action::Delete {
                    id: RemoteId::from(1),
                    cause: DeleteCause::Replaced { slot: 0 },
                },
                Action::Delete {
                    id: RemoteId::from(2),
                    cause: DeleteCause::Orphan,
                },
                Action::Create {
                    slot: 0,
                    fields: FlagSpec::new("x"),
                },
            ],
        };
        assert!(split.validate(1).is_err());

        let unknown = Plan {
            kind: EntityKind::Flags,
            actions: vec![Action::Create {
                slot: 3,
                fields: FlagSpec::new("x"),
            }],
        };
        assert!(unknown.validate(1).is_err());
    }

    #[test]
    fn test_summary_hides_field_values() {
        let plan = plan_keyed(
            &Flags,
            &[Record::pending(FlagSpec::new("CTF{secret}"))],
            &[],
            &[],
        )
        .unwrap();
        let printed = serde_json::to_string(&plan.summary()).unwrap();
        assert!(!printed.contains("secret"));
        assert_eq!(plan.summary().counts.create, 1);
    }

    #[test]
    fn test_noop_plan() {
        let desired = vec![Record::committed(RemoteId::from(5), FlagSpec::new("a"))];
        let plan = plan_keyed(&Flags, &desired, &[flag(5, "a")], &[]).unwrap();
        assert!(plan.is_noop());
    }
}
