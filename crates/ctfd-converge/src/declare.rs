//! Binding fresh declarations to recorded identities.
//!
//! Hand-written declarations usually carry no ids. Before planning, each
//! pending record is bound to a recorded entity: first to one it plainly
//! describes (same flag or hint content, same file name), then positionally
//! to whatever recorded entities are left. Records that already carry an id
//! are left alone, and nothing is bound twice.

use std::collections::HashSet;

use ctfd_state::RemoteId;

use crate::challenge::{ChallengeSpec, ChallengeState};
use crate::domain::{Committed, Record};
use crate::kind::{Files, Flags, Hints, SubEntityKind};

/// Give pending records of `desired` the ids of the entities they replace in `recorded`.
pub fn bind_identities(desired: ChallengeSpec, recorded: &ChallengeState) -> ChallengeSpec {
    ChallengeSpec {
        files: bind(&Files, desired.files, &recorded.files),
        flags: bind(&Flags, desired.flags, &recorded.flags),
        hints: bind(&Hints, desired.hints, &recorded.hints),
        ..desired
    }
}

fn bind<K: SubEntityKind>(
    kind: &K,
    declared: Vec<Record<K::Fields>>,
    recorded: &[Committed<K::Fields>],
) -> Vec<Record<K::Fields>> {
    let mut claimed: HashSet<RemoteId> = declared.iter().filter_map(Record::id).cloned().collect();
    let mut bound: Vec<Option<RemoteId>> = vec![None; declared.len()];

    for (slot, record) in declared.iter().enumerate() {
        if let Record::Pending(fields) = record {
            if let Some(entry) = recorded
                .iter()
                .find(|c| !claimed.contains(&c.id) && kind.binds_to(fields, &c.fields))
            {
                claimed.insert(entry.id.clone());
                bound[slot] = Some(entry.id.clone());
            }
        }
    }

    let mut leftovers = recorded.iter().filter(|c| !claimed.contains(&c.id));
    for (slot, record) in declared.iter().enumerate() {
        if matches!(record, Record::Pending(_)) && bound[slot].is_none() {
            match leftovers.next() {
                Some(entry) => bound[slot] = Some(entry.id.clone()),
                None => break,
            }
        }
    }

    declared
        .into_iter()
        .zip(bound)
        .map(|(record, id)| match (record, id) {
            (Record::Pending(fields), Some(id)) => Record::committed(id, fields),
            (record, _) => record,
        })
        .collect()
}
