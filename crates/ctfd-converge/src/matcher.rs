//! Identity matching between a declared collection and a remote snapshot.
//!
//! A declared record matches a remote row only through the id CTFd assigned
//! to it. Pending records never match, and a committed record whose id is
//! gone remotely is unmatched (and will be created again).

use std::collections::{HashMap, HashSet};

use ctfd_state::RemoteId;

use crate::domain::{MatchError, Record};
use crate::kind::{SubEntityKind, UnkeyedKind};

/// A declared record paired with the remote row carrying its id.
#[derive(Debug)]
pub struct Matched<'a, F, R> {
    /// Position of the record in the declared collection.
    pub slot: usize,
    pub desired: &'a F,
    pub id: &'a RemoteId,
    pub remote: &'a R,
}

#[derive(Debug)]
pub struct MatchResult<'a, F, R> {
    pub matched: Vec<Matched<'a, F, R>>,
    /// Declared records with no remote counterpart, with their slots.
    pub unmatched_desired: Vec<(usize, &'a F)>,
    /// Remote rows no declared record refers to, in snapshot order.
    pub unmatched_remote: Vec<&'a R>,
}

/// Match a keyed collection by identity.
///
/// Fails if two declared records carry the same id; duplicates are never
/// silently merged.
pub fn match_keyed<'a, K: SubEntityKind>(
    _kind: &K,
    desired: &'a [Record<K::Fields>],
    remote: &'a [K::Remote],
) -> Result<MatchResult<'a, K::Fields, K::Remote>, MatchError> {
    let mut seen = HashSet::new();
    for id in desired.iter().filter_map(Record::id) {
        if !seen.insert(id) {
            return Err(MatchError::DuplicateIdentity {
                kind: K::KIND,
                id: id.clone(),
            });
        }
    }

    let mut by_id: HashMap<&RemoteId, &K::Remote> = HashMap::with_capacity(remote.len());
    for row in remote {
        by_id.entry(K::remote_id(row)).or_insert(row);
    }

    let mut matched = Vec::new();
    let mut unmatched_desired = Vec::new();
    let mut claimed = HashSet::new();

    for (slot, record) in desired.iter().enumerate() {
        match record {
            Record::Committed(c) => match by_id.get(&c.id) {
                Some(row) => {
                    claimed.insert(&c.id);
                    matched.push(Matched {
                        slot,
                        desired: &c.fields,
                        id: &c.id,
                        remote: *row,
                    });
                }
                None => unmatched_desired.push((slot, &c.fields)),
            },
            Record::Pending(fields) => unmatched_desired.push((slot, fields)),
        }
    }

    let unmatched_remote = remote
        .iter()
        .filter(|row| !claimed.contains(K::remote_id(row)))
        .collect();

    Ok(MatchResult {
        matched,
        unmatched_desired,
        unmatched_remote,
    })
}

/// Unkeyed match: nothing carries identity, so nothing matches.
#[derive(Debug)]
pub struct UnkeyedMatch<'a, R> {
    pub unmatched_desired: Vec<(usize, &'a str)>,
    pub unmatched_remote: Vec<&'a R>,
}

pub fn match_unkeyed<'a, K: UnkeyedKind>(
    _kind: &K,
    desired: &'a [String],
    remote: &'a [K::Remote],
) -> UnkeyedMatch<'a, K::Remote> {
    UnkeyedMatch {
        unmatched_desired: desired
            .iter()
            .enumerate()
            .map(|(slot, v)| (slot, v.as_str()))
            .collect(),
        unmatched_remote: remote.iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FlagSpec;
    use crate::kind::{EntityKind, Flags, Tags};
    use ctfd_state::{FlagFields, RemoteFlag, RemoteTag};

    fn remote(id: u64, content: &str) -> RemoteFlag {
        RemoteFlag {
            id: RemoteId::from(id),
            fields: FlagFields::new(content),
        }
    }

    #[test]
    fn test_committed_matches_by_id_only() {
        let desired = vec![
            Record::committed(RemoteId::from(7), FlagSpec::new("CTF{changed}")),
            Record::pending(FlagSpec::new("CTF{a}")),
        ];
        let remote = vec![remote(7, "CTF{old}"), remote(8, "CTF{a}")];

        let m = match_keyed(&Flags, &desired, &remote).unwrap();

        assert_eq!(m.matched.len(), 1);
        assert_eq!(m.matched[0].slot, 0);
        assert_eq!(m.matched[0].id, &RemoteId::from(7));
        // Same content but pending: still unmatched.
        assert_eq!(m.unmatched_desired.len(), 1);
        assert_eq!(m.unmatched_desired[0].0, 1);
        assert_eq!(m.unmatched_remote.len(), 1);
        assert_eq!(m.unmatched_remote[0].id, RemoteId::from(8));
    }

    #[test]
    fn test_committed_id_missing_remotely_is_unmatched() {
        let desired = vec![Record::committed(RemoteId::from(4), FlagSpec::new("x"))];
        let m = match_keyed(&Flags, &desired, &[]).unwrap();
        assert!(m.matched.is_empty());
        assert_eq!(m.unmatched_desired.len(), 1);
    }

    #[test]
    fn test_duplicate_identity_is_rejected() {
        let desired = vec![
            Record::committed(RemoteId::from(7), FlagSpec::new("a")),
            Record::committed(RemoteId::from(7), FlagSpec::new("b")),
        ];
        let err = match_keyed(&Flags, &desired, &[remote(7, "a")]).unwrap_err();
        assert_eq!(
            err,
            MatchError::DuplicateIdentity {
                kind: EntityKind::Flags,
                id: RemoteId::from(7),
            }
        );
    }

    #[test]
    fn test_unkeyed_match_is_degenerate() {
        let desired = vec!["web".to_string(), "web".to_string()];
        let remote = vec![RemoteTag {
            id: RemoteId::from(1),
            value: "web".into(),
        }];
        let m = match_unkeyed(&Tags, &desired, &remote);
        assert_eq!(m.unmatched_desired.len(), 2);
        assert_eq!(m.unmatched_remote.len(), 1);
    }
}
