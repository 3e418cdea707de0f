//! Change detection for matched (declared, remote) pairs.
//!
//! Flags and hints are compared field by field against the remote row and
//! updated in place. Files cannot be updated and listing them does not
//! return their bytes, so they are compared against the recorded digest and
//! replaced when it moved.

use ctfd_state::{ContentDigest, RemoteFile, RemoteFlag, RemoteHint, RemoteId};
use serde::Serialize;

use crate::domain::{FileSpec, FlagSpec, HintSpec};

/// Outcome of comparing one declared entity with its remote counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDecision {
    NoChange,
    Update,
    /// Delete then re-create; the entity gets a new id.
    Replace,
}

/// True when an optional declared value is set and differs from `remote`.
pub fn requests_change<T: PartialEq>(desired: Option<&T>, remote: &T) -> bool {
    desired.is_some_and(|d| d != remote)
}

/// Order-insensitive comparison of id lists.
pub fn same_id_set(a: &[RemoteId], b: &[RemoteId]) -> bool {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    a == b
}

pub fn decide_flag(desired: &FlagSpec, remote: &RemoteFlag) -> ChangeDecision {
    let changed = desired.content != remote.fields.content
        || requests_change(desired.data.as_ref(), &remote.fields.data)
        || requests_change(desired.kind.as_ref(), &remote.fields.kind);
    if changed {
        ChangeDecision::Update
    } else {
        ChangeDecision::NoChange
    }
}

pub fn decide_hint(desired: &HintSpec, remote: &RemoteHint) -> ChangeDecision {
    let requirements_changed = desired
        .requirements
        .as_deref()
        .is_some_and(|reqs| !same_id_set(reqs, &remote.fields.requirements));
    let changed = desired.content != remote.fields.content
        || requests_change(desired.cost.as_ref(), &remote.fields.cost)
        || requirements_changed;
    if changed {
        ChangeDecision::Update
    } else {
        ChangeDecision::NoChange
    }
}

/// CTFd sanitizes upload names, so the stored location cannot be compared
/// with the declared name; the recorded entry carries the declared one.
pub fn decide_file(
    desired: &FileSpec,
    _remote: &RemoteFile,
    recorded: Option<&FileSpec>,
) -> ChangeDecision {
    let Some(recorded) = recorded else {
        return ChangeDecision::Replace;
    };
    if desired.name != recorded.name {
        return ChangeDecision::Replace;
    }
    if ContentDigest::from_bytes(&desired.content) != recorded.fingerprint() {
        return ChangeDecision::Replace;
    }
    ChangeDecision::NoChange
}
