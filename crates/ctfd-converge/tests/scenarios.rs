//! End-to-end reconciliation scenarios for single sub-collections.
//!
//! Each test plans against a `MemoryGateway` snapshot, checks the exact plan,
//! then applies it and checks both the new state and the remote.

use ctfd_converge::{
    apply_keyed, apply_unkeyed, plan_keyed, plan_unkeyed, Action, CancelToken, Committed,
    DeleteCause, FileSpec, Files, FlagSpec, Flags, Op, Record, Tags,
};
use ctfd_state::fakes::MemoryGateway;
use ctfd_state::{ChallengeFields, CtfdGateway, FlagFields, RemoteId};

async fn challenge(gw: &MemoryGateway) -> RemoteId {
    gw.create_challenge(&ChallengeFields::new("scenario", "misc", "", 100))
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_flags_create() {
    let gw = MemoryGateway::new();
    let parent = challenge(&gw).await;
    let desired = vec![Record::pending(FlagSpec::new("CTF{first}"))];

    let plan = plan_keyed(&Flags, &desired, &[], &[]).unwrap();
    assert_eq!(
        plan.actions,
        vec![Action::Create {
            slot: 0,
            fields: FlagSpec::new("CTF{first}")
        }]
    );

    let out = apply_keyed(&Flags, &gw, &parent, &plan, &desired, &[], &[], &CancelToken::never())
        .await
        .unwrap();

    let remote = gw.list_flags(&parent).await.unwrap();
    assert_eq!(remote.len(), 1);
    assert_eq!(out.state.len(), 1);
    assert_eq!(out.state[0].id, remote[0].id);
    assert_eq!(out.state[0].fields.content, "CTF{first}");
}

#[tokio::test]
async fn test_flags_update_in_place() {
    let gw = MemoryGateway::new();
    let parent = challenge(&gw).await;
    let existing = gw
        .create_flag(&parent, &FlagFields::new("CTF{old}"))
        .await
        .unwrap();
    let remote = gw.list_flags(&parent).await.unwrap();
    let desired = vec![Record::committed(existing.id.clone(), FlagSpec::new("CTF{new}"))];

    let plan = plan_keyed(&Flags, &desired, &remote, &[]).unwrap();
    assert_eq!(
        plan.actions,
        vec![Action::Update {
            slot: 0,
            id: existing.id.clone(),
            fields: FlagSpec::new("CTF{new}")
        }]
    );

    let out = apply_keyed(
        &Flags,
        &gw,
        &parent,
        &plan,
        &desired,
        &remote,
        &[],
        &CancelToken::never(),
    )
    .await
    .unwrap();

    assert!(out.is_success());
    assert_eq!(out.state[0].id, existing.id);
    let remote = gw.list_flags(&parent).await.unwrap();
    assert_eq!(remote[0].id, existing.id);
    assert_eq!(remote[0].fields.content, "CTF{new}");
}

#[tokio::test]
async fn test_files_replace() {
    let gw = MemoryGateway::new();
    let parent = challenge(&gw).await;
    let old = gw
        .create_file(&parent, &FileSpec::new("chall.bin", "v1").upload())
        .await
        .unwrap();
    let recorded = vec![Committed::new(
        old.id.clone(),
        FileSpec::new("chall.bin", "v1").stored_at(&old.location),
    )];
    let remote = gw.list_files(&parent).await.unwrap();
    let desired = vec![Record::committed(old.id.clone(), FileSpec::new("chall.bin", "v2"))];

    let plan = plan_keyed(&Files, &desired, &remote, &recorded).unwrap();
    assert_eq!(plan.actions.len(), 2);
    assert_eq!(
        plan.actions[0],
        Action::Delete {
            id: old.id.clone(),
            cause: DeleteCause::Replaced { slot: 0 }
        }
    );
    assert_eq!(plan.actions[1].summarize().op, Op::Create);

    let out = apply_keyed(
        &Files,
        &gw,
        &parent,
        &plan,
        &desired,
        &remote,
        &recorded,
        &CancelToken::never(),
    )
    .await
    .unwrap();

    assert!(out.is_success());
    let remote = gw.list_files(&parent).await.unwrap();
    assert_eq!(remote.len(), 1);
    assert_ne!(remote[0].id, old.id);
    assert_eq!(out.state[0].id, remote[0].id);
    assert_eq!(
        gw.fetch_file_content(&remote[0]).await.unwrap(),
        b"v2".to_vec()
    );
}

#[tokio::test]
async fn test_tags_rebuild() {
    let gw = MemoryGateway::new();
    let parent = challenge(&gw).await;
    gw.create_tag(&parent, "web").await.unwrap();
    gw.create_tag(&parent, "easy").await.unwrap();
    let remote = gw.list_tags(&parent).await.unwrap();
    let desired = vec!["web".to_string(), "hard".to_string(), "hard".to_string()];

    let plan = plan_unkeyed(&Tags, &desired, &remote);
    let ops: Vec<_> = plan.actions.iter().map(|a| a.summarize().op).collect();
    assert_eq!(
        ops,
        vec![Op::Delete, Op::Delete, Op::Create, Op::Create, Op::Create]
    );

    let out = apply_unkeyed(&Tags, &gw, &parent, &plan, &desired, &remote, &CancelToken::never())
        .await
        .unwrap();

    assert_eq!(out.state, desired);
    let values: Vec<_> = gw
        .list_tags(&parent)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.value)
        .collect();
    assert_eq!(values, desired);
}

#[tokio::test]
async fn test_orphan_cleanup() {
    let gw = MemoryGateway::new();
    let parent = challenge(&gw).await;
    let orphan = gw
        .create_flag(&parent, &FlagFields::new("CTF{stale}"))
        .await
        .unwrap();
    let remote = gw.list_flags(&parent).await.unwrap();

    let plan = plan_keyed(&Flags, &[], &remote, &[]).unwrap();
    assert_eq!(
        plan.actions,
        vec![Action::Delete {
            id: orphan.id.clone(),
            cause: DeleteCause::Orphan
        }]
    );

    let out = apply_keyed(&Flags, &gw, &parent, &plan, &[], &remote, &[], &CancelToken::never())
        .await
        .unwrap();
    assert!(out.state.is_empty());
    assert!(gw.list_flags(&parent).await.unwrap().is_empty());
}
