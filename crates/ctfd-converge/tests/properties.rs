//! Convergence properties checked against the in-memory gateway.

use std::collections::HashMap;

use ctfd_converge::{
    bind_identities, create_challenge, plan_challenge, plan_keyed, reconcile_keyed,
    reconcile_unkeyed, Action, CancelToken, ChallengeSpec, Committed, DeleteCause, FileSpec,
    Files, FlagSpec, Flags, HintSpec, Op, ParentAction, Record, Severity, Topics,
};
use ctfd_state::fakes::{Entity, MemoryGateway, Verb};
use ctfd_state::{ChallengeFields, CtfdGateway, RemoteId};

fn declaration() -> ChallengeSpec {
    let mut spec = ChallengeSpec::new(ChallengeFields::new("pwn-1", "pwn", "smash it", 300));
    spec.flags = vec![
        Record::pending(FlagSpec::new("CTF{a}")),
        Record::pending(FlagSpec::new("CTF{b}")),
    ];
    spec.hints = vec![Record::pending(HintSpec::new("look at the stack"))];
    spec.files = vec![
        Record::pending(FileSpec::new("vuln", vec![0x7f, b'E', b'L', b'F'])),
        Record::pending(FileSpec::new("libc.so", "libc")),
    ];
    spec.tags = vec!["pwn".into(), "easy".into()];
    spec.topics = vec!["stack overflow".into()];
    spec
}

#[tokio::test]
async fn test_second_pass_only_keeps() {
    let gw = MemoryGateway::new();
    let first = create_challenge(&gw, &declaration(), &CancelToken::never())
        .await
        .unwrap();
    assert!(first.is_success());

    // Same hand-written declaration, ids bound from the recorded state.
    let desired = bind_identities(declaration(), &first.state);
    let plan = plan_challenge(&gw, &desired, Some(&first.state))
        .await
        .unwrap();

    assert_eq!(
        plan.parent,
        ParentAction::Update {
            id: first.state.id.clone(),
            fields_changed: false
        }
    );
    for counts in [plan.files.counts(), plan.flags.counts(), plan.hints.counts()] {
        assert_eq!(counts.create + counts.update + counts.delete, 0);
    }
    assert_eq!(plan.files.counts().keep, 2);
    assert_eq!(plan.flags.counts().keep, 2);
    assert_eq!(plan.hints.counts().keep, 1);
}

#[tokio::test]
async fn test_unchanged_committed_entities_keep_their_ids() {
    let gw = MemoryGateway::new();
    let first = create_challenge(&gw, &declaration(), &CancelToken::never())
        .await
        .unwrap();
    let parent = &first.state.id;
    let ids_before: Vec<RemoteId> = first.state.flags.iter().map(|c| c.id.clone()).collect();

    let mut desired: Vec<Record<FlagSpec>> =
        first.state.flags.iter().cloned().map(Record::from).collect();
    desired[1] = Record::committed(ids_before[1].clone(), FlagSpec::new("CTF{b2}"));
    desired.push(Record::pending(FlagSpec::new("CTF{c}")));

    let remote = gw.list_flags(parent).await.unwrap();
    let plan = plan_keyed(&Flags, &desired, &remote, &first.state.flags).unwrap();
    for action in &plan.actions {
        if let Action::Create { slot, .. } = action {
            assert_eq!(*slot, 2, "only the new flag may be created");
        }
    }

    let out = reconcile_keyed(
        &Flags,
        &gw,
        parent,
        &desired,
        &remote,
        &first.state.flags,
        &CancelToken::never(),
    )
    .await
    .unwrap();
    assert_eq!(out.state[0].id, ids_before[0]);
    assert_eq!(out.state[1].id, ids_before[1]);
    assert!(!ids_before.contains(&out.state[2].id));
}

#[tokio::test]
async fn test_replace_delete_is_immediately_followed_by_its_create() {
    let gw = MemoryGateway::new();
    let first = create_challenge(&gw, &declaration(), &CancelToken::never())
        .await
        .unwrap();
    let remote = gw.list_files(&first.state.id).await.unwrap();

    let desired: Vec<Record<FileSpec>> = first
        .state
        .files
        .iter()
        .map(|c| Record::committed(c.id.clone(), FileSpec::new(c.fields.name.clone(), "patched")))
        .collect();

    let plan = plan_keyed(&Files, &desired, &remote, &first.state.files).unwrap();
    assert_eq!(plan.actions.len(), 4);
    for pair in plan.actions.chunks(2) {
        let slot = match &pair[0] {
            Action::Delete {
                cause: DeleteCause::Replaced { slot },
                ..
            } => *slot,
            other => panic!("expected a replace delete, got {other:?}"),
        };
        assert_eq!(pair[1].slot(), Some(slot));
        assert_eq!(pair[1].summarize().op, Op::Create);
    }
}

#[tokio::test]
async fn test_unkeyed_rebuild_matches_desired_multiset() {
    let gw = MemoryGateway::new();
    let first = create_challenge(&gw, &declaration(), &CancelToken::never())
        .await
        .unwrap();
    let parent = &first.state.id;
    let desired = vec![
        "heap".to_string(),
        "heap".to_string(),
        "stack overflow".to_string(),
    ];

    let remote = gw.list_topics(parent).await.unwrap();
    let out = reconcile_unkeyed(&Topics, &gw, parent, &desired, &remote, &CancelToken::never())
        .await
        .unwrap();
    assert!(out.is_success());

    let count = |values: Vec<String>| {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for v in values {
            *counts.entry(v).or_default() += 1;
        }
        counts
    };
    let remote_values = gw
        .list_topics(parent)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.value)
        .collect();
    assert_eq!(count(remote_values), count(desired.clone()));
    assert_eq!(count(out.state), count(desired));
}

#[tokio::test]
async fn test_one_failure_leaves_the_rest_applied() {
    let gw = MemoryGateway::new();
    let parent = gw
        .create_challenge(&ChallengeFields::new("c", "misc", "", 50))
        .await
        .unwrap()
        .id;
    let desired: Vec<Record<FlagSpec>> = (0..4)
        .map(|i| Record::pending(FlagSpec::new(format!("CTF{{{i}}}"))))
        .collect();

    gw.fail_next(Entity::Flag, Verb::Create);
    let out = reconcile_keyed(&Flags, &gw, &parent, &desired, &[], &[], &CancelToken::never())
        .await
        .unwrap();

    assert!(!out.is_success());
    assert_eq!(out.diagnostics.len(), 1);
    assert_eq!(out.diagnostics[0].severity, Severity::Error);
    assert_eq!(out.diagnostics[0].slot, Some(0));
    assert_eq!(out.state.len(), 3);

    let remote = gw.list_flags(&parent).await.unwrap();
    assert_eq!(remote.len(), 3);
    let recorded: Vec<&Committed<FlagSpec>> = out.state.iter().collect();
    for (row, entry) in remote.iter().zip(recorded) {
        assert_eq!(row.id, entry.id);
    }

    // The next pass re-creates only the one that failed.
    let desired: Vec<Record<FlagSpec>> = std::iter::once(desired[0].clone())
        .chain(out.state.iter().cloned().map(Record::from))
        .collect();
    let plan = plan_keyed(&Flags, &desired, &remote, &out.state).unwrap();
    assert_eq!(plan.counts().create, 1);
    assert_eq!(plan.counts().keep, 3);
}
