//! Observability tests for reconciliation pass tracing.
//!
//! The emit helpers must run inside and outside a pass span without
//! panicking, at every severity.

use ctfd_converge::{
    create_challenge, emit_diagnostic, emit_kind_reconciled, emit_pass_aborted,
    emit_pass_finished, emit_pass_started, emit_plan_computed, new_pass_id, CancelToken,
    ChallengeSpec, Diagnostic, EntityKind, KindSummary, Operation, PassSpan, PlanCounts,
    Severity,
};
use ctfd_state::fakes::MemoryGateway;
use ctfd_state::{ChallengeFields, RemoteId};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_emit_pass_started() {
    emit_pass_started("pass-1", "warmup", "update");
}

#[traced_test]
#[test]
fn test_emit_plan_computed() {
    let counts = PlanCounts {
        keep: 2,
        create: 1,
        update: 0,
        delete: 3,
    };
    emit_plan_computed("pass-1", "flags", &counts);
}

#[traced_test]
#[test]
fn test_emit_kind_reconciled() {
    let mut summary = KindSummary::new(EntityKind::Tags);
    summary.created = 2;
    summary.deleted = 2;
    emit_kind_reconciled("pass-1", &summary);
}

#[traced_test]
#[test]
fn test_emit_diagnostic_every_severity() {
    for severity in [Severity::Error, Severity::DataLoss, Severity::Fatal] {
        let diag = Diagnostic::new(EntityKind::Files, severity, Operation::Create, "boom")
            .with_target(&RemoteId::from(9));
        emit_diagnostic("pass-1", &diag);
    }
}

#[traced_test]
#[test]
fn test_emit_pass_aborted() {
    emit_pass_aborted("pass-1", &"parent create refused");
}

#[traced_test]
#[test]
fn test_pass_span_enter() {
    let pass_id = new_pass_id();
    let span = PassSpan::enter("warmup", &pass_id);
    emit_pass_started(&pass_id, "warmup", "create");
    drop(span);
}

#[traced_test]
#[tokio::test]
async fn test_pass_finished_after_real_pass() {
    let gw = MemoryGateway::new();
    let pass_id = new_pass_id();
    let _span = PassSpan::enter("warmup", &pass_id);

    let spec = ChallengeSpec::new(ChallengeFields::new("warmup", "misc", "", 10));
    let out = create_challenge(&gw, &spec, &CancelToken::never())
        .await
        .unwrap();
    emit_pass_finished(&pass_id, 3, &out);
    assert!(out.is_success());
}
