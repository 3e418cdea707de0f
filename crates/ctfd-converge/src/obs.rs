//! Structured observability hooks for reconciliation passes.
//!
//! The engine itself does not log. Callers wrap each pass in a [`PassSpan`]
//! and report progress through the `emit_*` functions below, so every event
//! of a pass carries the same `pass_id`.

use tracing::{error, info, warn};

use crate::diagnostics::{Diagnostic, Severity};
use crate::executor::{KindSummary, Reconciled};
use crate::planner::PlanCounts;

/// RAII guard that enters a pass-scoped span for the duration of a pass.
///
/// ```ignore
/// let pass_id = new_pass_id();
/// let _span = PassSpan::enter("warmup", &pass_id);
/// ```
pub struct PassSpan {
    _span: tracing::span::EnteredSpan,
}

impl PassSpan {
    pub fn enter(challenge: &str, pass_id: &str) -> Self {
        let span = tracing::info_span!("ctfd.pass", challenge = %challenge, pass_id = %pass_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Fresh identifier correlating the events of one pass.
pub fn new_pass_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Emit event: pass started. `mode` is what the caller is doing
/// (`create`, `update`, `recreate`, `plan`, `import`, `destroy`).
pub fn emit_pass_started(pass_id: &str, challenge: &str, mode: &str) {
    info!(event = "pass.started", pass_id = %pass_id, challenge = %challenge, mode = %mode);
}

/// Emit event: one kind's plan was computed.
pub fn emit_plan_computed(pass_id: &str, kind: &str, counts: &PlanCounts) {
    info!(
        event = "plan.computed",
        pass_id = %pass_id,
        kind = %kind,
        keep = counts.keep,
        create = counts.create,
        update = counts.update,
        delete = counts.delete,
    );
}

/// Emit event: one kind was reconciled.
pub fn emit_kind_reconciled(pass_id: &str, summary: &KindSummary) {
    info!(
        event = "kind.reconciled",
        pass_id = %pass_id,
        kind = %summary.kind,
        kept = summary.kept,
        created = summary.created,
        updated = summary.updated,
        deleted = summary.deleted,
        failed = summary.failed,
    );
}

/// Emit a diagnostic. Data loss and fatal diagnostics log at error level.
pub fn emit_diagnostic(pass_id: &str, diagnostic: &Diagnostic) {
    let target = diagnostic
        .target
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default();
    let severity = match diagnostic.severity {
        Severity::Error => "error",
        Severity::DataLoss => "data_loss",
        Severity::Fatal => "fatal",
    };
    if diagnostic.severity == Severity::Error {
        warn!(
            event = "pass.diagnostic",
            pass_id = %pass_id,
            kind = %diagnostic.kind,
            severity = severity,
            remote_id = %target,
            detail = %diagnostic.message,
        );
    } else {
        error!(
            event = "pass.diagnostic",
            pass_id = %pass_id,
            kind = %diagnostic.kind,
            severity = severity,
            remote_id = %target,
            detail = %diagnostic.message,
        );
    }
}

/// Emit event: pass finished, with its summary and every diagnostic.
pub fn emit_pass_finished<S>(pass_id: &str, duration_ms: u64, outcome: &Reconciled<S>) {
    for summary in &outcome.summary {
        emit_kind_reconciled(pass_id, summary);
    }
    for diagnostic in &outcome.diagnostics {
        emit_diagnostic(pass_id, diagnostic);
    }
    info!(
        event = "pass.finished",
        pass_id = %pass_id,
        duration_ms = duration_ms,
        diagnostics = outcome.diagnostics.len(),
        cancelled = outcome.is_cancelled(),
        success = outcome.is_success(),
    );
}

/// Emit event: a pass aborted before producing a state.
pub fn emit_pass_aborted(pass_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "pass.aborted", pass_id = %pass_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_ids_are_unique() {
        assert_ne!(new_pass_id(), new_pass_id());
    }

    #[test]
    fn test_pass_span_create() {
        let _span = PassSpan::enter("warmup", "pass-1");
    }
}
