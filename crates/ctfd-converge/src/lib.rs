//! ctfd-converge engine
//!
//! Converges a CTFd challenge, and the flags, hints, files, tags and topics
//! nested under it, to a declaration.
//!
//! One pass over a sub-collection is:
//! 1. [`matcher`] pairs declared records with remote rows by identity
//! 2. [`kind::SubEntityKind::decide`] compares each pair
//! 3. [`planner`] orders the resulting keep/create/update/delete actions
//! 4. [`executor`] runs them against a [`ctfd_state::CtfdGateway`]
//!
//! [`challenge`] strings the five collections together under their parent.

pub mod cancel;
pub mod challenge;
pub mod declare;
pub mod detect;
pub mod diagnostics;
pub mod domain;
pub mod executor;
pub mod kind;
pub mod matcher;
pub mod obs;
pub mod planner;
pub mod telemetry;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use challenge::{
    apply_challenge, create_challenge, delete_challenge, plan_challenge, read_challenge,
    update_challenge, ChallengePlan, ChallengePlanSummary, ChallengeSpec, ChallengeState,
    ParentAction,
};
pub use declare::bind_identities;
pub use detect::ChangeDecision;
pub use diagnostics::{Diagnostic, Operation, Severity};
pub use domain::{
    Committed, DeclarationError, FileSpec, FlagSpec, HintSpec, MatchError, ReconcileError, Record,
    Result,
};
pub use executor::{
    apply_keyed, apply_unkeyed, reconcile_keyed, reconcile_unkeyed, Completion, KindSummary,
    Reconciled,
};
pub use kind::{EntityKind, Files, Flags, Hints, SubEntityKind, Tags, Topics, UnkeyedKind};
pub use matcher::{match_keyed, match_unkeyed, MatchResult, Matched, UnkeyedMatch};
pub use obs::{
    emit_diagnostic, emit_kind_reconciled, emit_pass_aborted, emit_pass_finished,
    emit_pass_started, emit_plan_computed, new_pass_id, PassSpan,
};
pub use planner::{
    plan_keyed, plan_unkeyed, Action, ActionSummary, DeleteCause, Op, Plan, PlanCounts,
    PlanSummary,
};
pub use telemetry::{init_tracing, LogFormat};
