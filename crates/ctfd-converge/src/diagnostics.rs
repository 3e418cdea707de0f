//! Per-action failure reports.
//!
//! A pass keeps going after a remote failure; each one is recorded here and
//! the caller decides how to surface them.

use ctfd_state::RemoteId;
use serde::Serialize;

use crate::kind::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// One remote operation failed; the remote is otherwise intact.
    Error,
    /// A replace deleted the old entity but could not create the new one.
    DataLoss,
    /// A whole collection could not be reconciled.
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    List,
    Read,
    Fetch,
    Match,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: EntityKind,
    pub severity: Severity,
    pub operation: Operation,
    /// Remote id the operation addressed, if it had one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<RemoteId>,
    /// Declared slot the operation served, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<usize>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        kind: EntityKind,
        severity: Severity,
        operation: Operation,
        message: impl std::fmt::Display,
    ) -> Self {
        Diagnostic {
            kind,
            severity,
            operation,
            target: None,
            slot: None,
            message: message.to_string(),
        }
    }

    pub fn with_target(mut self, target: &RemoteId) -> Self {
        self.target = Some(target.clone());
        self
    }

    pub fn with_slot(mut self, slot: usize) -> Self {
        self.slot = Some(slot);
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::DataLoss => "data loss",
            Severity::Fatal => "fatal",
        };
        let operation = match self.operation {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::List => "list",
            Operation::Read => "read",
            Operation::Fetch => "fetch",
            Operation::Match => "match",
        };
        write!(f, "[{severity}] {} {operation}", self.kind)?;
        if let Some(target) = &self.target {
            write!(f, " #{target}")?;
        }
        if let Some(slot) = self.slot {
            write!(f, " (slot {slot})")?;
        }
        write!(f, ": {}", self.message)
    }
}
