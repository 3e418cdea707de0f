//! Error taxonomy for the reconciliation engine.
//!
//! Per-action remote failures are not errors here: the executor turns them
//! into [`Diagnostic`](crate::Diagnostic)s and keeps going. Only the cases
//! below abort a sub-collection or a whole pass.

use ctfd_state::{GatewayError, RemoteId};

use crate::kind::EntityKind;

/// The declared collection cannot be matched against the remote one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    #[error("{kind}: identity {id} is declared more than once")]
    DuplicateIdentity { kind: EntityKind, id: RemoteId },
}

/// The declaration itself is unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeclarationError {
    #[error("file {name}: contentb64 is not valid base64: {detail}")]
    InvalidBase64 { name: String, detail: String },

    #[error("file {name}: content and contentb64 disagree")]
    ContentMismatch { name: String },

    #[error("challenge {name}: {reason}")]
    InvalidChallenge { name: String, reason: String },
}

/// Errors that terminate a reconciliation pass.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// A plan violated its own structural rules. Always a bug.
    #[error("{kind}: plan invariant violated: {detail}")]
    Invariant { kind: EntityKind, detail: String },

    #[error(transparent)]
    Match(#[from] MatchError),

    /// The parent challenge could not be created, so nothing else can be.
    #[error("creating the challenge failed: {0}")]
    ParentCreate(GatewayError),

    #[error("invalid declaration: {0}")]
    Declaration(#[from] DeclarationError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Cancelled before the challenge existed remotely.
    #[error("cancelled before the challenge was created")]
    Cancelled,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_error_names_kind_and_id() {
        let err = MatchError::DuplicateIdentity {
            kind: EntityKind::Flags,
            id: RemoteId::from(7),
        };
        assert_eq!(err.to_string(), "flags: identity 7 is declared more than once");
    }

    #[test]
    fn test_match_error_converts_to_reconcile_error() {
        let err: ReconcileError = MatchError::DuplicateIdentity {
            kind: EntityKind::Hints,
            id: RemoteId::from(1),
        }
        .into();
        assert!(matches!(err, ReconcileError::Match(_)));
    }
}
