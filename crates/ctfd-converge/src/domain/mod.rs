//! Domain models for the reconciliation engine.
//!
//! - `Record` / `Committed`: identity-optional sub-entity records
//! - `FlagSpec`, `HintSpec`, `FileSpec`: declared sub-entity fields
//! - error taxonomy: `MatchError`, `DeclarationError`, `ReconcileError`

pub mod error;
pub mod record;
pub mod spec;

pub use error::{DeclarationError, MatchError, ReconcileError, Result};
pub use record::{Committed, Record};
pub use spec::{FileSpec, FlagSpec, HintSpec};
