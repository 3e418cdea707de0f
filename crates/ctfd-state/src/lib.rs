//! ctfd-state: remote records and gateway boundary for ctfd-converge
//!
//! This crate describes what lives on a CTFd instance and how it is reached.
//! It holds no reconciliation logic: every operation is a single remote call.
//!
//! ## Layer 0 - Remote state
//!
//! Focus: faithful remote records and a backend-agnostic CRUD boundary.
//!
//! ## Key Components
//!
//! - `CtfdGateway`: one create/list/update/delete operation set per entity kind
//! - `RemoteFlag`, `RemoteHint`, `RemoteFile`, `RemoteTag`, `RemoteTopic`:
//!   sub-entity rows as CTFd stores them
//! - `ChallengeFields` / `RemoteChallenge`: the parent aggregate's own fields
//! - `fakes::MemoryGateway`: in-memory gateway with failure injection

mod error;
pub mod fakes;
pub mod gateway;
mod schema;

pub use error::GatewayError;
pub use gateway::{CtfdGateway, GatewayResult};
pub use schema::{
    ChallengeFields, ChallengeType, ContentDigest, DecayFunction, FileUpload, FlagFields,
    FlagKind, FlagSensitivity, HintFields, LockBehavior, RemoteChallenge, RemoteFile, RemoteFlag,
    RemoteHint, RemoteId, RemoteTag, RemoteTopic, Requirements, Visibility,
};
