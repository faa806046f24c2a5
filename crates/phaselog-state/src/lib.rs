//! Phaselog-State: collaborator contracts for the phase log aggregator
//!
//! This crate describes what the aggregator reads from the outside world.
//! It owns no temporal behavior: every call is a one-shot query.
//!
//! ## Layer 0 - Collaborators
//!
//! - `ExecutionRegistry`: polled view of an execution and its phases
//! - `LogSource`: opens one producer's log as a raw byte stream
//! - `FsExecutionStore`: directory-backed implementation of both
//! - `fakes`: in-memory implementations for tests

mod error;
pub mod fakes;
mod fs_store;
mod schema;
pub mod traits;
mod window;

pub use error::StateError;
pub use fs_store::{ExecutionManifest, FsExecutionStore};
pub use schema::{
    ExecutionId, ExecutionRecord, ExecutionStatus, LogRequest, MainPhaseStatus, PhaseSnapshot,
    PhaseState, PhaseStatus,
};
pub use traits::{ExecutionRegistry, LogSource, LogStream, StateResult};
pub use window::apply_window;
