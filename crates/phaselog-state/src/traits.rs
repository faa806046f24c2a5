//! Collaborator contracts consumed by the log aggregator
//!
//! - `ExecutionRegistry`: read-only, polled view of executions and phases
//! - `LogSource`: opens one producer's log as a byte stream
//!
//! Both are async and backend-agnostic. In-memory fakes live in the `fakes`
//! module; a filesystem-backed implementation lives in `fs_store`.

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::StateError;
use crate::schema::{ExecutionId, ExecutionRecord, LogRequest, PhaseSnapshot};

/// Result type for collaborator operations
pub type StateResult<T> = std::result::Result<T, StateError>;

/// Raw log bytes for one producer. No framing.
pub type LogStream = Box<dyn AsyncRead + Send + Unpin>;

/// Read-only registry of executions.
///
/// Guarantees:
/// - `get_phases` reports every setup phase's execution index. The order of
///   the returned list is not significant.
/// - Every call reflects the latest state the backend knows about; callers
///   poll it repeatedly.
#[async_trait]
pub trait ExecutionRegistry: Send + Sync {
    /// Execution metadata and lifecycle status.
    async fn get_execution(&self, id: &ExecutionId) -> StateResult<ExecutionRecord>;

    /// Current phase snapshot of an execution.
    async fn get_phases(&self, id: &ExecutionId) -> StateResult<PhaseSnapshot>;
}

/// Source of per-phase log output.
///
/// With `request.follow` set, the returned stream may never reach
/// end-of-stream while the phase is running; callers must race reads against
/// their own cancellation.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn open_log(&self, id: &ExecutionId, request: &LogRequest) -> StateResult<LogStream>;
}
