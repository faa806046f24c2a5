//! Execution and phase records as seen by a log reader.
//!
//! These mirror what the execution runtime publishes. They are read-only from
//! the aggregator's perspective: the runtime mutates them, readers poll them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for an execution (one run of a job).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn new(id: impl Into<String>) -> Self {
        ExecutionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(s: &str) -> Self {
        ExecutionId(s.to_string())
    }
}

impl From<String> for ExecutionId {
    fn from(s: String) -> Self {
        ExecutionId(s)
    }
}

/// Overall lifecycle of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Accepted, nothing scheduled yet.
    New,
    /// Scheduled, waiting for resources.
    Pending,
    Running,
    Complete,
    Failed,
    /// The runtime could not launch the execution.
    Error,
    Cancelled,
}

impl ExecutionStatus {
    /// True while the execution has not started producing output.
    pub fn is_not_started(&self) -> bool {
        matches!(self, ExecutionStatus::New | ExecutionStatus::Pending)
    }

    /// True for states that never produce logs.
    pub fn has_no_logs(&self) -> bool {
        matches!(self, ExecutionStatus::Error | ExecutionStatus::Cancelled)
    }
}

/// Execution metadata returned by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub status: ExecutionStatus,
    /// Version counter of the job this execution belongs to, if versioned.
    #[serde(default)]
    pub version: Option<u64>,
    /// Earlier executions of the same job, oldest first.
    #[serde(default)]
    pub prior_version_ids: Vec<ExecutionId>,
}

impl ExecutionRecord {
    pub fn new(id: impl Into<ExecutionId>, status: ExecutionStatus) -> Self {
        Self {
            id: id.into(),
            status,
            version: None,
            prior_version_ids: Vec::new(),
        }
    }

    /// The execution immediately preceding this one, if any.
    pub fn previous_id(&self) -> Option<&ExecutionId> {
        self.prior_version_ids.last()
    }
}

/// Lifecycle state of a single phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PhaseState {
    Waiting,
    Running,
    Terminated { exit_code: i32 },
}

impl PhaseState {
    pub fn is_waiting(&self) -> bool {
        matches!(self, PhaseState::Waiting)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, PhaseState::Terminated { .. })
    }

    /// Terminated with a non-zero exit code.
    pub fn is_failed(&self) -> bool {
        matches!(self, PhaseState::Terminated { exit_code } if *exit_code != 0)
    }
}

/// Status of one setup phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseStatus {
    /// Unique within the execution; doubles as the phase's log container.
    pub name: String,
    /// Position in the execution's setup sequence. Lower runs first.
    #[serde(default)]
    pub index: u32,
    #[serde(flatten)]
    pub state: PhaseState,
}

impl PhaseStatus {
    pub fn new(name: impl Into<String>, state: PhaseState) -> Self {
        Self {
            name: name.into(),
            index: 0,
            state,
        }
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }
}

/// Status of the main phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainPhaseStatus {
    #[serde(flatten)]
    pub state: PhaseState,
    /// Output producers attached to the main phase (the primary worker plus
    /// any sidecars injected by third-party tooling).
    #[serde(default)]
    pub producers: Vec<String>,
}

impl MainPhaseStatus {
    pub fn new(state: PhaseState, producers: &[&str]) -> Self {
        Self {
            state,
            producers: producers.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Point-in-time view of every phase of an execution.
///
/// Backends may list `setup` in any order; [`PhaseSnapshot::order_setup`]
/// puts it in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    #[serde(default)]
    pub setup: Vec<PhaseStatus>,
    pub main: MainPhaseStatus,
}

impl PhaseSnapshot {
    pub fn new(setup: Vec<PhaseStatus>, main: MainPhaseStatus) -> Self {
        Self { setup, main }
    }

    /// Sort setup phases by index. Phases sharing an index keep their listed
    /// order, so snapshots without indices are left untouched.
    pub fn order_setup(&mut self) {
        self.setup.sort_by_key(|phase| phase.index);
    }
}

/// Options passed to a [`crate::LogSource`] when opening one phase's log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRequest {
    /// Producer to read from. `None` lets the source pick its default.
    pub container: Option<String>,
    /// Keep the stream open and tail new output.
    pub follow: bool,
    pub since_time: Option<DateTime<Utc>>,
    pub since_seconds: Option<i64>,
    pub tail_lines: Option<u64>,
    pub limit_bytes: Option<u64>,
    pub timestamps: bool,
}
