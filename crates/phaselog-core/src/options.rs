//! Stream request options.

use chrono::{DateTime, Utc};
use phaselog_state::{ExecutionId, LogRequest};
use serde::{Deserialize, Serialize};

/// Caller-facing log options. Assumed validated by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogOptions {
    /// Tail live output instead of returning a snapshot.
    #[serde(default)]
    pub follow: bool,
    /// Stream the execution that preceded the requested one.
    #[serde(default)]
    pub previous: bool,
    /// Return an empty stream instead of waiting for a not-yet-started
    /// execution.
    #[serde(default)]
    pub no_wait: bool,
    pub since_time: Option<DateTime<Utc>>,
    pub since_seconds: Option<i64>,
    pub tail_lines: Option<u64>,
    pub limit_bytes: Option<u64>,
    #[serde(default)]
    pub timestamps: bool,
}

impl LogOptions {
    /// Per-phase request for `container`, carrying every option through.
    pub fn to_log_request(&self, container: Option<&str>) -> LogRequest {
        LogRequest {
            container: container.map(str::to_string),
            follow: self.follow,
            since_time: self.since_time,
            since_seconds: self.since_seconds,
            tail_lines: self.tail_lines,
            limit_bytes: self.limit_bytes,
            timestamps: self.timestamps,
        }
    }
}

/// A request for the aggregated log of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub execution_id: ExecutionId,
    pub options: LogOptions,
}

impl StreamRequest {
    pub fn new(execution_id: impl Into<ExecutionId>, options: LogOptions) -> Self {
        Self {
            execution_id: execution_id.into(),
            options,
        }
    }
}
