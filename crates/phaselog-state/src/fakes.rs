//! In-memory fakes for the collaborator traits (testing only)
//!
//! Provides `MemoryExecutionRegistry` and `MemoryLogSource` that satisfy the
//! trait contracts without any external dependencies, plus the scripting
//! hooks tests need: queued snapshots, call counters, recorded requests,
//! injected failures and tails that never end.

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::StateError;
use crate::schema::{ExecutionId, ExecutionRecord, LogRequest, PhaseSnapshot};
use crate::traits::{ExecutionRegistry, LogSource, LogStream, StateResult};
use crate::window::apply_window;

// ---------------------------------------------------------------------------
// MemoryExecutionRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ExecutionEntry {
    records: VecDeque<ExecutionRecord>,
    snapshots: VecDeque<PhaseSnapshot>,
    execution_calls: usize,
    phase_calls: usize,
    phases_fail_after: Option<usize>,
}

/// Advance a scripted queue: yield the front, popping it unless it is the last.
fn next_scripted<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

/// In-memory execution registry driven by scripted records and snapshots.
///
/// Each `get_*` call consumes the next queued value; the last queued value
/// repeats forever, which models an execution that stopped changing.
#[derive(Debug, Default)]
pub struct MemoryExecutionRegistry {
    executions: Mutex<HashMap<String, ExecutionEntry>>,
}

impl MemoryExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an execution record (the first call registers the execution).
    pub fn push_record(&self, record: ExecutionRecord) {
        let mut executions = self.executions.lock().unwrap();
        executions
            .entry(record.id.0.clone())
            .or_default()
            .records
            .push_back(record);
    }

    /// Queue a phase snapshot for an execution.
    pub fn push_snapshot(&self, id: &ExecutionId, snapshot: PhaseSnapshot) {
        let mut executions = self.executions.lock().unwrap();
        executions
            .entry(id.0.clone())
            .or_default()
            .snapshots
            .push_back(snapshot);
    }

    /// Make every `get_phases` call after the first `successful` ones fail.
    pub fn fail_phases_after(&self, id: &ExecutionId, successful: usize) {
        let mut executions = self.executions.lock().unwrap();
        executions.entry(id.0.clone()).or_default().phases_fail_after = Some(successful);
    }

    /// Forget an execution entirely (models deletion mid-stream).
    pub fn remove(&self, id: &ExecutionId) {
        self.executions.lock().unwrap().remove(&id.0);
    }

    /// Number of `get_phases` calls observed for an execution.
    pub fn phase_calls(&self, id: &ExecutionId) -> usize {
        let executions = self.executions.lock().unwrap();
        executions.get(&id.0).map(|e| e.phase_calls).unwrap_or(0)
    }

    /// Number of `get_execution` calls observed for an execution.
    pub fn execution_calls(&self, id: &ExecutionId) -> usize {
        let executions = self.executions.lock().unwrap();
        executions.get(&id.0).map(|e| e.execution_calls).unwrap_or(0)
    }
}

#[async_trait]
impl ExecutionRegistry for MemoryExecutionRegistry {
    async fn get_execution(&self, id: &ExecutionId) -> StateResult<ExecutionRecord> {
        let mut executions = self.executions.lock().unwrap();
        let entry = executions
            .get_mut(&id.0)
            .ok_or_else(|| StateError::ExecutionNotFound {
                execution_id: id.0.clone(),
            })?;
        entry.execution_calls += 1;
        next_scripted(&mut entry.records).ok_or_else(|| StateError::ExecutionNotFound {
            execution_id: id.0.clone(),
        })
    }

    async fn get_phases(&self, id: &ExecutionId) -> StateResult<PhaseSnapshot> {
        let mut executions = self.executions.lock().unwrap();
        let entry = executions
            .get_mut(&id.0)
            .ok_or_else(|| StateError::ExecutionNotFound {
                execution_id: id.0.clone(),
            })?;
        entry.phase_calls += 1;
        if let Some(successful) = entry.phases_fail_after {
            if entry.phase_calls > successful {
                return Err(StateError::Unavailable(format!(
                    "registry refused phase lookup for {}",
                    id
                )));
            }
        }
        next_scripted(&mut entry.snapshots).ok_or_else(|| StateError::ExecutionNotFound {
            execution_id: id.0.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryLogSource
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
struct LogEntry {
    data: Vec<u8>,
    fail_open: bool,
    hold_open: bool,
}

type LogKey = (String, Option<String>);

/// In-memory log source keyed by `(execution, container)`.
#[derive(Debug, Default)]
pub struct MemoryLogSource {
    logs: Mutex<HashMap<LogKey, LogEntry>>,
    requests: Mutex<Vec<(ExecutionId, LogRequest)>>,
}

impl MemoryLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the complete log for a producer. `None` is the default producer.
    pub fn insert(&self, id: &ExecutionId, container: Option<&str>, data: &[u8]) {
        let mut logs = self.logs.lock().unwrap();
        logs.entry(key(id, container)).or_default().data = data.to_vec();
    }

    /// Make opening this producer's log fail.
    pub fn fail_open(&self, id: &ExecutionId, container: Option<&str>) {
        let mut logs = self.logs.lock().unwrap();
        logs.entry(key(id, container)).or_default().fail_open = true;
    }

    /// When followed, yield the registered bytes and then never end.
    pub fn hold_open(&self, id: &ExecutionId, container: Option<&str>) {
        let mut logs = self.logs.lock().unwrap();
        logs.entry(key(id, container)).or_default().hold_open = true;
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<(ExecutionId, LogRequest)> {
        self.requests.lock().unwrap().clone()
    }

    /// Containers opened for an execution, in order.
    pub fn opened_containers(&self, id: &ExecutionId) -> Vec<Option<String>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(exec, _)| exec == id)
            .map(|(_, req)| req.container.clone())
            .collect()
    }
}

fn key(id: &ExecutionId, container: Option<&str>) -> LogKey {
    (id.0.clone(), container.map(str::to_string))
}

#[async_trait]
impl LogSource for MemoryLogSource {
    async fn open_log(&self, id: &ExecutionId, request: &LogRequest) -> StateResult<LogStream> {
        self.requests
            .lock()
            .unwrap()
            .push((id.clone(), request.clone()));

        let entry = {
            let logs = self.logs.lock().unwrap();
            logs.get(&key(id, request.container.as_deref())).cloned()
        };
        let entry = entry.ok_or_else(|| StateError::LogNotFound {
            execution_id: id.0.clone(),
            container: request.container.clone().unwrap_or_default(),
        })?;

        if entry.fail_open {
            return Err(StateError::Unavailable(format!(
                "log backend refused {}/{}",
                id,
                request.container.as_deref().unwrap_or("<default>")
            )));
        }

        let data = apply_window(&entry.data, request);
        if entry.hold_open && request.follow {
            Ok(Box::new(EndlessTail {
                data: Cursor::new(data),
            }))
        } else {
            Ok(Box::new(Cursor::new(data)))
        }
    }
}

/// Yields its bytes, then stays pending forever like a tail of a live phase.
struct EndlessTail {
    data: Cursor<Vec<u8>>,
}

impl AsyncRead for EndlessTail {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let remaining = self.data.get_ref().len() as u64 - self.data.position();
        if remaining == 0 {
            return Poll::Pending;
        }
        Pin::new(&mut self.data).poll_read(cx, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ExecutionStatus, MainPhaseStatus, PhaseState, PhaseStatus};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn snapshot(state: PhaseState) -> PhaseSnapshot {
        PhaseSnapshot::new(
            vec![PhaseStatus::new("clone", state)],
            MainPhaseStatus::new(PhaseState::Waiting, &["docker-build"]),
        )
    }

    #[tokio::test]
    async fn test_scripted_snapshots_repeat_last() {
        let registry = MemoryExecutionRegistry::new();
        let id = ExecutionId::new("job-1");
        registry.push_snapshot(&id, snapshot(PhaseState::Waiting));
        registry.push_snapshot(&id, snapshot(PhaseState::Running));

        let first = registry.get_phases(&id).await.unwrap();
        let second = registry.get_phases(&id).await.unwrap();
        let third = registry.get_phases(&id).await.unwrap();

        assert_eq!(first.setup[0].state, PhaseState::Waiting);
        assert_eq!(second.setup[0].state, PhaseState::Running);
        assert_eq!(third.setup[0].state, PhaseState::Running);
        assert_eq!(registry.phase_calls(&id), 3);
    }

    #[tokio::test]
    async fn test_unknown_execution_is_not_found() {
        let registry = MemoryExecutionRegistry::new();
        let err = registry
            .get_execution(&ExecutionId::new("missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_fail_phases_after() {
        let registry = MemoryExecutionRegistry::new();
        let id = ExecutionId::new("job-1");
        registry.push_record(ExecutionRecord::new("job-1", ExecutionStatus::Running));
        registry.push_snapshot(&id, snapshot(PhaseState::Running));
        registry.fail_phases_after(&id, 1);

        assert!(registry.get_phases(&id).await.is_ok());
        let err = registry.get_phases(&id).await.unwrap_err();
        assert!(matches!(err, StateError::Unavailable(_)));
        assert_eq!(registry.execution_calls(&id), 0);
    }

    #[tokio::test]
    async fn test_log_source_records_requests() {
        let source = MemoryLogSource::new();
        let id = ExecutionId::new("job-1");
        source.insert(&id, Some("clone"), b"cloning\n");

        let request = LogRequest {
            container: Some("clone".to_string()),
            ..LogRequest::default()
        };
        let mut stream = source.open_log(&id, &request).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();

        assert_eq!(out, b"cloning\n");
        assert_eq!(source.opened_containers(&id), vec![Some("clone".to_string())]);
    }

    #[tokio::test]
    async fn test_fail_open_and_missing_log() {
        let source = MemoryLogSource::new();
        let id = ExecutionId::new("job-1");
        source.insert(&id, None, b"x");
        source.fail_open(&id, None);

        let err = source
            .open_log(&id, &LogRequest::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StateError::Unavailable(_)));

        let request = LogRequest {
            container: Some("nope".to_string()),
            ..LogRequest::default()
        };
        let err = source.open_log(&id, &request).await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_open_only_when_following() {
        let source = MemoryLogSource::new();
        let id = ExecutionId::new("job-1");
        source.insert(&id, None, b"live\n");
        source.hold_open(&id, None);

        let mut snapshot = source.open_log(&id, &LogRequest::default()).await.unwrap();
        let mut out = Vec::new();
        snapshot.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"live\n");

        let follow = LogRequest {
            follow: true,
            ..LogRequest::default()
        };
        let mut tail = source.open_log(&id, &follow).await.unwrap();
        let mut buf = [0u8; 16];
        let n = tail.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"live\n");

        let next = tokio::time::timeout(Duration::from_secs(5), tail.read(&mut buf)).await;
        assert!(next.is_err(), "tail should never reach end-of-stream");
    }
}
