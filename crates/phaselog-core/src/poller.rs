//! Phase status polling against the execution registry.
//!
//! The poller is a pure query layer: it never touches session state, and it
//! retries only inside the two bounded waits (execution start, main phase
//! start). Every wait observes the caller's cancellation.

use std::sync::Arc;
use std::time::Duration;

use phaselog_state::{
    ExecutionId, ExecutionRecord, ExecutionRegistry, PhaseSnapshot, StateError,
};
use tokio::time::Instant;
use tracing::debug;

use crate::cancel::CancelToken;

/// Why a bounded wait ended without reaching its target state.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("registry lookup failed: {0}")]
    Registry(#[from] StateError),

    #[error("gave up waiting after {0:?}")]
    TimedOut(Duration),

    #[error("wait cancelled")]
    Cancelled,
}

/// Bounded-wait parameters.
#[derive(Debug, Clone, Copy)]
pub struct WaitBudget {
    pub interval: Duration,
    pub timeout: Duration,
}

impl WaitBudget {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

#[derive(Clone)]
pub struct PhaseStatusPoller {
    registry: Arc<dyn ExecutionRegistry>,
    execution: ExecutionId,
}

impl PhaseStatusPoller {
    pub fn new(registry: Arc<dyn ExecutionRegistry>, execution: ExecutionId) -> Self {
        Self {
            registry,
            execution,
        }
    }

    pub fn execution(&self) -> &ExecutionId {
        &self.execution
    }

    /// Current phase states, setup phases in execution order. One registry
    /// call, no retry.
    pub async fn snapshot(&self) -> Result<PhaseSnapshot, StateError> {
        let mut snapshot = self.registry.get_phases(&self.execution).await?;
        snapshot.order_setup();
        Ok(snapshot)
    }

    pub async fn record(&self) -> Result<ExecutionRecord, StateError> {
        self.registry.get_execution(&self.execution).await
    }

    /// Poll until the main phase leaves `Waiting`, returning that snapshot.
    ///
    /// Polls immediately, then once per `budget.interval`.
    pub async fn wait_for_main_phase(
        &self,
        budget: WaitBudget,
        cancel: &CancelToken,
    ) -> Result<PhaseSnapshot, WaitError> {
        self.poll_until(budget, cancel, |poller| async move {
            let snapshot = poller.snapshot().await?;
            Ok::<_, StateError>((!snapshot.main.state.is_waiting()).then_some(snapshot))
        })
        .await
    }

    /// Poll until the execution has left `New` / `Pending`, returning that
    /// record.
    pub async fn wait_for_start(
        &self,
        budget: WaitBudget,
        cancel: &CancelToken,
    ) -> Result<ExecutionRecord, WaitError> {
        self.poll_until(budget, cancel, |poller| async move {
            let record = poller.record().await?;
            Ok::<_, StateError>((!record.status.is_not_started()).then_some(record))
        })
        .await
    }

    async fn poll_until<T, F, Fut>(
        &self,
        budget: WaitBudget,
        cancel: &CancelToken,
        mut check: F,
    ) -> Result<T, WaitError>
    where
        F: FnMut(Self) -> Fut,
        Fut: std::future::Future<Output = Result<Option<T>, StateError>>,
    {
        let deadline = Instant::now() + budget.timeout;
        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(WaitError::Cancelled);
            }
            attempts += 1;
            if let Some(found) = check(self.clone()).await? {
                return Ok(found);
            }
            debug!(
                execution_id = %self.execution,
                attempts = attempts,
                "still waiting on registry"
            );
            let next = Instant::now() + budget.interval;
            if next > deadline {
                return Err(WaitError::TimedOut(budget.timeout));
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WaitError::Cancelled),
                _ = tokio::time::sleep_until(next) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use phaselog_state::fakes::MemoryExecutionRegistry;
    use phaselog_state::{ExecutionStatus, MainPhaseStatus, PhaseState, PhaseStatus};

    fn snapshot(main: PhaseState) -> PhaseSnapshot {
        PhaseSnapshot::new(vec![], MainPhaseStatus::new(main, &["sti-build"]))
    }

    fn budget() -> WaitBudget {
        WaitBudget::new(Duration::from_secs(1), Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn test_main_phase_wait_returns_first_started_snapshot() {
        let registry = Arc::new(MemoryExecutionRegistry::new());
        let id = ExecutionId::new("job-1");
        registry.push_snapshot(&id, snapshot(PhaseState::Waiting));
        registry.push_snapshot(&id, snapshot(PhaseState::Waiting));
        registry.push_snapshot(&id, snapshot(PhaseState::Running));
        let poller = PhaseStatusPoller::new(registry.clone(), id.clone());

        let snap = poller
            .wait_for_main_phase(budget(), &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(snap.main.state, PhaseState::Running);
        assert_eq!(registry.phase_calls(&id), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_main_phase_wait_times_out() {
        let registry = Arc::new(MemoryExecutionRegistry::new());
        let id = ExecutionId::new("job-1");
        registry.push_snapshot(&id, snapshot(PhaseState::Waiting));
        let poller = PhaseStatusPoller::new(registry.clone(), id.clone());

        let err = poller
            .wait_for_main_phase(budget(), &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::TimedOut(d) if d == Duration::from_secs(10)));
        assert_eq!(registry.phase_calls(&id), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_main_phase_wait_surfaces_registry_error() {
        let registry = Arc::new(MemoryExecutionRegistry::new());
        let id = ExecutionId::new("job-1");
        registry.push_snapshot(&id, snapshot(PhaseState::Waiting));
        registry.fail_phases_after(&id, 2);
        let poller = PhaseStatusPoller::new(registry, id);

        let err = poller
            .wait_for_main_phase(budget(), &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Registry(StateError::Unavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_observes_cancel() {
        let registry = Arc::new(MemoryExecutionRegistry::new());
        let id = ExecutionId::new("job-1");
        registry.push_snapshot(&id, snapshot(PhaseState::Waiting));
        let poller = PhaseStatusPoller::new(registry.clone(), id.clone());

        let cancel = CancelSource::new();
        cancel.cancel_after(Duration::from_millis(2_500));
        let err = poller
            .wait_for_main_phase(budget(), &cancel.token())
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Cancelled));
        assert_eq!(registry.phase_calls(&id), 3);
    }

    #[tokio::test]
    async fn test_snapshot_orders_setup_by_index() {
        let registry = Arc::new(MemoryExecutionRegistry::new());
        let id = ExecutionId::new("job-1");
        registry.push_snapshot(
            &id,
            PhaseSnapshot::new(
                vec![
                    PhaseStatus::new("deps", PhaseState::Waiting).with_index(1),
                    PhaseStatus::new("clone", PhaseState::Running).with_index(0),
                ],
                MainPhaseStatus::new(PhaseState::Waiting, &["sti-build"]),
            ),
        );
        let poller = PhaseStatusPoller::new(registry, id);

        let snap = poller.snapshot().await.unwrap();
        let names: Vec<_> = snap.setup.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["clone", "deps"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_start() {
        let registry = Arc::new(MemoryExecutionRegistry::new());
        let id = ExecutionId::new("job-1");
        registry.push_record(ExecutionRecord::new("job-1", ExecutionStatus::New));
        registry.push_record(ExecutionRecord::new("job-1", ExecutionStatus::Pending));
        registry.push_record(ExecutionRecord::new("job-1", ExecutionStatus::Running));
        let poller = PhaseStatusPoller::new(registry.clone(), id.clone());

        let record = poller
            .wait_for_start(budget(), &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Running);
        assert_eq!(registry.execution_calls(&id), 3);
    }
}
