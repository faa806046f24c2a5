//! Aggregation driver: the per-request task that stitches phase logs into
//! one ordered stream.
//!
//! The driver owns all session state (`done_with`, `failed`) and talks to the
//! consumer only through the [`PipeWriter`]. Steps are strictly sequential, so
//! at most one phase is ever being copied into the pipe.
//!
//! Termination guarantees:
//! - The pipe is closed on every exit path; that close is the consumer's only
//!   end-of-stream signal.
//! - Cancellation closes the pipe with [`PipeError::Cancelled`] and writes
//!   nothing further.
//! - A consumer that drops its end ends the session even while it is idle:
//!   between passes, during the main-phase wait, or inside a silent tail.
//! - Fatal errors (registry lookup, phase open/copy, main-phase wait) append
//!   one diagnostic line before a clean close.

use std::collections::HashSet;
use std::sync::Arc;

use phaselog_state::{ExecutionId, PhaseSnapshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, Instrument};

use crate::cancel::CancelToken;
use crate::config::AggregatorConfig;
use crate::error::{FetchError, PipeError};
use crate::fetcher::PhaseLogFetcher;
use crate::metrics::METRICS;
use crate::obs;
use crate::options::LogOptions;
use crate::pipe::PipeWriter;
use crate::poller::{PhaseStatusPoller, WaitBudget, WaitError};
use crate::producer::select_producer;

/// How a stream session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every available phase was streamed.
    Completed,
    /// A setup phase failed; its log was the last one streamed.
    SetupFailed,
    /// The caller cancelled.
    Cancelled,
    /// The consumer dropped its end of the pipe.
    Disconnected,
    /// A fatal error; the message was appended to the stream.
    Aborted(String),
}

impl SessionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SessionOutcome::Completed => "completed",
            SessionOutcome::SetupFailed => "setup_failed",
            SessionOutcome::Cancelled => "cancelled",
            SessionOutcome::Disconnected => "disconnected",
            SessionOutcome::Aborted(_) => "aborted",
        }
    }
}

/// Why the driver stopped early.
enum Halt {
    Cancelled,
    Disconnected,
    Fatal(String),
}

impl Halt {
    fn from_fetch(phase: &str, err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => Halt::Cancelled,
            FetchError::Sink(_) => Halt::Disconnected,
            other => Halt::Fatal(format!("failed to stream logs for phase {phase}: {other}")),
        }
    }
}

/// Session state, owned by the driver task alone.
#[derive(Debug, Default)]
struct Session {
    /// Phases whose logs have been fully streamed.
    done_with: HashSet<String>,
    /// Latched once any setup phase terminates non-zero.
    failed: bool,
}

pub struct AggregationDriver {
    poller: PhaseStatusPoller,
    fetcher: PhaseLogFetcher,
    options: LogOptions,
    config: Arc<AggregatorConfig>,
}

impl AggregationDriver {
    pub fn new(
        poller: PhaseStatusPoller,
        fetcher: PhaseLogFetcher,
        options: LogOptions,
        config: Arc<AggregatorConfig>,
    ) -> Self {
        Self {
            poller,
            fetcher,
            options,
            config,
        }
    }

    fn execution(&self) -> &ExecutionId {
        self.poller.execution()
    }

    /// Run the session on its own task.
    pub fn spawn(self, sink: PipeWriter, cancel: CancelToken) -> JoinHandle<SessionOutcome> {
        let span = obs::stream_span(self.execution().as_str());
        tokio::spawn(self.run(sink, cancel).instrument(span))
    }

    /// Drive the session to completion and close `sink`.
    pub async fn run(self, mut sink: PipeWriter, cancel: CancelToken) -> SessionOutcome {
        let outcome = match self.drive(&mut sink, &cancel).await {
            Ok(outcome) => {
                sink.close();
                outcome
            }
            Err(Halt::Cancelled) => {
                debug!(execution_id = %self.execution(), "stream cancelled by caller");
                sink.close_with_error(PipeError::Cancelled);
                SessionOutcome::Cancelled
            }
            Err(Halt::Disconnected) => {
                debug!(execution_id = %self.execution(), "consumer went away");
                sink.close();
                SessionOutcome::Disconnected
            }
            Err(Halt::Fatal(message)) => {
                obs::emit_session_aborted(self.execution().as_str(), &message);
                METRICS.inc_sessions_aborted();
                let line = format!("{message}\n");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = sink.write(line.as_bytes()) => {}
                }
                sink.close();
                SessionOutcome::Aborted(message)
            }
        };
        obs::emit_session_finished(
            self.execution().as_str(),
            outcome.label(),
            sink.bytes_written(),
        );
        outcome
    }

    async fn drive(
        &self,
        sink: &mut PipeWriter,
        cancel: &CancelToken,
    ) -> Result<SessionOutcome, Halt> {
        let mut session = Session::default();
        self.stream_setup_phases(&mut session, sink, cancel).await?;
        if session.failed {
            return Ok(SessionOutcome::SetupFailed);
        }
        self.stream_main_phase(sink, cancel).await?;
        Ok(SessionOutcome::Completed)
    }

    /// Walk the setup phases in order, streaming each at most once.
    ///
    /// Without `follow` this is exactly one pass. With `follow` it repeats
    /// while some phase is still waiting and nothing has failed, sleeping
    /// between passes that streamed nothing.
    async fn stream_setup_phases(
        &self,
        session: &mut Session,
        sink: &mut PipeWriter,
        cancel: &CancelToken,
    ) -> Result<(), Halt> {
        let mut pass = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(Halt::Cancelled);
            }
            if sink.is_closed() {
                return Err(Halt::Disconnected);
            }
            pass += 1;
            debug!(execution_id = %self.execution(), pass = pass, "walking setup phases");

            let snapshot = self.poller.snapshot().await.map_err(|err| {
                Halt::Fatal(format!(
                    "error retrieving phase status for execution {}: {err}",
                    self.execution()
                ))
            })?;

            let mut keep_waiting = false;
            let mut sleep = true;

            for phase in &snapshot.setup {
                if phase.state.is_failed() {
                    if !session.failed {
                        obs::emit_setup_failed(self.execution().as_str(), &phase.name);
                    }
                    session.failed = true;
                    keep_waiting = false;
                    // Streamed on an earlier pass, before the failure was visible.
                    if session.done_with.contains(&phase.name) {
                        break;
                    }
                }
                if session.done_with.contains(&phase.name) {
                    continue;
                }
                if phase.state.is_waiting() {
                    keep_waiting = true;
                    continue;
                }

                let mut request = self.options.to_log_request(Some(&phase.name));
                if phase.state.is_terminated() {
                    request.follow = false;
                }
                let bytes = self
                    .fetcher
                    .fetch(&request, sink, cancel)
                    .await
                    .map_err(|err| Halt::from_fetch(&phase.name, err))?;
                METRICS.inc_phases_streamed();
                obs::emit_phase_streamed(self.execution().as_str(), &phase.name, bytes);

                sleep = false;
                session.done_with.insert(phase.name.clone());
                if session.failed {
                    break;
                }
            }

            if !self.options.follow || !keep_waiting || session.failed {
                return Ok(());
            }
            if sleep {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Halt::Cancelled),
                    _ = sink.closed() => return Err(Halt::Disconnected),
                    _ = tokio::time::sleep(self.config.setup_poll_interval()) => {}
                }
            }
        }
    }

    /// Wait for the main phase to start, then stream its preferred producer.
    async fn stream_main_phase(
        &self,
        sink: &mut PipeWriter,
        cancel: &CancelToken,
    ) -> Result<(), Halt> {
        let budget = WaitBudget::new(
            self.config.main_phase_poll_interval(),
            self.config.main_phase_wait_timeout(),
        );
        let waited = tokio::select! {
            biased;
            _ = sink.closed() => return Err(Halt::Disconnected),
            waited = self.poller.wait_for_main_phase(budget, cancel) => waited,
        };
        let snapshot: PhaseSnapshot = waited.map_err(|err| match err {
            WaitError::Cancelled => Halt::Cancelled,
            WaitError::Registry(err) => Halt::Fatal(format!(
                "error while getting logs, could not retrieve execution {}: {err}",
                self.execution()
            )),
            WaitError::TimedOut(after) => Halt::Fatal(format!(
                "timed out after {}s waiting for the main phase of execution {} to start",
                after.as_secs(),
                self.execution()
            )),
        })?;

        let container = select_producer(&snapshot.main.producers, &self.config.producer_preference);
        if container.is_none() {
            error!(
                execution_id = %self.execution(),
                producers = ?snapshot.main.producers,
                "no preferred producer in main phase, using the default"
            );
        }

        let mut request = self.options.to_log_request(container);
        if snapshot.main.state.is_terminated() {
            request.follow = false;
        }
        let phase = container.unwrap_or("main");
        let bytes = self
            .fetcher
            .fetch(&request, sink, cancel)
            .await
            .map_err(|err| Halt::from_fetch(phase, err))?;
        METRICS.inc_phases_streamed();
        obs::emit_phase_streamed(self.execution().as_str(), phase, bytes);
        Ok(())
    }
}
