//! Stream request entry point.
//!
//! [`LogStreamer::open`] resolves everything that can fail synchronously
//! (execution lookup, previous-run resolution, start gate, initial phase
//! snapshot) and only then commits to a stream. Errors after that point
//! travel in-band.

use std::sync::Arc;

use phaselog_state::{
    ExecutionId, ExecutionRecord, ExecutionRegistry, ExecutionStatus, LogSource,
};
use tracing::{debug, instrument};

use crate::cancel::CancelToken;
use crate::config::AggregatorConfig;
use crate::driver::AggregationDriver;
use crate::error::{Result, StreamError, NO_LOGS_MESSAGE};
use crate::fetcher::PhaseLogFetcher;
use crate::handle::{StreamBody, StreamHandle};
use crate::metrics::METRICS;
use crate::obs;
use crate::options::{LogOptions, StreamRequest};
use crate::pipe::pipe;
use crate::poller::{PhaseStatusPoller, WaitBudget, WaitError};

pub struct LogStreamer {
    registry: Arc<dyn ExecutionRegistry>,
    source: Arc<dyn LogSource>,
    config: Arc<AggregatorConfig>,
}

impl LogStreamer {
    pub fn new(
        registry: Arc<dyn ExecutionRegistry>,
        source: Arc<dyn LogSource>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            registry,
            source,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Open the log stream for an execution.
    ///
    /// Returns as soon as the stream is wired up; an aggregation session keeps
    /// filling it from a background task until every phase is streamed, the
    /// session fails, or `cancel` fires.
    #[instrument(skip(self, request, cancel), fields(execution_id = %request.execution_id))]
    pub async fn open(&self, request: StreamRequest, cancel: CancelToken) -> Result<StreamHandle> {
        let options = request.options;
        let mut record = self.registry.get_execution(&request.execution_id).await?;

        if options.previous {
            let previous = record.previous_id().cloned().ok_or_else(|| {
                StreamError::BadRequest(format!(
                    "execution {} has no previous execution",
                    record.id
                ))
            })?;
            debug!(previous = %previous, "resolved previous execution");
            record = self.registry.get_execution(&previous).await?;
        }
        let id = record.id.clone();

        if record.status.is_not_started() {
            if options.no_wait {
                debug!(status = ?record.status, "execution not started, no logs to retrieve yet");
                let handle = StreamHandle::new(
                    StreamBody::Empty,
                    self.config.content_type.clone(),
                    options.follow,
                );
                return Ok(self.finish(handle, &id, &options));
            }
            debug!(status = ?record.status, "waiting for execution to start");
            record = self.wait_for_start(&id, &cancel).await?;
        }
        check_has_logs(&record)?;

        let poller = PhaseStatusPoller::new(Arc::clone(&self.registry), id.clone());
        let snapshot = poller
            .snapshot()
            .await
            .map_err(|err| StreamError::BadRequest(err.to_string()))?;

        if snapshot.setup.is_empty() {
            let stream = self
                .source
                .open_log(&id, &options.to_log_request(None))
                .await?;
            let handle = StreamHandle::new(
                StreamBody::PassThrough(stream),
                self.config.content_type.clone(),
                options.follow,
            );
            return Ok(self.finish(handle, &id, &options));
        }

        let (writer, reader) = pipe();
        let fetcher = PhaseLogFetcher::new(
            Arc::clone(&self.source),
            id.clone(),
            self.config.copy_buffer_bytes,
        );
        let driver = AggregationDriver::new(
            poller,
            fetcher,
            options.clone(),
            Arc::clone(&self.config),
        );
        let session = driver.spawn(writer, cancel);
        let handle = StreamHandle::new(
            StreamBody::Pipe(reader),
            self.config.content_type.clone(),
            options.follow,
        )
        .with_session(session);
        Ok(self.finish(handle, &id, &options))
    }

    async fn wait_for_start(
        &self,
        id: &ExecutionId,
        cancel: &CancelToken,
    ) -> Result<ExecutionRecord> {
        let poller = PhaseStatusPoller::new(Arc::clone(&self.registry), id.clone());
        let budget = WaitBudget::new(
            self.config.start_poll_interval(),
            self.config.start_wait_timeout(),
        );
        poller
            .wait_for_start(budget, cancel)
            .await
            .map_err(|err| match err {
                WaitError::Cancelled => StreamError::Cancelled,
                WaitError::TimedOut(after) => StreamError::Timeout(format!(
                    "timed out waiting for execution {id} to start after {}s",
                    after.as_secs()
                )),
                WaitError::Registry(err) => StreamError::BadRequest(format!(
                    "unable to wait for execution {id} to run: {err}"
                )),
            })
    }

    fn finish(
        &self,
        handle: StreamHandle,
        id: &ExecutionId,
        options: &LogOptions,
    ) -> StreamHandle {
        METRICS.inc_streams_opened();
        obs::emit_stream_opened(id.as_str(), handle.is_aggregated(), options.follow);
        handle
    }
}

/// Reject executions that ended without ever producing logs.
fn check_has_logs(record: &ExecutionRecord) -> Result<()> {
    if !record.status.has_no_logs() {
        return Ok(());
    }
    let reason = match record.status {
        ExecutionStatus::Cancelled => "was cancelled",
        _ => "is in an error state",
    };
    Err(StreamError::BadRequest(format!(
        "execution {} {reason}. {NO_LOGS_MESSAGE}",
        record.id
    )))
}
