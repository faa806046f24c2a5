//! Copies one phase's log into the stream pipe.

use std::sync::Arc;

use phaselog_state::{ExecutionId, LogRequest, LogSource, LogStream};
use tokio::io::AsyncReadExt;
use tracing::{debug, error};

use crate::cancel::CancelToken;
use crate::error::{FetchError, PipeError};
use crate::metrics::METRICS;
use crate::pipe::PipeWriter;

/// Single-phase log fetcher. Knows nothing about phase ordering.
pub struct PhaseLogFetcher {
    source: Arc<dyn LogSource>,
    execution: ExecutionId,
    buffer_bytes: usize,
}

impl PhaseLogFetcher {
    pub fn new(source: Arc<dyn LogSource>, execution: ExecutionId, buffer_bytes: usize) -> Self {
        Self {
            source,
            execution,
            buffer_bytes: buffer_bytes.max(1),
        }
    }

    /// Open the phase's log and copy it verbatim into `sink` until
    /// end-of-stream. Returns the number of bytes copied.
    ///
    /// Reaching end-of-stream is success. A followed log of a running phase
    /// may never end; the copy is raced against `cancel` and against the
    /// consumer dropping its end.
    pub async fn fetch(
        &self,
        request: &LogRequest,
        sink: &mut PipeWriter,
        cancel: &CancelToken,
    ) -> Result<u64, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let container = request.container.as_deref().unwrap_or("<default>");
        debug!(
            execution_id = %self.execution,
            container = container,
            follow = request.follow,
            "pulling phase log"
        );

        let consumer_gone = sink.closed();
        let copy = async {
            let stream = self
                .source
                .open_log(&self.execution, request)
                .await
                .map_err(|source| {
                    error!(
                        execution_id = %self.execution,
                        container = container,
                        error = %source,
                        "could not open phase log"
                    );
                    FetchError::Open {
                        container: container.to_string(),
                        source,
                    }
                })?;
            debug!(execution_id = %self.execution, container = container, "retrieved phase log stream");
            self.copy_into(stream, container, sink).await
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            _ = consumer_gone => Err(FetchError::Sink(PipeError::Closed)),
            res = copy => res,
        }
    }

    async fn copy_into(
        &self,
        mut stream: LogStream,
        container: &str,
        sink: &mut PipeWriter,
    ) -> Result<u64, FetchError> {
        let mut buf = vec![0u8; self.buffer_bytes];
        let mut total = 0u64;
        loop {
            let n = stream
                .read(&mut buf)
                .await
                .map_err(|source| FetchError::Read {
                    container: container.to_string(),
                    source,
                })?;
            if n == 0 {
                break;
            }
            sink.write(&buf[..n]).await?;
            total += n as u64;
        }
        METRICS.add_bytes_streamed(total);
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use crate::pipe::pipe;
    use phaselog_state::fakes::MemoryLogSource;
    use std::time::Duration;

    fn request(container: &str, follow: bool) -> LogRequest {
        LogRequest {
            container: Some(container.to_string()),
            follow,
            ..LogRequest::default()
        }
    }

    #[tokio::test]
    async fn test_copies_until_eof() {
        let source = Arc::new(MemoryLogSource::new());
        let id = ExecutionId::new("job-1");
        source.insert(&id, Some("clone"), b"line 1\nline 2\n");
        let fetcher = PhaseLogFetcher::new(source, id, 4);

        let (mut writer, mut reader) = pipe();
        let consumer = tokio::spawn(async move {
            let mut out = Vec::new();
            reader.read_to_end(&mut out).await.unwrap();
            out
        });

        let copied = fetcher
            .fetch(&request("clone", false), &mut writer, &CancelToken::never())
            .await
            .unwrap();
        writer.close();

        assert_eq!(copied, 14);
        assert_eq!(consumer.await.unwrap(), b"line 1\nline 2\n");
    }

    #[tokio::test]
    async fn test_open_failure() {
        let source = Arc::new(MemoryLogSource::new());
        let id = ExecutionId::new("job-1");
        source.insert(&id, Some("clone"), b"x");
        source.fail_open(&id, Some("clone"));
        let fetcher = PhaseLogFetcher::new(source, id, 1024);

        let (mut writer, _reader) = pipe();
        let err = fetcher
            .fetch(&request("clone", false), &mut writer, &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Open { ref container, .. } if container == "clone"));
        assert_eq!(writer.bytes_written(), 0);
    }

    #[tokio::test]
    async fn test_sink_closed() {
        let source = Arc::new(MemoryLogSource::new());
        let id = ExecutionId::new("job-1");
        source.insert(&id, Some("clone"), b"nobody listens");
        let fetcher = PhaseLogFetcher::new(source, id, 1024);

        let (mut writer, reader) = pipe();
        drop(reader);
        let err = fetcher
            .fetch(&request("clone", false), &mut writer, &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Sink(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_endless_follow() {
        let source = Arc::new(MemoryLogSource::new());
        let id = ExecutionId::new("job-1");
        source.insert(&id, Some("build"), b"still going\n");
        source.hold_open(&id, Some("build"));
        let fetcher = PhaseLogFetcher::new(source, id, 1024);

        let (mut writer, mut reader) = pipe();
        let consumer = tokio::spawn(async move {
            let mut out = Vec::new();
            let _ = reader.read_to_end(&mut out).await;
            out
        });

        let cancel = CancelSource::new();
        cancel.cancel_after(Duration::from_secs(2));
        let err = fetcher
            .fetch(&request("build", true), &mut writer, &cancel.token())
            .await
            .unwrap_err();
        writer.close();

        assert!(matches!(err, FetchError::Cancelled));
        assert_eq!(consumer.await.unwrap(), b"still going\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_consumer_drop_interrupts_silent_follow() {
        let source = Arc::new(MemoryLogSource::new());
        let id = ExecutionId::new("job-1");
        source.insert(&id, Some("build"), b"first line\n");
        source.hold_open(&id, Some("build"));
        let fetcher = PhaseLogFetcher::new(source, id, 1024);

        let (mut writer, mut reader) = pipe();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let n = reader.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"first line\n");
            tokio::time::sleep(Duration::from_secs(3)).await;
        });

        let err = tokio::time::timeout(
            Duration::from_secs(60),
            fetcher.fetch(&request("build", true), &mut writer, &CancelToken::never()),
        )
        .await
        .expect("fetch should stop once the reader is dropped")
        .unwrap_err();
        assert!(matches!(err, FetchError::Sink(PipeError::Closed)));
    }

    #[tokio::test]
    async fn test_already_cancelled_does_not_open() {
        let source = Arc::new(MemoryLogSource::new());
        let id = ExecutionId::new("job-1");
        source.insert(&id, Some("clone"), b"x");
        let fetcher = PhaseLogFetcher::new(source.clone(), id.clone(), 1024);

        let cancel = CancelSource::new();
        cancel.cancel();
        let (mut writer, _reader) = pipe();
        let err = fetcher
            .fetch(&request("clone", false), &mut writer, &cancel.token())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
        assert!(source.requests().is_empty());
    }
}
