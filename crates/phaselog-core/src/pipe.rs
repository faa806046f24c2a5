//! Single-producer/single-consumer byte pipe.
//!
//! The producer awaits on every write until the consumer has room for it, so
//! the consumer's read rate is the only backpressure. Chunk boundaries are not
//! preserved: the consumer sees a raw byte stream.
//!
//! Termination:
//! - [`PipeWriter::close`] (idempotent, also on drop): consumer reads the
//!   buffered bytes, then end-of-stream.
//! - [`PipeWriter::close_with_error`]: consumer reads the buffered bytes, then
//!   the error.
//!
//! Dropping the [`PipeReader`] is visible to the producer without writing:
//! [`PipeWriter::closed`] resolves as soon as the consumer is gone.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use futures::Stream;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::PipeError;

/// Create a connected pipe.
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (data_tx, data_rx) = mpsc::channel(1);
    let (err_tx, err_rx) = oneshot::channel();
    let (alive_tx, alive_rx) = watch::channel(());
    (
        PipeWriter {
            data_tx: Some(data_tx),
            err_tx: Some(err_tx),
            consumer: alive_rx,
            written: 0,
        },
        PipeReader {
            data_rx,
            err_rx: Some(err_rx),
            _alive: alive_tx,
            pending: Bytes::new(),
            finished: false,
        },
    )
}

/// Producer end.
#[derive(Debug)]
pub struct PipeWriter {
    data_tx: Option<mpsc::Sender<Bytes>>,
    err_tx: Option<oneshot::Sender<PipeError>>,
    /// Never receives a value; errors out once the reader is dropped.
    consumer: watch::Receiver<()>,
    written: u64,
}

impl PipeWriter {
    /// Write a chunk, waiting for the consumer to make room.
    ///
    /// Fails with [`PipeError::Closed`] once the consumer is gone or after
    /// this end was closed.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), PipeError> {
        if data.is_empty() {
            return Ok(());
        }
        let tx = self.data_tx.as_ref().ok_or(PipeError::Closed)?;
        tx.send(Bytes::copy_from_slice(data))
            .await
            .map_err(|_| PipeError::Closed)?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Bytes accepted by the pipe so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn is_closed(&self) -> bool {
        self.data_tx.as_ref().map(|tx| tx.is_closed()).unwrap_or(true)
    }

    /// Resolves once the consumer has dropped its end.
    ///
    /// The returned future does not borrow the writer, so it can be raced
    /// against a copy that is writing into it.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut consumer = self.consumer.clone();
        async move { while consumer.changed().await.is_ok() {} }
    }

    /// Close the producer end. Calling it again is a no-op.
    pub fn close(&mut self) {
        self.data_tx = None;
        self.err_tx = None;
    }

    /// Close the producer end and hand the consumer a terminal error, delivered
    /// after any buffered bytes. No-op if already closed.
    pub fn close_with_error(&mut self, err: PipeError) {
        if self.data_tx.is_none() {
            return;
        }
        if let Some(err_tx) = self.err_tx.take() {
            let _ = err_tx.send(err);
        }
        self.data_tx = None;
    }
}

/// Consumer end. Readable as [`AsyncRead`] or as a [`Stream`] of chunks.
#[derive(Debug)]
pub struct PipeReader {
    data_rx: mpsc::Receiver<Bytes>,
    err_rx: Option<oneshot::Receiver<PipeError>>,
    _alive: watch::Sender<()>,
    pending: Bytes,
    finished: bool,
}

impl PipeReader {
    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<std::io::Result<Bytes>>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.data_rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(None) => {
                self.finished = true;
                // The writer is gone, so the error slot is already settled.
                let terminal = self.err_rx.take().and_then(|mut rx| rx.try_recv().ok());
                Poll::Ready(terminal.map(|err| Err(err.into_io())))
            }
        }
    }
}

impl Stream for PipeReader {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if !this.pending.is_empty() {
            return Poll::Ready(Some(Ok(std::mem::take(&mut this.pending))));
        }
        this.poll_chunk(cx)
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.pending.is_empty() {
            match this.poll_chunk(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                Poll::Ready(Some(Ok(chunk))) => this.pending = chunk,
            }
        }
        let n = this.pending.len().min(buf.remaining());
        buf.put_slice(&this.pending[..n]);
        this.pending.advance(n);
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_bytes_then_eof() {
        let (mut writer, mut reader) = pipe();
        let producer = tokio::spawn(async move {
            writer.write(b"hello ").await.unwrap();
            writer.write(b"world").await.unwrap();
            assert_eq!(writer.bytes_written(), 11);
            writer.close();
            writer.close();
        });

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_closes() {
        let (mut writer, mut reader) = pipe();
        tokio::spawn(async move {
            writer.write(b"bye").await.unwrap();
        });
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"bye");
    }

    #[tokio::test]
    async fn test_error_after_buffered_bytes() {
        let (mut writer, mut reader) = pipe();
        tokio::spawn(async move {
            writer.write(b"partial").await.unwrap();
            writer.close_with_error(PipeError::Aborted("upstream died".into()));
        });

        let first = reader.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"partial");
        let err = reader.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("upstream died"));
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_then_close_with_error_stays_clean() {
        let (mut writer, mut reader) = pipe();
        writer.close();
        writer.close_with_error(PipeError::Cancelled);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_write_after_reader_dropped() {
        let (mut writer, reader) = pipe();
        drop(reader);
        assert!(writer.is_closed());
        assert_eq!(writer.write(b"x").await, Err(PipeError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_resolves_when_reader_dropped() {
        let (writer, reader) = pipe();
        let gone = writer.closed();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            drop(reader);
        });
        tokio::time::timeout(std::time::Duration::from_secs(10), gone)
            .await
            .unwrap();
        assert!(writer.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_pending_while_reader_alive() {
        let (writer, _reader) = pipe();
        let res = tokio::time::timeout(std::time::Duration::from_secs(60), writer.closed()).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_write_after_close() {
        let (mut writer, _reader) = pipe();
        writer.close();
        assert_eq!(writer.write(b"x").await, Err(PipeError::Closed));
        assert!(writer.write(b"").await.is_ok());
    }

    #[tokio::test]
    async fn test_small_reads_split_chunks() {
        let (mut writer, mut reader) = pipe();
        tokio::spawn(async move {
            writer.write(b"abcdef").await.unwrap();
        });
        let mut buf = [0u8; 4];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abcd");
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ef");
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }
}
