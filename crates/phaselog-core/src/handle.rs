//! The value handed back to the caller of a stream request.

use std::pin::Pin;
use std::task::{Context, Poll};

use phaselog_state::LogStream;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::task::JoinHandle;

use crate::driver::SessionOutcome;
use crate::pipe::PipeReader;

/// Where a handle's bytes come from.
pub enum StreamBody {
    /// Consumer end of an aggregation session's pipe.
    Pipe(PipeReader),
    /// A single log opened directly from the source.
    PassThrough(LogStream),
    /// Nothing to stream yet.
    Empty,
}

impl std::fmt::Debug for StreamBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamBody::Pipe(_) => f.write_str("Pipe"),
            StreamBody::PassThrough(_) => f.write_str("PassThrough"),
            StreamBody::Empty => f.write_str("Empty"),
        }
    }
}

/// Readable log stream plus the delivery hints a transport needs.
///
/// `flush_on_write` mirrors the request's `follow` option: the transport
/// should push every chunk to the client as soon as it is read.
#[derive(Debug)]
pub struct StreamHandle {
    body: StreamBody,
    content_type: String,
    flush_on_write: bool,
    session: Option<JoinHandle<SessionOutcome>>,
}

impl StreamHandle {
    pub(crate) fn new(body: StreamBody, content_type: impl Into<String>, flush_on_write: bool) -> Self {
        Self {
            body,
            content_type: content_type.into(),
            flush_on_write,
            session: None,
        }
    }

    pub(crate) fn with_session(mut self, session: JoinHandle<SessionOutcome>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn flush_on_write(&self) -> bool {
        self.flush_on_write
    }

    pub fn body(&self) -> &StreamBody {
        &self.body
    }

    pub fn is_aggregated(&self) -> bool {
        matches!(self.body, StreamBody::Pipe(_))
    }

    /// Detach the driver task, if this handle is backed by one.
    ///
    /// Awaiting it yields how the session ended. Dropping it leaves the task
    /// running until the pipe closes.
    pub fn take_session(&mut self) -> Option<JoinHandle<SessionOutcome>> {
        self.session.take()
    }
}

impl AsyncRead for StreamHandle {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut self.get_mut().body {
            StreamBody::Pipe(reader) => Pin::new(reader).poll_read(cx, buf),
            StreamBody::PassThrough(stream) => Pin::new(stream).poll_read(cx, buf),
            StreamBody::Empty => Poll::Ready(Ok(())),
        }
    }
}
