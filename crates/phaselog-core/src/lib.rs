//! phaselog core library
//!
//! Ordered multi-phase log aggregation: given an execution made of ordered
//! setup phases followed by one main phase, produce a single byte stream
//! that stitches every phase's log together in order, as each phase becomes
//! available.
//!
//! Entry point is [`LogStreamer::open`], which returns a [`StreamHandle`]
//! immediately and fills it from a background [`AggregationDriver`] task.

pub mod cancel;
pub mod config;
pub mod driver;
pub mod error;
pub mod fetcher;
pub mod handle;
pub mod metrics;
pub mod obs;
pub mod options;
pub mod pipe;
pub mod poller;
pub mod producer;
pub mod streamer;
pub mod telemetry;

pub use cancel::{CancelSource, CancelToken};
pub use config::AggregatorConfig;
pub use driver::{AggregationDriver, SessionOutcome};
pub use error::{
    ConfigError, ErrorClass, FetchError, PipeError, Result, StreamError, NO_LOGS_MESSAGE,
};
pub use fetcher::PhaseLogFetcher;
pub use handle::{StreamBody, StreamHandle};
pub use metrics::METRICS;
pub use obs::{
    emit_phase_streamed, emit_session_aborted, emit_session_finished, emit_setup_failed,
    emit_stream_opened, stream_span,
};
pub use options::{LogOptions, StreamRequest};
pub use pipe::{pipe, PipeReader, PipeWriter};
pub use poller::{PhaseStatusPoller, WaitBudget, WaitError};
pub use producer::select_producer;
pub use streamer::LogStreamer;
pub use telemetry::{init_tracing, LOG_FILTER_ENV};
