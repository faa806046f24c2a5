//! Structured observability hooks for stream session lifecycle events.
//!
//! This module provides:
//! - A session-scoped span for the driver task (`stream_span`)
//! - Emission functions for key lifecycle events: open, phase streamed,
//!   setup failure, finish and abort
//!
//! Events are emitted at `info!` level (`warn!` for aborts), filterable via
//! `RUST_LOG`.

use tracing::{info, warn};

/// Span tagging every event of one stream session with its execution.
///
/// The driver runs on its own task, so attach it with
/// `tracing::Instrument::instrument` rather than entering it.
pub fn stream_span(execution_id: &str) -> tracing::Span {
    tracing::info_span!("phaselog.stream", execution_id = %execution_id)
}

/// Emit event: stream handle handed to the caller.
pub fn emit_stream_opened(execution_id: &str, aggregated: bool, follow: bool) {
    info!(
        event = "stream.opened",
        execution_id = %execution_id,
        aggregated = aggregated,
        follow = follow,
    );
}

/// Emit event: one phase's log fully copied into the stream.
pub fn emit_phase_streamed(execution_id: &str, phase: &str, bytes: u64) {
    info!(
        event = "stream.phase_streamed",
        execution_id = %execution_id,
        phase = %phase,
        bytes = bytes,
    );
}

/// Emit event: a setup phase failed; the main phase will not be streamed.
pub fn emit_setup_failed(execution_id: &str, phase: &str) {
    info!(event = "stream.setup_failed", execution_id = %execution_id, phase = %phase);
}

/// Emit event: session ended, with its outcome label.
pub fn emit_session_finished(execution_id: &str, outcome: &str, bytes: u64) {
    info!(
        event = "stream.finished",
        execution_id = %execution_id,
        outcome = %outcome,
        bytes = bytes,
    );
}

/// Emit event: session aborted on a fatal error (warning level).
pub fn emit_session_aborted(execution_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "stream.aborted", execution_id = %execution_id, error = %error);
}
