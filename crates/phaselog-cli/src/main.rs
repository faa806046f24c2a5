//! phaselog - ordered multi-phase log viewer
//!
//! The `phaselog` command streams the logs of an execution (setup phases in
//! order, then the main phase) from a filesystem execution store to stdout.
//!
//! ## Commands
//!
//! - `stream`: Stream an execution's aggregated log
//! - `status`: Print an execution's record and phase states as JSON

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use phaselog_core::{
    AggregatorConfig, CancelSource, CancelToken, LogOptions, LogStreamer, StreamError,
    StreamHandle, StreamRequest, METRICS,
};
use phaselog_state::{
    ExecutionId, ExecutionRecord, ExecutionRegistry, FsExecutionStore, PhaseSnapshot,
};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, Level};

#[derive(Parser)]
#[command(name = "phaselog")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Stream ordered multi-phase execution logs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Execution store root directory
    #[arg(long, global = true, env = "PHASELOG_ROOT", default_value = ".phaselog")]
    root: PathBuf,

    /// Aggregator config file (TOML)
    #[arg(long, global = true, env = "PHASELOG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream an execution's logs, setup phases first
    Stream {
        /// Execution ID
        execution: String,

        /// Keep tailing while phases are still running
        #[arg(short, long)]
        follow: bool,

        /// Show the execution that ran before this one
        #[arg(short, long)]
        previous: bool,

        /// Return immediately if the execution has not started
        #[arg(long)]
        no_wait: bool,

        /// Only the last N lines of each phase
        #[arg(long)]
        tail: Option<u64>,

        /// Stop each phase's log after this many bytes
        #[arg(long)]
        limit_bytes: Option<u64>,

        /// Prefix lines with timestamps, if the store records them
        #[arg(long)]
        timestamps: bool,
    },

    /// Print an execution's record and phase states
    Status {
        /// Execution ID
        execution: String,
    },
}

#[derive(Serialize)]
struct StatusReport {
    record: ExecutionRecord,
    phases: PhaseSnapshot,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    phaselog_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;
    let store = Arc::new(FsExecutionStore::new(&cli.root));

    match cli.command {
        Commands::Stream {
            execution,
            follow,
            previous,
            no_wait,
            tail,
            limit_bytes,
            timestamps,
        } => {
            let options = LogOptions {
                follow,
                previous,
                no_wait,
                tail_lines: tail,
                limit_bytes,
                timestamps,
                ..LogOptions::default()
            };
            cmd_stream(store, config, StreamRequest::new(execution, options)).await
        }
        Commands::Status { execution } => cmd_status(store.as_ref(), &execution).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<AggregatorConfig> {
    AggregatorConfig::load(path).with_context(|| match path {
        Some(p) => format!("Failed to load config from {}", p.display()),
        None => "Failed to load config from environment".to_string(),
    })
}

async fn cmd_stream(
    store: Arc<FsExecutionStore>,
    config: AggregatorConfig,
    request: StreamRequest,
) -> Result<()> {
    let streamer = LogStreamer::new(store.clone(), store, config);

    let cancel = CancelSource::new();
    let token = cancel.token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let execution = request.execution_id.clone();
    let handle = match streamer.open(request, token.clone()).await {
        Ok(handle) => handle,
        Err(StreamError::Cancelled) => return Ok(()),
        Err(err) => {
            return Err(anyhow!(
                "Failed to open logs for {}: {} (status {})",
                execution,
                err,
                err.class().status_code()
            ));
        }
    };

    let mut stdout = tokio::io::stdout();
    let copied = drain_to(handle, &mut stdout, &token, streamer.config().copy_buffer_bytes).await?;
    debug!(execution_id = %execution, bytes = copied, "stream drained");
    METRICS.flush();
    Ok(())
}

/// Copy the stream into `out` until it ends or the caller cancels.
///
/// Flushes after every chunk when the handle asks for interactive delivery.
/// A cancelled stream ends quietly.
async fn drain_to<W>(
    mut handle: StreamHandle,
    out: &mut W,
    cancel: &CancelToken,
    buffer_bytes: usize,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_bytes.max(1)];
    let mut total = 0u64;
    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = handle.read(&mut buf) => read,
        };
        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => break,
            Err(e) => return Err(e).context("Failed to read log stream"),
        };
        out.write_all(&buf[..n])
            .await
            .context("Failed to write log output")?;
        if handle.flush_on_write() {
            out.flush().await.context("Failed to flush log output")?;
        }
        total += n as u64;
    }
    out.flush().await.context("Failed to flush log output")?;
    Ok(total)
}

async fn cmd_status(store: &FsExecutionStore, execution: &str) -> Result<()> {
    let id = ExecutionId::new(execution);
    let record = store
        .get_execution(&id)
        .await
        .with_context(|| format!("Failed to read execution {}", id))?;
    let phases = store
        .get_phases(&id)
        .await
        .with_context(|| format!("Failed to read phases of {}", id))?;
    let report = StatusReport { record, phases };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
