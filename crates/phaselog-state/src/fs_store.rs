use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StateError;
use crate::schema::{ExecutionId, ExecutionRecord, LogRequest, PhaseSnapshot};
use crate::traits::{ExecutionRegistry, LogSource, LogStream, StateResult};
use crate::window::apply_window;

const MANIFEST_FILE: &str = "execution.json";
const DEFAULT_LOG: &str = "main";

/// On-disk manifest describing one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionManifest {
    pub record: ExecutionRecord,
    pub phases: PhaseSnapshot,
}

/// Filesystem-backed registry and log source.
///
/// Layout:
/// - `<root>/<execution>/execution.json` (record + phase snapshot)
/// - `<root>/<execution>/logs/<container>.log` (`main.log` for the default producer)
///
/// The manifest is re-read on every call so an external runtime can rewrite
/// it while readers poll. Following a file is a snapshot read.
pub struct FsExecutionStore {
    root: PathBuf,
}

impl FsExecutionStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn execution_dir(&self, id: &ExecutionId) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn log_path(&self, id: &ExecutionId, container: Option<&str>) -> PathBuf {
        let name = container.unwrap_or(DEFAULT_LOG);
        self.execution_dir(id)
            .join("logs")
            .join(format!("{}.log", name))
    }

    /// Write (or replace) an execution manifest.
    pub async fn write_manifest(&self, manifest: &ExecutionManifest) -> StateResult<()> {
        let dir = self.execution_dir(&manifest.record.id);
        tokio::fs::create_dir_all(&dir).await?;
        let json = serde_json::to_vec_pretty(manifest)?;
        tokio::fs::write(dir.join(MANIFEST_FILE), json).await?;
        Ok(())
    }

    /// Write (or replace) one producer's log.
    pub async fn write_log(
        &self,
        id: &ExecutionId,
        container: Option<&str>,
        data: &[u8],
    ) -> StateResult<()> {
        let path = self.log_path(id, container);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    async fn read_manifest(&self, id: &ExecutionId) -> StateResult<ExecutionManifest> {
        let path = self.execution_dir(id).join(MANIFEST_FILE);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StateError::ExecutionNotFound {
                    execution_id: id.0.clone(),
                }
            } else {
                StateError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl ExecutionRegistry for FsExecutionStore {
    async fn get_execution(&self, id: &ExecutionId) -> StateResult<ExecutionRecord> {
        Ok(self.read_manifest(id).await?.record)
    }

    async fn get_phases(&self, id: &ExecutionId) -> StateResult<PhaseSnapshot> {
        Ok(self.read_manifest(id).await?.phases)
    }
}

#[async_trait]
impl LogSource for FsExecutionStore {
    async fn open_log(&self, id: &ExecutionId, request: &LogRequest) -> StateResult<LogStream> {
        let path = self.log_path(id, request.container.as_deref());
        debug!(path = %path.display(), follow = request.follow, "opening log file");
        let data = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StateError::LogNotFound {
                    execution_id: id.0.clone(),
                    container: request.container.clone().unwrap_or_default(),
                }
            } else {
                StateError::Io(e)
            }
        })?;
        Ok(Box::new(std::io::Cursor::new(apply_window(&data, request))))
    }
}
