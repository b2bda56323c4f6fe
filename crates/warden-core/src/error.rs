use std::path::PathBuf;

use thiserror::Error;

use crate::domain::TaskId;

#[derive(Debug, Error)]
pub enum WardenError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("failed to spawn worker {worker_id}: {reason}")]
    Spawn { worker_id: usize, reason: String },

    #[error("input channel of worker {0} is closed")]
    WorkerChannelClosed(usize),

    #[error("unknown worker id {0}")]
    UnknownWorker(usize),

    #[error("task {0} is already pending or running")]
    DuplicateTask(TaskId),
}

impl WardenError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
