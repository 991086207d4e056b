//! Процессы инференса: постоянные воркеры и разовый запуск CLI

pub mod oneshot;
pub mod pool;
pub mod protocol;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use oneshot::run_oneshot;
pub use pool::{Worker, WorkerLaunch, WorkerPool, WorkerState};
pub use protocol::{ControlCommand, ReadyMessage, SynthesisRequest, WorkerResponse};

/// Ключ воркера: устройство и точность
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerKey {
    pub device: String,
    pub precision: String,
}

impl WorkerKey {
    pub fn new(device: impl Into<String>, precision: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            precision: precision.into(),
        }
    }
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.precision)
    }
}

/// Сбои одной попытки синтеза
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to start worker {key}: {source}")]
    Spawn {
        key: WorkerKey,
        #[source]
        source: std::io::Error,
    },

    #[error("worker {key} failed readiness handshake: {reason}")]
    Handshake { key: WorkerKey, reason: String },

    #[error("worker {key} timed out after {after:?}")]
    Timeout { key: WorkerKey, after: Duration },

    #[error("worker {key} rejected request: {error}")]
    Rejected { key: WorkerKey, error: String },

    #[error("worker {key} reported success but {} is missing or empty", .path.display())]
    MissingOutput { key: WorkerKey, path: PathBuf },

    #[error("worker {key} exited: {detail}")]
    Dead { key: WorkerKey, detail: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("worker IO error: {0}")]
    Io(#[from] std::io::Error),
}
