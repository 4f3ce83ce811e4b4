//! The boundary between the harness and the service: submit a task, read
//! an artifact. Both calls are bounded by a timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::executor::{ResponseEnvelope, TaskExecutor};
use crate::sandbox::SecurityError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),
    #[error("Artifact not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Denied(#[from] SecurityError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Submits a task description and waits for its envelope.
    async fn submit(&self, task: &str) -> Result<ResponseEnvelope, TransportError>;

    /// Reads an artifact by path. Reads are confined to the sandbox too.
    async fn read(&self, path: &str) -> Result<Vec<u8>, TransportError>;
}

/// In-process transport straight into a [`TaskExecutor`].
pub struct LocalTransport {
    executor: Arc<TaskExecutor>,
    timeout: Duration,
}

impl LocalTransport {
    pub fn new(executor: Arc<TaskExecutor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn submit(&self, task: &str) -> Result<ResponseEnvelope, TransportError> {
        tokio::time::timeout(self.timeout, self.executor.execute(task))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        let resolved = self.executor.guard().validate(path)?;
        debug!("Reading artifact {}", resolved.display());

        match tokio::time::timeout(self.timeout, tokio::fs::read(&resolved)).await {
            Err(_) => Err(TransportError::Timeout(self.timeout)),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TransportError::NotFound(path.to_string()))
            }
            Ok(result) => Ok(result?),
        }
    }
}
