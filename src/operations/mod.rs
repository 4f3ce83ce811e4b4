pub mod builtin;
pub mod kind;
pub mod params;
pub mod registry;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::sandbox::ValidatedParams;

pub use kind::OperationKind;
pub use params::TaskParams;
pub use registry::{OperationRegistry, OperationSpec};

/// Runtime context passed to handler execution.
///
/// Owned by the executor for the duration of a single task.
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// Sandbox root (absolute, normalized).
    pub root: PathBuf,
    /// Per-task scratch directory inside the root. Removed by the executor
    /// once the handler returns, whatever the outcome.
    pub scratch: PathBuf,
}

/// Handler result payload: plain text or structured JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Output {
    Text(String),
    Json(serde_json::Value),
}

impl Output {
    /// Text form, JSON rendered compactly.
    pub fn as_text(&self) -> String {
        match self {
            Output::Text(text) => text.clone(),
            Output::Json(value) => value.to_string(),
        }
    }
}

impl From<String> for Output {
    fn from(text: String) -> Self {
        Output::Text(text)
    }
}

impl From<&str> for Output {
    fn from(text: &str) -> Self {
        Output::Text(text.to_string())
    }
}

impl From<serde_json::Value> for Output {
    fn from(value: serde_json::Value) -> Self {
        Output::Json(value)
    }
}

/// Raised by a handler when the task's input is the caller's fault
/// (malformed data, unusable arguments). Mapped to a client error.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct InvalidInput(pub String);

/// Shorthand for returning an [`InvalidInput`] from a handler.
pub fn invalid_input(message: impl Into<String>) -> anyhow::Error {
    InvalidInput(message.into()).into()
}

/// A single action the service can perform.
///
/// Handlers are opaque collaborators: they receive already-validated
/// parameters, perform their side effects, and report failures as errors
/// rather than silent no-ops. They must be safe to re-invoke.
#[async_trait]
pub trait Operation: Send + Sync {
    /// One-line summary shown by `taskpilot operations`.
    fn description(&self) -> &str;

    async fn execute(
        &self,
        params: &ValidatedParams,
        context: &OperationContext,
    ) -> anyhow::Result<Output>;
}
