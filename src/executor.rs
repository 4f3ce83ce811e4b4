//! Task executor: description → classification → sandbox validation →
//! handler → response envelope.
//!
//! Classification and sandbox errors are detected before any handler side
//! effect. Every outcome, including a panicking handler, becomes a
//! [`ResponseEnvelope`].

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::classifier::{Classifier, UnsupportedTask};
use crate::operations::{InvalidInput, OperationContext, Output};
use crate::sandbox::{PathLocks, SandboxGuard, SecurityError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    ClientError,
    ServerError,
}

impl Status {
    pub fn http_code(self) -> u16 {
        match self {
            Status::Success => 200,
            Status::ClientError => 400,
            Status::ServerError => 500,
        }
    }
}

/// Uniform result of one submitted task. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    status: Status,
    output: Output,
    http_code: u16,
}

impl ResponseEnvelope {
    pub fn success(output: Output) -> Self {
        Self {
            status: Status::Success,
            output,
            http_code: Status::Success.http_code(),
        }
    }

    pub fn failure(error: &TaskError) -> Self {
        let status = error.status();
        Self {
            status,
            output: Output::Text(error.to_string()),
            http_code: status.http_code(),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    pub fn http_code(&self) -> u16 {
        self.http_code
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// Everything that can go wrong with a submitted task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Unsupported(#[from] UnsupportedTask),
    #[error(transparent)]
    Security(#[from] SecurityError),
    /// The handler rejected its input.
    #[error("{0}")]
    Rejected(String),
    #[error("{0:#}")]
    Handler(anyhow::Error),
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    fn from_handler(error: anyhow::Error) -> Self {
        match error.downcast::<InvalidInput>() {
            Ok(InvalidInput(message)) => TaskError::Rejected(message),
            Err(error) => TaskError::Handler(error),
        }
    }

    pub fn status(&self) -> Status {
        match self {
            TaskError::Unsupported(_) | TaskError::Security(_) | TaskError::Rejected(_) => {
                Status::ClientError
            }
            TaskError::Handler(_) | TaskError::Panicked(_) => Status::ServerError,
        }
    }

    pub fn http_code(&self) -> u16 {
        self.status().http_code()
    }
}

fn panic_message(error: tokio::task::JoinError) -> String {
    match error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Err(error) => error.to_string(),
    }
}

pub struct TaskExecutor {
    classifier: Classifier,
    guard: SandboxGuard,
    locks: PathLocks,
}

impl TaskExecutor {
    pub fn new(classifier: Classifier, guard: SandboxGuard) -> Self {
        Self {
            classifier,
            guard,
            locks: PathLocks::new(),
        }
    }

    pub fn guard(&self) -> &SandboxGuard {
        &self.guard
    }

    /// Runs one task to completion and reports the outcome. Never fails.
    pub async fn execute(&self, description: &str) -> ResponseEnvelope {
        let request_id = Uuid::new_v4();
        let envelope = match self.run(request_id, description).await {
            Ok(output) => ResponseEnvelope::success(output),
            Err(e) => {
                warn!("[{request_id}] Task failed: {e}");
                ResponseEnvelope::failure(&e)
            }
        };
        info!("[{request_id}] Finished with {}", envelope.http_code());
        envelope
    }

    async fn run(&self, request_id: Uuid, description: &str) -> Result<Output, TaskError> {
        let task = self.classifier.classify(description)?;
        info!("[{request_id}] {description:?} → {}", task.kind);

        let params = self.guard.validate_params(task.params)?;

        // Held until the handler finishes, even if this future is dropped
        let lease = self.locks.acquire(params.paths()).await;
        let scratch = tempfile::Builder::new()
            .prefix(".taskpilot-")
            .tempdir_in(self.guard.root())
            .map_err(|e| TaskError::Handler(anyhow::Error::new(e).context("Cannot create scratch directory")))?;

        let context = OperationContext {
            root: self.guard.root().to_path_buf(),
            scratch: scratch.path().to_path_buf(),
        };
        let handler = task.handler;

        let outcome = tokio::spawn(async move {
            let result = handler.execute(&params, &context).await;
            drop(scratch);
            drop(lease);
            result
        })
        .await;

        match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(TaskError::from_handler(e)),
            Err(e) => Err(TaskError::Panicked(panic_message(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::classifier::rules::{Rule, RULES};
    use crate::config::OperationsConfig;
    use crate::operations::builtin::web::test_server::serve;
    use crate::operations::{invalid_input, Operation, OperationKind, OperationRegistry, OperationSpec};
    use crate::sandbox::{SandboxPolicy, ValidatedParams};

    fn rule(kind: OperationKind) -> &'static Rule {
        RULES.iter().find(|r| r.kind == kind).unwrap()
    }

    fn guard_for(root: &tempfile::TempDir) -> SandboxGuard {
        SandboxGuard::new(SandboxPolicy::new(root.path(), vec!["delete".to_string()]))
    }

    fn builtin_executor(root: &tempfile::TempDir, config: &OperationsConfig) -> TaskExecutor {
        let classifier = Classifier::new(OperationRegistry::builtin(config));
        TaskExecutor::new(classifier, guard_for(root))
    }

    /// Executor whose convert_markdown rule is bound to a custom handler.
    fn executor_with(root: &tempfile::TempDir, handler: Arc<dyn Operation>) -> TaskExecutor {
        let mut registry = OperationRegistry::new();
        registry
            .register(OperationSpec::new(rule(OperationKind::ConvertMarkdown), handler))
            .unwrap();
        TaskExecutor::new(Classifier::new(registry), guard_for(root))
    }

    fn entries(root: &tempfile::TempDir) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    struct Failing;

    #[async_trait]
    impl Operation for Failing {
        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _: &ValidatedParams, _: &OperationContext) -> anyhow::Result<Output> {
            Err(anyhow::anyhow!("disk on fire"))
        }
    }

    struct Rejecting;

    #[async_trait]
    impl Operation for Rejecting {
        fn description(&self) -> &str {
            "rejects its input"
        }

        async fn execute(&self, _: &ValidatedParams, _: &OperationContext) -> anyhow::Result<Output> {
            Err(invalid_input("bad markdown"))
        }
    }

    struct Panicking;

    #[async_trait]
    impl Operation for Panicking {
        fn description(&self) -> &str {
            "panics"
        }

        async fn execute(&self, _: &ValidatedParams, _: &OperationContext) -> anyhow::Result<Output> {
            panic!("handler exploded");
        }
    }

    /// Leaves a file in its scratch directory and reports where it was.
    struct ScratchUser;

    #[async_trait]
    impl Operation for ScratchUser {
        fn description(&self) -> &str {
            "writes to scratch"
        }

        async fn execute(&self, _: &ValidatedParams, context: &OperationContext) -> anyhow::Result<Output> {
            assert!(context.scratch.starts_with(&context.root));
            tokio::fs::write(context.scratch.join("tmp.bin"), b"x").await?;
            Ok(Output::from(context.scratch.display().to_string()))
        }
    }

    // ── envelope tests ─────────────────────────────────

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::Success.http_code(), 200);
        assert_eq!(Status::ClientError.http_code(), 400);
        assert_eq!(Status::ServerError.http_code(), 500);
    }

    #[test]
    fn test_envelope_serializes_snake_case() {
        let envelope = ResponseEnvelope::success(Output::from("ok"));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["http_code"], 200);
        assert_eq!(json["output"], "ok");

        let err = TaskError::Rejected("nope".to_string());
        let json = serde_json::to_value(ResponseEnvelope::failure(&err)).unwrap();
        assert_eq!(json["status"], "client_error");
    }

    #[test]
    fn test_error_mapping() {
        let unsupported = TaskError::from(UnsupportedTask {
            description: "x".to_string(),
        });
        assert_eq!(unsupported.http_code(), 400);

        let security = TaskError::from(SecurityError::OutsideSandbox {
            path: "/etc".to_string(),
        });
        assert_eq!(security.http_code(), 400);

        assert_eq!(TaskError::from_handler(invalid_input("bad")).http_code(), 400);
        assert_eq!(TaskError::from_handler(anyhow::anyhow!("io")).http_code(), 500);
        assert_eq!(TaskError::Panicked("boom".to_string()).http_code(), 500);
    }

    // ── execution tests ────────────────────────────────

    #[tokio::test]
    async fn test_unsupported_task_is_400_without_side_effects() {
        let root = tempfile::tempdir().unwrap();
        let executor = builtin_executor(&root, &OperationsConfig::default());

        let envelope = executor.execute("bake a cake").await;

        assert_eq!(envelope.status(), Status::ClientError);
        assert_eq!(envelope.http_code(), 400);
        assert!(envelope.output().as_text().contains("Unsupported task"));
        assert!(entries(&root).is_empty());
    }

    #[tokio::test]
    async fn test_path_outside_sandbox_is_400() {
        let root = tempfile::tempdir().unwrap();
        let executor = builtin_executor(&root, &OperationsConfig::default());

        let envelope = executor
            .execute("Sort the contacts in /etc/passwd and save to /etc/out.json")
            .await;

        assert_eq!(envelope.http_code(), 400);
        assert!(envelope.output().as_text().contains("outside"));
        assert!(entries(&root).is_empty());
    }

    #[tokio::test]
    async fn test_forbidden_token_is_400() {
        let root = tempfile::tempdir().unwrap();
        let executor = builtin_executor(&root, &OperationsConfig::default());
        let task = format!(
            "Sort the contacts in {}/delete-me.json",
            root.path().display()
        );

        let envelope = executor.execute(&task).await;

        assert_eq!(envelope.status(), Status::ClientError);
        assert!(entries(&root).is_empty());
    }

    #[tokio::test]
    async fn test_clone_into_root_is_400_and_keeps_files() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("precious.txt"), "keep me").unwrap();
        let config = OperationsConfig {
            repo_url: Some("https://example.invalid/repo.git".to_string()),
            ..OperationsConfig::default()
        };
        let executor = builtin_executor(&root, &config);
        let task = format!("Clone the git repo into {}", root.path().display());

        let envelope = executor.execute(&task).await;

        assert_eq!(envelope.status(), Status::ClientError, "{envelope:?}");
        assert!(root.path().join("precious.txt").exists());
        assert_eq!(entries(&root), vec!["precious.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_oversized_resize_is_400() {
        let root = tempfile::tempdir().unwrap();
        image::RgbaImage::new(8, 8)
            .save(root.path().join("image.png"))
            .unwrap();
        let executor = builtin_executor(&root, &OperationsConfig::default());

        let envelope = executor.execute("Resize the image to 100000x100000").await;

        assert_eq!(envelope.status(), Status::ClientError, "{envelope:?}");
        assert!(envelope.output().as_text().contains("exceeds the limit"));
        assert_eq!(entries(&root), vec!["image.png".to_string()]);
    }

    #[tokio::test]
    async fn test_handler_failure_is_500() {
        let root = tempfile::tempdir().unwrap();
        let executor = executor_with(&root, Arc::new(Failing));

        let envelope = executor.execute("convert markdown to html").await;

        assert_eq!(envelope.status(), Status::ServerError);
        assert_eq!(envelope.http_code(), 500);
        assert_eq!(envelope.output().as_text(), "disk on fire");
    }

    #[tokio::test]
    async fn test_handler_rejection_is_400() {
        let root = tempfile::tempdir().unwrap();
        let executor = executor_with(&root, Arc::new(Rejecting));

        let envelope = executor.execute("convert markdown to html").await;

        assert_eq!(envelope.http_code(), 400);
        assert_eq!(envelope.output().as_text(), "bad markdown");
    }

    #[tokio::test]
    async fn test_handler_panic_is_500() {
        let root = tempfile::tempdir().unwrap();
        let executor = executor_with(&root, Arc::new(Panicking));

        let envelope = executor.execute("convert markdown to html").await;

        assert_eq!(envelope.http_code(), 500);
        assert!(envelope.output().as_text().contains("handler exploded"));
        // Scratch is cleaned up during unwinding
        assert!(entries(&root).is_empty());
    }

    #[tokio::test]
    async fn test_scratch_is_removed_after_task() {
        let root = tempfile::tempdir().unwrap();
        let executor = executor_with(&root, Arc::new(ScratchUser));

        let envelope = executor.execute("convert markdown to html").await;

        assert!(envelope.is_success());
        let scratch = envelope.output().as_text();
        assert!(!std::path::Path::new(&scratch).exists());
        assert!(entries(&root).is_empty());
    }

    #[tokio::test]
    async fn test_missing_input_is_500() {
        let root = tempfile::tempdir().unwrap();
        let executor = builtin_executor(&root, &OperationsConfig::default());

        let envelope = executor.execute("convert markdown to html").await;

        assert_eq!(envelope.status(), Status::ServerError);
        assert!(envelope.output().as_text().contains("document.md"));
    }

    // ── end-to-end tests ───────────────────────────────

    #[tokio::test]
    async fn test_count_wednesdays_end_to_end() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("dates.txt"), "2024-01-03\n2024-01-10\n2024-01-04\n").unwrap();
        let executor = builtin_executor(&root, &OperationsConfig::default());

        let envelope = executor
            .execute("count how many dates in the file are Wednesdays")
            .await;

        assert!(envelope.is_success(), "{envelope:?}");
        let written = std::fs::read_to_string(root.path().join("dates-wednesdays.txt")).unwrap();
        assert_eq!(written.trim(), "2");
    }

    #[tokio::test]
    async fn test_sort_contacts_end_to_end() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(
            root.path().join("contacts.json"),
            r#"[{"first_name":"B","last_name":"Z"},{"first_name":"A","last_name":"A"}]"#,
        )
        .unwrap();
        let executor = builtin_executor(&root, &OperationsConfig::default());

        let envelope = executor.execute("Sort the contacts by last name").await;

        assert!(envelope.is_success(), "{envelope:?}");
        let sorted: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(root.path().join("contacts-sorted.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(sorted[0]["first_name"], "A");
        assert_eq!(sorted[0]["last_name"], "A");
    }

    #[tokio::test]
    async fn test_fetch_twice_is_idempotent() {
        let url = serve("application/json", r#"[{"id":1,"title":"hello"}]"#).await;
        let root = tempfile::tempdir().unwrap();
        let config = OperationsConfig {
            api_url: url,
            ..OperationsConfig::default()
        };
        let executor = builtin_executor(&root, &config);
        let task = "fetch data from the example API and save it";

        let first = executor.execute(task).await;
        assert!(first.is_success(), "{first:?}");
        let first_content = std::fs::read_to_string(root.path().join("api_data.json")).unwrap();

        let second = executor.execute(task).await;
        assert!(second.is_success(), "{second:?}");
        let second_content = std::fs::read_to_string(root.path().join("api_data.json")).unwrap();

        assert_eq!(first_content, second_content);
    }

    #[tokio::test]
    async fn test_concurrent_tasks_on_same_file_both_succeed() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("document.md"), "# Title\n").unwrap();
        let executor = Arc::new(builtin_executor(&root, &OperationsConfig::default()));

        let a = tokio::spawn({
            let executor = executor.clone();
            async move { executor.execute("convert markdown to html").await }
        });
        let b = tokio::spawn({
            let executor = executor.clone();
            async move { executor.execute("convert markdown to html").await }
        });

        assert!(a.await.unwrap().is_success());
        assert!(b.await.unwrap().is_success());
        let html = std::fs::read_to_string(root.path().join("document.html")).unwrap();
        assert!(html.contains("<h1>Title</h1>"));
    }
}
