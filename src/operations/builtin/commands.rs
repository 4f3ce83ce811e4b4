//! Operations backed by external programs (uv, git, a transcriber).
//!
//! Every program runs with a bounded wait, no stdin, and is killed if the
//! task is dropped before it finishes.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::OperationsConfig;
use crate::operations::{invalid_input, Operation, OperationContext, Output};
use crate::sandbox::ValidatedParams;

use super::{move_into_place, write_artifact};

/// Runs a program to completion and returns its stdout.
/// A non-zero exit status is an error carrying stderr.
pub(crate) async fn run_command(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> anyhow::Result<String> {
    debug!("Running {program} {}", args.join(" "));

    let mut command = tokio::process::Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| anyhow!("{program} timed out after {}s", timeout.as_secs()))?
        .with_context(|| format!("Cannot run {program}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// ── install_uv ─────────────────────────────────────────

/// Ensures `uv` is installed, then runs the configured data generation
/// script with the user's email.
pub struct InstallUvOperation {
    user_email: Option<String>,
    datagen_url: Option<String>,
    timeout: Duration,
}

impl InstallUvOperation {
    pub fn new(config: &OperationsConfig) -> Self {
        Self {
            user_email: config.user_email.clone(),
            datagen_url: config.datagen_url.clone(),
            timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }
}

#[async_trait]
impl Operation for InstallUvOperation {
    fn description(&self) -> &str {
        "Install uv if missing and run the data generation script"
    }

    async fn execute(
        &self,
        params: &ValidatedParams,
        context: &OperationContext,
    ) -> anyhow::Result<Output> {
        if run_command("uv", &["--version"], None, self.timeout).await.is_err() {
            info!("uv not found, installing with pip");
            run_command("pip", &["install", "--user", "uv"], None, self.timeout).await?;
        }

        let Some(ref script) = self.datagen_url else {
            return Ok(Output::from("uv is available (no data generation script configured)"));
        };
        let email = params
            .value("email")
            .or(self.user_email.as_deref())
            .ok_or_else(|| invalid_input("No user email in the task and none configured"))?;
        let root = context.root.to_string_lossy();

        run_command(
            "uv",
            &["run", script, email, "--root", &root],
            Some(&context.root),
            self.timeout,
        )
        .await?;

        Ok(Output::from(format!("Installed uv and ran {script}")))
    }
}

// ── clone_repo ─────────────────────────────────────────

const COMMIT_MESSAGE: &str = "Automated update";

/// Clones a git repository into the sandbox, appends a line to its README
/// and commits. Any previous clone at the target is replaced.
pub struct CloneRepoOperation {
    repo_url: Option<String>,
    user_email: Option<String>,
    timeout: Duration,
}

impl CloneRepoOperation {
    pub fn new(config: &OperationsConfig) -> Self {
        Self {
            repo_url: config.repo_url.clone(),
            user_email: config.user_email.clone(),
            timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }
}

#[async_trait]
impl Operation for CloneRepoOperation {
    fn description(&self) -> &str {
        "Clone a git repository, update its README and commit"
    }

    async fn execute(
        &self,
        params: &ValidatedParams,
        context: &OperationContext,
    ) -> anyhow::Result<Output> {
        let dir = params.path("dir")?;
        ensure_replaceable(dir, context)?;
        let url = params
            .value("url")
            .or(self.repo_url.as_deref())
            .ok_or_else(|| invalid_input("No repository URL in the task and none configured"))?;

        // Clone into scratch so a failed clone leaves the old checkout intact
        let staged = context.scratch.join("repo");
        let staged_str = staged.to_string_lossy();
        run_command("git", &["clone", url, &staged_str], None, self.timeout).await?;

        let readme = staged.join("README.md");
        let mut content = tokio::fs::read_to_string(&readme).await.unwrap_or_default();
        content.push_str("\nUpdated via automation.\n");
        tokio::fs::write(&readme, content).await?;

        let email = format!(
            "user.email={}",
            self.user_email.as_deref().unwrap_or("taskpilot@localhost")
        );
        run_command("git", &["add", "."], Some(&staged), self.timeout).await?;
        run_command(
            "git",
            &["-c", "user.name=taskpilot", "-c", &email, "commit", "-m", COMMIT_MESSAGE],
            Some(&staged),
            self.timeout,
        )
        .await?;

        if tokio::fs::try_exists(dir).await? {
            tokio::fs::remove_dir_all(dir).await?;
        }
        move_into_place(&staged, dir).await?;

        Ok(Output::from(format!(
            "Cloned {url} into {} and committed",
            dir.display()
        )))
    }
}

/// The checkout replaces `dir` wholesale, so `dir` must sit strictly below
/// the root and must not contain the task's own scratch directory.
fn ensure_replaceable(dir: &Path, context: &OperationContext) -> anyhow::Result<()> {
    let resolved = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
    let root = std::fs::canonicalize(&context.root).unwrap_or_else(|_| context.root.clone());
    if dir == context.root
        || resolved == root
        || context.scratch.starts_with(dir)
        || !dir.starts_with(&context.root)
    {
        return Err(invalid_input(format!(
            "Refusing to replace {}: the clone target must be a directory inside the sandbox",
            dir.display()
        )));
    }
    Ok(())
}

// ── transcribe_audio ───────────────────────────────────

/// Transcribes an audio file with the configured command and saves its
/// standard output.
pub struct TranscribeAudioOperation {
    command: Vec<String>,
    timeout: Duration,
}

impl TranscribeAudioOperation {
    pub fn new(config: &OperationsConfig) -> Self {
        Self {
            command: config.transcriber.clone(),
            timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }
}

#[async_trait]
impl Operation for TranscribeAudioOperation {
    fn description(&self) -> &str {
        "Transcribe an audio file to text with the configured transcriber"
    }

    async fn execute(
        &self,
        params: &ValidatedParams,
        context: &OperationContext,
    ) -> anyhow::Result<Output> {
        let input = params.path("input")?;
        let output = params.path("output")?;

        let Some((program, template)) = self.command.split_first() else {
            return Err(anyhow!("No transcriber command configured"));
        };
        if !tokio::fs::try_exists(input).await? {
            return Err(anyhow!("Audio file not found: {}", input.display()));
        }

        let input_str = input.to_string_lossy();
        let args: Vec<String> = template
            .iter()
            .map(|arg| arg.replace("{input}", &input_str))
            .collect();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let transcript = run_command(program, &args, None, self.timeout).await?;
        write_artifact(context, output, transcript.trim()).await?;

        Ok(Output::from(format!("Transcribed {}", input.display())))
    }
}
