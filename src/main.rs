mod classifier;
mod config;
mod executor;
mod harness;
mod operations;
mod sandbox;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::classifier::rules::ParamKind;
use crate::classifier::Classifier;
use crate::config::Config;
use crate::executor::TaskExecutor;
use crate::harness::{Harness, LocalTransport, Suite, Transport};
use crate::operations::OperationRegistry;
use crate::sandbox::SandboxGuard;

/// Plain-English task automation inside a sandboxed data directory.
#[derive(Parser)]
#[command(name = "taskpilot", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "TASKPILOT_CONFIG", default_value = "config/taskpilot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute one task and print its response envelope as JSON
    Run {
        /// Task description, e.g. "Sort the contacts by last name"
        #[arg(required = true, num_args = 1..)]
        task: Vec<String>,
    },
    /// Print an artifact from the sandbox
    Read {
        path: String,
    },
    /// Run the verification suite and print the score card
    Suite {
        /// Identity recorded on the score card
        #[arg(long)]
        identity: Option<String>,
        /// TOML suite file (defaults to the builtin probes)
        #[arg(long)]
        suite: Option<PathBuf>,
        /// Run only the named probes (repeatable)
        #[arg(long)]
        only: Vec<String>,
        /// Also write the score card JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// List operations in classification order
    Operations,
}

fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        warn!("Config file {} not found, using defaults", path.display());
        return Ok(Config::default());
    }
    info!("Loading configuration from {}", path.display());
    Config::load(path).with_context(|| format!("Invalid config file {}", path.display()))
}

fn build_executor(config: &Config) -> Result<TaskExecutor> {
    let policy = config.sandbox.policy();
    std::fs::create_dir_all(policy.root())
        .with_context(|| format!("Cannot create sandbox root {}", policy.root().display()))?;

    let registry = OperationRegistry::builtin(&config.operations);
    info!(
        "Sandbox: {} ({} operations registered)",
        policy.root().display(),
        registry.len()
    );
    Ok(TaskExecutor::new(Classifier::new(registry), SandboxGuard::new(policy)))
}

fn print_operations(registry: &OperationRegistry) {
    for (position, spec) in registry.iter().enumerate() {
        let params: Vec<String> = spec
            .rule
            .params
            .iter()
            .map(|p| match (p.kind, p.always) {
                (ParamKind::Path, _) => format!("{} (path)", p.name),
                (ParamKind::Value, true) => p.name.to_string(),
                (ParamKind::Value, false) => format!("{}?", p.name),
            })
            .collect();
        println!(
            "{:>2}. {:<22} {}\n    {}\n    params: {}",
            position + 1,
            spec.kind().as_str(),
            spec.rule.predicate(),
            spec.handler.description(),
            if params.is_empty() { "-".to_string() } else { params.join(", ") }
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only results
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("taskpilot=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Run { task } => {
            let executor = build_executor(&config)?;
            let envelope = executor.execute(&task.join(" ")).await;
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            if !envelope.is_success() {
                std::process::exit(1);
            }
        }
        Command::Read { path } => {
            let executor = Arc::new(build_executor(&config)?);
            let transport =
                LocalTransport::new(executor, Duration::from_secs(config.harness.timeout_secs));
            let bytes = transport.read(&path).await?;
            std::io::stdout().write_all(&bytes)?;
        }
        Command::Suite {
            identity,
            suite,
            only,
            report,
        } => {
            let executor = Arc::new(build_executor(&config)?);
            let root = executor.guard().root().to_path_buf();
            let suite = match suite.or(config.harness.suite.clone()) {
                Some(path) => Suite::load(&path)?,
                None => Suite::builtin(),
            };
            let suite = if only.is_empty() {
                suite
            } else {
                let names: Vec<&str> = only.iter().map(String::as_str).collect();
                suite.only(&names)
            };
            let transport =
                LocalTransport::new(executor, Duration::from_secs(config.harness.timeout_secs));

            let harness = Harness::new(Arc::new(transport), root, suite);
            let identity = identity.unwrap_or_else(|| config.harness.identity.clone());
            let card = harness.run_suite(&identity).await;

            let json = serde_json::to_string_pretty(&card)?;
            if let Some(report) = report {
                std::fs::write(&report, &json)
                    .with_context(|| format!("Cannot write report {}", report.display()))?;
                info!("Score card written to {}", report.display());
            }
            println!("{json}");
        }
        Command::Operations => {
            print_operations(&OperationRegistry::builtin(&config.operations));
        }
    }

    Ok(())
}
