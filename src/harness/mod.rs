//! Verification harness: runs a suite of probes against the service and
//! tallies a [`ScoreCard`].
//!
//! Probes run strictly one after another in suite order. A probe that
//! fails for any reason (fixture, transport, non-success envelope, missing
//! artifact, failed check) is recorded and the suite moves on; `run_suite`
//! itself never fails.

pub mod probe;
pub mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

pub use probe::{Probe, Suite};
pub use transport::{LocalTransport, Transport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Fixture {path} could not be installed: {message}")]
    Fixture { path: String, message: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Task returned {code}: {message}")]
    Rejected { code: u16, message: String },
    #[error("Artifact {artifact} failed check: {check}")]
    CheckFailed { artifact: String, check: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub name: String,
    pub passed: bool,
    pub error: Option<String>,
}

/// Final tally of a suite run. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreCard {
    identity: String,
    passed: usize,
    total: usize,
    results: Vec<ProbeResult>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl ScoreCard {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn passed(&self) -> usize {
        self.passed
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn results(&self) -> &[ProbeResult] {
        &self.results
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }
}

/// Accumulates probe results while a suite runs.
pub struct ScoreCardBuilder {
    identity: String,
    results: Vec<ProbeResult>,
    started_at: DateTime<Utc>,
}

impl ScoreCardBuilder {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            results: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn record(&mut self, name: &str, outcome: Result<(), ProbeError>) {
        self.results.push(ProbeResult {
            name: name.to_string(),
            passed: outcome.is_ok(),
            error: outcome.err().map(|e| e.to_string()),
        });
    }

    pub fn finish(self) -> ScoreCard {
        ScoreCard {
            identity: self.identity,
            passed: self.results.iter().filter(|r| r.passed).count(),
            total: self.results.len(),
            results: self.results,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

pub struct Harness {
    transport: Arc<dyn Transport>,
    fixture_root: PathBuf,
    suite: Suite,
}

impl Harness {
    /// `fixture_root` is the sandbox root the service works in; fixtures
    /// are written there and `{root}` in task text resolves to it.
    pub fn new(transport: Arc<dyn Transport>, fixture_root: impl Into<PathBuf>, suite: Suite) -> Self {
        Self {
            transport,
            fixture_root: fixture_root.into(),
            suite,
        }
    }

    pub async fn run_suite(&self, identity: &str) -> ScoreCard {
        info!(
            "Running {} probes for {identity}",
            self.suite.probes.len()
        );
        let mut card = ScoreCardBuilder::new(identity);

        for probe in &self.suite.probes {
            let outcome = self.run_probe(probe).await;
            match &outcome {
                Ok(()) => info!("✅ {} PASSED", probe.name),
                Err(e) => warn!("❌ {} FAILED: {e}", probe.name),
            }
            card.record(&probe.name, outcome);
        }

        let card = card.finish();
        info!("Score: {} / {}", card.passed(), card.total());
        card
    }

    async fn run_probe(&self, probe: &Probe) -> Result<(), ProbeError> {
        for fixture in &probe.fixtures {
            let installed = {
                let fixture = fixture.clone();
                let root = self.fixture_root.clone();
                tokio::task::spawn_blocking(move || fixture.install(&root)).await
            };
            let failure = match installed {
                Ok(Ok(_)) => None,
                Ok(Err(e)) => Some(format!("{e:#}")),
                Err(e) => Some(e.to_string()),
            };
            if let Some(message) = failure {
                return Err(ProbeError::Fixture {
                    path: fixture.path().to_string(),
                    message,
                });
            }
        }

        let envelope = self
            .transport
            .submit(&probe.task_for(&self.fixture_root))
            .await?;
        if !envelope.is_success() {
            return Err(ProbeError::Rejected {
                code: envelope.http_code(),
                message: envelope.output().as_text(),
            });
        }

        let artifact = self.transport.read(&probe.artifact).await?;
        if !probe.check.evaluate(&artifact) {
            return Err(ProbeError::CheckFailed {
                artifact: probe.artifact.clone(),
                check: probe.check.to_string(),
            });
        }
        Ok(())
    }
}
