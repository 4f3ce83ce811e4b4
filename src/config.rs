use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::sandbox::SandboxPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub operations: OperationsConfig,
    #[serde(default)]
    pub harness: HarnessConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    /// Directory every task is confined to
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Case-insensitive tokens that reject a path outright
    #[serde(default = "default_forbidden")]
    pub forbidden: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OperationsConfig {
    /// Supports ${ENV_VAR} substitution
    #[serde(default)]
    pub user_email: Option<String>,
    /// Script run by `install_uv` once uv is available
    #[serde(default)]
    pub datagen_url: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_scrape_url")]
    pub scrape_url: String,
    #[serde(default)]
    pub repo_url: Option<String>,
    /// Command template, `{input}` is replaced by the audio path
    #[serde(default)]
    pub transcriber: Vec<String>,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HarnessConfig {
    #[serde(default = "default_identity")]
    pub identity: String,
    /// Bounded wait applied to every submission and artifact read
    #[serde(default = "default_harness_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub suite: Option<PathBuf>,
}

fn default_root() -> PathBuf {
    PathBuf::from("/data")
}

fn default_forbidden() -> Vec<String> {
    vec!["delete".to_string()]
}

fn default_api_url() -> String {
    "https://jsonplaceholder.typicode.com/posts".to_string()
}

fn default_scrape_url() -> String {
    "https://example.com".to_string()
}

fn default_command_timeout() -> u64 {
    120
}

fn default_identity() -> String {
    "user@example.com".to_string()
}

fn default_harness_timeout() -> u64 {
    30
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            forbidden: default_forbidden(),
        }
    }
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            user_email: None,
            datagen_url: None,
            api_url: default_api_url(),
            scrape_url: default_scrape_url(),
            repo_url: None,
            transcriber: Vec::new(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            timeout_secs: default_harness_timeout(),
            suite: None,
        }
    }
}

impl SandboxConfig {
    /// The process-wide policy handed to the sandbox guard at startup.
    pub fn policy(&self) -> SandboxPolicy {
        SandboxPolicy::new(self.root.clone(), self.forbidden.iter().cloned())
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        // Expand environment variables like ${USER_EMAIL}
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }
}
