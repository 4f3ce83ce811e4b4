use std::path::PathBuf;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::operations::{invalid_input, Operation, OperationContext, Output};
use crate::sandbox::ValidatedParams;

use super::write_artifact;

/// Writes the first line of the N most recently modified `.log` files,
/// newest first.
pub struct RecentLogsOperation;

async fn recent_logs(dir: &std::path::Path, count: usize) -> anyhow::Result<Vec<PathBuf>> {
    let mut logs: Vec<(SystemTime, PathBuf)> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            logs.push((metadata.modified()?, path));
        }
    }
    // Newest first; ties broken by name for a stable order
    logs.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    Ok(logs.into_iter().take(count).map(|(_, p)| p).collect())
}

async fn first_line(path: &std::path::Path) -> anyhow::Result<String> {
    let file = tokio::fs::File::open(path).await?;
    let mut line = String::new();
    BufReader::new(file).read_line(&mut line).await?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[async_trait]
impl Operation for RecentLogsOperation {
    fn description(&self) -> &str {
        "Write the first line of the most recent .log files in a directory"
    }

    async fn execute(
        &self,
        params: &ValidatedParams,
        context: &OperationContext,
    ) -> anyhow::Result<Output> {
        let dir = params.path("dir")?;
        let output = params.path("output")?;
        let count: usize = params
            .value("count")
            .unwrap_or("10")
            .parse()
            .map_err(|_| invalid_input("Log count must be a positive integer"))?;

        let mut lines = String::new();
        let logs = recent_logs(dir, count).await?;
        for log in &logs {
            lines.push_str(&first_line(log).await?);
            lines.push('\n');
        }

        write_artifact(context, output, lines).await?;
        Ok(Output::from(format!(
            "Extracted the first line of {} recent log files",
            logs.len()
        )))
    }
}
