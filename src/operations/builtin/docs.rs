use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use walkdir::WalkDir;

use crate::operations::{Operation, OperationContext, Output};
use crate::sandbox::ValidatedParams;

use super::{blocking, write_artifact};

/// Maps every Markdown file under a directory (relative path, `/`
/// separated) to the text of its first H1 heading.
pub struct IndexMarkdownOperation;

fn first_heading(content: &str) -> Option<String> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|title| title.trim().to_string())
}

fn build_index(dir: &Path, skip: &Path) -> anyhow::Result<BTreeMap<String, String>> {
    let mut index = BTreeMap::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().is_file()
            || path == skip
            || path.extension().and_then(|e| e.to_str()) != Some("md")
        {
            continue;
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        if let Some(title) = first_heading(&content) {
            let relative = path
                .strip_prefix(dir)?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            index.insert(relative, title);
        }
    }
    Ok(index)
}

#[async_trait]
impl Operation for IndexMarkdownOperation {
    fn description(&self) -> &str {
        "Index Markdown files by their first H1 heading into a JSON file"
    }

    async fn execute(
        &self,
        params: &ValidatedParams,
        context: &OperationContext,
    ) -> anyhow::Result<Output> {
        let dir = params.path("dir")?.to_path_buf();
        let output = params.path("output")?;

        let skip = output.to_path_buf();
        let index = blocking(move || build_index(&dir, &skip)).await?;

        write_artifact(context, output, serde_json::to_string_pretty(&index)?).await?;
        Ok(Output::from(format!("Indexed {} Markdown files", index.len())))
    }
}
