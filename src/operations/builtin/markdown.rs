use std::time::Duration;

use async_trait::async_trait;
use pulldown_cmark::{html, Options, Parser};

use crate::config::OperationsConfig;
use crate::operations::{Operation, OperationContext, Output};
use crate::sandbox::ValidatedParams;

use super::commands::run_command;
use super::{read_text, write_artifact};

/// Renders a Markdown document to an HTML fragment.
pub struct ConvertMarkdownOperation;

fn render_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(markdown, options);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

#[async_trait]
impl Operation for ConvertMarkdownOperation {
    fn description(&self) -> &str {
        "Convert a Markdown file to HTML"
    }

    async fn execute(
        &self,
        params: &ValidatedParams,
        context: &OperationContext,
    ) -> anyhow::Result<Output> {
        let input = params.path("input")?;
        let output = params.path("output")?;

        let rendered = render_html(&read_text(input).await?);
        write_artifact(context, output, rendered).await?;

        Ok(Output::from(format!("Converted {} to HTML", input.display())))
    }
}

/// Formats a Markdown file in place with the requested prettier version.
pub struct FormatMarkdownOperation {
    timeout: Duration,
}

impl FormatMarkdownOperation {
    pub fn new(config: &OperationsConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }
}

#[async_trait]
impl Operation for FormatMarkdownOperation {
    fn description(&self) -> &str {
        "Format a Markdown file in place with prettier"
    }

    async fn execute(
        &self,
        params: &ValidatedParams,
        context: &OperationContext,
    ) -> anyhow::Result<Output> {
        let input = params.path("input")?;
        let formatter = params.value("formatter").unwrap_or("prettier@3.4.2");

        let input_str = input.to_string_lossy();
        run_command(
            "npx",
            &["--yes", formatter, "--write", &input_str],
            Some(&context.root),
            self.timeout,
        )
        .await?;

        Ok(Output::from(format!(
            "Formatted {} with {formatter}",
            input.display()
        )))
    }
}
