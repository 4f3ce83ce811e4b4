//! Intent classification: free-text task description → operation + parameters.
//!
//! Intentionally a coarse keyword rule engine, not a language model. See
//! [`rules`] for the precedence-ordered table.

pub mod rules;

use std::sync::Arc;

use tracing::debug;

use crate::operations::{Operation, OperationKind, OperationRegistry, TaskParams};

/// No rule accepted the description.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported task: {description}")]
pub struct UnsupportedTask {
    pub description: String,
}

/// A description resolved to its operation, ready for sandbox validation.
#[derive(Clone)]
pub struct ClassifiedTask {
    pub kind: OperationKind,
    pub params: TaskParams,
    pub handler: Arc<dyn Operation>,
}

impl std::fmt::Debug for ClassifiedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifiedTask")
            .field("kind", &self.kind)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

pub struct Classifier {
    registry: OperationRegistry,
}

impl Classifier {
    pub fn new(registry: OperationRegistry) -> Self {
        Self { registry }
    }

    /// Maps a description to the first matching operation in registration
    /// order and extracts that operation's parameters.
    ///
    /// Pure: the same text always yields the same kind and parameters.
    pub fn classify(&self, description: &str) -> Result<ClassifiedTask, UnsupportedTask> {
        let lowered = description.to_lowercase();
        let spec = self
            .registry
            .lookup(&lowered)
            .ok_or_else(|| UnsupportedTask {
                description: description.to_string(),
            })?;

        let params = spec.rule.extract(description);
        debug!("Classified as {}: {:?}", spec.kind(), params);

        Ok(ClassifiedTask {
            kind: spec.kind(),
            params,
            handler: spec.handler.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperationsConfig;

    fn classifier() -> Classifier {
        Classifier::new(OperationRegistry::builtin(&OperationsConfig::default()))
    }

    fn kind_of(description: &str) -> OperationKind {
        classifier().classify(description).unwrap().kind
    }

    #[test]
    fn test_reference_phrasings() {
        let cases = [
            ("Install uv (if required) and run datagen.py", OperationKind::InstallUv),
            ("Format the contents of /data/format.md using prettier@3.4.2", OperationKind::FormatMarkdown),
            ("count how many dates in the file are Wednesdays", OperationKind::CountWeekdays),
            ("Sort contacts by last_name, then first_name", OperationKind::SortContacts),
            ("Write the first line of the 10 most recent log files", OperationKind::RecentLogs),
            ("Index markdown files in /data/docs", OperationKind::IndexMarkdown),
            ("Extract email sender from /data/email.txt", OperationKind::ExtractEmailSender),
            ("Find similar comments in /data/comments.txt", OperationKind::SimilarComments),
            ("Calculate ticket sales for Gold", OperationKind::TicketSales),
            ("Clone a git repo and make a commit", OperationKind::CloneRepo),
            ("Run SQL query 'SELECT 1' on /data/test.db", OperationKind::RunSql),
            ("Fetch content from https://news.ycombinator.com/ and save it", OperationKind::ScrapeWebsite),
            ("Scrape https://example.com", OperationKind::ScrapeWebsite),
            ("fetch data from the example API and save it", OperationKind::FetchApi),
            ("Resize /data/input.jpg to 50x50", OperationKind::ResizeImage),
            ("Transcribe /data/audio.mp3", OperationKind::TranscribeAudio),
            ("Convert Markdown /data/input.md to HTML", OperationKind::ConvertMarkdown),
            ("Filter /data/data.csv where category is Technology", OperationKind::FilterCsv),
        ];
        for (description, expected) in cases {
            assert_eq!(kind_of(description), expected, "{description}");
        }
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        assert_eq!(kind_of("SORT CONTACTS NOW"), OperationKind::SortContacts);
    }

    #[test]
    fn test_precedence_markdown_conversion_of_index_file() {
        // Mentions "index" and "markdown" but not "markdown files"
        assert_eq!(
            kind_of("Convert Markdown /data/index.md to HTML"),
            OperationKind::ConvertMarkdown
        );
    }

    #[test]
    fn test_precedence_format_before_conversion() {
        assert_eq!(
            kind_of("Format the markdown with prettier, then render html"),
            OperationKind::FormatMarkdown
        );
    }

    #[test]
    fn test_precedence_scrape_before_fetch() {
        assert_eq!(
            kind_of("Fetch content from https://example.com and save the data"),
            OperationKind::ScrapeWebsite
        );
    }

    #[test]
    fn test_precedence_ticket_sales_before_sql() {
        assert_eq!(
            kind_of("Calculate ticket sales with an SQL query"),
            OperationKind::TicketSales
        );
    }

    #[test]
    fn test_unsupported_task_carries_description() {
        let err = classifier().classify("make me a sandwich").unwrap_err();
        assert_eq!(err.description, "make me a sandwich");
        assert!(err.to_string().contains("make me a sandwich"));
    }

    #[test]
    fn test_classify_is_pure() {
        let classifier = classifier();
        let description = "Resize /data/input.jpg to 50x50 and save to /data/output.jpg";
        let first = classifier.classify(description).unwrap();
        let second = classifier.classify(description).unwrap();
        assert_eq!(first.kind, second.kind);
        assert_eq!(first.params, second.params);
    }
}
