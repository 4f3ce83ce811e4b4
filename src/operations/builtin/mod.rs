pub mod commands;
pub mod comments;
pub mod contacts;
pub mod dates;
pub mod docs;
pub mod email;
pub mod images;
pub mod logs;
pub mod markdown;
pub mod sql;
pub mod tabular;
pub mod web;

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context};

use crate::config::OperationsConfig;

use super::{Operation, OperationContext, OperationKind};

pub use commands::{CloneRepoOperation, InstallUvOperation, TranscribeAudioOperation};
pub use comments::SimilarCommentsOperation;
pub use contacts::SortContactsOperation;
pub use dates::CountWeekdaysOperation;
pub use docs::IndexMarkdownOperation;
pub use email::EmailSenderOperation;
pub use images::ResizeImageOperation;
pub use logs::RecentLogsOperation;
pub use markdown::{ConvertMarkdownOperation, FormatMarkdownOperation};
pub use sql::{RunSqlOperation, TicketSalesOperation};
pub use tabular::FilterCsvOperation;
pub use web::{FetchApiOperation, ScrapeWebsiteOperation};

/// Builds the handler bound to an operation kind.
pub fn handler_for(kind: OperationKind, config: &OperationsConfig) -> Arc<dyn Operation> {
    match kind {
        OperationKind::InstallUv => Arc::new(InstallUvOperation::new(config)),
        OperationKind::FormatMarkdown => Arc::new(FormatMarkdownOperation::new(config)),
        OperationKind::CountWeekdays => Arc::new(CountWeekdaysOperation),
        OperationKind::SortContacts => Arc::new(SortContactsOperation),
        OperationKind::RecentLogs => Arc::new(RecentLogsOperation),
        OperationKind::IndexMarkdown => Arc::new(IndexMarkdownOperation),
        OperationKind::ExtractEmailSender => Arc::new(EmailSenderOperation),
        OperationKind::SimilarComments => Arc::new(SimilarCommentsOperation),
        OperationKind::TicketSales => Arc::new(TicketSalesOperation),
        OperationKind::CloneRepo => Arc::new(CloneRepoOperation::new(config)),
        OperationKind::RunSql => Arc::new(RunSqlOperation),
        OperationKind::ScrapeWebsite => Arc::new(ScrapeWebsiteOperation::new(config)),
        OperationKind::FetchApi => Arc::new(FetchApiOperation::new(config)),
        OperationKind::ResizeImage => Arc::new(ResizeImageOperation),
        OperationKind::TranscribeAudio => Arc::new(TranscribeAudioOperation::new(config)),
        OperationKind::ConvertMarkdown => Arc::new(ConvertMarkdownOperation),
        OperationKind::FilterCsv => Arc::new(FilterCsvOperation),
    }
}

/// Writes an artifact atomically: staged in the task's scratch directory,
/// then renamed over the destination. Re-running a task simply replaces
/// the previous artifact.
pub(crate) async fn write_artifact(
    context: &OperationContext,
    dest: &Path,
    contents: impl AsRef<[u8]>,
) -> anyhow::Result<()> {
    let staged = context
        .scratch
        .join(format!("{}.partial", uuid::Uuid::new_v4()));
    tokio::fs::write(&staged, contents.as_ref())
        .await
        .with_context(|| format!("Cannot stage {}", dest.display()))?;
    move_into_place(&staged, dest).await
}

/// Renames a file produced in scratch onto its final path.
pub(crate) async fn move_into_place(staged: &Path, dest: &Path) -> anyhow::Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(staged, dest)
        .await
        .with_context(|| format!("Cannot write {}", dest.display()))
}

pub(crate) async fn read_text(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Cannot read {}", path.display()))
}

/// Runs blocking library work (SQLite, codecs, directory walks) off the
/// async runtime.
pub(crate) async fn blocking<T, F>(work: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| anyhow!("Blocking task failed: {e}"))?
}
