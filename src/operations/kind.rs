use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of operations the service knows how to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    InstallUv,
    FormatMarkdown,
    CountWeekdays,
    SortContacts,
    RecentLogs,
    IndexMarkdown,
    ExtractEmailSender,
    SimilarComments,
    TicketSales,
    CloneRepo,
    RunSql,
    ScrapeWebsite,
    FetchApi,
    ResizeImage,
    TranscribeAudio,
    ConvertMarkdown,
    FilterCsv,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::InstallUv => "install_uv",
            OperationKind::FormatMarkdown => "format_markdown",
            OperationKind::CountWeekdays => "count_weekdays",
            OperationKind::SortContacts => "sort_contacts",
            OperationKind::RecentLogs => "recent_logs",
            OperationKind::IndexMarkdown => "index_markdown",
            OperationKind::ExtractEmailSender => "extract_email_sender",
            OperationKind::SimilarComments => "similar_comments",
            OperationKind::TicketSales => "ticket_sales",
            OperationKind::CloneRepo => "clone_repo",
            OperationKind::RunSql => "run_sql",
            OperationKind::ScrapeWebsite => "scrape_website",
            OperationKind::FetchApi => "fetch_api",
            OperationKind::ResizeImage => "resize_image",
            OperationKind::TranscribeAudio => "transcribe_audio",
            OperationKind::ConvertMarkdown => "convert_markdown",
            OperationKind::FilterCsv => "filter_csv",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
