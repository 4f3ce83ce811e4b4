//! Ordered rule table: keyword predicates → operation + parameter extraction.
//!
//! Rules are evaluated top to bottom against the lower-cased description and
//! the first match wins. Specific phrasings come before broad ones: the
//! weekday count precedes anything matching "count", markdown *indexing*
//! ("markdown files") precedes markdown *conversion*, scraping ("fetch
//! content") precedes the generic API fetch ("fetch" + "data"), and the
//! SQL rule sits after the ticket-sales rule that also queries SQLite.
//!
//! Each rule owns its extraction, so adding an operation means adding one
//! entry here and one handler, nothing else.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::operations::{OperationKind, TaskParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Filesystem path, validated by the sandbox guard
    Path,
    /// Literal value (query text, dimensions, URL...)
    Value,
}

/// Declared parameter of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    /// Whether extraction always yields this parameter
    pub always: bool,
}

const fn path(name: &'static str) -> ParamSpec {
    ParamSpec { name, kind: ParamKind::Path, always: true }
}

const fn value(name: &'static str) -> ParamSpec {
    ParamSpec { name, kind: ParamKind::Value, always: true }
}

const fn optional_value(name: &'static str) -> ParamSpec {
    ParamSpec { name, kind: ParamKind::Value, always: false }
}

pub struct Rule {
    pub kind: OperationKind,
    /// Every keyword must appear
    all: &'static [&'static str],
    /// At least one keyword must appear (ignored when empty)
    any: &'static [&'static str],
    pub params: &'static [ParamSpec],
    extract: fn(&str) -> TaskParams,
}

impl Rule {
    /// Tests the rule against an already lower-cased description.
    pub fn matches(&self, lowered: &str) -> bool {
        self.all.iter().all(|k| lowered.contains(k))
            && (self.any.is_empty() || self.any.iter().any(|k| lowered.contains(k)))
    }

    /// Pulls this operation's parameters out of the original description.
    pub fn extract(&self, description: &str) -> TaskParams {
        (self.extract)(description)
    }

    /// Human-readable form of the predicate, e.g. `"sort" + "contacts"`.
    pub fn predicate(&self) -> String {
        let mut parts: Vec<String> = self.all.iter().map(|k| format!("\"{k}\"")).collect();
        if !self.any.is_empty() {
            let any: Vec<String> = self.any.iter().map(|k| format!("\"{k}\"")).collect();
            parts.push(format!("({})", any.join(" | ")));
        }
        parts.join(" + ")
    }
}

const WEEKDAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

const TICKET_TYPES: [&str; 3] = ["gold", "silver", "bronze"];

/// The precedence-ordered rule table.
pub static RULES: &[Rule] = &[
    Rule {
        kind: OperationKind::InstallUv,
        all: &["install", "uv"],
        any: &[],
        params: &[optional_value("email")],
        extract: extract_install_uv,
    },
    Rule {
        kind: OperationKind::FormatMarkdown,
        all: &["format", "prettier"],
        any: &[],
        params: &[path("input"), value("formatter")],
        extract: extract_format_markdown,
    },
    Rule {
        kind: OperationKind::CountWeekdays,
        all: &["count"],
        any: &WEEKDAYS,
        params: &[path("input"), path("output"), value("weekday")],
        extract: extract_count_weekdays,
    },
    Rule {
        kind: OperationKind::SortContacts,
        all: &["sort", "contacts"],
        any: &[],
        params: &[path("input"), path("output")],
        extract: extract_sort_contacts,
    },
    Rule {
        kind: OperationKind::RecentLogs,
        all: &["recent", "log files"],
        any: &[],
        params: &[path("dir"), path("output"), value("count")],
        extract: extract_recent_logs,
    },
    Rule {
        kind: OperationKind::IndexMarkdown,
        all: &["index", "markdown files"],
        any: &[],
        params: &[path("dir"), path("output")],
        extract: extract_index_markdown,
    },
    Rule {
        kind: OperationKind::ExtractEmailSender,
        all: &["email", "sender"],
        any: &[],
        params: &[path("input"), path("output")],
        extract: extract_email_sender,
    },
    Rule {
        kind: OperationKind::SimilarComments,
        all: &["similar", "comments"],
        any: &[],
        params: &[path("input"), path("output")],
        extract: extract_similar_comments,
    },
    Rule {
        kind: OperationKind::TicketSales,
        all: &["ticket", "sales"],
        any: &[],
        params: &[path("db"), path("output"), value("ticket_type")],
        extract: extract_ticket_sales,
    },
    Rule {
        kind: OperationKind::CloneRepo,
        all: &["clone"],
        any: &["repo", "git"],
        params: &[path("dir"), optional_value("url")],
        extract: extract_clone_repo,
    },
    Rule {
        kind: OperationKind::RunSql,
        all: &["sql"],
        any: &[],
        params: &[path("db"), path("output"), optional_value("query")],
        extract: extract_run_sql,
    },
    Rule {
        kind: OperationKind::ScrapeWebsite,
        all: &[],
        any: &["scrape", "fetch content", "extract data from"],
        params: &[path("output"), optional_value("url")],
        extract: extract_scrape_website,
    },
    Rule {
        kind: OperationKind::FetchApi,
        all: &["fetch"],
        any: &["api", "data"],
        params: &[path("output"), optional_value("url")],
        extract: extract_fetch_api,
    },
    Rule {
        kind: OperationKind::ResizeImage,
        all: &[],
        any: &["resize", "compress"],
        params: &[path("input"), path("output"), value("width"), value("height")],
        extract: extract_resize_image,
    },
    Rule {
        kind: OperationKind::TranscribeAudio,
        all: &["transcribe"],
        any: &[],
        params: &[path("input"), path("output")],
        extract: extract_transcribe_audio,
    },
    Rule {
        kind: OperationKind::ConvertMarkdown,
        all: &["markdown", "html"],
        any: &[],
        params: &[path("input"), path("output")],
        extract: extract_convert_markdown,
    },
    Rule {
        kind: OperationKind::FilterCsv,
        all: &["csv", "filter"],
        any: &[],
        params: &[path("input"), path("output"), value("column"), value("value")],
        extract: extract_filter_csv,
    },
];

// ── Extraction helpers ──────────────────────────────

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s'"<>]+"#).expect("valid URL regex"));

static PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:^|[\s'"(`])(/[A-Za-z0-9_.\-/]+)"#).expect("valid path regex")
});

static QUOTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"'([^']+)'|"([^"]+)""#).expect("valid quote regex"));

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email regex")
});

static DIMENSIONS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*[x×X]\s*(\d+)").expect("valid dimensions regex"));

static MOST_RECENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s+(?:most\s+)?recent").expect("valid recent regex"));

static WHERE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\bwhere\s+(\w+)\s*(?:is|==|=|equals)\s*(?:'([^']*)'|"([^"]*)"|([^\s,;]+))"#,
    )
    .expect("valid where regex")
});

static PRETTIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"prettier@[0-9][0-9A-Za-z.\-]*").expect("valid prettier regex"));

/// Absolute filesystem paths mentioned in the text, URLs excluded.
fn paths_in(text: &str) -> Vec<String> {
    let without_urls = URL_RE.replace_all(text, " ");
    PATH_RE
        .captures_iter(&without_urls)
        .map(|c| {
            c[1].trim_end_matches(|ch: char| matches!(ch, '.' | ',' | ';' | ':'))
                .to_string()
        })
        .filter(|p| p.len() > 1)
        .collect()
}

fn first_url(text: &str) -> Option<String> {
    URL_RE
        .find(text)
        .map(|m| m.as_str().trim_end_matches(|ch: char| matches!(ch, '.' | ',' | ';' | ')')).to_string())
}

fn first_quoted(text: &str) -> Option<String> {
    QUOTED_RE.captures(text).and_then(|c| {
        c.get(1)
            .or_else(|| c.get(2))
            .map(|m| m.as_str().trim().to_string())
    })
}

fn without_quoted(text: &str) -> String {
    QUOTED_RE.replace_all(text, " ").into_owned()
}

/// First path is the input; the last one is the output when there are two or more.
fn input_output(text: &str, default_input: &str, default_output: &str) -> (String, String) {
    let paths = paths_in(text);
    let input = paths
        .first()
        .cloned()
        .unwrap_or_else(|| default_input.to_string());
    let output = if paths.len() >= 2 {
        paths[paths.len() - 1].clone()
    } else {
        default_output.to_string()
    };
    (input, output)
}

/// Operations that only produce a file: the last mentioned path is the output.
fn output_only(text: &str, default_output: &str) -> String {
    paths_in(text)
        .pop()
        .unwrap_or_else(|| default_output.to_string())
}

fn io_params(text: &str, default_input: &str, default_output: &str) -> TaskParams {
    let (input, output) = input_output(text, default_input, default_output);
    TaskParams::new()
        .with_path("input", input)
        .with_path("output", output)
}

// ── Per-rule extraction ─────────────────────────────

fn extract_install_uv(description: &str) -> TaskParams {
    let params = TaskParams::new();
    match EMAIL_RE.find(description) {
        Some(email) => params.with_value("email", email.as_str()),
        None => params,
    }
}

fn extract_format_markdown(description: &str) -> TaskParams {
    let formatter = PRETTIER_RE
        .find(description)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "prettier@3.4.2".to_string());
    let input = paths_in(description)
        .into_iter()
        .next()
        .unwrap_or_else(|| "format.md".to_string());
    TaskParams::new()
        .with_path("input", input)
        .with_value("formatter", formatter)
}

fn extract_count_weekdays(description: &str) -> TaskParams {
    let lowered = description.to_lowercase();
    let weekday = WEEKDAYS
        .iter()
        .find(|day| lowered.contains(*day))
        .copied()
        .unwrap_or("wednesday");
    let default_output = format!("dates-{weekday}s.txt");
    io_params(description, "dates.txt", &default_output).with_value("weekday", weekday)
}

fn extract_sort_contacts(description: &str) -> TaskParams {
    io_params(description, "contacts.json", "contacts-sorted.json")
}

fn extract_recent_logs(description: &str) -> TaskParams {
    let (dir, output) = input_output(description, "logs", "logs-recent.txt");
    let count = MOST_RECENT_RE
        .captures(description)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| "10".to_string());
    TaskParams::new()
        .with_path("dir", dir)
        .with_path("output", output)
        .with_value("count", count)
}

fn extract_index_markdown(description: &str) -> TaskParams {
    let (dir, output) = input_output(description, "docs", "docs/index.json");
    TaskParams::new()
        .with_path("dir", dir)
        .with_path("output", output)
}

fn extract_email_sender(description: &str) -> TaskParams {
    io_params(description, "email.txt", "email-sender.txt")
}

fn extract_similar_comments(description: &str) -> TaskParams {
    io_params(description, "comments.txt", "comments-similar.txt")
}

fn extract_ticket_sales(description: &str) -> TaskParams {
    let lowered = description.to_lowercase();
    let ticket_type = first_quoted(description)
        .or_else(|| {
            TICKET_TYPES
                .iter()
                .find(|t| lowered.contains(*t))
                .map(|t| t.to_string())
        })
        .unwrap_or_else(|| "gold".to_string());
    let default_output = format!("ticket-sales-{}.txt", ticket_type.to_lowercase());
    let (db, output) = input_output(description, "ticket-sales.db", &default_output);
    TaskParams::new()
        .with_path("db", db)
        .with_path("output", output)
        .with_value("ticket_type", ticket_type)
}

fn extract_clone_repo(description: &str) -> TaskParams {
    let dir = paths_in(description)
        .into_iter()
        .next()
        .unwrap_or_else(|| "repo".to_string());
    let params = TaskParams::new().with_path("dir", dir);
    match first_url(description) {
        Some(url) => params.with_value("url", url),
        None => params,
    }
}

fn extract_run_sql(description: &str) -> TaskParams {
    let unquoted = without_quoted(description);
    let paths = paths_in(&unquoted);
    let db = paths
        .iter()
        .find(|p| {
            let lower = p.to_lowercase();
            lower.ends_with(".db") || lower.ends_with(".sqlite") || lower.ends_with(".sqlite3")
        })
        .or_else(|| paths.first())
        .cloned()
        .unwrap_or_else(|| "database.db".to_string());
    let output = paths
        .iter()
        .rev()
        .find(|p| **p != db)
        .cloned()
        .unwrap_or_else(|| "query_result.txt".to_string());

    let params = TaskParams::new().with_path("db", db).with_path("output", output);
    match first_quoted(description) {
        Some(query) => params.with_value("query", query),
        None => params,
    }
}

fn extract_scrape_website(description: &str) -> TaskParams {
    let params = TaskParams::new().with_path("output", output_only(description, "scraped_data.txt"));
    match first_url(description) {
        Some(url) => params.with_value("url", url),
        None => params,
    }
}

fn extract_fetch_api(description: &str) -> TaskParams {
    let params = TaskParams::new().with_path("output", output_only(description, "api_data.json"));
    match first_url(description) {
        Some(url) => params.with_value("url", url),
        None => params,
    }
}

fn extract_resize_image(description: &str) -> TaskParams {
    let (input, output) = input_output(description, "image.png", "image_resized.png");
    let without_paths = PATH_RE.replace_all(description, " ");
    let (width, height) = DIMENSIONS_RE
        .captures(&without_paths)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .unwrap_or_else(|| ("300".to_string(), "300".to_string()));
    TaskParams::new()
        .with_path("input", input)
        .with_path("output", output)
        .with_value("width", width)
        .with_value("height", height)
}

fn extract_transcribe_audio(description: &str) -> TaskParams {
    io_params(description, "audio.mp3", "audio.txt")
}

fn extract_convert_markdown(description: &str) -> TaskParams {
    io_params(description, "document.md", "document.html")
}

fn extract_filter_csv(description: &str) -> TaskParams {
    let (column, value) = WHERE_RE
        .captures(description)
        .map(|c| {
            let value = c
                .get(2)
                .or_else(|| c.get(3))
                .map(|m| m.as_str().to_string())
                .or_else(|| {
                    c.get(4)
                        .map(|m| m.as_str().trim_end_matches('.').to_string())
                })
                .unwrap_or_default();
            (c[1].to_string(), value)
        })
        .unwrap_or_else(|| ("category".to_string(), "Technology".to_string()));
    io_params(description, "data.csv", "filtered_data.json")
        .with_value("column", column)
        .with_value("value", value)
}
