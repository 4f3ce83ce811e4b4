//! Probes: one (fixtures, task, artifact, check) tuple per capability.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use image::{Rgb, RgbImage};
use serde::Deserialize;
use serde_json::{json, Value};

/// Input data a probe needs in the sandbox before its task is submitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fixture {
    Text { path: String, content: String },
    /// Solid-colour image, encoded according to the file extension.
    Image { path: String, width: u32, height: u32 },
    /// SQLite database, recreated and seeded with the given statements.
    Sqlite { path: String, statements: Vec<String> },
}

impl Fixture {
    pub fn path(&self) -> &str {
        match self {
            Fixture::Text { path, .. } | Fixture::Image { path, .. } | Fixture::Sqlite { path, .. } => {
                path
            }
        }
    }

    /// Writes the fixture under `root`. Fixture paths must be relative.
    pub fn install(&self, root: &Path) -> anyhow::Result<PathBuf> {
        let relative = Path::new(self.path());
        if relative.is_absolute() {
            bail!("Fixture path must be relative to the sandbox root: {}", self.path());
        }
        let target = root.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match self {
            Fixture::Text { content, .. } => std::fs::write(&target, content)?,
            Fixture::Image { width, height, .. } => {
                RgbImage::from_pixel(*width, *height, Rgb([200, 60, 60]))
                    .save(&target)
                    .with_context(|| format!("Cannot encode {}", target.display()))?;
            }
            Fixture::Sqlite { statements, .. } => {
                if target.exists() {
                    std::fs::remove_file(&target)?;
                }
                let conn = rusqlite::Connection::open(&target)?;
                for statement in statements {
                    conn.execute_batch(statement)
                        .with_context(|| format!("Fixture statement failed: {statement}"))?;
                }
            }
        }
        Ok(target)
    }
}

/// Predicate applied to a produced artifact.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Check {
    Contains { needle: String },
    /// Trimmed text equality.
    Equals { expected: String },
    JsonEquals { expected: Value },
    JsonNonEmptyArray,
    ImageSize { width: u32, height: u32 },
    NonEmpty,
}

impl Check {
    pub fn evaluate(&self, artifact: &[u8]) -> bool {
        let text = || String::from_utf8_lossy(artifact);
        match self {
            Check::Contains { needle } => text().contains(needle.as_str()),
            Check::Equals { expected } => text().trim() == expected.trim(),
            Check::JsonEquals { expected } => {
                serde_json::from_slice::<Value>(artifact).is_ok_and(|v| &v == expected)
            }
            Check::JsonNonEmptyArray => serde_json::from_slice::<Value>(artifact)
                .is_ok_and(|v| v.as_array().is_some_and(|a| !a.is_empty())),
            Check::ImageSize { width, height } => image::load_from_memory(artifact)
                .is_ok_and(|img| img.width() == *width && img.height() == *height),
            Check::NonEmpty => !text().trim().is_empty(),
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::Contains { needle } => write!(f, "contains {needle:?}"),
            Check::Equals { expected } => write!(f, "equals {expected:?}"),
            Check::JsonEquals { expected } => write!(f, "JSON equals {expected}"),
            Check::JsonNonEmptyArray => write!(f, "is a non-empty JSON array"),
            Check::ImageSize { width, height } => write!(f, "is a {width}x{height} image"),
            Check::NonEmpty => write!(f, "is not empty"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Probe {
    pub name: String,
    #[serde(default)]
    pub fixtures: Vec<Fixture>,
    /// Task text; `{root}` is replaced by the sandbox root.
    pub task: String,
    pub artifact: String,
    pub check: Check,
}

impl Probe {
    pub fn task_for(&self, root: &Path) -> String {
        self.task.replace("{root}", &root.display().to_string())
    }
}

/// An ordered list of probes. Results are reported in this order.
#[derive(Debug, Clone, Deserialize)]
pub struct Suite {
    #[serde(rename = "probe", default)]
    pub probes: Vec<Probe>,
}

fn text(path: &str, content: &str) -> Fixture {
    Fixture::Text {
        path: path.to_string(),
        content: content.to_string(),
    }
}

fn probe(name: &str, fixtures: Vec<Fixture>, task: &str, artifact: &str, check: Check) -> Probe {
    Probe {
        name: name.to_string(),
        fixtures,
        task: task.to_string(),
        artifact: artifact.to_string(),
        check,
    }
}

impl Suite {
    /// Reads a suite from TOML (`[[probe]]` tables).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read suite {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let suite: Suite = toml::from_str(content)?;
        if suite.probes.is_empty() {
            bail!("Suite has no probes");
        }
        Ok(suite)
    }

    /// Only the probes whose names are listed, in suite order.
    pub fn only(mut self, names: &[&str]) -> Self {
        self.probes.retain(|p| names.contains(&p.name.as_str()));
        self
    }

    /// One probe per core capability.
    pub fn builtin() -> Self {
        let probes = vec![
            probe(
                "count_wednesdays",
                vec![text("dates.txt", "2024-01-03\n2024-01-10\n2024-01-04\n")],
                "Count how many dates in {root}/dates.txt are Wednesdays and write the number to {root}/dates-wednesdays.txt",
                "dates-wednesdays.txt",
                Check::Equals {
                    expected: "2".to_string(),
                },
            ),
            probe(
                "sort_contacts",
                vec![text(
                    "contacts.json",
                    r#"[{"first_name":"B","last_name":"Z"},{"first_name":"A","last_name":"A"}]"#,
                )],
                "Sort the contacts in {root}/contacts.json by last_name then first_name and save them to {root}/contacts-sorted.json",
                "contacts-sorted.json",
                Check::JsonEquals {
                    expected: json!([
                        {"first_name": "A", "last_name": "A"},
                        {"first_name": "B", "last_name": "Z"}
                    ]),
                },
            ),
            probe(
                "fetch_api",
                vec![],
                "Fetch data from the API and save it to {root}/api_data.json",
                "api_data.json",
                Check::JsonNonEmptyArray,
            ),
            probe(
                "sql_query",
                vec![Fixture::Sqlite {
                    path: "database.db".to_string(),
                    statements: vec![
                        "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)".to_string(),
                        "INSERT INTO items (name) VALUES ('a'), ('b'), ('c')".to_string(),
                    ],
                }],
                "Run the SQL query \"SELECT COUNT(*) FROM items\" on {root}/database.db and save the result to {root}/query_result.txt",
                "query_result.txt",
                Check::Equals {
                    expected: "[(3,)]".to_string(),
                },
            ),
            probe(
                "scrape",
                vec![],
                "Scrape the website and save its text to {root}/scraped_data.txt",
                "scraped_data.txt",
                Check::NonEmpty,
            ),
            probe(
                "resize",
                vec![Fixture::Image {
                    path: "image.png".to_string(),
                    width: 64,
                    height: 48,
                }],
                "Resize the image {root}/image.png to 32x24 and save it to {root}/image_resized.png",
                "image_resized.png",
                Check::ImageSize {
                    width: 32,
                    height: 24,
                },
            ),
            probe(
                "markdown",
                vec![text("document.md", "# Title\n\nBody.")],
                "Convert the markdown file {root}/document.md to HTML and save it to {root}/document.html",
                "document.html",
                Check::Contains {
                    needle: "<h1>Title</h1>".to_string(),
                },
            ),
            probe(
                "filter_csv",
                vec![text(
                    "data.csv",
                    "id,name,category\n1,Laptop,Technology\n2,Chair,Furniture\n3,Phone,Technology\n",
                )],
                "Filter the CSV file {root}/data.csv where category is Technology and save the rows as JSON to {root}/filtered_data.json",
                "filtered_data.json",
                Check::JsonEquals {
                    expected: json!([
                        {"id": 1, "name": "Laptop", "category": "Technology"},
                        {"id": 3, "name": "Phone", "category": "Technology"}
                    ]),
                },
            ),
        ];
        Self { probes }
    }
}
