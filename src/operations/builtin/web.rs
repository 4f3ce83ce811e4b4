//! Operations that fetch content over HTTP and save it into the sandbox.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tracing::debug;

use crate::config::OperationsConfig;
use crate::operations::{invalid_input, Operation, OperationContext, Output};
use crate::sandbox::ValidatedParams;

use super::write_artifact;

/// Maximum response body size (5 MB).
const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024;

const READ_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Text wrapping width for html2text conversion.
const TEXT_WIDTH: usize = 100;

const USER_AGENT: &str = concat!("taskpilot/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client with bounded timeouts, redirects and body size.
struct Fetcher {
    client: reqwest::Client,
}

struct Fetched {
    content_type: String,
    body: Vec<u8>,
}

impl Fetcher {
    fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(READ_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    async fn get(&self, url_str: &str) -> anyhow::Result<Fetched> {
        let parsed = url::Url::parse(url_str)
            .map_err(|e| invalid_input(format!("Invalid URL '{url_str}': {e}")))?;
        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(invalid_input(format!(
                    "Unsupported URL scheme '{scheme}' (only http/https)"
                )));
            }
        }

        debug!("Fetching URL: {url_str}");
        let response = self.client.get(parsed).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Fetching {url_str} failed: HTTP {status}"));
        }
        if let Some(len) = response.content_length() {
            if len as usize > MAX_RESPONSE_SIZE {
                return Err(anyhow!(
                    "Response too large ({len} bytes, limit is {MAX_RESPONSE_SIZE} bytes)"
                ));
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();

        let body = response.bytes().await?;
        if body.len() > MAX_RESPONSE_SIZE {
            return Err(anyhow!(
                "Response too large ({} bytes, limit is {MAX_RESPONSE_SIZE} bytes)",
                body.len()
            ));
        }

        Ok(Fetched {
            content_type,
            body: body.to_vec(),
        })
    }
}

/// Returns true if the content type looks like HTML.
fn is_html(content_type: &str) -> bool {
    let ct = content_type.to_lowercase();
    ct.contains("text/html") || ct.contains("application/xhtml")
}

/// Extract readable text from a response body based on its content type.
fn extract_text(content_type: &str, body: &[u8]) -> String {
    if is_html(content_type) {
        html2text::from_read(body, TEXT_WIDTH)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned())
    } else {
        String::from_utf8_lossy(body).into_owned()
    }
}

/// Pretty-prints JSON bodies; anything else is kept verbatim.
fn normalize_api_body(body: &[u8]) -> Vec<u8> {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) => serde_json::to_vec_pretty(&value).unwrap_or_else(|_| body.to_vec()),
        Err(_) => body.to_vec(),
    }
}

// ── fetch_api ──────────────────────────────────────────

/// Fetches data from an API endpoint and saves the response.
pub struct FetchApiOperation {
    fetcher: Fetcher,
    default_url: String,
}

impl FetchApiOperation {
    pub fn new(config: &OperationsConfig) -> Self {
        Self {
            fetcher: Fetcher::new(),
            default_url: config.api_url.clone(),
        }
    }
}

#[async_trait]
impl Operation for FetchApiOperation {
    fn description(&self) -> &str {
        "Fetch data from an API and save the response"
    }

    async fn execute(
        &self,
        params: &ValidatedParams,
        context: &OperationContext,
    ) -> anyhow::Result<Output> {
        let output = params.path("output")?;
        let url = params.value("url").unwrap_or(&self.default_url);

        let fetched = self.fetcher.get(url).await?;
        write_artifact(context, output, normalize_api_body(&fetched.body)).await?;

        Ok(Output::from(format!(
            "Fetched {url} and saved to {}",
            output.display()
        )))
    }
}

// ── scrape_website ─────────────────────────────────────

/// Fetches a web page and saves its readable text.
pub struct ScrapeWebsiteOperation {
    fetcher: Fetcher,
    default_url: String,
}

impl ScrapeWebsiteOperation {
    pub fn new(config: &OperationsConfig) -> Self {
        Self {
            fetcher: Fetcher::new(),
            default_url: config.scrape_url.clone(),
        }
    }
}

#[async_trait]
impl Operation for ScrapeWebsiteOperation {
    fn description(&self) -> &str {
        "Fetch a web page and save its text content"
    }

    async fn execute(
        &self,
        params: &ValidatedParams,
        context: &OperationContext,
    ) -> anyhow::Result<Output> {
        let output = params.path("output")?;
        let url = params.value("url").unwrap_or(&self.default_url);

        let fetched = self.fetcher.get(url).await?;
        let text = extract_text(&fetched.content_type, &fetched.body);
        write_artifact(context, output, text.trim()).await?;

        Ok(Output::from(format!(
            "Scraped {url} and saved to {}",
            output.display()
        )))
    }
}

/// A throwaway HTTP server answering every request with the same body.
#[cfg(test)]
pub(crate) mod test_server {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Starts the server and returns its base URL.
    pub async fn serve(content_type: &'static str, body: &'static str) -> String {
        serve_status("200 OK", content_type, body).await
    }

    pub async fn serve_status(
        status: &'static str,
        content_type: &'static str,
        body: &'static str,
    ) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let response = format!(
                        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }
}
