//! Network fetch capabilities.
//!
//! Backs the guest's `getText`/`getJSON`/`postForm` helpers, the
//! network-backed module resolver, and the DOM-emulation text rendering.
//! Response sizes are capped before buffering completes.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::config::FetchConfig;
use crate::host::HostValue;
use crate::{LashError, Result};

/// Text wrapping width for HTML-to-text conversion.
const TEXT_WIDTH: usize = 100;

/// How a fetched body is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchKind {
    Text,
    Json,
}

/// Request options accepted from the guest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FetchOpts {
    /// Form fields; presence implies a form-encoded POST.
    #[serde(default)]
    pub form: Option<BTreeMap<String, String>>,
    /// Extra headers.
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
}

/// HTTP fetcher shared by every sandbox of a process.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    /// Build a fetcher from configuration.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.total_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| LashError::Fetch(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Fetch a URL and return its body as text or parsed JSON.
    pub async fn fetch(&self, url: &str, kind: FetchKind, opts: FetchOpts) -> Result<HostValue> {
        validate_url(url)?;

        let mut request = match &opts.form {
            Some(form) => self.client.post(url).form(form),
            None => self.client.get(url),
        };
        if let Some(headers) = &opts.headers {
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| LashError::Fetch(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LashError::Fetch(format!("HTTP error: {}", status)));
        }

        let body = self.read_body(response).await?;
        match kind {
            FetchKind::Text => Ok(HostValue::String(body)),
            FetchKind::Json => serde_json::from_str(&body)
                .map_err(|e| LashError::Fetch(format!("invalid JSON: {}", e))),
        }
    }

    /// Fetch module source text by name from the configured registry.
    pub async fn resolve_module(&self, name: &str) -> Result<String> {
        if name.is_empty() || name.contains(|c: char| c.is_whitespace()) {
            return Err(LashError::NotFound(name.to_string()));
        }

        let url = self.config.registry_url.replace("{name}", name);
        validate_url(&url)?;

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LashError::Fetch(format!("request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LashError::NotFound(name.to_string()));
        }
        if !response.status().is_success() {
            return Err(LashError::Fetch(format!("HTTP error: {}", response.status())));
        }

        self.read_body(response).await
    }

    async fn read_body(&self, response: reqwest::Response) -> Result<String> {
        let max_bytes = self.config.max_body_kb * 1024;

        if let Some(length) = response.content_length() {
            if length > max_bytes {
                return Err(LashError::OutOfMemory(format!(
                    "response too large: {} bytes (max {} bytes)",
                    length, max_bytes
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| LashError::Fetch(format!("failed to read response: {}", e)))?;

        if bytes.len() as u64 > max_bytes {
            return Err(LashError::OutOfMemory(format!(
                "response too large: {} bytes (max {} bytes)",
                bytes.len(),
                max_bytes
            )));
        }

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Render an HTML document for the guest DOM helper.
///
/// Returns `{ text, title }`: a readable text rendering plus the document
/// title when one is present.
pub fn parse_html(html: &str) -> HostValue {
    let text = html2text::from_read(html.as_bytes(), TEXT_WIDTH)
        .unwrap_or_else(|_| html.to_string());
    let title = extract_title(html);
    serde_json::json!({ "text": text, "title": title })
}

fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_lowercase();
    let start = lower.find("<title")?;
    let open_end = html[start..].find('>').map(|i| start + i + 1)?;
    let close = lower[open_end..].find("</title").map(|i| open_end + i)?;
    let title = html[open_end..close].trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

fn validate_url(raw: &str) -> Result<()> {
    let parsed =
        url::Url::parse(raw).map_err(|e| LashError::Fetch(format!("invalid URL: {}", e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(LashError::Fetch(format!("unsupported scheme: {}", other))),
    }
}
