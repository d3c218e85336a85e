//! Vidu REST API client: submission of generation tasks.
//!
//! Results do not come back on this channel; the provider reports completion
//! through the callback URL attached to each submission.

use anyhow::{anyhow, bail, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "https://api.vidu.cn/ent/v2";

/// Provider-imposed submission limits.
pub const MAX_REFERENCE_IMAGES: usize = 7;
pub const MAX_PROMPT_CHARS: usize = 2000;
pub const SUPPORTED_MODELS: [&str; 2] = ["viduq2", "viduq1"];

/// How much provider error body to surface before truncation.
const ERROR_SNIPPET_CHARS: usize = 200;

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Submission body for `POST /reference2image`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationJob {
    pub model: String,
    pub images: Vec<String>,
    pub prompt: String,
    pub seed: i64,
    pub off_peak: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    pub callback_url: String,
}

/// Acknowledgement returned synchronously on submission; the task itself
/// runs out of band.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitAck {
    pub task_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub credits: i64,
}

/// Authenticated Vidu REST client.
#[derive(Debug)]
pub struct ViduClient {
    base_url: Url,
    client: reqwest::Client,
}

impl ViduClient {
    /// Create a client authenticating via the `Authorization: Token …`
    /// header. The key is held only inside the header map and never logged.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid Vidu base URL")?;

        let token = HeaderValue::from_str(&format!("Token {api_key}"))
            .context("invalid API key characters")?;
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, token);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build Vidu HTTP client")?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append `path` to the base URL, keeping any path prefix the base
    /// carries (the default base ends in `/ent/v2`).
    fn url(&self, path: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("Vidu base URL cannot be a base"))?;
            segments.pop_if_empty();
            for segment in path.trim_start_matches('/').split('/') {
                segments.push(segment);
            }
        }
        Ok(url)
    }

    /// `POST /reference2image` — create a generation task.
    pub async fn submit(&self, job: &GenerationJob) -> Result<SubmitAck> {
        let url = self.url("reference2image")?;
        let resp = self
            .client
            .post(url)
            .json(job)
            .send()
            .await
            .context("failed to reach Vidu API")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "Vidu API error: HTTP {} - {}",
                status.as_u16(),
                truncate_chars(&body, ERROR_SNIPPET_CHARS)
            );
        }

        resp.json::<SubmitAck>()
            .await
            .context("failed to parse Vidu submission response")
    }
}

/// Reference images arrive either as full data URLs or raw base64; the
/// provider only accepts the former.
pub fn ensure_data_url(image: &str) -> String {
    if image.contains("base64,") {
        image.to_string()
    } else {
        format!("data:image/png;base64,{image}")
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((offset, _)) => &text[..offset],
        None => text,
    }
}
