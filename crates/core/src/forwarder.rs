//! Retrying relay for provider callbacks.
//!
//! The generation provider can only reach a public edge address, while the
//! application server ingesting callbacks sits on a private network. The
//! forwarder bridges the two: it replays the inbound request against the
//! configured upstream origin, retrying on transport failures and error
//! statuses, and always resolves to a well-formed outcome so the edge
//! endpoint never propagates a fault back to the provider.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Relays callback requests to a fixed upstream origin with bounded,
/// linearly backed-off retries.
#[derive(Debug, Clone)]
pub struct CallbackForwarder {
    upstream_base: Url,
    max_attempts: usize,
    base_delay: Duration,
    client: reqwest::Client,
}

/// Terminal outcome of one relay. `Relayed` means some attempt got an
/// upstream response with status < 400; the edge endpoint answers the
/// provider with a fixed 200 either way so the provider does not re-deliver.
#[derive(Debug, Clone)]
pub enum ForwardOutcome {
    Relayed {
        upstream_status: StatusCode,
        body: String,
        attempts: usize,
    },
    Exhausted {
        attempts: usize,
        error: String,
    },
}

impl CallbackForwarder {
    /// `upstream_base` must be an http/https origin; the inbound path and
    /// query are appended verbatim when relaying.
    pub fn new(upstream_base: &str, max_attempts: usize, base_delay: Duration) -> Result<Self> {
        let upstream_base = Url::parse(upstream_base).context("invalid upstream base URL")?;
        match upstream_base.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(anyhow!(
                    "unsupported upstream scheme '{scheme}' (expected http/https)"
                ))
            }
        }

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("failed to build forwarder HTTP client")?;

        Ok(Self {
            upstream_base,
            max_attempts: max_attempts.max(1),
            base_delay,
            client,
        })
    }

    pub fn upstream_base(&self) -> &Url {
        &self.upstream_base
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Relay one inbound request. `path_and_query` is the original path
    /// suffix plus the verbatim query string (e.g.
    /// `/api/vidu-callback?sig=abc`).
    pub async fn forward(
        &self,
        method: Method,
        path_and_query: &str,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) -> ForwardOutcome {
        let target = match self.upstream_base.join(path_and_query) {
            Ok(target) => target,
            Err(err) => {
                return ForwardOutcome::Exhausted {
                    attempts: 0,
                    error: format!("invalid relay path '{path_and_query}': {err}"),
                }
            }
        };
        let display_target = redacted_url_for_display(&target);

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match self
                .attempt(method.clone(), target.clone(), content_type, body.clone())
                .await
            {
                Ok((upstream_status, response_body)) if upstream_status.as_u16() < 400 => {
                    info!(
                        attempt,
                        status = upstream_status.as_u16(),
                        target = %display_target,
                        "callback relayed upstream"
                    );
                    return ForwardOutcome::Relayed {
                        upstream_status,
                        body: response_body,
                        attempts: attempt,
                    };
                }
                Ok((upstream_status, _)) => {
                    last_error = format!("upstream responded HTTP {}", upstream_status.as_u16());
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        status = upstream_status.as_u16(),
                        target = %display_target,
                        "upstream rejected relayed callback"
                    );
                }
                Err(err) => {
                    last_error = format!("{err:#}");
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        target = %display_target,
                        error = %last_error,
                        "callback relay attempt failed"
                    );
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.base_delay * attempt as u32).await;
            }
        }

        ForwardOutcome::Exhausted {
            attempts: self.max_attempts,
            error: last_error,
        }
    }

    async fn attempt(
        &self,
        method: Method,
        target: Url,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) -> Result<(StatusCode, String)> {
        let mut request = self.client.request(method, target);
        if let Some(content_type) = content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await.context("upstream unreachable")?;
        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed reading upstream response body")?;

        Ok((status, body))
    }
}

fn redacted_url_for_display(url: &Url) -> String {
    if url.query().is_none() {
        return url.to_string();
    }

    let mut no_query = url.clone();
    no_query.set_query(None);
    format!("{}?<redacted>", no_query)
}
