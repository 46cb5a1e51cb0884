use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::config::HttpCfg;
use crate::error::{CoreResult, SentimentError};

/// Request context carries the tracing id propagated to the provider.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
}

/// What came back besides the decoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: u16,
    pub provider_request_id: Option<String>,
    pub latency_ms: u64,
}

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
    request_timeout_ms: u64,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| SentimentError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("aisentiment/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_ms: cfg.request_timeout_ms,
        })
    }

    /// POST `body` as JSON and decode a JSON response.
    ///
    /// Errors:
    /// - connect/send failures and non-2xx statuses → `Transport`
    /// - reqwest's own timeout → `Timeout`
    /// - a 2xx body that does not decode as `R` → `MalformedEnvelope`
    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<(R, ResponseMeta)> {
        let start = Instant::now();
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent);

        // custom headers
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }

        let resp = req.send().await.map_err(|e| self.map_send_error(e))?;

        let latency_ms = start.elapsed().as_millis() as u64;
        let status = resp.status();
        let provider_request_id = extract_request_id(resp.headers());
        tracing::debug!(%url, status = status.as_u16(), latency_ms, "provider responded");

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, &text));
        }

        let bytes = resp.bytes().await.map_err(|e| self.map_send_error(e))?;
        let parsed = serde_json::from_slice::<R>(&bytes).map_err(|e| {
            SentimentError::MalformedEnvelope(format!("json decode error: {e}"))
        })?;
        let meta = ResponseMeta {
            status: status.as_u16(),
            provider_request_id,
            latency_ms,
        };
        Ok((parsed, meta))
    }

    fn map_send_error(&self, e: reqwest::Error) -> SentimentError {
        if e.is_timeout() {
            return SentimentError::Timeout {
                after_ms: self.request_timeout_ms,
            };
        }
        SentimentError::Transport {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 3] = ["request-id", "x-request-id", "anthropic-request-id"];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

fn map_http_error(status: StatusCode, body: &str) -> SentimentError {
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("non-success status")
            .to_string()
    } else {
        truncate(body, 300)
    };
    SentimentError::Transport {
        status: Some(status.as_u16()),
        message,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        let mut t = s[..cut].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}
