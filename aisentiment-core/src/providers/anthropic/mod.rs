use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{
    config::{Config, DEFAULT_API_VERSION},
    error::{CoreResult, SentimentError},
    http_client::{HttpClient, RequestCtx},
    provider::{Completion, CompletionClient, CompletionRequest},
};
use async_trait::async_trait;

/// Messages API client. `url` is the full endpoint, e.g.
/// `https://api.anthropic.com/v1/messages`.
#[derive(Debug, Clone)]
pub struct Anthropic {
    http: HttpClient,
    api_key: SecretString,
    url: String,
    version: String,
    name: String,
}

impl Anthropic {
    pub fn new(http: HttpClient, api_key: SecretString, url: String) -> Self {
        Self {
            http,
            api_key,
            url,
            version: DEFAULT_API_VERSION.to_string(),
            name: "anthropic".into(),
        }
    }

    /// Build from config; the API key comes from the configured env var.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let http = HttpClient::from_cfg(&cfg.http)?;
        let mut client = Self::new(http, cfg.api_key()?, cfg.api.url.clone());
        client.version = cfg.api.version.clone();
        Ok(client)
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("x-api-key", self.api_key.expose_secret().to_string()),
            ("anthropic-version", self.version.clone()),
            ("content-type", "application/json".to_string()),
        ]
    }
}

// ===== Anthropic wire types (Messages API) =====

#[derive(Serialize)]
struct AMsgReq<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [AMessage<'a>; 1],
}

#[derive(Serialize)]
struct AMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct AMsgResp {
    content: Option<Vec<ARespContent>>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AUsage>,
}

#[derive(Deserialize)]
struct ARespContent {
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct AUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

/// Pull the first content block's text out of the envelope.
fn first_text(resp: &mut AMsgResp) -> CoreResult<String> {
    let first = resp
        .content
        .as_mut()
        .and_then(|c| c.first_mut())
        .ok_or_else(|| SentimentError::MalformedEnvelope("response has no content blocks".into()))?;
    first.text.take().ok_or_else(|| {
        SentimentError::MalformedEnvelope("first content block has no text field".into())
    })
}

#[async_trait]
impl CompletionClient for Anthropic {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn complete(&self, req: CompletionRequest<'_>) -> CoreResult<Completion> {
        let payload = AMsgReq {
            model: req.model,
            max_tokens: req.max_tokens.max(1),
            messages: [AMessage {
                role: "user",
                content: req.prompt,
            }],
        };

        let ctx = RequestCtx {
            request_id: req.request_id,
        };
        let headers = self.headers();
        let header_pairs: Vec<(&str, &str)> = headers.iter().map(|(k, v)| (*k, v.as_str())).collect();

        let (mut resp, meta) = self
            .http
            .post_json::<_, AMsgResp>(&self.url, &payload, &header_pairs, &ctx)
            .await?;

        let text = first_text(&mut resp)?;
        let usage = resp.usage.unwrap_or_default();
        Ok(Completion {
            text,
            provider_request_id: meta.provider_request_id,
            stop_reason: resp.stop_reason,
            tokens_prompt: usage.input_tokens,
            tokens_completion: usage.output_tokens,
            latency_ms: meta.latency_ms,
        })
    }
}
