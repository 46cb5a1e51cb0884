use async_trait::async_trait;

use crate::error::CoreResult;

/// One outbound completion: a single user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
    /// Full user message, instruction included.
    pub prompt: &'a str,
    /// Propagated to the provider as `X-Request-Id`.
    pub request_id: Option<&'a str>,
}

/// Raw text of the first content block plus response metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Completion {
    pub text: String,
    pub provider_request_id: Option<String>,
    pub stop_reason: Option<String>,
    pub tokens_prompt: Option<u32>,
    pub tokens_completion: Option<u32>,
    pub latency_ms: u64,
}

/// The outbound text-generation call the orchestrator wraps.
///
/// Implementations must not retry and must not apply their own deadline
/// shorter than the caller's; the orchestrator owns the timeout.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn name(&self) -> &str;
    /// HTTP method used for the call, for span tagging.
    fn method(&self) -> http::Method {
        http::Method::POST
    }
    /// Target URL, for span tagging.
    fn endpoint(&self) -> &str;
    async fn complete(&self, req: CompletionRequest<'_>) -> CoreResult<Completion>;
}

/// A client that answers every call with fixed text.
/// Useful for tests or offline runs.
#[derive(Debug, Clone)]
pub struct StaticClient {
    text: String,
}

impl StaticClient {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl CompletionClient for StaticClient {
    fn name(&self) -> &str {
        "static"
    }

    fn endpoint(&self) -> &str {
        "static://completion"
    }

    async fn complete(&self, req: CompletionRequest<'_>) -> CoreResult<Completion> {
        Ok(Completion {
            text: self.text.clone(),
            tokens_prompt: Some(req.prompt.chars().count() as u32),
            ..Completion::default()
        })
    }
}
