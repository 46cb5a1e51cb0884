/// Span/Log attribute keys for the sentiment call.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const KEY_MODEL: &str = "ai.model";
pub const KEY_INPUT_LENGTH: &str = "ai.input.length";
pub const KEY_OUTPUT_SENTIMENT: &str = "ai.output.sentiment";
pub const KEY_OUTPUT_CONFIDENCE: &str = "ai.output.confidence";
pub const KEY_EXTRACTION_TIER: &str = "ai.extraction.tier";

pub const KEY_HTTP_METHOD: &str = "http.method";
pub const KEY_HTTP_URL: &str = "http.url";
pub const KEY_PROVIDER: &str = "llm.provider";
pub const KEY_PROVIDER_REQUEST_ID: &str = "llm.req_id";
pub const KEY_STOP_REASON: &str = "llm.stop_reason";
pub const KEY_TOKENS_PROMPT: &str = "tokens.prompt";
pub const KEY_TOKENS_COMPLETION: &str = "tokens.completion";
pub const KEY_LATENCY_MS: &str = "latency.ms";

/// Error-related (if applicable)
pub const KEY_ERROR_KIND: &str = "error.kind";
pub const KEY_ERROR_MESSAGE: &str = "error.message";

/// Set on a span that was closed while children were still open.
pub const KEY_OPEN_CHILDREN: &str = "span.open_children";

/// Span names used by the orchestrator.
pub const SPAN_ANALYZE: &str = "analyze";
pub const SPAN_HTTP_CALL: &str = "http.call";
