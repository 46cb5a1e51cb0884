use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, ErrorKind};
use crate::normalizer::normalize_input;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
    Error,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
            Sentiment::Error => "error",
        }
    }

    /// Case-insensitive match against the fixed label set.
    pub fn parse_label(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Some(Sentiment::Positive),
            "negative" => Some(Sentiment::Negative),
            "neutral" => Some(Sentiment::Neutral),
            "error" => Some(Sentiment::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validated sentiment-analysis call.
///
/// Fields are private; the only way in is [`CallRequest::new`], which
/// normalizes and bounds the input text.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    text: String,
    model: String,
    max_tokens: u32,
}

impl CallRequest {
    pub fn new(
        text: &str,
        model: impl Into<String>,
        max_tokens: u32,
        max_input_chars: usize,
    ) -> CoreResult<Self> {
        let text = normalize_input(text, max_input_chars)?;
        Ok(Self {
            text,
            model: model.into(),
            max_tokens: max_tokens.max(1),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Input length in chars.
    pub fn input_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StructuredResult {
    pub sentiment: Sentiment,
    /// Always within [0.0, 1.0].
    pub confidence: f64,
    pub analysis: String,
}

impl StructuredResult {
    pub fn new(sentiment: Sentiment, confidence: f64, analysis: impl Into<String>) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            sentiment,
            confidence,
            analysis: analysis.into(),
        }
    }
}

/// Result of one orchestrated call. Both arms carry the elapsed time.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success {
        result: StructuredResult,
        duration: Duration,
        trace_id: String,
    },
    Failure {
        kind: ErrorKind,
        message: String,
        duration: Duration,
        trace_id: String,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn duration(&self) -> Duration {
        match self {
            Outcome::Success { duration, .. } | Outcome::Failure { duration, .. } => *duration,
        }
    }

    pub fn trace_id(&self) -> &str {
        match self {
            Outcome::Success { trace_id, .. } | Outcome::Failure { trace_id, .. } => trace_id,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { kind, .. } => Some(*kind),
        }
    }

    /// Map to the inbound wire shape: `Ok` body on success, or the HTTP
    /// status and error body the routing layer should answer with.
    ///
    /// A cancelled call has no body: the caller walked away, so there is
    /// nobody to show it to. Its 499 only marks the outcome for access logs.
    pub fn into_response(self) -> Result<AnalyzeResponse, (u16, Option<ErrorBody>)> {
        match self {
            Outcome::Success { result, duration, trace_id } => Ok(AnalyzeResponse {
                sentiment: result.sentiment,
                confidence: result.confidence,
                analysis: result.analysis,
                processing_time_ms: duration.as_millis() as u64,
                trace_id,
            }),
            Outcome::Failure { kind: ErrorKind::Cancelled, .. } => {
                Err((ErrorKind::Cancelled.http_status(), None))
            }
            Outcome::Failure { kind, message, trace_id, .. } => Err((
                kind.http_status(),
                Some(ErrorBody {
                    error: message,
                    kind,
                    trace_id: Some(trace_id),
                }),
            )),
        }
    }
}

/// Inbound request body.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnalyzeRequest {
    pub text: String,
}

/// Inbound success body.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub sentiment: Sentiment,
    pub confidence: f64,
    pub analysis: String,
    pub processing_time_ms: u64,
    pub trace_id: String,
}

/// Inbound failure body.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}
