//! Recovers a [`StructuredResult`] from the model's free-form reply.
//!
//! The reply is expected to contain a JSON object with `sentiment`,
//! `confidence` and `analysis`, usually wrapped in prose. The object is
//! located with a brace heuristic (first `{` through last `}`) and every
//! failure mode maps onto one of three fallback tiers, reported through
//! [`ExtractionTier`] so callers can tell them apart:
//!
//! | tier             | when                                   | result                                         |
//! |------------------|----------------------------------------|------------------------------------------------|
//! | `FieldDefaults`  | candidate parsed, some field unusable  | per-field defaults                             |
//! | `NoJson`         | no `{`, or every `}` comes before it   | `neutral`, 0.5, "Unable to parse sentiment"    |
//! | `Malformed`      | candidate is not valid JSON            | `error`, 0.0, "Error processing response"      |
//!
//! Extraction never fails.

use serde_json::{Map, Value};

use crate::model::{Sentiment, StructuredResult};

pub const DEFAULT_CONFIDENCE: f64 = 0.5;
pub const NO_ANALYSIS: &str = "No analysis available";
pub const UNPARSEABLE: &str = "Unable to parse sentiment";
pub const PROCESSING_ERROR: &str = "Error processing response";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Sentiment,
    Confidence,
    Analysis,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionTier {
    /// All three fields were present and usable.
    Complete,
    /// The candidate parsed; the listed fields fell back to their defaults.
    FieldDefaults(Vec<Field>),
    /// No JSON candidate in the text.
    NoJson,
    /// A candidate was found but is not valid JSON.
    Malformed,
}

impl ExtractionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionTier::Complete => "complete",
            ExtractionTier::FieldDefaults(_) => "field_defaults",
            ExtractionTier::NoJson => "no_json",
            ExtractionTier::Malformed => "malformed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub result: StructuredResult,
    pub tier: ExtractionTier,
}

impl Extraction {
    fn no_json() -> Self {
        Self {
            result: StructuredResult::new(Sentiment::Neutral, DEFAULT_CONFIDENCE, UNPARSEABLE),
            tier: ExtractionTier::NoJson,
        }
    }

    fn malformed() -> Self {
        Self {
            result: StructuredResult::new(Sentiment::Error, 0.0, PROCESSING_ERROR),
            tier: ExtractionTier::Malformed,
        }
    }
}

/// Locate the JSON candidate: first `{` through the last `}`.
///
/// No `}` anywhere means the reply was cut off mid-object; the candidate
/// then runs to the end of the text. A last `}` before the first `{` is
/// no candidate at all.
fn candidate(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    match raw.rfind('}') {
        Some(end) if end > start => Some(&raw[start..=end]),
        Some(_) => None,
        None => Some(&raw[start..]),
    }
}

pub fn extract(raw: &str) -> Extraction {
    let Some(candidate) = candidate(raw) else {
        return Extraction::no_json();
    };
    let obj = match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(obj)) => obj,
        // a valid JSON value that is not an object cannot start with '{'
        Ok(_) => return Extraction::no_json(),
        Err(e) => {
            tracing::debug!(error = %e, "sentiment candidate is not valid json");
            return Extraction::malformed();
        }
    };
    from_object(&obj)
}

fn from_object(obj: &Map<String, Value>) -> Extraction {
    let mut defaulted = Vec::new();

    let sentiment = obj
        .get("sentiment")
        .and_then(Value::as_str)
        .and_then(Sentiment::parse_label)
        .unwrap_or_else(|| {
            defaulted.push(Field::Sentiment);
            Sentiment::Neutral
        });

    let confidence = obj.get("confidence").and_then(as_confidence).unwrap_or_else(|| {
        defaulted.push(Field::Confidence);
        DEFAULT_CONFIDENCE
    });

    let analysis = obj
        .get("analysis")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            defaulted.push(Field::Analysis);
            NO_ANALYSIS.to_string()
        });

    let tier = if defaulted.is_empty() {
        ExtractionTier::Complete
    } else {
        ExtractionTier::FieldDefaults(defaulted)
    };
    Extraction {
        result: StructuredResult::new(sentiment, confidence, analysis),
        tier,
    }
}

/// Numbers, or numeric strings such as `"0.8"`. Out-of-range values are
/// clamped by `StructuredResult::new`.
fn as_confidence(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}
