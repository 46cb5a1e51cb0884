//! Telemetry primitives for the sentiment call: spans, metrics and sinks.
//!
//! Nothing here is global. A [`SpanTracker`] is built around an injected
//! [`TelemetrySink`] and metrics live in a shared [`MetricsRecorder`].

pub mod keys;
pub mod metrics;
#[cfg(test)]
pub mod test_span;
pub mod tracker;
pub mod types;

pub use keys::*;
pub use metrics::{MetricSnapshot, MetricsRecorder};
pub use tracker::{SpanContext, SpanFault, SpanHandle, SpanTracker};
pub use types::*;

use std::sync::Mutex;

/// Implement this to receive closed spans.
///
/// Requirements:
/// - Implementations must be thread-safe (`Send + Sync`) and `'static`.
/// - `record_span` **may** be called from any thread, including from `Drop`
///   while a cancelled call unwinds; implementations should avoid panicking.
/// - Keep overhead minimal; this is on the request path.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record_span(&self, span: SpanRecord);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn record_span(&self, _span: SpanRecord) {}
}

/// Emits every closed span as one structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn record_span(&self, span: SpanRecord) {
        let attrs = span
            .attributes
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        let parent = span.parent_id.map(|p| p.to_string()).unwrap_or_default();
        match &span.status {
            SpanStatus::Error(detail) => tracing::warn!(
                target: "aisentiment::span",
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                parent_id = %parent,
                duration_us = span.duration_us,
                status = "error",
                detail = %detail,
                attrs = %attrs,
                "{}", span.name
            ),
            SpanStatus::Ok => tracing::info!(
                target: "aisentiment::span",
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                parent_id = %parent,
                duration_us = span.duration_us,
                status = "ok",
                attrs = %attrs,
                "{}", span.name
            ),
            SpanStatus::Unset => tracing::info!(
                target: "aisentiment::span",
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                parent_id = %parent,
                duration_us = span.duration_us,
                status = "unset",
                attrs = %attrs,
                "{}", span.name
            ),
        }
    }
}

/// Keeps closed spans in memory, in close order.
#[derive(Debug, Default)]
pub struct MemorySink {
    spans: Mutex<Vec<SpanRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every span recorded so far.
    pub fn spans(&self) -> Vec<SpanRecord> {
        self.spans.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Spans belonging to one trace, in close order.
    pub fn trace(&self, trace_id: &str) -> Vec<SpanRecord> {
        self.spans()
            .into_iter()
            .filter(|s| s.trace_id == trace_id)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut s) = self.spans.lock() {
            s.clear();
        }
    }
}

impl TelemetrySink for MemorySink {
    fn record_span(&self, span: SpanRecord) {
        if let Ok(mut s) = self.spans.lock() {
            s.push(span);
        }
    }
}
