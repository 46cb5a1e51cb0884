//! One instrumented sentiment call.
//!
//! Per invocation:
//!
//! ```text
//! Idle → OuterSpanOpen → InnerSpanOpen → {TimedOut | TransportFailed | ResponseReceived}
//!      → Extracted → Closed
//! ```
//!
//! Every path to `Closed` closes the inner span before the outer one and
//! records exactly one attempt, one outcome (succeeded xor failed) and one
//! duration. If the call's future is dropped mid-flight the same bookkeeping
//! runs from `Drop`, classified as cancelled.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing_futures::Instrument;

use crate::config::Config;
use crate::error::{CoreResult, ErrorKind, SentimentError};
use crate::extract::{extract, Extraction};
use crate::model::{CallRequest, Outcome};
use crate::normalizer::preview;
use crate::provider::{Completion, CompletionClient, CompletionRequest};
use crate::providers::anthropic::Anthropic;
use crate::telemetry::{
    keys::*, MetricsRecorder, SpanContext, SpanHandle, SpanStatus, SpanTracker, TelemetrySink,
};

/// Deadline applied to the outbound call unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const INSTRUCTION: &str = "Analyze the sentiment of this text and respond in JSON format with: \
{\"sentiment\": \"positive/negative/neutral\", \
\"confidence\": 0.0-1.0, \
\"analysis\": \"brief explanation\"}. \
Text: ";

/// The single user message sent for `text`.
pub fn build_prompt(text: &str) -> String {
    format!("{INSTRUCTION}{text}")
}

pub struct CallOrchestrator {
    client: Arc<dyn CompletionClient>,
    tracker: SpanTracker,
    metrics: Arc<MetricsRecorder>,
    timeout: Duration,
}

impl CallOrchestrator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        tracker: SpanTracker,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            client,
            tracker,
            metrics,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Anthropic-backed orchestrator from config.
    pub fn from_config(
        cfg: &Config,
        sink: Arc<dyn TelemetrySink>,
        metrics: Arc<MetricsRecorder>,
    ) -> CoreResult<Self> {
        let client = Arc::new(Anthropic::from_config(cfg)?);
        Ok(Self::new(client, SpanTracker::new(sink), metrics).with_timeout(cfg.call.timeout()))
    }

    pub fn tracker(&self) -> &SpanTracker {
        &self.tracker
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn run(&self, request: CallRequest) -> Outcome {
        self.run_until(request, std::future::pending::<()>()).await
    }

    /// Like [`run`](Self::run), but gives up with `Cancelled` as soon as
    /// `cancel` completes.
    pub async fn run_until<C>(&self, request: CallRequest, cancel: C) -> Outcome
    where
        C: Future<Output = ()> + Send,
    {
        let call = InFlight::begin(&self.tracker, self.metrics.clone(), &request);
        let span = tracing::info_span!(
            "analyze",
            trace_id = %call.trace_id(),
            model = %request.model(),
            sentiment = tracing::field::Empty,
        );
        let ctx = call.outer_context();
        SpanTracker::scope(ctx, self.drive(call, request, cancel))
            .instrument(span)
            .await
    }

    async fn drive<C>(&self, mut call: InFlight, request: CallRequest, cancel: C) -> Outcome
    where
        C: Future<Output = ()> + Send,
    {
        tracing::info!(
            input_len = request.input_len(),
            "starting sentiment analysis: {}",
            preview(request.text(), 50)
        );

        call.open_http(&self.tracker, self.client.as_ref());

        let prompt = build_prompt(request.text());
        let trace_id = call.trace_id().to_string();
        let outbound = CompletionRequest {
            model: request.model(),
            max_tokens: request.max_tokens(),
            prompt: &prompt,
            request_id: Some(&trace_id),
        };

        let response = tokio::select! {
            r = tokio::time::timeout(self.timeout, self.client.complete(outbound)) => match r {
                Ok(r) => r,
                Err(_) => Err(SentimentError::Timeout {
                    after_ms: self.timeout.as_millis() as u64,
                }),
            },
            _ = cancel => Err(SentimentError::Cancelled),
        };

        let completion = match response {
            Ok(c) => c,
            Err(err) => return call.fail(&err),
        };

        call.http_ok(&completion);
        let extraction = extract(&completion.text);
        tracing::Span::current().record("sentiment", extraction.result.sentiment.as_str());
        call.succeed(extraction)
    }
}

/// Bookkeeping for one call: spans, timer, and the metrics triple.
struct InFlight {
    metrics: Arc<MetricsRecorder>,
    started: Instant,
    trace_id: String,
    ctx: SpanContext,
    outer: Option<SpanHandle>,
    inner: Option<SpanHandle>,
    settled: bool,
}

impl InFlight {
    fn begin(tracker: &SpanTracker, metrics: Arc<MetricsRecorder>, request: &CallRequest) -> Self {
        metrics.increment_attempted();
        let started = Instant::now();
        let mut outer = tracker.begin(SPAN_ANALYZE, None);
        outer.set_attribute(KEY_INPUT_LENGTH, request.input_len());
        outer.set_attribute(KEY_MODEL, request.model());
        Self {
            metrics,
            started,
            trace_id: outer.trace_id().to_string(),
            ctx: outer.context(),
            outer: Some(outer),
            inner: None,
            settled: false,
        }
    }

    fn trace_id(&self) -> &str {
        &self.trace_id
    }

    fn outer_context(&self) -> SpanContext {
        self.ctx.clone()
    }

    /// Opens `http.call` under the active span (the outer one).
    fn open_http(&mut self, tracker: &SpanTracker, client: &dyn CompletionClient) {
        let mut inner = tracker.begin(SPAN_HTTP_CALL, None);
        inner.set_attribute(KEY_PROVIDER, client.name());
        inner.set_attribute(KEY_HTTP_METHOD, client.method().as_str());
        inner.set_attribute(KEY_HTTP_URL, client.endpoint());
        self.inner = Some(inner);
    }

    fn http_ok(&mut self, completion: &Completion) {
        if let Some(mut inner) = self.inner.take() {
            if let Some(rid) = &completion.provider_request_id {
                inner.set_attribute(KEY_PROVIDER_REQUEST_ID, rid.as_str());
            }
            if let Some(reason) = &completion.stop_reason {
                inner.set_attribute(KEY_STOP_REASON, reason.as_str());
            }
            if let Some(n) = completion.tokens_prompt {
                inner.set_attribute(KEY_TOKENS_PROMPT, n);
            }
            if let Some(n) = completion.tokens_completion {
                inner.set_attribute(KEY_TOKENS_COMPLETION, n);
            }
            inner.set_attribute(KEY_LATENCY_MS, completion.latency_ms);
            inner.set_status(SpanStatus::Ok);
            close(inner);
        }
    }

    fn succeed(mut self, extraction: Extraction) -> Outcome {
        let Extraction { result, tier } = extraction;
        if let Some(mut outer) = self.outer.take() {
            outer.set_attribute(KEY_OUTPUT_SENTIMENT, result.sentiment.as_str());
            outer.set_attribute(KEY_OUTPUT_CONFIDENCE, result.confidence);
            outer.set_attribute(KEY_EXTRACTION_TIER, tier.as_str());
            outer.set_status(SpanStatus::Ok);
            close(outer);
        }
        self.metrics.increment_succeeded();
        let duration = self.settle();
        tracing::info!(
            sentiment = %result.sentiment,
            confidence = result.confidence,
            tier = tier.as_str(),
            duration_ms = duration.as_millis() as u64,
            "sentiment analysis completed"
        );
        Outcome::Success {
            result,
            duration,
            trace_id: std::mem::take(&mut self.trace_id),
        }
    }

    fn fail(mut self, err: &SentimentError) -> Outcome {
        let kind = err.kind();
        let message = err.to_string();
        self.close_all_with_error(kind, &message);
        self.metrics.increment_failed();
        let duration = self.settle();
        if kind == ErrorKind::Cancelled {
            tracing::warn!(trace_id = %self.trace_id, "sentiment analysis cancelled");
        } else {
            tracing::error!(
                trace_id = %self.trace_id,
                error.kind = kind.as_str(),
                error.message = %message,
                duration_ms = duration.as_millis() as u64,
                "sentiment analysis failed"
            );
        }
        Outcome::Failure {
            kind,
            message,
            duration,
            trace_id: std::mem::take(&mut self.trace_id),
        }
    }

    /// Inner first, then outer.
    fn close_all_with_error(&mut self, kind: ErrorKind, message: &str) {
        for mut span in [self.inner.take(), self.outer.take()].into_iter().flatten() {
            span.set_attribute(KEY_ERROR_KIND, kind.as_str());
            span.set_attribute(KEY_ERROR_MESSAGE, message);
            span.set_status(SpanStatus::Error(message.to_string()));
            close(span);
        }
    }

    fn settle(&mut self) -> Duration {
        self.settled = true;
        let elapsed = self.started.elapsed();
        self.metrics.record_duration(elapsed);
        elapsed
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let message = SentimentError::Cancelled.to_string();
        self.close_all_with_error(ErrorKind::Cancelled, &message);
        self.metrics.increment_failed();
        self.settle();
        tracing::warn!(trace_id = %self.trace_id, "sentiment analysis abandoned by caller");
    }
}

fn close(span: SpanHandle) {
    // faults are already logged and counted by the tracker
    let _ = span.end();
}
