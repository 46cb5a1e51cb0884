//! Span hierarchy with explicit begin/end and a task-local active span.
//!
//! Contract:
//! - [`SpanTracker::begin`] opens a span. Its parent is the explicit one if
//!   given, else the active span of the current task, else none (a new trace).
//! - [`SpanHandle::end`] consumes the handle, so a span is closed at most once
//!   and cannot be touched afterwards. A handle dropped without `end` closes
//!   itself with `error("cancelled")`, so every span is closed exactly once on
//!   every path.
//! - Closing a span while one of its children is still open is a fault: the
//!   span is still closed and emitted, tagged with `span.open_children`, and
//!   the fault is logged, counted and returned.
//! - The active span lives in a `tokio::task_local!`, installed with
//!   [`SpanTracker::scope`]. It follows the future across `.await` points and
//!   worker threads; concurrent calls never see each other's active span.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::time::Instant;

use super::keys::KEY_OPEN_CHILDREN;
use super::types::{AttrValue, SpanId, SpanRecord, SpanStatus};
use super::TelemetrySink;

static NEXT_SPAN_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static ACTIVE_SPAN: SpanContext;
}

/// Cheap, cloneable reference to an open span, used for parenting.
#[derive(Debug, Clone)]
pub struct SpanContext {
    trace_id: Arc<str>,
    span_id: SpanId,
    open_children: Arc<AtomicUsize>,
}

impl SpanContext {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.span_id
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpanFault {
    #[error("span {name} ({span_id}) closed with {open} child span(s) still open")]
    OpenChildren {
        name: String,
        span_id: SpanId,
        open: usize,
    },
}

struct TrackerInner {
    sink: Arc<dyn TelemetrySink>,
    open: AtomicUsize,
    faults: AtomicU64,
}

/// Opens spans and hands closed ones to a [`TelemetrySink`].
#[derive(Clone)]
pub struct SpanTracker {
    inner: Arc<TrackerInner>,
}

impl std::fmt::Debug for SpanTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanTracker")
            .field("open", &self.open_spans())
            .field("faults", &self.faults())
            .finish()
    }
}

impl SpanTracker {
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                sink,
                open: AtomicUsize::new(0),
                faults: AtomicU64::new(0),
            }),
        }
    }

    pub fn begin(&self, name: &str, parent: Option<&SpanContext>) -> SpanHandle {
        let parent = parent.cloned().or_else(Self::current);
        let (trace_id, parent_id, parent_children) = match parent {
            Some(p) => {
                p.open_children.fetch_add(1, Ordering::SeqCst);
                (p.trace_id, Some(p.span_id), Some(p.open_children))
            }
            None => (new_trace_id(), None, None),
        };
        self.inner.open.fetch_add(1, Ordering::SeqCst);

        SpanHandle {
            tracker: self.inner.clone(),
            ctx: SpanContext {
                trace_id,
                span_id: SpanId(NEXT_SPAN_ID.fetch_add(1, Ordering::Relaxed)),
                open_children: Arc::new(AtomicUsize::new(0)),
            },
            parent_id,
            parent_children,
            name: name.to_string(),
            attributes: Vec::new(),
            status: SpanStatus::Unset,
            start_ms: now_ms(),
            started: Instant::now(),
            closed: false,
        }
    }

    /// Active span of the current task, if any.
    pub fn current() -> Option<SpanContext> {
        ACTIVE_SPAN.try_with(|c| c.clone()).ok()
    }

    /// Run `fut` with `ctx` as its active span.
    pub async fn scope<F: Future>(ctx: SpanContext, fut: F) -> F::Output {
        ACTIVE_SPAN.scope(ctx, fut).await
    }

    /// Spans begun through this tracker and not yet closed.
    pub fn open_spans(&self) -> usize {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Nesting faults seen so far.
    pub fn faults(&self) -> u64 {
        self.inner.faults.load(Ordering::SeqCst)
    }
}

/// An open span. Attributes and status can only be set through this handle.
pub struct SpanHandle {
    tracker: Arc<TrackerInner>,
    ctx: SpanContext,
    parent_id: Option<SpanId>,
    parent_children: Option<Arc<AtomicUsize>>,
    name: String,
    attributes: Vec<(String, AttrValue)>,
    status: SpanStatus,
    start_ms: u64,
    started: Instant,
    closed: bool,
}

impl std::fmt::Debug for SpanHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanHandle")
            .field("name", &self.name)
            .field("span_id", &self.ctx.span_id)
            .field("parent_id", &self.parent_id)
            .field("status", &self.status)
            .finish()
    }
}

impl SpanHandle {
    pub fn context(&self) -> SpanContext {
        self.ctx.clone()
    }

    pub fn trace_id(&self) -> &str {
        &self.ctx.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.ctx.span_id
    }

    pub fn parent_id(&self) -> Option<SpanId> {
        self.parent_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set `key`; an existing key keeps its position and gets the new value.
    pub fn set_attribute(&mut self, key: &str, value: impl Into<AttrValue>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((key.to_string(), value)),
        }
    }

    pub fn set_status(&mut self, status: SpanStatus) {
        self.status = status;
    }

    pub fn status(&self) -> &SpanStatus {
        &self.status
    }

    pub fn end(mut self) -> Result<SpanRecord, SpanFault> {
        self.close()
    }

    fn close(&mut self) -> Result<SpanRecord, SpanFault> {
        self.closed = true;
        let open = self.ctx.open_children.load(Ordering::SeqCst);
        if open > 0 {
            self.set_attribute(KEY_OPEN_CHILDREN, open);
        }

        let duration_us = self.started.elapsed().as_micros() as u64;
        let record = SpanRecord {
            trace_id: self.ctx.trace_id.to_string(),
            span_id: self.ctx.span_id,
            parent_id: self.parent_id,
            name: std::mem::take(&mut self.name),
            attributes: std::mem::take(&mut self.attributes),
            status: std::mem::take(&mut self.status),
            start_ms: self.start_ms,
            end_ms: self.start_ms + duration_us / 1_000,
            duration_us,
        };

        if let Some(parent) = self.parent_children.take() {
            parent.fetch_sub(1, Ordering::SeqCst);
        }
        self.tracker.open.fetch_sub(1, Ordering::SeqCst);
        self.tracker.sink.record_span(record.clone());

        if open > 0 {
            self.tracker.faults.fetch_add(1, Ordering::SeqCst);
            let fault = SpanFault::OpenChildren {
                name: record.name,
                span_id: record.span_id,
                open,
            };
            tracing::error!(trace_id = %record.trace_id, "{fault}");
            return Err(fault);
        }
        Ok(record)
    }
}

impl Drop for SpanHandle {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if !self.status.is_error() {
            self.status = SpanStatus::Error("cancelled".into());
        }
        let _ = self.close();
    }
}

fn new_trace_id() -> Arc<str> {
    Arc::from(uuid::Uuid::new_v4().simple().to_string())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MemorySink;
    use std::collections::HashSet;
    use std::time::Duration;

    fn tracker() -> (SpanTracker, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (SpanTracker::new(sink.clone()), sink)
    }

    #[test]
    fn root_span_gets_new_trace_and_closes_once() {
        let (tracker, sink) = tracker();
        let mut span = tracker.begin("analyze", None);
        span.set_attribute("ai.model", "claude");
        span.set_attribute("ai.input.length", 12usize);
        span.set_attribute("ai.model", "claude-3");
        span.set_status(SpanStatus::Ok);
        assert_eq!(tracker.open_spans(), 1);

        let rec = span.end().unwrap();
        assert_eq!(rec.parent_id, None);
        assert_eq!(rec.trace_id.len(), 32);
        assert_eq!(rec.status, SpanStatus::Ok);
        assert!(rec.end_ms >= rec.start_ms);
        // replaced in place, insertion order kept
        assert_eq!(rec.attributes[0], ("ai.model".to_string(), AttrValue::from("claude-3")));
        assert_eq!(rec.attributes[1].0, "ai.input.length");
        assert_eq!(tracker.open_spans(), 0);
        assert_eq!(sink.spans().len(), 1);
    }

    #[test]
    fn explicit_parent_links_trace_and_parent() {
        let (tracker, sink) = tracker();
        let outer = tracker.begin("analyze", None);
        let inner = tracker.begin("http.call", Some(&outer.context()));
        assert_eq!(inner.trace_id(), outer.trace_id());
        assert_eq!(inner.parent_id(), Some(outer.span_id()));

        inner.end().unwrap();
        outer.end().unwrap();
        let names = sink.spans().into_iter().map(|s| s.name).collect::<Vec<_>>();
        assert_eq!(names, vec!["http.call", "analyze"]);
        assert_eq!(tracker.faults(), 0);
    }

    #[test]
    fn closing_parent_before_child_is_reported() {
        let (tracker, sink) = tracker();
        let outer = tracker.begin("analyze", None);
        let inner = tracker.begin("http.call", Some(&outer.context()));

        let fault = outer.end().unwrap_err();
        assert!(matches!(fault, SpanFault::OpenChildren { open: 1, .. }));
        assert_eq!(tracker.faults(), 1);

        let outer_rec = &sink.spans()[0];
        assert_eq!(outer_rec.attribute(KEY_OPEN_CHILDREN), Some(&AttrValue::Int(1)));

        inner.end().unwrap();
        assert_eq!(tracker.open_spans(), 0);
    }

    #[test]
    fn dropped_handle_closes_as_cancelled() {
        let (tracker, sink) = tracker();
        {
            let _span = tracker.begin("analyze", None);
        }
        let rec = &sink.spans()[0];
        assert_eq!(rec.status, SpanStatus::Error("cancelled".into()));
        assert_eq!(tracker.open_spans(), 0);
    }

    #[test]
    fn dropped_handle_keeps_existing_error() {
        let (tracker, sink) = tracker();
        {
            let mut span = tracker.begin("analyze", None);
            span.set_status(SpanStatus::Error("timeout".into()));
        }
        assert_eq!(sink.spans()[0].status, SpanStatus::Error("timeout".into()));
    }

    #[tokio::test]
    async fn active_span_parents_new_spans_inside_scope() {
        let (tracker, _sink) = tracker();
        assert!(SpanTracker::current().is_none());

        let outer = tracker.begin("analyze", None);
        let ctx = outer.context();
        let t = tracker.clone();
        let inner = SpanTracker::scope(ctx.clone(), async move {
            tokio::task::yield_now().await;
            assert_eq!(SpanTracker::current().map(|c| c.span_id()), Some(ctx.span_id()));
            t.begin("http.call", None)
        })
        .await;

        assert_eq!(inner.parent_id(), Some(outer.span_id()));
        assert!(SpanTracker::current().is_none());
        inner.end().unwrap();
        outer.end().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_scopes_do_not_leak_into_each_other() {
        let (tracker, sink) = tracker();
        let mut tasks = Vec::new();
        for i in 0..32u64 {
            let t = tracker.clone();
            tasks.push(tokio::spawn(async move {
                let root = t.begin("analyze", None);
                let ctx = root.context();
                let child = SpanTracker::scope(ctx.clone(), {
                    let t = t.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(i % 5)).await;
                        let seen = SpanTracker::current().map(|c| c.span_id());
                        assert_eq!(seen, Some(ctx.span_id()));
                        t.begin("http.call", None)
                    }
                })
                .await;
                assert_eq!(child.parent_id(), Some(root.span_id()));
                assert_eq!(child.trace_id(), root.trace_id());
                child.end().unwrap();
                root.end().unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let spans = sink.spans();
        assert_eq!(spans.len(), 64);
        let ids = spans.iter().map(|s| s.span_id).collect::<HashSet<_>>();
        assert_eq!(ids.len(), 64, "span ids must be unique");
        let traces = spans.iter().map(|s| s.trace_id.clone()).collect::<HashSet<_>>();
        assert_eq!(traces.len(), 32);
        assert_eq!(tracker.open_spans(), 0);
        assert_eq!(tracker.faults(), 0);
    }
}
