//! Prometheus metrics for the sentiment call:
//! - `ai_requests_total` (counter) - every attempt
//! - `ai_requests_success` (counter) - attempts that produced a result
//! - `ai_requests_error` (counter) - attempts that failed or were cancelled
//! - `ai_response_time_ms` (histogram) - wall-clock duration per attempt

use std::sync::Arc;
use std::time::Duration;

use prometheus::core::Metric;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{CoreResult, SentimentError};

/// Upper bounds (inclusive, ms) of the response-time histogram buckets.
/// A final `+Inf` bucket is implied.
pub const DURATION_BUCKETS_MS: [u64; 9] = [50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000];

/// Counters and a response-time histogram for the sentiment call.
///
/// Recording never blocks and never fails. Share one instance per process
/// behind an `Arc`.
pub struct MetricsRecorder {
    registry: Arc<Registry>,
    attempted: IntCounter,
    succeeded: IntCounter,
    failed: IntCounter,
    response_time: Histogram,
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl MetricsRecorder {
    /// Recorder with its own registry.
    pub fn new() -> CoreResult<Self> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    /// Register the metrics into an existing registry.
    ///
    /// Fails if the registry already holds metrics with these names.
    pub fn with_registry(registry: Arc<Registry>) -> CoreResult<Self> {
        let attempted = IntCounter::new("ai_requests_total", "Total number of AI API requests")?;
        let succeeded = IntCounter::new("ai_requests_success", "Successful AI API requests")?;
        let failed = IntCounter::new("ai_requests_error", "Failed AI API requests")?;
        let response_time = Histogram::with_opts(
            HistogramOpts::new("ai_response_time_ms", "AI API response time in milliseconds")
                .buckets(DURATION_BUCKETS_MS.iter().map(|&ms| ms as f64).collect()),
        )?;

        registry.register(Box::new(attempted.clone()))?;
        registry.register(Box::new(succeeded.clone()))?;
        registry.register(Box::new(failed.clone()))?;
        registry.register(Box::new(response_time.clone()))?;

        Ok(Self {
            registry,
            attempted,
            succeeded,
            failed,
            response_time,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn increment_attempted(&self) {
        self.attempted.inc();
    }

    pub fn increment_succeeded(&self) {
        self.succeeded.inc();
    }

    pub fn increment_failed(&self) {
        self.failed.inc();
    }

    pub fn record_duration(&self, elapsed: Duration) {
        self.response_time.observe(elapsed.as_secs_f64() * 1_000.0);
    }

    pub fn snapshot(&self) -> MetricSnapshot {
        let metric = self.response_time.metric();
        let hist = metric.get_histogram();
        let duration_count = hist.get_sample_count();
        let mut buckets: Vec<BucketCount> = hist
            .get_bucket()
            .iter()
            .map(|b| BucketCount {
                le_ms: Some(b.get_upper_bound() as u64),
                count: b.get_cumulative_count(),
            })
            .collect();
        buckets.push(BucketCount {
            le_ms: None,
            count: duration_count,
        });

        MetricSnapshot {
            attempted: self.attempted.get(),
            succeeded: self.succeeded.get(),
            failed: self.failed.get(),
            duration_count,
            duration_sum_ms: hist.get_sample_sum(),
            buckets,
        }
    }

    /// Prometheus text exposition of everything in the registry.
    pub fn render_text(&self) -> CoreResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| SentimentError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketCount {
    /// `None` is the `+Inf` bucket.
    pub le_ms: Option<u64>,
    /// Cumulative count of observations `<= le_ms`.
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSnapshot {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub duration_count: u64,
    pub duration_sum_ms: f64,
    pub buckets: Vec<BucketCount>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_durations() {
        let m = MetricsRecorder::new().unwrap();
        m.increment_attempted();
        m.increment_attempted();
        m.increment_succeeded();
        m.increment_failed();
        m.record_duration(Duration::from_millis(40));
        m.record_duration(Duration::from_millis(31_000));

        let s = m.snapshot();
        assert_eq!((s.attempted, s.succeeded, s.failed), (2, 1, 1));
        assert_eq!(s.duration_count, 2);
        assert!((s.duration_sum_ms - 31_040.0).abs() < 1e-6);
        assert_eq!(s.buckets.len(), DURATION_BUCKETS_MS.len() + 1);
        assert_eq!(s.buckets[0], BucketCount { le_ms: Some(50), count: 1 });
        assert_eq!(s.buckets[8], BucketCount { le_ms: Some(30_000), count: 1 });
        assert_eq!(s.buckets[9], BucketCount { le_ms: None, count: 2 });
    }

    #[test]
    fn exactly_thirty_seconds_lands_in_last_finite_bucket() {
        let m = MetricsRecorder::new().unwrap();
        m.record_duration(Duration::from_secs(30));
        let s = m.snapshot();
        assert_eq!(s.buckets[7].count, 0);
        assert_eq!(s.buckets[8].count, 1);
    }

    #[test]
    fn renders_through_text_encoder() {
        let m = MetricsRecorder::new().unwrap();
        m.increment_attempted();
        m.increment_succeeded();
        m.record_duration(Duration::from_millis(120));
        let text = m.render_text().unwrap();
        assert!(text.contains("# TYPE ai_requests_total counter\nai_requests_total 1\n"));
        assert!(text.contains("ai_requests_success 1\n"));
        assert!(text.contains("ai_requests_error 0\n"));
        assert!(text.contains("# TYPE ai_response_time_ms histogram\n"));
        assert!(text.contains("ai_response_time_ms_bucket{le=\"100\"} 0\n"));
        assert!(text.contains("ai_response_time_ms_bucket{le=\"250\"} 1\n"));
        assert!(text.contains("ai_response_time_ms_bucket{le=\"+Inf\"} 1\n"));
        assert!(text.contains("ai_response_time_ms_sum 120\n"));
        assert!(text.contains("ai_response_time_ms_count 1\n"));
        assert!(!text.contains("ai_response_time_ms_max"));
    }

    #[test]
    fn shared_registry_exposes_recorder_metrics() {
        let registry = Arc::new(Registry::new());
        let m = MetricsRecorder::with_registry(registry.clone()).unwrap();
        m.increment_failed();

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        assert!(names.contains(&"ai_requests_error".to_string()));
        assert!(names.contains(&"ai_response_time_ms".to_string()));

        let err = MetricsRecorder::with_registry(registry).unwrap_err();
        assert!(matches!(err, SentimentError::Metrics(_)), "{err:?}");
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let m = Arc::new(MetricsRecorder::new().unwrap());
        let handles = (0..8)
            .map(|_| {
                let m = m.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        m.increment_attempted();
                        m.increment_succeeded();
                        m.record_duration(Duration::from_millis(10));
                    }
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            h.join().unwrap();
        }
        let s = m.snapshot();
        assert_eq!(s.attempted, 8_000);
        assert_eq!(s.succeeded, 8_000);
        assert_eq!(s.duration_count, 8_000);
        assert_eq!(s.buckets[0].count, 8_000);
    }
}
