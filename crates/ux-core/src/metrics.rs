use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;

/// Counters for the simulation pipeline.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    // Steps
    pub steps_recorded: AtomicU64,
    pub validation_retries: AtomicU64,
    pub provider_errors: AtomicU64,
    pub action_errors: AtomicU64,

    // Episode outcomes
    pub episodes_completed: AtomicU64,
    pub episodes_abandoned: AtomicU64,
    pub episodes_failed: AtomicU64,

    // Aggregation
    pub aggregations: AtomicU64,
    pub duplicate_triggers: AtomicU64,

    latencies: RwLock<LatencyTracker>,
}

/// Rolling window of reasoning-call latencies.
#[derive(Debug, Default)]
struct LatencyTracker {
    reasoning: Vec<Duration>,
    max_samples: usize,
}

impl LatencyTracker {
    fn new(max_samples: usize) -> Self {
        LatencyTracker {
            reasoning: Vec::with_capacity(max_samples),
            max_samples,
        }
    }

    fn record(&mut self, duration: Duration) {
        if self.reasoning.len() >= self.max_samples {
            self.reasoning.remove(0);
        }
        self.reasoning.push(duration);
    }

    fn avg(&self) -> Option<Duration> {
        if self.reasoning.is_empty() {
            None
        } else {
            let total: Duration = self.reasoning.iter().sum();
            Some(total / self.reasoning.len() as u32)
        }
    }

    fn p99(&self) -> Option<Duration> {
        percentile(&self.reasoning, 99)
    }
}

fn percentile(samples: &[Duration], p: usize) -> Option<Duration> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted: Vec<_> = samples.to_vec();
    sorted.sort();
    let idx = (sorted.len() * p / 100).min(sorted.len() - 1);
    Some(sorted[idx])
}

impl EngineMetrics {
    pub fn new() -> Self {
        EngineMetrics {
            latencies: RwLock::new(LatencyTracker::new(1000)),
            ..Default::default()
        }
    }

    pub fn record_step(&self) {
        self.steps_recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// A reasoning attempt that came back but failed schema validation.
    pub fn record_validation_retry(&self) {
        self.validation_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_error(&self) {
        self.provider_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_action_error(&self) {
        self.action_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.episodes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned(&self) {
        self.episodes_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.episodes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aggregation(&self) {
        self.aggregations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_trigger(&self) {
        self.duplicate_triggers.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn record_reasoning_latency(&self, duration: Duration) {
        self.latencies.write().await.record(duration);
    }

    /// Get a snapshot of the current metrics.
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let latencies = self.latencies.read().await;

        MetricsSnapshot {
            steps_recorded: self.steps_recorded.load(Ordering::Relaxed),
            validation_retries: self.validation_retries.load(Ordering::Relaxed),
            provider_errors: self.provider_errors.load(Ordering::Relaxed),
            action_errors: self.action_errors.load(Ordering::Relaxed),
            episodes_completed: self.episodes_completed.load(Ordering::Relaxed),
            episodes_abandoned: self.episodes_abandoned.load(Ordering::Relaxed),
            episodes_failed: self.episodes_failed.load(Ordering::Relaxed),
            aggregations: self.aggregations.load(Ordering::Relaxed),
            duplicate_triggers: self.duplicate_triggers.load(Ordering::Relaxed),
            reasoning_latency_avg_ms: latencies.avg().map(|d| d.as_millis() as f64),
            reasoning_latency_p99_ms: latencies.p99().map(|d| d.as_millis() as f64),
        }
    }

    pub async fn reset(&self) {
        self.steps_recorded.store(0, Ordering::Relaxed);
        self.validation_retries.store(0, Ordering::Relaxed);
        self.provider_errors.store(0, Ordering::Relaxed);
        self.action_errors.store(0, Ordering::Relaxed);
        self.episodes_completed.store(0, Ordering::Relaxed);
        self.episodes_abandoned.store(0, Ordering::Relaxed);
        self.episodes_failed.store(0, Ordering::Relaxed);
        self.aggregations.store(0, Ordering::Relaxed);
        self.duplicate_triggers.store(0, Ordering::Relaxed);

        self.latencies.write().await.reasoning.clear();
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub steps_recorded: u64,
    pub validation_retries: u64,
    pub provider_errors: u64,
    pub action_errors: u64,

    pub episodes_completed: u64,
    pub episodes_abandoned: u64,
    pub episodes_failed: u64,

    pub aggregations: u64,
    pub duplicate_triggers: u64,

    pub reasoning_latency_avg_ms: Option<f64>,
    pub reasoning_latency_p99_ms: Option<f64>,
}

impl MetricsSnapshot {
    pub fn terminal_episodes(&self) -> u64 {
        self.episodes_completed + self.episodes_abandoned + self.episodes_failed
    }

    /// Share of terminal episodes that FAILED, as a percentage.
    pub fn failure_rate(&self) -> f64 {
        let total = self.terminal_episodes();
        if total == 0 {
            0.0
        } else {
            (self.episodes_failed as f64 / total as f64) * 100.0
        }
    }
}

pub type SharedMetrics = Arc<EngineMetrics>;

pub fn create_metrics() -> SharedMetrics {
    Arc::new(EngineMetrics::new())
}
