//! Metrics collection utilities.
//!
//! Provides aggregated gateway and per-operation statistics with latency
//! percentiles, plus challenge and verdict counters for observability.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::challenges::core::{ChallengeKind, GatewayOperation};

/// Aggregated metrics across the widget lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalStats {
    pub started_at: DateTime<Utc>,
    pub total_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
    pub low_confidence_verdicts: u64,
    pub passing_verdicts: u64,
    pub telemetry_flushes: u64,
    pub telemetry_samples: u64,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            total_calls: 0,
            successes: 0,
            failures: 0,
            average_latency: None,
            p95_latency: None,
            low_confidence_verdicts: 0,
            passing_verdicts: 0,
            telemetry_flushes: 0,
            telemetry_samples: 0,
        }
    }
}

/// Operation-scoped metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct OperationStats {
    pub operation: GatewayOperation,
    pub total_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
    pub consecutive_failures: u32,
}

impl OperationStats {
    fn from_accumulator(operation: GatewayOperation, acc: &OperationAccumulator) -> Self {
        let (avg, p95) = acc.latency_stats();
        Self {
            operation,
            total_calls: acc.total_calls,
            successes: acc.successes,
            failures: acc.failures,
            average_latency: avg,
            p95_latency: p95,
            consecutive_failures: acc.consecutive_failures,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChallengeStats {
    pub kind: Option<ChallengeKind>,
    pub issued: u64,
    pub passed: u64,
    pub failed: u64,
    pub expired: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub global: GlobalStats,
    pub operations: Vec<OperationStats>,
    pub challenges: Vec<ChallengeStats>,
}

#[derive(Debug)]
struct OperationAccumulator {
    total_calls: u64,
    successes: u64,
    failures: u64,
    latencies: VecDeque<Duration>,
    max_window: usize,
    consecutive_failures: u32,
}

impl OperationAccumulator {
    fn new(max_window: usize) -> Self {
        Self {
            total_calls: 0,
            successes: 0,
            failures: 0,
            latencies: VecDeque::with_capacity(max_window),
            max_window,
            consecutive_failures: 0,
        }
    }

    fn record(&mut self, success: bool, latency: Duration) {
        self.total_calls += 1;

        if success {
            self.successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.failures += 1;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }

        if self.latencies.len() == self.max_window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    fn latency_stats(&self) -> (Option<Duration>, Option<Duration>) {
        latency_stats(self.latencies.iter().copied().collect())
    }
}

fn latency_stats(mut samples: Vec<Duration>) -> (Option<Duration>, Option<Duration>) {
    if samples.is_empty() {
        return (None, None);
    }
    samples.sort_unstable();
    let avg = samples.iter().map(|d| d.as_secs_f64()).sum::<f64>() / samples.len() as f64;
    let p95_index = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
    (Some(Duration::from_secs_f64(avg)), Some(samples[p95_index]))
}

#[derive(Debug)]
struct MetricsState {
    global: GlobalStats,
    max_window: usize,
    operations: HashMap<GatewayOperation, OperationAccumulator>,
    challenges: HashMap<ChallengeKind, ChallengeStats>,
}

impl MetricsState {
    fn new(max_window: usize) -> Self {
        Self {
            global: GlobalStats::default(),
            max_window,
            operations: HashMap::new(),
            challenges: HashMap::new(),
        }
    }

    fn challenge_mut(&mut self, kind: ChallengeKind) -> &mut ChallengeStats {
        self.challenges.entry(kind).or_insert_with(|| ChallengeStats {
            kind: Some(kind),
            ..ChallengeStats::default()
        })
    }
}

/// Thread-safe metrics collector fed by [`super::events::MetricsHandler`].
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(128))),
        }
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(window.max(16)))),
        }
    }

    pub fn record_call(&self, operation: GatewayOperation, success: bool, latency: Duration) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.total_calls += 1;
        if success {
            guard.global.successes += 1;
        } else {
            guard.global.failures += 1;
        }

        let max_window = guard.max_window;
        guard
            .operations
            .entry(operation)
            .or_insert_with(|| OperationAccumulator::new(max_window))
            .record(success, latency);

        let samples: Vec<_> = guard
            .operations
            .values()
            .flat_map(|acc| acc.latencies.iter())
            .copied()
            .collect();
        let (avg, p95) = latency_stats(samples);
        guard.global.average_latency = avg;
        guard.global.p95_latency = p95;
    }

    pub fn record_verdict(&self, low_confidence: bool) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        if low_confidence {
            guard.global.low_confidence_verdicts += 1;
        } else {
            guard.global.passing_verdicts += 1;
        }
    }

    pub fn record_issued(&self, kind: ChallengeKind) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.challenge_mut(kind).issued += 1;
    }

    pub fn record_expired(&self, kind: ChallengeKind) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.challenge_mut(kind).expired += 1;
    }

    pub fn record_verification(&self, kind: ChallengeKind, success: bool) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        let stats = guard.challenge_mut(kind);
        if success {
            stats.passed += 1;
        } else {
            stats.failed += 1;
        }
    }

    pub fn record_flush(&self, samples: usize) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.telemetry_flushes += 1;
        guard.global.telemetry_samples += samples as u64;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.inner.lock().expect("metrics lock poisoned");
        let mut operations: Vec<_> = guard
            .operations
            .iter()
            .map(|(operation, acc)| OperationStats::from_accumulator(*operation, acc))
            .collect();
        operations.sort_by_key(|stats| stats.operation.path());
        let mut challenges: Vec<_> = guard.challenges.values().cloned().collect();
        challenges.sort_by_key(|stats| stats.kind.map(ChallengeKind::as_str));
        MetricsSnapshot {
            global: guard.global.clone(),
            operations,
            challenges,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
