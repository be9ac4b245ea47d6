//! Event system for the widget driver.
//!
//! Provides hooks for metrics, logging, and host reactions around state
//! transitions, gateway calls, and challenge lifecycle.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::metrics::MetricsCollector;
use crate::challenges::core::{ChallengeKind, GatewayOperation};
use crate::challenges::orchestrator::WidgetState;

#[derive(Debug, Clone)]
pub struct StateChangeEvent {
    pub from: WidgetState,
    pub to: WidgetState,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

/// Completed (or failed) round trip to the verification gateway.
#[derive(Debug, Clone)]
pub struct GatewayCallEvent {
    pub operation: GatewayOperation,
    pub latency: Duration,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct VerdictEvent {
    pub confidence_score: f64,
    pub is_bot_detected: bool,
    pub low_confidence: bool,
    pub next_challenge: Option<ChallengeKind>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChallengeEvent {
    pub kind: ChallengeKind,
    pub challenge_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct VerificationEvent {
    pub kind: ChallengeKind,
    pub challenge_id: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TelemetryFlushEvent {
    pub session_id: String,
    pub sequence: u64,
    pub samples: usize,
    pub is_final: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub context: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum WidgetEvent {
    StateChanged(StateChangeEvent),
    GatewayCall(GatewayCallEvent),
    Verdict(VerdictEvent),
    ChallengeIssued(ChallengeEvent),
    ChallengeExpired(ChallengeEvent),
    Verification(VerificationEvent),
    TelemetryFlushed(TelemetryFlushEvent),
    Error(ErrorEvent),
}

impl WidgetEvent {
    pub fn error(context: impl Into<String>, error: impl ToString) -> Self {
        WidgetEvent::Error(ErrorEvent {
            context: context.into(),
            error: error.to_string(),
            timestamp: Utc::now(),
        })
    }
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &WidgetEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: WidgetEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &WidgetEvent) {
        match event {
            WidgetEvent::StateChanged(change) => {
                log::debug!(
                    "state {:?} -> {:?} (attempts {})",
                    change.from,
                    change.to,
                    change.attempts
                );
            }
            WidgetEvent::GatewayCall(call) => {
                log::debug!(
                    "<- {} ok={} ({:.2}s)",
                    call.operation,
                    call.success,
                    call.latency.as_secs_f64()
                );
            }
            WidgetEvent::Verdict(verdict) => {
                log::info!(
                    "verdict score={:.1} bot={} low={} next={:?}",
                    verdict.confidence_score,
                    verdict.is_bot_detected,
                    verdict.low_confidence,
                    verdict.next_challenge
                );
            }
            WidgetEvent::ChallengeIssued(challenge) => {
                log::debug!("{} challenge issued: {}", challenge.kind, challenge.challenge_id);
            }
            WidgetEvent::ChallengeExpired(challenge) => {
                log::info!("{} challenge expired: {}", challenge.kind, challenge.challenge_id);
            }
            WidgetEvent::Verification(verification) => {
                log::info!(
                    "{} challenge {} success={}",
                    verification.kind,
                    verification.challenge_id,
                    verification.success
                );
            }
            WidgetEvent::TelemetryFlushed(flush) => {
                log::trace!(
                    "telemetry batch #{} ({} samples, final={})",
                    flush.sequence,
                    flush.samples,
                    flush.is_final
                );
            }
            WidgetEvent::Error(error) => {
                log::warn!("warning {} -> {}", error.context, error.error);
            }
        }
    }
}

/// Metrics handler that feeds the metrics collector.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    metrics: MetricsCollector,
}

impl MetricsHandler {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

impl EventHandler for MetricsHandler {
    fn handle(&self, event: &WidgetEvent) {
        match event {
            WidgetEvent::GatewayCall(call) => {
                self.metrics
                    .record_call(call.operation, call.success, call.latency);
            }
            WidgetEvent::Verdict(verdict) => {
                self.metrics.record_verdict(verdict.low_confidence);
            }
            WidgetEvent::ChallengeIssued(challenge) => {
                self.metrics.record_issued(challenge.kind);
            }
            WidgetEvent::ChallengeExpired(challenge) => {
                self.metrics.record_expired(challenge.kind);
            }
            WidgetEvent::Verification(verification) => {
                self.metrics
                    .record_verification(verification.kind, verification.success);
            }
            WidgetEvent::TelemetryFlushed(flush) => {
                self.metrics.record_flush(flush.samples);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingHandler(std::sync::Mutex<usize>);

    impl EventHandler for CountingHandler {
        fn handle(&self, _event: &WidgetEvent) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn dispatches_to_handlers() {
        let mut dispatcher = EventDispatcher::new();
        let counter = Arc::new(CountingHandler(std::sync::Mutex::new(0)));
        dispatcher.register_handler(counter.clone());
        dispatcher.register_handler(Arc::new(LoggingHandler));
        dispatcher.dispatch(WidgetEvent::error("next-step", "timeout"));
        assert_eq!(*counter.0.lock().unwrap(), 1);
    }

    #[test]
    fn metrics_handler_counts_gateway_calls() {
        let metrics = MetricsCollector::new();
        let handler = MetricsHandler::new(metrics.clone());
        handler.handle(&WidgetEvent::GatewayCall(GatewayCallEvent {
            operation: GatewayOperation::NextStep,
            latency: Duration::from_millis(40),
            success: true,
            timestamp: Utc::now(),
        }));
        handler.handle(&WidgetEvent::ChallengeIssued(ChallengeEvent {
            kind: ChallengeKind::Image,
            challenge_id: "c-1".into(),
            timestamp: Utc::now(),
        }));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.global.total_calls, 1);
        assert_eq!(snapshot.challenges[0].issued, 1);
    }
}
