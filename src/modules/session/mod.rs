//! Session lifecycle.
//!
//! A [`Session`] is created when the widget renders and destroyed on unmount or
//! host reset. It owns the telemetry buffer, the active challenge, and the
//! cancellation token that stops background timers tied to it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::challenges::variants::ActiveChallenge;
use crate::config::DebounceConfig;
use crate::modules::telemetry::{
    BehaviorSample, Millis, TelemetryBatch, TelemetryCapture, TelemetryData,
};

static MOBILE_UA_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"iphone|ipad|ipod|android|blackberry|windows phone")
        .case_insensitive(true)
        .build()
        .expect("invalid mobile user agent regex")
});

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> Millis {
    Utc::now().timestamp_millis().max(0) as Millis
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Desktop,
    Mobile,
}

impl DeviceClass {
    pub fn detect(user_agent: &str, max_touch_points: u32) -> Self {
        if MOBILE_UA_RE.is_match(user_agent) || max_touch_points > 0 {
            DeviceClass::Mobile
        } else {
            DeviceClass::Desktop
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenGeometry {
    pub width: f64,
    pub height: f64,
}

impl ScreenGeometry {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn orientation(&self) -> Orientation {
        if self.height > self.width {
            Orientation::Portrait
        } else {
            Orientation::Landscape
        }
    }
}

/// What the host page reports about the browsing environment.
#[derive(Debug, Clone, PartialEq)]
pub struct HostEnvironment {
    pub user_agent: String,
    pub max_touch_points: u32,
    pub screen: ScreenGeometry,
}

impl HostEnvironment {
    pub fn new(user_agent: impl Into<String>, max_touch_points: u32, screen: ScreenGeometry) -> Self {
        Self {
            user_agent: user_agent.into(),
            max_touch_points,
            screen,
        }
    }

    pub fn device_class(&self) -> DeviceClass {
        DeviceClass::detect(&self.user_agent, self.max_touch_points)
    }
}

impl Default for HostEnvironment {
    fn default() -> Self {
        Self::new(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
            0,
            ScreenGeometry::new(1920.0, 1080.0),
        )
    }
}

/// Numbers telemetry flushes within one session. Starts at 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceCounter {
    last: u64,
}

impl SequenceCounter {
    pub fn next(&mut self) -> u64 {
        self.last += 1;
        self.last
    }

    pub fn current(&self) -> u64 {
        self.last
    }
}

#[derive(Debug, Default)]
struct CancellationInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Session-wide cancellation token shared with background timer tasks.
#[derive(Debug, Clone, Default)]
pub struct SessionCancellation {
    inner: Arc<CancellationInner>,
}

impl SessionCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub device: DeviceClass,
    pub screen: ScreenGeometry,
    pub user_agent: String,
    sequence: SequenceCounter,
    capture: TelemetryCapture,
    capturing: bool,
    batches: Vec<TelemetryBatch>,
    challenge: Option<ActiveChallenge>,
    cancellation: SessionCancellation,
}

impl Session {
    pub fn new(env: &HostEnvironment, debounce: DebounceConfig, now: Millis) -> Self {
        let device = env.device_class();
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            device,
            screen: env.screen,
            user_agent: env.user_agent.clone(),
            sequence: SequenceCounter::default(),
            capture: TelemetryCapture::for_device(device, env.screen, debounce, now),
            capturing: false,
            batches: Vec::new(),
            challenge: None,
            cancellation: SessionCancellation::new(),
        }
    }

    pub fn start_capture(&mut self) {
        self.capturing = true;
    }

    pub fn stop_capture(&mut self) {
        self.capturing = false;
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// Append a raw sample while capture is active.
    pub fn record(&mut self, sample: BehaviorSample) -> bool {
        self.capturing && self.capture.record(sample)
    }

    /// Move buffered samples into a numbered batch. Empty periodic flushes are
    /// skipped; the final flush is always emitted.
    pub fn flush(&mut self, is_final: bool, now: Millis) -> Option<&TelemetryBatch> {
        if !is_final && self.capture.is_empty() {
            return None;
        }
        let batch = TelemetryBatch {
            sequence: self.sequence.next(),
            is_final,
            data: self.capture.flush(is_final, now),
        };
        self.batches.push(batch);
        self.batches.last()
    }

    pub fn pending_batches(&self) -> usize {
        self.batches.len()
    }

    /// Drain every flushed batch into one payload.
    pub fn take_telemetry(&mut self) -> Option<TelemetryData> {
        TelemetryData::merge(self.batches.drain(..).map(|batch| batch.data))
    }

    /// End the current capture slice and bundle everything recorded so far
    /// for evaluation. Always yields a payload, even when nothing was captured.
    pub fn package(&mut self, now: Millis) -> TelemetryData {
        self.capturing = false;
        self.flush(false, now);
        match self.take_telemetry() {
            Some(data) => data,
            None => self.capture.flush(false, now),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.current()
    }

    pub fn challenge(&self) -> Option<&ActiveChallenge> {
        self.challenge.as_ref()
    }

    pub fn challenge_mut(&mut self) -> Option<&mut ActiveChallenge> {
        self.challenge.as_mut()
    }

    pub fn set_challenge(&mut self, challenge: ActiveChallenge) -> Option<ActiveChallenge> {
        self.challenge.replace(challenge)
    }

    pub fn take_challenge(&mut self) -> Option<ActiveChallenge> {
        self.challenge.take()
    }

    pub fn cancellation(&self) -> SessionCancellation {
        self.cancellation.clone()
    }

    /// Final flush, then cancel timers and drop the active challenge. Batches
    /// no evaluation has consumed yet are folded into the returned final one.
    pub fn close(&mut self, now: Millis) -> Option<TelemetryBatch> {
        self.capturing = false;
        self.flush(true, now);
        self.cancellation.cancel();
        self.challenge = None;
        let sequence = self.sequence.current();
        let data = self.take_telemetry()?;
        Some(TelemetryBatch {
            sequence,
            is_final: true,
            data,
        })
    }
}
