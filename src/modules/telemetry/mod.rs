//! Raw interaction telemetry.
//!
//! One capture strategy is chosen per session from the device class: desktop
//! pointer/scroll sampling with a spatial/temporal debounce, or mobile touch
//! sampling with gesture derivation. Both accumulate into an in-memory buffer
//! that is flushed into a [`TelemetryBatch`] periodically and once more on
//! teardown.

pub mod desktop;
pub mod mobile;

pub use desktop::{
    DesktopBehaviorData, DesktopCapture, PointerClick, PointerPosition, ScrollPosition,
};
pub use mobile::{
    Gesture, GestureDirection, GestureKind, GestureThresholds, MobileBehaviorData, MobileCapture,
    TouchDistribution, TouchPatterns, TouchPoint, TouchPosition, TouchRecord,
};

use serde::{Deserialize, Serialize};

use crate::config::DebounceConfig;
use crate::modules::session::{DeviceClass, ScreenGeometry};

/// Milliseconds since the Unix epoch, as reported by the host event loop.
pub type Millis = u64;

/// Pointer button phase reported with a click sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClickType {
    MouseDown,
    MouseUp,
    Click,
}

/// One finger in a touch event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TouchContact {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub force: f64,
}

/// One raw interaction event. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BehaviorSample {
    PointerMove {
        x: f64,
        y: f64,
        timestamp: Millis,
    },
    PointerClick {
        x: f64,
        y: f64,
        timestamp: Millis,
        click_type: ClickType,
    },
    Scroll {
        position: f64,
        timestamp: Millis,
    },
    TouchStart {
        touches: Vec<TouchContact>,
        timestamp: Millis,
    },
    TouchMove {
        touches: Vec<TouchContact>,
        timestamp: Millis,
    },
    TouchEnd {
        touches: Vec<TouchContact>,
        timestamp: Millis,
    },
    Gesture(Gesture),
}

impl BehaviorSample {
    pub fn timestamp(&self) -> Millis {
        match self {
            BehaviorSample::PointerMove { timestamp, .. }
            | BehaviorSample::PointerClick { timestamp, .. }
            | BehaviorSample::Scroll { timestamp, .. }
            | BehaviorSample::TouchStart { timestamp, .. }
            | BehaviorSample::TouchMove { timestamp, .. }
            | BehaviorSample::TouchEnd { timestamp, .. } => *timestamp,
            BehaviorSample::Gesture(gesture) => gesture
                .end_points
                .last()
                .map(|point| point.timestamp)
                .unwrap_or_default(),
        }
    }
}

/// Page-level timing attached to every flushed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageEvents {
    pub enter_time: Millis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_time: Option<Millis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_time: Option<Millis>,
}

impl PageEvents {
    pub fn entered_at(enter_time: Millis) -> Self {
        Self {
            enter_time,
            exit_time: None,
            total_time: None,
        }
    }

    pub fn closed_at(enter_time: Millis, exit_time: Millis) -> Self {
        Self {
            enter_time,
            exit_time: Some(exit_time),
            total_time: Some(exit_time.saturating_sub(enter_time)),
        }
    }
}

/// Modality-specific payload of a flushed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryData {
    Desktop(DesktopBehaviorData),
    Mobile(MobileBehaviorData),
}

impl TelemetryData {
    pub fn sample_count(&self) -> usize {
        match self {
            TelemetryData::Desktop(data) => data.sample_count(),
            TelemetryData::Mobile(data) => data.sample_count(),
        }
    }

    pub fn page_events(&self) -> PageEvents {
        match self {
            TelemetryData::Desktop(data) => data.page_events,
            TelemetryData::Mobile(data) => data.page_events,
        }
    }

    /// Concatenate batches of the same modality in capture order. Batches of a
    /// different modality than the first are skipped.
    pub fn merge<I>(batches: I) -> Option<TelemetryData>
    where
        I: IntoIterator<Item = TelemetryData>,
    {
        let mut iter = batches.into_iter();
        let mut merged = iter.next()?;
        for next in iter {
            match (&mut merged, next) {
                (TelemetryData::Desktop(acc), TelemetryData::Desktop(data)) => acc.absorb(data),
                (TelemetryData::Mobile(acc), TelemetryData::Mobile(data)) => acc.absorb(data),
                (_, other) => {
                    log::debug!(
                        "dropping telemetry batch of mismatched modality ({} samples)",
                        other.sample_count()
                    );
                }
            }
        }
        Some(merged)
    }
}

/// One flushed slice of telemetry, numbered within its session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryBatch {
    pub sequence: u64,
    pub is_final: bool,
    pub data: TelemetryData,
}

/// Capture strategy selected once per session.
#[derive(Debug, Clone)]
pub enum TelemetryCapture {
    Desktop(DesktopCapture),
    Mobile(MobileCapture),
}

impl TelemetryCapture {
    pub fn for_device(
        device: DeviceClass,
        screen: ScreenGeometry,
        debounce: DebounceConfig,
        now: Millis,
    ) -> Self {
        match device {
            DeviceClass::Desktop => TelemetryCapture::Desktop(DesktopCapture::new(debounce, now)),
            DeviceClass::Mobile => TelemetryCapture::Mobile(MobileCapture::new(screen, now)),
        }
    }

    /// Record a raw sample. Returns `true` when the sample was kept; samples of
    /// the other modality and debounced moves are dropped.
    pub fn record(&mut self, sample: BehaviorSample) -> bool {
        match (self, sample) {
            (TelemetryCapture::Desktop(capture), BehaviorSample::PointerMove { x, y, timestamp }) => {
                capture.record_pointer_move(x, y, timestamp)
            }
            (
                TelemetryCapture::Desktop(capture),
                BehaviorSample::PointerClick {
                    x,
                    y,
                    timestamp,
                    click_type,
                },
            ) => {
                capture.record_click(x, y, timestamp, click_type);
                true
            }
            (TelemetryCapture::Desktop(capture), BehaviorSample::Scroll { position, timestamp }) => {
                capture.record_scroll(position, timestamp);
                true
            }
            (TelemetryCapture::Mobile(capture), BehaviorSample::TouchStart { touches, timestamp }) => {
                capture.touch_start(&touches, timestamp)
            }
            (TelemetryCapture::Mobile(capture), BehaviorSample::TouchMove { touches, timestamp }) => {
                capture.touch_move(&touches, timestamp)
            }
            (TelemetryCapture::Mobile(capture), BehaviorSample::TouchEnd { touches, timestamp }) => {
                capture.touch_end(&touches, timestamp)
            }
            (TelemetryCapture::Mobile(capture), BehaviorSample::Gesture(gesture)) => {
                capture.record_gesture(gesture);
                true
            }
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            TelemetryCapture::Desktop(capture) => capture.is_empty(),
            TelemetryCapture::Mobile(capture) => capture.is_empty(),
        }
    }

    /// Drain the buffer. Non-final flushes restart the page clock at `now`.
    pub fn flush(&mut self, is_final: bool, now: Millis) -> TelemetryData {
        match self {
            TelemetryCapture::Desktop(capture) => {
                TelemetryData::Desktop(capture.flush(is_final, now))
            }
            TelemetryCapture::Mobile(capture) => TelemetryData::Mobile(capture.flush(is_final, now)),
        }
    }
}

pub(crate) fn distance(ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt()
}
