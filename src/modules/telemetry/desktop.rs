//! Desktop pointer and scroll sampling.

use serde::{Deserialize, Serialize};

use super::{ClickType, Millis, PageEvents, distance};
use crate::config::DebounceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerPosition {
    pub x: f64,
    pub y: f64,
    pub timestamp: Millis,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerClick {
    pub x: f64,
    pub y: f64,
    pub timestamp: Millis,
    #[serde(rename = "type")]
    pub click_type: ClickType,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollPosition {
    pub position: f64,
    pub timestamp: Millis,
}

/// Flushed desktop telemetry, in the field layout the scoring backend reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesktopBehaviorData {
    pub mouse_movements: Vec<PointerPosition>,
    pub mouse_clicks: Vec<PointerClick>,
    pub scroll_events: Vec<ScrollPosition>,
    pub page_events: PageEvents,
}

impl DesktopBehaviorData {
    pub fn sample_count(&self) -> usize {
        self.mouse_movements.len() + self.mouse_clicks.len() + self.scroll_events.len()
    }

    pub(crate) fn absorb(&mut self, other: DesktopBehaviorData) {
        self.mouse_movements.extend(other.mouse_movements);
        self.mouse_clicks.extend(other.mouse_clicks);
        self.scroll_events.extend(other.scroll_events);
        let exit_time = other.page_events.exit_time.or(self.page_events.exit_time);
        self.page_events = match exit_time {
            Some(exit) => PageEvents::closed_at(self.page_events.enter_time, exit),
            None => PageEvents::entered_at(self.page_events.enter_time),
        };
    }
}

/// Desktop capture buffer.
///
/// Pointer moves are kept only when they travel at least `min_distance_px` or
/// arrive at least `min_interval_ms` after the last kept move. Clicks and
/// scrolls are always kept.
#[derive(Debug, Clone)]
pub struct DesktopCapture {
    debounce: DebounceConfig,
    movements: Vec<PointerPosition>,
    clicks: Vec<PointerClick>,
    scrolls: Vec<ScrollPosition>,
    last_recorded: Option<PointerPosition>,
    enter_time: Millis,
}

impl DesktopCapture {
    pub fn new(debounce: DebounceConfig, now: Millis) -> Self {
        Self {
            debounce,
            movements: Vec::new(),
            clicks: Vec::new(),
            scrolls: Vec::new(),
            last_recorded: None,
            enter_time: now,
        }
    }

    pub fn record_pointer_move(&mut self, x: f64, y: f64, timestamp: Millis) -> bool {
        let current = PointerPosition { x, y, timestamp };

        if let Some(last) = self.last_recorded {
            let travelled = distance(last.x, last.y, x, y);
            let elapsed = timestamp.saturating_sub(last.timestamp);
            if travelled < self.debounce.min_distance_px && elapsed < self.debounce.min_interval_ms
            {
                return false;
            }
        }

        self.movements.push(current);
        self.last_recorded = Some(current);
        true
    }

    pub fn record_click(&mut self, x: f64, y: f64, timestamp: Millis, click_type: ClickType) {
        self.clicks.push(PointerClick {
            x,
            y,
            timestamp,
            click_type,
        });
    }

    pub fn record_scroll(&mut self, position: f64, timestamp: Millis) {
        self.scrolls.push(ScrollPosition {
            position,
            timestamp,
        });
    }

    pub fn movement_count(&self) -> usize {
        self.movements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movements.is_empty() && self.clicks.is_empty() && self.scrolls.is_empty()
    }

    /// Drain buffered samples. The debounce anchor is kept across flushes so
    /// trajectory sampling stays continuous.
    pub fn flush(&mut self, is_final: bool, now: Millis) -> DesktopBehaviorData {
        let page_events = if is_final {
            PageEvents::closed_at(self.enter_time, now)
        } else {
            PageEvents::entered_at(self.enter_time)
        };

        let data = DesktopBehaviorData {
            mouse_movements: std::mem::take(&mut self.movements),
            mouse_clicks: std::mem::take(&mut self.clicks),
            scroll_events: std::mem::take(&mut self.scrolls),
            page_events,
        };

        if !is_final {
            self.enter_time = now;
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debounce_keeps_only_first_of_small_fast_moves() {
        let mut capture = DesktopCapture::new(DebounceConfig::default(), 0);
        for step in 0..40u64 {
            let offset = (step % 5) as f64;
            capture.record_pointer_move(100.0 + offset, 100.0 + offset, 1_000 + step);
        }
        assert_eq!(capture.movement_count(), 1);
    }

    #[test]
    fn distance_or_time_threshold_records_sample() {
        let mut capture = DesktopCapture::new(DebounceConfig::default(), 0);
        assert!(capture.record_pointer_move(0.0, 0.0, 0));
        assert!(!capture.record_pointer_move(3.0, 4.0, 10));
        // 12 px away from the last kept sample.
        assert!(capture.record_pointer_move(12.0, 0.0, 20));
        // Same spot, but 50 ms later.
        assert!(capture.record_pointer_move(12.0, 0.0, 70));
        assert_eq!(capture.movement_count(), 3);
    }

    #[test]
    fn clicks_and_scrolls_are_never_debounced() {
        let mut capture = DesktopCapture::new(DebounceConfig::default(), 0);
        for ts in 0..5 {
            capture.record_click(1.0, 1.0, ts, ClickType::Click);
            capture.record_scroll(10.0, ts);
        }
        let data = capture.flush(true, 10);
        assert_eq!(data.mouse_clicks.len(), 5);
        assert_eq!(data.scroll_events.len(), 5);
    }

    #[test]
    fn periodic_flush_clears_buffer_and_keeps_anchor() {
        let mut capture = DesktopCapture::new(DebounceConfig::default(), 0);
        capture.record_pointer_move(0.0, 0.0, 0);
        let data = capture.flush(false, 5);
        assert_eq!(data.mouse_movements.len(), 1);
        assert_eq!(data.page_events.exit_time, None);
        assert!(capture.is_empty());

        // Still within the debounce window of the pre-flush anchor.
        assert!(!capture.record_pointer_move(1.0, 1.0, 10));

        let last = capture.flush(true, 40);
        assert_eq!(last.page_events.enter_time, 5);
        assert_eq!(last.page_events.total_time, Some(35));
    }
}
