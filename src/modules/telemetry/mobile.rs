//! Mobile touch sampling and gesture derivation.

use serde::{Deserialize, Serialize};

use super::{Millis, PageEvents, TouchContact, distance};
use crate::modules::session::ScreenGeometry;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TouchPoint {
    pub x: f64,
    pub y: f64,
    pub force: f64,
    pub timestamp: Millis,
}

impl TouchPoint {
    fn from_contact(contact: &TouchContact, timestamp: Millis) -> Self {
        Self {
            x: contact.x,
            y: contact.y,
            force: contact.force,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TouchPosition {
    pub x: f64,
    pub y: f64,
}

/// One completed touch, from touch-start to touch-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchRecord {
    pub start_time: Millis,
    pub end_time: Millis,
    pub duration: Millis,
    pub start_position: TouchPosition,
    pub end_position: TouchPosition,
    pub force: f64,
    pub touch_points: Vec<TouchPoint>,
    pub distance: f64,
    /// Pixels per millisecond.
    pub speed: f64,
    pub is_multi_touch: bool,
    pub touch_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GestureKind {
    Swipe,
    Pinch,
    Drag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GestureDirection {
    Left,
    Right,
    Up,
    Down,
}

impl GestureDirection {
    /// Direction of the dominant axis of travel.
    pub fn from_delta(dx: f64, dy: f64) -> Self {
        if dx.abs() >= dy.abs() {
            if dx >= 0.0 {
                GestureDirection::Right
            } else {
                GestureDirection::Left
            }
        } else if dy >= 0.0 {
            GestureDirection::Down
        } else {
            GestureDirection::Up
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gesture {
    #[serde(rename = "type")]
    pub kind: GestureKind,
    pub start_points: Vec<TouchPoint>,
    pub end_points: Vec<TouchPoint>,
    pub duration: Millis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<GestureDirection>,
}

/// Limits used to classify a completed touch as a gesture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureThresholds {
    pub swipe_min_distance: f64,
    pub swipe_max_duration: Millis,
    pub drag_min_distance: f64,
}

impl Default for GestureThresholds {
    fn default() -> Self {
        Self {
            swipe_min_distance: 30.0,
            swipe_max_duration: 300,
            drag_min_distance: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchDistribution {
    pub left_half: u32,
    pub right_half: u32,
    pub top_half: u32,
    pub bottom_half: u32,
}

impl TouchDistribution {
    fn add(&mut self, other: TouchDistribution) {
        self.left_half += other.left_half;
        self.right_half += other.right_half;
        self.top_half += other.top_half;
        self.bottom_half += other.bottom_half;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchPatterns {
    pub average_duration: f64,
    pub average_force: f64,
    pub average_distance: f64,
    pub average_speed: f64,
    pub multi_touch_count: usize,
    pub total_touches: usize,
}

impl TouchPatterns {
    pub fn from_records(records: &[TouchRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        let n = records.len() as f64;
        let mean = |f: fn(&TouchRecord) -> f64| records.iter().map(f).sum::<f64>() / n;
        Self {
            average_duration: mean(|r| r.duration as f64),
            average_force: mean(|r| r.force),
            average_distance: mean(|r| r.distance),
            average_speed: mean(|r| r.speed),
            multi_touch_count: records.iter().filter(|r| r.is_multi_touch).count(),
            total_touches: records.len(),
        }
    }
}

/// Flushed mobile telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileBehaviorData {
    pub touch_points: Vec<TouchPoint>,
    pub touch_events: Vec<TouchRecord>,
    pub gestures: Vec<Gesture>,
    pub touch_intervals: Vec<Millis>,
    pub average_touch_interval: f64,
    pub touch_pressures: Vec<f64>,
    pub touch_distribution: TouchDistribution,
    pub touch_patterns: TouchPatterns,
    pub page_events: PageEvents,
}

impl MobileBehaviorData {
    pub fn sample_count(&self) -> usize {
        self.touch_points.len() + self.gestures.len()
    }

    pub(crate) fn absorb(&mut self, other: MobileBehaviorData) {
        self.touch_points.extend(other.touch_points);
        self.touch_events.extend(other.touch_events);
        self.gestures.extend(other.gestures);
        self.touch_intervals.extend(other.touch_intervals);
        self.touch_pressures.extend(other.touch_pressures);
        self.touch_distribution.add(other.touch_distribution);
        self.average_touch_interval = average_interval(&self.touch_intervals);
        self.touch_patterns = TouchPatterns::from_records(&self.touch_events);
        let exit_time = other.page_events.exit_time.or(self.page_events.exit_time);
        self.page_events = match exit_time {
            Some(exit) => PageEvents::closed_at(self.page_events.enter_time, exit),
            None => PageEvents::entered_at(self.page_events.enter_time),
        };
    }
}

#[derive(Debug, Clone)]
struct ActiveTouch {
    start_time: Millis,
    start_contacts: Vec<TouchContact>,
    last_contacts: Vec<TouchContact>,
    points: Vec<TouchPoint>,
    max_touch_count: usize,
}

/// Mobile capture buffer.
#[derive(Debug, Clone)]
pub struct MobileCapture {
    screen: ScreenGeometry,
    thresholds: GestureThresholds,
    active: Option<ActiveTouch>,
    points: Vec<TouchPoint>,
    records: Vec<TouchRecord>,
    gestures: Vec<Gesture>,
    intervals: Vec<Millis>,
    pressures: Vec<f64>,
    distribution: TouchDistribution,
    last_touch_start: Option<Millis>,
    enter_time: Millis,
}

impl MobileCapture {
    pub fn new(screen: ScreenGeometry, now: Millis) -> Self {
        Self::with_thresholds(screen, GestureThresholds::default(), now)
    }

    pub fn with_thresholds(screen: ScreenGeometry, thresholds: GestureThresholds, now: Millis) -> Self {
        Self {
            screen,
            thresholds,
            active: None,
            points: Vec::new(),
            records: Vec::new(),
            gestures: Vec::new(),
            intervals: Vec::new(),
            pressures: Vec::new(),
            distribution: TouchDistribution::default(),
            last_touch_start: None,
            enter_time: now,
        }
    }

    pub fn touch_start(&mut self, touches: &[TouchContact], timestamp: Millis) -> bool {
        let Some(primary) = touches.first() else {
            return false;
        };

        if let Some(previous) = self.last_touch_start {
            self.intervals.push(timestamp.saturating_sub(previous));
        }
        self.last_touch_start = Some(timestamp);

        let point = TouchPoint::from_contact(primary, timestamp);
        self.points.push(point);
        self.pressures.push(primary.force);
        self.count_distribution(primary);

        self.active = Some(ActiveTouch {
            start_time: timestamp,
            start_contacts: touches.to_vec(),
            last_contacts: touches.to_vec(),
            points: vec![point],
            max_touch_count: touches.len(),
        });
        true
    }

    pub fn touch_move(&mut self, touches: &[TouchContact], timestamp: Millis) -> bool {
        let (Some(active), Some(primary)) = (self.active.as_mut(), touches.first()) else {
            return false;
        };
        let point = TouchPoint::from_contact(primary, timestamp);
        active.points.push(point);
        active.max_touch_count = active.max_touch_count.max(touches.len());
        active.last_contacts = touches.to_vec();
        self.points.push(point);
        true
    }

    /// `touches` are the contacts that lifted (the host's changed touches).
    pub fn touch_end(&mut self, touches: &[TouchContact], timestamp: Millis) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };

        let start = active.points[0];
        let end = touches
            .first()
            .map(|contact| TouchPoint::from_contact(contact, timestamp))
            .or_else(|| active.points.last().copied())
            .unwrap_or(start);

        let duration = timestamp.saturating_sub(active.start_time);
        let travelled = distance(start.x, start.y, end.x, end.y);
        let speed = if duration > 0 {
            travelled / duration as f64
        } else {
            0.0
        };

        if let Some(gesture) = self.classify(&active, end, duration, travelled) {
            self.gestures.push(gesture);
        }

        self.records.push(TouchRecord {
            start_time: active.start_time,
            end_time: timestamp,
            duration,
            start_position: TouchPosition {
                x: start.x,
                y: start.y,
            },
            end_position: TouchPosition { x: end.x, y: end.y },
            force: start.force,
            touch_points: active.points,
            distance: travelled,
            speed,
            is_multi_touch: active.max_touch_count > 1,
            touch_count: active.max_touch_count,
        });
        true
    }

    pub fn record_gesture(&mut self, gesture: Gesture) {
        self.gestures.push(gesture);
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.gestures.is_empty()
    }

    pub fn flush(&mut self, is_final: bool, now: Millis) -> MobileBehaviorData {
        let page_events = if is_final {
            PageEvents::closed_at(self.enter_time, now)
        } else {
            PageEvents::entered_at(self.enter_time)
        };

        let records = std::mem::take(&mut self.records);
        let intervals = std::mem::take(&mut self.intervals);
        let data = MobileBehaviorData {
            touch_points: std::mem::take(&mut self.points),
            touch_patterns: TouchPatterns::from_records(&records),
            touch_events: records,
            gestures: std::mem::take(&mut self.gestures),
            average_touch_interval: average_interval(&intervals),
            touch_intervals: intervals,
            touch_pressures: std::mem::take(&mut self.pressures),
            touch_distribution: std::mem::take(&mut self.distribution),
            page_events,
        };

        if !is_final {
            self.enter_time = now;
        }
        data
    }

    fn count_distribution(&mut self, contact: &TouchContact) {
        if contact.x < self.screen.width / 2.0 {
            self.distribution.left_half += 1;
        } else {
            self.distribution.right_half += 1;
        }
        if contact.y < self.screen.height / 2.0 {
            self.distribution.top_half += 1;
        } else {
            self.distribution.bottom_half += 1;
        }
    }

    fn classify(
        &self,
        active: &ActiveTouch,
        end: TouchPoint,
        duration: Millis,
        travelled: f64,
    ) -> Option<Gesture> {
        let start_points: Vec<TouchPoint> = active
            .start_contacts
            .iter()
            .map(|contact| TouchPoint::from_contact(contact, active.start_time))
            .collect();

        if let ([a0, a1, ..], [b0, b1, ..]) =
            (active.start_contacts.as_slice(), active.last_contacts.as_slice())
        {
            let before = distance(a0.x, a0.y, a1.x, a1.y);
            let after = distance(b0.x, b0.y, b1.x, b1.y);
            if before <= f64::EPSILON {
                return None;
            }
            return Some(Gesture {
                kind: GestureKind::Pinch,
                start_points,
                end_points: active
                    .last_contacts
                    .iter()
                    .map(|contact| TouchPoint::from_contact(contact, end.timestamp))
                    .collect(),
                duration,
                distance: None,
                scale: Some(after / before),
                direction: None,
            });
        }

        let kind = if travelled >= self.thresholds.swipe_min_distance
            && duration <= self.thresholds.swipe_max_duration
        {
            GestureKind::Swipe
        } else if travelled >= self.thresholds.drag_min_distance {
            GestureKind::Drag
        } else {
            return None;
        };

        let start = active.points[0];
        Some(Gesture {
            kind,
            start_points,
            end_points: vec![end],
            duration,
            distance: Some(travelled),
            scale: None,
            direction: Some(GestureDirection::from_delta(end.x - start.x, end.y - start.y)),
        })
    }
}

fn average_interval(intervals: &[Millis]) -> f64 {
    if intervals.is_empty() {
        0.0
    } else {
        intervals.iter().sum::<Millis>() as f64 / intervals.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finger(x: f64, y: f64) -> TouchContact {
        TouchContact { x, y, force: 0.5 }
    }

    fn capture() -> MobileCapture {
        MobileCapture::new(ScreenGeometry::new(400.0, 800.0), 0)
    }

    #[test]
    fn fast_horizontal_touch_is_a_swipe() {
        let mut capture = capture();
        capture.touch_start(&[finger(300.0, 100.0)], 1_000);
        capture.touch_move(&[finger(200.0, 110.0)], 1_080);
        capture.touch_end(&[finger(100.0, 120.0)], 1_150);

        let data = capture.flush(true, 2_000);
        assert_eq!(data.gestures.len(), 1);
        assert_eq!(data.gestures[0].kind, GestureKind::Swipe);
        assert_eq!(data.gestures[0].direction, Some(GestureDirection::Left));
        assert_eq!(data.touch_events[0].duration, 150);
        assert_eq!(data.touch_points.len(), 2);
    }

    #[test]
    fn slow_long_touch_is_a_drag_and_short_tap_is_not_a_gesture() {
        let mut capture = capture();
        capture.touch_start(&[finger(100.0, 100.0)], 0);
        capture.touch_end(&[finger(100.0, 160.0)], 900);
        capture.touch_start(&[finger(100.0, 100.0)], 1_000);
        capture.touch_end(&[finger(102.0, 101.0)], 1_050);

        let data = capture.flush(false, 1_100);
        assert_eq!(data.gestures.len(), 1);
        assert_eq!(data.gestures[0].kind, GestureKind::Drag);
        assert_eq!(data.gestures[0].direction, Some(GestureDirection::Down));
        assert_eq!(data.touch_intervals, vec![1_000]);
        assert_eq!(data.touch_patterns.total_touches, 2);
    }

    #[test]
    fn two_finger_spread_is_a_pinch_with_scale() {
        let mut capture = capture();
        capture.touch_start(&[finger(100.0, 100.0), finger(200.0, 100.0)], 0);
        capture.touch_move(&[finger(50.0, 100.0), finger(250.0, 100.0)], 100);
        capture.touch_end(&[finger(50.0, 100.0)], 200);

        let data = capture.flush(true, 300);
        let pinch = &data.gestures[0];
        assert_eq!(pinch.kind, GestureKind::Pinch);
        assert!((pinch.scale.unwrap() - 2.0).abs() < 1e-9);
        assert!(data.touch_events[0].is_multi_touch);
        assert_eq!(data.touch_patterns.multi_touch_count, 1);
    }

    #[test]
    fn distribution_splits_screen_halves() {
        let mut capture = capture();
        capture.touch_start(&[finger(10.0, 10.0)], 0);
        capture.touch_end(&[finger(10.0, 10.0)], 10);
        capture.touch_start(&[finger(390.0, 790.0)], 20);
        capture.touch_end(&[finger(390.0, 790.0)], 30);

        let dist = capture.flush(true, 40).touch_distribution;
        assert_eq!(
            dist,
            TouchDistribution {
                left_half: 1,
                right_half: 1,
                top_half: 1,
                bottom_half: 1,
            }
        );
    }

    #[test]
    fn move_without_start_is_dropped() {
        let mut capture = capture();
        assert!(!capture.touch_move(&[finger(1.0, 1.0)], 5));
        assert!(!capture.touch_end(&[finger(1.0, 1.0)], 6));
        assert!(capture.is_empty());
    }
}
