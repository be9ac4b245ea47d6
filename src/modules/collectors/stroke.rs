//! Stroke metrics for the handwriting challenge.

use std::f64::consts::{FRAC_PI_4, PI, TAU};

use serde::Serialize;

use crate::modules::telemetry::{Millis, distance};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StrokePoint {
    pub x: f64,
    pub y: f64,
    pub timestamp: Millis,
}

impl StrokePoint {
    pub fn new(x: f64, y: f64, timestamp: Millis) -> Self {
        Self { x, y, timestamp }
    }
}

/// Metrics derived from one completed stroke.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokeMetrics {
    pub length: f64,
    pub duration: Millis,
    /// Mean absolute turning angle in radians, `0..=π`.
    pub curvature: f64,
    pub jitter: f64,
    pub direction_changes: u32,
    pub hesitation_points: u32,
    /// Instantaneous speeds (px/ms) for every interval with elapsed time.
    pub speed_samples: Vec<f64>,
}

impl StrokeMetrics {
    pub fn compute(points: &[StrokePoint], hesitation_speed: f64) -> Self {
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            return Self::default();
        };

        let mut length = 0.0;
        let mut speed_samples = Vec::new();
        let mut hesitation_points = 0;
        for pair in points.windows(2) {
            let segment = distance(pair[0].x, pair[0].y, pair[1].x, pair[1].y);
            length += segment;
            let dt = pair[1].timestamp.saturating_sub(pair[0].timestamp);
            if dt == 0 {
                continue;
            }
            let speed = segment / dt as f64;
            if speed < hesitation_speed {
                hesitation_points += 1;
            }
            speed_samples.push(speed);
        }

        let mut curvature = 0.0;
        let mut jitter = 0.0;
        let mut direction_changes = 0;
        if points.len() >= 3 {
            for window in points.windows(3) {
                let (prev, curr, next) = (window[0], window[1], window[2]);
                let turn = turning_angle(heading(prev, curr), heading(curr, next));
                curvature += turn;
                if turn > FRAC_PI_4 {
                    direction_changes += 1;
                }
                let mid_x = (prev.x + next.x) / 2.0;
                let mid_y = (prev.y + next.y) / 2.0;
                jitter += distance(mid_x, mid_y, curr.x, curr.y);
            }
            let interior = (points.len() - 2) as f64;
            curvature /= interior;
            jitter /= interior;
        }

        Self {
            length,
            duration: last.timestamp.saturating_sub(first.timestamp),
            curvature,
            jitter,
            direction_changes,
            hesitation_points,
            speed_samples,
        }
    }

    pub fn average_speed(&self) -> f64 {
        if self.duration == 0 {
            0.0
        } else {
            self.length / self.duration as f64
        }
    }
}

fn heading(from: StrokePoint, to: StrokePoint) -> f64 {
    (to.y - from.y).atan2(to.x - from.x)
}

/// Absolute difference of two headings, wrapped into `0..=π`.
fn turning_angle(a: f64, b: f64) -> f64 {
    let delta = (b - a).abs() % TAU;
    if delta > PI { TAU - delta } else { delta }
}

/// Session-level writing metrics reported to the telemetry sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokeCollector {
    pub session_id: String,
    pub start_time: Millis,
    pub end_time: Option<Millis>,
    pub total_time: Millis,
    pub stroke_count: u32,
    pub stroke_lengths: Vec<f64>,
    pub stroke_durations: Vec<Millis>,
    pub stroke_intervals: Vec<Millis>,
    pub stroke_curvatures: Vec<f64>,
    pub stroke_jitters: Vec<f64>,
    pub direction_changes: Vec<u32>,
    pub hesitation_points: Vec<u32>,
    pub average_speed: f64,
    pub speed_variations: Vec<f64>,
    pub undo_count: u32,
    pub refresh_count: u32,
    pub verification_success: bool,
    #[serde(skip)]
    hesitation_speed: f64,
    #[serde(skip)]
    current: Vec<StrokePoint>,
    #[serde(skip)]
    last_stroke_end: Option<Millis>,
    #[serde(skip)]
    tracking: bool,
}

impl StrokeCollector {
    pub fn new(hesitation_speed: f64, now: Millis) -> Self {
        Self {
            session_id: format!("handwriting_{now}"),
            start_time: now,
            end_time: None,
            total_time: 0,
            stroke_count: 0,
            stroke_lengths: Vec::new(),
            stroke_durations: Vec::new(),
            stroke_intervals: Vec::new(),
            stroke_curvatures: Vec::new(),
            stroke_jitters: Vec::new(),
            direction_changes: Vec::new(),
            hesitation_points: Vec::new(),
            average_speed: 0.0,
            speed_variations: Vec::new(),
            undo_count: 0,
            refresh_count: 0,
            verification_success: false,
            hesitation_speed,
            current: Vec::new(),
            last_stroke_end: None,
            tracking: false,
        }
    }

    pub fn start_tracking(&mut self, now: Millis) {
        self.tracking = true;
        self.start_time = now;
    }

    pub fn stop_tracking(&mut self, now: Millis) {
        self.tracking = false;
        self.current.clear();
        self.end_time = Some(now);
        self.total_time = now.saturating_sub(self.start_time);
    }

    pub fn is_drawing(&self) -> bool {
        !self.current.is_empty()
    }

    pub fn start_stroke(&mut self, point: StrokePoint) {
        if self.tracking {
            self.current = vec![point];
        }
    }

    pub fn add_point(&mut self, point: StrokePoint) -> bool {
        if !self.tracking || self.current.is_empty() {
            return false;
        }
        self.current.push(point);
        true
    }

    /// Drop the open stroke without recording it.
    pub fn cancel_stroke(&mut self) {
        self.current.clear();
    }

    pub fn last_point(&self) -> Option<StrokePoint> {
        self.current.last().copied()
    }

    /// Close the current stroke. Strokes with fewer than two points are
    /// discarded and yield `None`.
    pub fn end_stroke(&mut self) -> Option<StrokeMetrics> {
        let points = std::mem::take(&mut self.current);
        if points.len() < 2 {
            return None;
        }
        let metrics = StrokeMetrics::compute(&points, self.hesitation_speed);
        let started = points[0].timestamp;
        let ended = metrics.duration + started;

        if let Some(previous) = self.last_stroke_end {
            self.stroke_intervals.push(started.saturating_sub(previous));
        }
        self.last_stroke_end = Some(ended);

        self.stroke_count += 1;
        self.stroke_lengths.push(metrics.length);
        self.stroke_durations.push(metrics.duration);
        self.stroke_curvatures.push(metrics.curvature);
        self.stroke_jitters.push(metrics.jitter);
        self.direction_changes.push(metrics.direction_changes);
        self.hesitation_points.push(metrics.hesitation_points);
        self.speed_variations.extend(metrics.speed_samples.iter().copied());

        let total_length: f64 = self.stroke_lengths.iter().sum();
        let total_duration: Millis = self.stroke_durations.iter().sum();
        self.average_speed = if total_duration == 0 {
            0.0
        } else {
            total_length / total_duration as f64
        };

        Some(metrics)
    }

    pub fn track_undo(&mut self) {
        self.undo_count += 1;
    }

    pub fn track_refresh(&mut self) {
        self.refresh_count += 1;
    }

    pub fn set_verification_result(&mut self, success: bool) {
        self.verification_success = success;
    }

    pub fn to_report(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|err| {
            log::warn!("failed to serialize writing behavior: {err}");
            serde_json::Value::Null
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64, t: Millis) -> StrokePoint {
        StrokePoint::new(x, y, t)
    }

    #[test]
    fn straight_line_has_no_curvature_or_jitter() {
        let points = [p(0.0, 0.0, 0), p(10.0, 0.0, 10), p(20.0, 0.0, 20)];
        let metrics = StrokeMetrics::compute(&points, 0.1);
        assert_eq!(metrics.length, 20.0);
        assert_eq!(metrics.duration, 20);
        assert_eq!(metrics.curvature, 0.0);
        assert_eq!(metrics.jitter, 0.0);
        assert_eq!(metrics.direction_changes, 0);
        assert_eq!(metrics.speed_samples, vec![1.0, 1.0]);
    }

    #[test]
    fn right_angle_counts_as_direction_change() {
        let points = [p(0.0, 0.0, 0), p(10.0, 0.0, 10), p(10.0, 10.0, 20)];
        let metrics = StrokeMetrics::compute(&points, 0.1);
        assert!((metrics.curvature - PI / 2.0).abs() < 1e-9);
        assert_eq!(metrics.direction_changes, 1);
        // Midpoint of neighbours is (5, 5); the corner sits at (10, 0).
        assert!((metrics.jitter - 50.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn heading_wraparound_is_a_small_turn() {
        // Headings just above and just below ±π describe nearly the same
        // direction.
        let points = [p(0.0, 0.0, 0), p(-10.0, 0.1, 10), p(-20.0, 0.0, 20)];
        let metrics = StrokeMetrics::compute(&points, 0.1);
        assert!(metrics.curvature < 0.1);
        assert_eq!(metrics.direction_changes, 0);
    }

    #[test]
    fn slow_intervals_are_hesitations_and_zero_dt_is_skipped() {
        let points = [
            p(0.0, 0.0, 0),
            p(1.0, 0.0, 100),
            p(1.0, 0.0, 100),
            p(50.0, 0.0, 110),
        ];
        let metrics = StrokeMetrics::compute(&points, 0.1);
        assert_eq!(metrics.hesitation_points, 1);
        assert_eq!(metrics.speed_samples.len(), 2);
    }

    #[test]
    fn single_point_stroke_is_degenerate_and_discarded() {
        let single = StrokeMetrics::compute(&[p(5.0, 5.0, 0)], 0.1);
        assert_eq!(single.curvature, 0.0);
        assert_eq!(single.jitter, 0.0);

        let mut collector = StrokeCollector::new(0.1, 0);
        collector.start_tracking(0);
        collector.start_stroke(p(5.0, 5.0, 0));
        assert!(collector.end_stroke().is_none());
        assert_eq!(collector.stroke_count, 0);
        assert!(collector.stroke_lengths.is_empty());
    }

    #[test]
    fn collector_tracks_intervals_and_average_speed() {
        let mut collector = StrokeCollector::new(0.1, 0);
        collector.start_tracking(0);

        collector.start_stroke(p(0.0, 0.0, 100));
        collector.add_point(p(30.0, 40.0, 150));
        collector.end_stroke().unwrap();

        collector.start_stroke(p(0.0, 0.0, 400));
        collector.add_point(p(0.0, 50.0, 450));
        collector.end_stroke().unwrap();

        assert_eq!(collector.stroke_count, 2);
        assert_eq!(collector.stroke_intervals, vec![250]);
        assert!((collector.average_speed - 1.0).abs() < 1e-9);

        let report = collector.to_report();
        assert_eq!(report["strokeCount"], 2);
        assert!(report.get("current").is_none());
    }
}
