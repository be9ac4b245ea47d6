//! Behavior collector for the abstract image selection challenge.
//!
//! Images arrive with server-chosen ids, so tile records are created the first
//! time an id is touched rather than up front.

use serde::Serialize;

use super::interaction::{ClickPrecision, TileBoard};
use crate::modules::telemetry::Millis;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbstractBehaviorCollector {
    pub session_id: String,
    pub start_time: Millis,
    pub end_time: Option<Millis>,
    pub total_time: Millis,
    #[serde(flatten)]
    pub board: TileBoard,
    pub final_selection: Vec<u32>,
    pub mouse_trajectory: Vec<ClickPrecision>,
    pub refresh_count: u32,
    pub verify_attempts: u32,
    pub verification_success: bool,
    pub attempt_duration: Millis,
    #[serde(skip)]
    tracking: bool,
}

impl AbstractBehaviorCollector {
    pub fn new(now: Millis) -> Self {
        Self {
            session_id: format!("abstract_{now}"),
            start_time: now,
            end_time: None,
            total_time: 0,
            board: TileBoard::default(),
            final_selection: Vec::new(),
            mouse_trajectory: Vec::new(),
            refresh_count: 0,
            verify_attempts: 0,
            verification_success: false,
            attempt_duration: 0,
            tracking: false,
        }
    }

    pub fn start_tracking(&mut self, now: Millis) {
        self.tracking = true;
        self.start_time = now;
    }

    pub fn stop_tracking(&mut self, now: Millis) {
        self.tracking = false;
        self.end_time = Some(now);
        self.total_time = now.saturating_sub(self.start_time);
    }

    pub fn track_pointer_move(&mut self, x: f64, y: f64, width: f64, height: f64, timestamp: Millis) {
        if self.tracking {
            self.mouse_trajectory
                .push(ClickPrecision::within_surface(x, y, width, height, timestamp));
        }
    }

    pub fn track_click(&mut self, image_id: u32, x: f64, y: f64, timestamp: Millis) {
        if !self.tracking {
            return;
        }
        let elapsed = timestamp.saturating_sub(self.start_time);
        self.board
            .record_click(image_id, ClickPrecision::within_tile(x, y, timestamp), elapsed);
    }

    pub fn track_hover(&mut self, image_id: u32, entering: bool, timestamp: Millis) {
        if !self.tracking {
            return;
        }
        let elapsed = timestamp.saturating_sub(self.start_time);
        if entering {
            self.board.hover_enter(image_id, timestamp, elapsed);
        } else {
            self.board.hover_leave(image_id, timestamp, elapsed);
        }
    }

    pub fn track_selection(&mut self, image_id: u32, selected: bool) {
        if self.tracking {
            self.board.set_selected(image_id, selected);
        }
    }

    pub fn track_refresh(&mut self) {
        self.refresh_count += 1;
    }

    pub fn track_verify_attempt(&mut self, success: bool, now: Millis) {
        self.verify_attempts += 1;
        self.verification_success = success;
        self.attempt_duration = now.saturating_sub(self.start_time);
        self.final_selection = self.board.selected_ids();
    }

    pub fn clear_selection(&mut self) {
        self.board.clear_selection();
    }

    pub fn to_report(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|err| {
            log::warn!("failed to serialize abstract behavior: {err}");
            serde_json::Value::Null
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_created_lazily_for_server_ids() {
        let mut collector = AbstractBehaviorCollector::new(0);
        collector.start_tracking(0);
        collector.track_hover(1042, true, 100);
        collector.track_hover(1042, false, 400);
        collector.track_selection(1042, true);
        collector.track_selection(77, true);
        collector.track_selection(1042, false);

        assert_eq!(collector.board.image_interactions.len(), 2);
        assert_eq!(collector.board.image_interactions[&1042].total_hover_time, 300);
        assert_eq!(collector.board.selection_order, vec![1042, 77]);
        assert_eq!(collector.board.deselection_order, vec![1042]);
    }

    #[test]
    fn verify_attempt_counts_and_keeps_final_selection() {
        let mut collector = AbstractBehaviorCollector::new(0);
        collector.start_tracking(500);
        collector.track_selection(3, true);
        collector.track_verify_attempt(true, 2_500);
        collector.stop_tracking(2_600);

        assert_eq!(collector.final_selection, vec![3]);
        assert!(collector.verification_success);
        assert_eq!(collector.attempt_duration, 2_000);
        assert_eq!(collector.total_time, 2_100);
    }
}
