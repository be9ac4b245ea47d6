//! Behavior collector for the N×N image grid challenge.

use serde::{Deserialize, Serialize};

use super::interaction::{ClickPrecision, GridPosition, TileBoard, TileInteraction};
use crate::modules::telemetry::Millis;

/// Pointer crossing from one grid tile to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridMovement {
    pub from: GridPosition,
    pub to: GridPosition,
    pub timestamp: Millis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridBehaviorCollector {
    pub session_id: String,
    pub start_time: Millis,
    pub end_time: Option<Millis>,
    pub total_time: Millis,
    #[serde(flatten)]
    pub board: TileBoard,
    pub final_selection: Vec<u32>,
    pub mouse_trajectory: Vec<ClickPrecision>,
    pub grid_movements: Vec<GridMovement>,
    pub refresh_count: u32,
    pub verify_attempts: u32,
    pub verification_success: bool,
    pub attempt_duration: Millis,
    #[serde(skip)]
    grid_size: u32,
    #[serde(skip)]
    tracking: bool,
    #[serde(skip)]
    last_position: Option<GridPosition>,
}

impl GridBehaviorCollector {
    /// Tiles are numbered row-major, `0..grid_size²`.
    pub fn new(grid_size: u32, now: Millis) -> Self {
        let grid_size = grid_size.max(1);
        let mut board = TileBoard::default();
        for id in 0..grid_size * grid_size {
            let position = GridPosition {
                row: id / grid_size,
                col: id % grid_size,
            };
            board.insert(TileInteraction::new(id, Some(position)));
        }

        Self {
            session_id: format!("image_{now}"),
            start_time: now,
            end_time: None,
            total_time: 0,
            board,
            final_selection: Vec::new(),
            mouse_trajectory: Vec::new(),
            grid_movements: Vec::new(),
            refresh_count: 0,
            verify_attempts: 0,
            verification_success: false,
            attempt_duration: 0,
            grid_size,
            tracking: false,
            last_position: None,
        }
    }

    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    pub fn cell_count(&self) -> u32 {
        self.grid_size * self.grid_size
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
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

    fn elapsed(&self, now: Millis) -> Millis {
        now.saturating_sub(self.start_time)
    }

    /// Pointer position in pixels over a `width`x`height` challenge image.
    pub fn track_pointer_move(&mut self, x: f64, y: f64, width: f64, height: f64, timestamp: Millis) {
        if !self.tracking {
            return;
        }
        let sample = ClickPrecision::within_surface(x, y, width, height, timestamp);
        self.mouse_trajectory.push(sample);

        if let Some(position) = self.position_at(sample.x, sample.y) {
            if let Some(from) = self.last_position
                && from != position
            {
                self.grid_movements.push(GridMovement {
                    from,
                    to: position,
                    timestamp,
                });
            }
            self.last_position = Some(position);
        }
    }

    /// Click inside `cell_id`, with `x`/`y` normalized to the tile.
    pub fn track_click(&mut self, cell_id: u32, x: f64, y: f64, timestamp: Millis) {
        if !self.tracking || cell_id >= self.cell_count() {
            return;
        }
        let elapsed = self.elapsed(timestamp);
        self.board
            .record_click(cell_id, ClickPrecision::within_tile(x, y, timestamp), elapsed);
    }

    pub fn track_hover(&mut self, cell_id: u32, entering: bool, timestamp: Millis) {
        if !self.tracking || cell_id >= self.cell_count() {
            return;
        }
        let elapsed = self.elapsed(timestamp);
        if entering {
            self.board.hover_enter(cell_id, timestamp, elapsed);
        } else {
            self.board.hover_leave(cell_id, timestamp, elapsed);
        }
    }

    pub fn track_selection(&mut self, cell_id: u32, selected: bool) {
        if !self.tracking {
            return;
        }
        self.board.set_selected(cell_id, selected);
    }

    pub fn track_refresh(&mut self) {
        self.refresh_count += 1;
    }

    pub fn track_verify_attempt(&mut self, success: bool, now: Millis) {
        self.verify_attempts += 1;
        self.verification_success = success;
        self.attempt_duration = self.elapsed(now);
        self.final_selection = self.board.selected_ids();
    }

    /// Drop the current selection flags after a failed answer. Order history
    /// is kept.
    pub fn clear_selection(&mut self) {
        self.board.clear_selection();
    }

    pub fn to_report(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|err| {
            log::warn!("failed to serialize grid behavior: {err}");
            serde_json::Value::Null
        })
    }

    fn position_at(&self, x: f64, y: f64) -> Option<GridPosition> {
        if !(0.0..1.0).contains(&x) || !(0.0..1.0).contains(&y) {
            return None;
        }
        let n = self.grid_size as f64;
        Some(GridPosition {
            row: (y * n).floor() as u32,
            col: (x * n).floor() as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracking(now: Millis) -> GridBehaviorCollector {
        let mut collector = GridBehaviorCollector::new(3, now);
        collector.start_tracking(now);
        collector
    }

    #[test]
    fn pre_populates_row_major_tiles() {
        let collector = GridBehaviorCollector::new(3, 0);
        assert_eq!(collector.board.image_interactions.len(), 9);
        assert_eq!(
            collector.board.image_interactions[&5].grid_position,
            Some(GridPosition { row: 1, col: 2 })
        );
    }

    #[test]
    fn pointer_crossing_tiles_records_movements() {
        let mut collector = tracking(0);
        collector.track_pointer_move(10.0, 10.0, 300.0, 300.0, 1);
        collector.track_pointer_move(20.0, 20.0, 300.0, 300.0, 2);
        collector.track_pointer_move(150.0, 20.0, 300.0, 300.0, 3);
        collector.track_pointer_move(150.0, 290.0, 300.0, 300.0, 4);

        assert_eq!(collector.mouse_trajectory.len(), 4);
        assert_eq!(
            collector.grid_movements,
            vec![
                GridMovement {
                    from: GridPosition { row: 0, col: 0 },
                    to: GridPosition { row: 0, col: 1 },
                    timestamp: 3,
                },
                GridMovement {
                    from: GridPosition { row: 0, col: 1 },
                    to: GridPosition { row: 2, col: 1 },
                    timestamp: 4,
                },
            ]
        );
    }

    #[test]
    fn verify_attempt_snapshots_final_selection() {
        let mut collector = tracking(1_000);
        collector.track_selection(0, true);
        collector.track_selection(4, true);
        collector.track_selection(0, false);
        collector.track_verify_attempt(false, 4_000);

        assert_eq!(collector.final_selection, vec![4]);
        assert_eq!(collector.verify_attempts, 1);
        assert_eq!(collector.attempt_duration, 3_000);

        collector.clear_selection();
        assert!(collector.board.selected_ids().is_empty());
        assert_eq!(collector.board.selection_order, vec![0, 4]);
    }

    #[test]
    fn out_of_range_cells_and_idle_tracking_are_ignored() {
        let mut collector = GridBehaviorCollector::new(3, 0);
        collector.track_click(1, 0.5, 0.5, 10);
        assert!(collector.board.image_interactions[&1].clicks.is_empty());

        collector.start_tracking(0);
        collector.track_click(9, 0.5, 0.5, 10);
        assert_eq!(collector.board.image_interactions.len(), 9);
    }

    #[test]
    fn report_uses_backend_field_names() {
        let mut collector = tracking(0);
        collector.track_click(3, 0.25, 0.75, 20);
        let report = collector.to_report();
        assert!(report.get("imageInteractions").is_some());
        assert!(report.get("selectionOrder").is_some());
        assert_eq!(report["imageInteractions"]["3"]["interactionDensity"]["clickCount"], 1);
        assert!(report.get("grid_size").is_none());
    }
}
