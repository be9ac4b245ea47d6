//! Per-tile interaction records shared by the grid and abstract collectors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::modules::telemetry::{Millis, distance};

/// Click (or pointer sample) normalized to the element it landed on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickPrecision {
    pub x: f64,
    pub y: f64,
    pub distance_from_center: f64,
    pub timestamp: Millis,
}

impl ClickPrecision {
    /// `x`/`y` are already normalized to 0..1 within the tile.
    pub fn within_tile(x: f64, y: f64, timestamp: Millis) -> Self {
        Self {
            x,
            y,
            distance_from_center: distance(x, y, 0.5, 0.5),
            timestamp,
        }
    }

    /// Pixel coordinates inside a `width`x`height` surface. The distance is
    /// kept in pixels, the stored coordinates are normalized.
    pub fn within_surface(x: f64, y: f64, width: f64, height: f64, timestamp: Millis) -> Self {
        let width = width.max(1.0);
        let height = height.max(1.0);
        Self {
            x: x / width,
            y: y / height,
            distance_from_center: distance(x, y, width / 2.0, height / 2.0),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoverInterval {
    pub enter: Millis,
    #[serde(default)]
    pub leave: Option<Millis>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionDensity {
    pub click_count: u32,
    pub hover_count: u32,
    pub total_hover_time: Millis,
    pub average_dwell_time: f64,
    /// (clicks + hovers) per millisecond of tracked time.
    pub density: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPosition {
    pub row: u32,
    pub col: u32,
}

/// Everything observed on one selectable tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileInteraction {
    pub image_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_position: Option<GridPosition>,
    pub clicks: Vec<ClickPrecision>,
    pub hovers: Vec<HoverInterval>,
    pub total_hover_time: Millis,
    pub is_selected: bool,
    pub interaction_density: InteractionDensity,
}

impl TileInteraction {
    pub fn new(image_id: u32, grid_position: Option<GridPosition>) -> Self {
        Self {
            image_id,
            grid_position,
            clicks: Vec::new(),
            hovers: Vec::new(),
            total_hover_time: 0,
            is_selected: false,
            interaction_density: InteractionDensity::default(),
        }
    }

    fn refresh_density(&mut self, elapsed: Millis) {
        let density = &mut self.interaction_density;
        density.average_dwell_time = if density.hover_count == 0 {
            0.0
        } else {
            density.total_hover_time as f64 / density.hover_count as f64
        };
        density.density =
            (density.click_count + density.hover_count) as f64 / elapsed.max(1) as f64;
    }
}

/// Tile map plus selection order, owned by a tile-based collector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileBoard {
    pub image_interactions: BTreeMap<u32, TileInteraction>,
    pub selection_order: Vec<u32>,
    pub deselection_order: Vec<u32>,
}

impl TileBoard {
    pub fn insert(&mut self, tile: TileInteraction) {
        self.image_interactions.insert(tile.image_id, tile);
    }

    /// Fetch a tile, creating a bare record for ids first seen here.
    pub fn tile_mut(&mut self, image_id: u32) -> &mut TileInteraction {
        self.image_interactions
            .entry(image_id)
            .or_insert_with(|| TileInteraction::new(image_id, None))
    }

    pub fn record_click(&mut self, image_id: u32, click: ClickPrecision, elapsed: Millis) {
        let tile = self.tile_mut(image_id);
        tile.clicks.push(click);
        tile.interaction_density.click_count += 1;
        tile.refresh_density(elapsed);
    }

    pub fn hover_enter(&mut self, image_id: u32, timestamp: Millis, elapsed: Millis) {
        let tile = self.tile_mut(image_id);
        tile.hovers.push(HoverInterval {
            enter: timestamp,
            leave: None,
        });
        tile.interaction_density.hover_count += 1;
        tile.refresh_density(elapsed);
    }

    /// Close the open hover on `image_id`. Returns the dwell time, if a hover
    /// was open.
    pub fn hover_leave(&mut self, image_id: u32, timestamp: Millis, elapsed: Millis) -> Option<Millis> {
        let tile = self.tile_mut(image_id);
        let open = tile.hovers.last_mut().filter(|hover| hover.leave.is_none())?;
        open.leave = Some(timestamp);
        let dwell = timestamp.saturating_sub(open.enter);
        tile.total_hover_time += dwell;
        tile.interaction_density.total_hover_time += dwell;
        tile.refresh_density(elapsed);
        Some(dwell)
    }

    pub fn set_selected(&mut self, image_id: u32, selected: bool) {
        if selected {
            self.selection_order.push(image_id);
        } else {
            self.deselection_order.push(image_id);
        }
        self.tile_mut(image_id).is_selected = selected;
    }

    pub fn selected_ids(&self) -> Vec<u32> {
        self.image_interactions
            .values()
            .filter(|tile| tile.is_selected)
            .map(|tile| tile.image_id)
            .collect()
    }

    pub fn clear_selection(&mut self) {
        for tile in self.image_interactions.values_mut() {
            tile.is_selected = false;
        }
    }
}
