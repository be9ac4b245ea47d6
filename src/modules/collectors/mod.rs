//! Per-challenge behavior collectors.
//!
//! Each secondary challenge owns one collector that turns its raw input into
//! derived interaction metrics. A collector's report leaves the widget only at
//! a checkpoint (verify attempt, challenge end) as a fire-and-forget behavior
//! report.

pub mod abstract_images;
pub mod grid;
pub mod interaction;
pub mod stroke;

pub use abstract_images::AbstractBehaviorCollector;
pub use grid::{GridBehaviorCollector, GridMovement};
pub use interaction::{
    ClickPrecision, GridPosition, HoverInterval, InteractionDensity, TileBoard, TileInteraction,
};
pub use stroke::{StrokeCollector, StrokeMetrics, StrokePoint};
