//! Cross-cutting services module
//!
//! Telemetry capture, behavior collectors, the drawing surface, session
//! lifecycle, and the metrics/event hooks the widget driver reports through.

pub mod canvas;
pub mod collectors;
pub mod events;
pub mod metrics;
pub mod session;
pub mod telemetry;

// Re-export commonly used types
pub use canvas::{CanvasError, CanvasSnapshot, DrawingSurface, RasterCanvas};
pub use collectors::{
    AbstractBehaviorCollector,
    GridBehaviorCollector,
    StrokeCollector,
    StrokeMetrics,
    StrokePoint,
    TileBoard,
};
pub use events::{
    ChallengeEvent,
    ErrorEvent,
    EventDispatcher,
    EventHandler,
    GatewayCallEvent,
    LoggingHandler,
    MetricsHandler,
    StateChangeEvent,
    TelemetryFlushEvent,
    VerdictEvent,
    VerificationEvent,
    WidgetEvent,
};
pub use metrics::{ChallengeStats, GlobalStats, MetricsCollector, MetricsSnapshot, OperationStats};
pub use session::{
    DeviceClass,
    HostEnvironment,
    Orientation,
    ScreenGeometry,
    Session,
    SessionCancellation,
    now_millis,
};
pub use telemetry::{
    BehaviorSample,
    ClickType,
    Millis,
    PageEvents,
    TelemetryBatch,
    TelemetryCapture,
    TelemetryData,
    TouchContact,
};
