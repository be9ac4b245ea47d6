//! # realcaptcha-rs
//!
//! Headless core of the RealCaptcha widget: the challenge orchestration state
//! machine, the behavior telemetry it captures, and the client for the remote
//! verification gateway.
//!
//! The host page forwards raw input (pointer, scroll, touch, stroke) and the
//! widget decides which challenge to show next, enforces challenge TTLs, and
//! gates retries and lockout on the confidence signal returned by the server.
//!
//! ## Features
//!
//! - Async driver with an at-most-one-in-flight guard per session
//! - Desktop pointer sampling with spatial/temporal debounce
//! - Mobile touch sampling with swipe/pinch/drag derivation
//! - Image grid, handwriting and abstract selection challenges
//! - Stroke metrics (curvature, jitter, hesitation) and raster undo
//! - Structured events, gateway latency metrics and localized messages
//!
//! ## Example
//!
//! ```no_run
//! use realcaptcha_rs::{CaptchaWidget, WidgetState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let widget = CaptchaWidget::new()?;
//!     widget
//!         .render("#captcha", |result| println!("completed: {}", result.success))
//!         .await;
//!
//!     widget.pointer_move(120.0, 48.0, 1_700_000_000_000).await;
//!     if widget.confirm_gesture().await == WidgetState::ImageChallenge {
//!         widget.toggle_cell(4, 0.5, 0.5, 1_700_000_001_000).await?;
//!         widget.submit().await?;
//!     }
//!     Ok(())
//! }
//! ```

mod widget;

pub mod challenges;
pub mod config;
pub mod modules;

pub use crate::widget::{
    CaptchaWidget,
    CaptchaWidgetBuilder,
    CompletionResult,
    WidgetError,
    WidgetResult,
};

pub use crate::challenges::core::{
    BehaviorReport,
    ChallengeInstance,
    ChallengeKind,
    ChallengePayload,
    ChallengeSubmission,
    ConfidenceVerdict,
    GatewayError,
    GatewayOperation,
    ImageItem,
    IssuedChallenge,
    NextStepRequest,
    ReqwestGateway,
    TtlStatus,
    VerificationGateway,
    VerifyVerdict,
};

pub use crate::challenges::orchestrator::{
    Effect,
    ErrorKind,
    Orchestrator,
    OrchestratorEvent,
    Transition,
    WidgetState,
};

pub use crate::challenges::variants::{
    AbstractSelectChallenge,
    ActiveChallenge,
    Challenge,
    ChallengeError,
    HandwritingChallenge,
    ImageGridChallenge,
};

pub use crate::config::{
    ConfigError,
    DebounceConfig,
    Locale,
    MessageKey,
    Theme,
    WidgetConfig,
    WidgetOptions,
};

pub use crate::modules::{
    BehaviorSample,
    ClickType,
    DeviceClass,
    EventHandler,
    HostEnvironment,
    MetricsSnapshot,
    ScreenGeometry,
    StrokeMetrics,
    TelemetryBatch,
    TelemetryData,
    TouchContact,
    WidgetEvent,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
