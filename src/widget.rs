//! Host-facing widget driver.
//!
//! Wires together the orchestrator, the session, the challenge variants, and
//! the verification gateway behind the small async surface a host page embeds
//! (`render`, `reset`, `configure`, input routing). Shared state lives behind
//! one async mutex that is never held across a gateway call: each network step
//! arms the in-flight guard under the lock, releases it for the await, then
//! relocks to apply the result.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::challenges::core::{
	BehaviorReport, ChallengeInstance, ChallengeKind, GatewayError, GatewayOperation, InFlight,
	NextStepRequest, ReqwestGateway, TtlStatus, VerificationGateway,
};
use crate::challenges::orchestrator::{Effect, Orchestrator, OrchestratorEvent, WidgetState};
use crate::challenges::variants::{ActiveChallenge, ChallengeError};
use crate::config::{ConfigError, MessageKey, WidgetConfig, WidgetOptions};
use crate::modules::canvas::CanvasError;
use crate::modules::collectors::StrokeMetrics;
use crate::modules::events::{
	ChallengeEvent, EventDispatcher, EventHandler, GatewayCallEvent, LoggingHandler,
	MetricsHandler, StateChangeEvent, TelemetryFlushEvent, VerdictEvent, VerificationEvent,
	WidgetEvent,
};
use crate::modules::metrics::{MetricsCollector, MetricsSnapshot};
use crate::modules::session::{HostEnvironment, Session, SessionCancellation, now_millis};
use crate::modules::telemetry::{BehaviorSample, ClickType, Millis, TelemetryBatch, TouchContact};

/// Result alias used by the widget driver.
pub type WidgetResult<T> = Result<T, WidgetError>;

/// Errors returned to the host. Gateway failures during a flow are folded
/// into the `error` state instead; these only cover local rejections.
#[derive(Debug, Error)]
pub enum WidgetError {
	#[error("gateway error: {0}")]
	Gateway(#[from] GatewayError),
	#[error("challenge error: {0}")]
	Challenge(#[from] ChallengeError),
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),
	#[error("canvas error: {0}")]
	Canvas(#[from] CanvasError),
	#[error("widget has not been rendered")]
	NotMounted,
	#[error("operation not available in state {0:?}")]
	InvalidState(WidgetState),
}

/// Payload handed to the host's completion callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionResult {
	pub success: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub redirect_url: Option<String>,
}

type CompletionCallback = Arc<dyn Fn(CompletionResult) + Send + Sync>;

/// Fluent builder for [`CaptchaWidget`].
pub struct CaptchaWidgetBuilder {
	config: WidgetConfig,
	options: Option<WidgetOptions>,
	gateway: Option<Arc<dyn VerificationGateway>>,
	environment: HostEnvironment,
	handlers: Vec<Arc<dyn EventHandler>>,
	enable_metrics: bool,
}

impl CaptchaWidgetBuilder {
	pub fn new() -> Self {
		Self {
			config: WidgetConfig::default(),
			options: None,
			gateway: None,
			environment: HostEnvironment::default(),
			handlers: Vec::new(),
			enable_metrics: true,
		}
	}

	pub fn with_config(mut self, config: WidgetConfig) -> Self {
		self.config = config;
		self
	}

	/// Overrides merged onto the config when the widget is built.
	pub fn with_options(mut self, options: WidgetOptions) -> Self {
		self.options = Some(options);
		self
	}

	/// Replace the reqwest gateway, e.g. with an in-process stub.
	pub fn with_gateway(mut self, gateway: Arc<dyn VerificationGateway>) -> Self {
		self.gateway = Some(gateway);
		self
	}

	pub fn with_environment(mut self, environment: HostEnvironment) -> Self {
		self.environment = environment;
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn with_background_timers(mut self, enabled: bool) -> Self {
		self.config.background_timers = enabled;
		self
	}

	pub fn disable_metrics(mut self) -> Self {
		self.enable_metrics = false;
		self
	}

	pub fn build(self) -> WidgetResult<CaptchaWidget> {
		CaptchaWidget::with_builder(self)
	}
}

impl Default for CaptchaWidgetBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Mutable state shared by every entry point.
struct WidgetInner {
	config: WidgetConfig,
	gateway: Arc<dyn VerificationGateway>,
	/// The gateway was built from `config` and follows endpoint changes.
	owns_gateway: bool,
	orchestrator: Orchestrator,
	session: Option<Session>,
	in_flight: InFlight,
	container: Option<String>,
	on_complete: Option<CompletionCallback>,
	completed: bool,
	redirect_url: Option<String>,
}

struct WidgetShared {
	environment: HostEnvironment,
	metrics: Option<MetricsCollector>,
	events: Arc<EventDispatcher>,
	inner: Mutex<WidgetInner>,
}

/// Work left over once the state lock is released.
#[derive(Default)]
struct Followup {
	load: Option<ChallengeKind>,
	completion: Option<(CompletionCallback, CompletionResult)>,
}

impl Followup {
	fn load(kind: ChallengeKind) -> Self {
		Self {
			load: Some(kind),
			completion: None,
		}
	}

	/// Fire the completion callback, if any, and hand back the challenge kind
	/// still to be fetched.
	fn fire(self) -> Option<ChallengeKind> {
		if let Some((callback, result)) = self.completion {
			callback(result);
		}
		self.load
	}
}

/// Embeddable CAPTCHA widget. Cheap to clone; clones share one widget.
#[derive(Clone)]
pub struct CaptchaWidget {
	shared: Arc<WidgetShared>,
}

impl CaptchaWidget {
	/// Construct a widget with default configuration and the reqwest gateway.
	pub fn new() -> WidgetResult<Self> {
		CaptchaWidgetBuilder::new().build()
	}

	pub fn builder() -> CaptchaWidgetBuilder {
		CaptchaWidgetBuilder::new()
	}

	fn with_builder(builder: CaptchaWidgetBuilder) -> WidgetResult<Self> {
		let mut config = builder.config;
		if let Some(ref options) = builder.options {
			config.apply(options)?;
		}

		let (gateway, owns_gateway): (Arc<dyn VerificationGateway>, bool) = match builder.gateway {
			Some(gateway) => (gateway, false),
			None => (Arc::new(ReqwestGateway::new(&config)?), true),
		};

		let metrics = builder.enable_metrics.then(MetricsCollector::new);
		let mut events = EventDispatcher::new();
		events.register_handler(Arc::new(LoggingHandler));
		if let Some(ref collector) = metrics {
			events.register_handler(Arc::new(MetricsHandler::new(collector.clone())));
		}
		for handler in builder.handlers {
			events.register_handler(handler);
		}

		let orchestrator = Orchestrator::from_config(&config);
		Ok(Self {
			shared: Arc::new(WidgetShared {
				environment: builder.environment,
				metrics,
				events: Arc::new(events),
				inner: Mutex::new(WidgetInner {
					config,
					gateway,
					owns_gateway,
					orchestrator,
					session: None,
					in_flight: InFlight::new(),
					container: None,
					on_complete: None,
					completed: false,
					redirect_url: None,
				}),
			}),
		})
	}

	/// Mount the widget and start a session. `on_complete` fires once per
	/// session, on `success` or `locked`.
	pub async fn render<F>(&self, container: impl Into<String>, on_complete: F) -> WidgetState
	where
		F: Fn(CompletionResult) + Send + Sync + 'static,
	{
		let container = container.into();
		let mut guard = self.shared.inner.lock().await;
		let inner = &mut *guard;
		if let Some(ref mounted) = inner.container {
			log::warn!("widget already rendered into '{mounted}', ignoring '{container}'");
			return inner.orchestrator.state();
		}

		log::debug!("rendering widget into '{container}'");
		inner.container = Some(container);
		inner.on_complete = Some(Arc::new(on_complete));
		self.start_session(inner);
		inner.orchestrator.state()
	}

	/// Destroy the session and start a fresh one with a new attempt counter.
	/// A locked widget stays locked.
	pub async fn reset(&self) -> WidgetState {
		let mut guard = self.shared.inner.lock().await;
		let inner = &mut *guard;
		if inner.orchestrator.is_locked() {
			log::debug!("reset ignored while locked");
			return WidgetState::Locked;
		}
		if inner.container.is_none() {
			return inner.orchestrator.state();
		}

		self.end_session(inner);
		inner.in_flight.reset();
		inner.orchestrator = Orchestrator::from_config(&inner.config);
		self.start_session(inner);
		inner.orchestrator.state()
	}

	/// Merge host overrides onto the active configuration. Debounce changes
	/// take effect with the next session.
	pub async fn configure(&self, options: &WidgetOptions) -> WidgetResult<()> {
		let mut guard = self.shared.inner.lock().await;
		let inner = &mut *guard;
		let mut config = inner.config.clone();
		config.apply(options)?;

		let gateway_changed = config.api_endpoint != inner.config.api_endpoint
			|| config.api_key != inner.config.api_key
			|| config.locale != inner.config.locale;
		if inner.owns_gateway && gateway_changed {
			inner.gateway = Arc::new(ReqwestGateway::new(&config)?);
			log::debug!("gateway rebuilt for {}", config.api_endpoint);
		}

		inner
			.orchestrator
			.set_thresholds(config.low_confidence_threshold, config.lockout_threshold);
		inner.config = config;
		Ok(())
	}

	pub async fn configure_json(&self, raw: &str) -> WidgetResult<()> {
		let options = WidgetOptions::from_json(raw)?;
		self.configure(&options).await
	}

	/// Tear the widget down. Returns the final telemetry batch of the session,
	/// if one was still open.
	pub async fn unmount(&self) -> Option<TelemetryBatch> {
		let mut guard = self.shared.inner.lock().await;
		let inner = &mut *guard;
		inner.container = None;
		inner.on_complete = None;
		inner.in_flight.reset();
		let batch = self.end_session(inner);
		inner.orchestrator = Orchestrator::from_config(&inner.config);
		batch
	}

	pub async fn pointer_move(&self, x: f64, y: f64, timestamp: Millis) -> bool {
		self.record(BehaviorSample::PointerMove { x, y, timestamp })
			.await
	}

	pub async fn click(&self, x: f64, y: f64, click_type: ClickType, timestamp: Millis) -> bool {
		self.record(BehaviorSample::PointerClick {
			x,
			y,
			timestamp,
			click_type,
		})
		.await
	}

	pub async fn scroll(&self, position: f64, timestamp: Millis) -> bool {
		self.record(BehaviorSample::Scroll {
			position,
			timestamp,
		})
		.await
	}

	pub async fn touch_start(&self, touches: &[TouchContact], timestamp: Millis) -> bool {
		self.record(BehaviorSample::TouchStart {
			touches: touches.to_vec(),
			timestamp,
		})
		.await
	}

	pub async fn touch_move(&self, touches: &[TouchContact], timestamp: Millis) -> bool {
		self.record(BehaviorSample::TouchMove {
			touches: touches.to_vec(),
			timestamp,
		})
		.await
	}

	pub async fn touch_end(&self, touches: &[TouchContact], timestamp: Millis) -> bool {
		self.record(BehaviorSample::TouchEnd {
			touches: touches.to_vec(),
			timestamp,
		})
		.await
	}

	/// Interaction outside the confirmation control while awaiting the gesture.
	pub async fn stray_interaction(&self) -> WidgetState {
		let mut guard = self.shared.inner.lock().await;
		let inner = &mut *guard;
		self.commit(inner, OrchestratorEvent::StrayInteraction);
		inner.orchestrator.state()
	}

	/// Initial human gesture: package the captured telemetry and ask the
	/// gateway what comes next. A call while one is pending is a no-op.
	pub async fn confirm_gesture(&self) -> WidgetState {
		let (key, request, gateway) = {
			let mut guard = self.shared.inner.lock().await;
			let inner = &mut *guard;
			if inner.orchestrator.state() != WidgetState::AwaitingGesture {
				return inner.orchestrator.state();
			}
			let Some(session_id) = inner.session.as_ref().map(|session| session.id) else {
				return inner.orchestrator.state();
			};
			let key = format!("{session_id}:next-step");
			if !inner.in_flight.try_begin(key.clone()) {
				log::debug!("next-step already in flight");
				return inner.orchestrator.state();
			}

			self.commit(inner, OrchestratorEvent::GestureConfirmed);
			let Some(session) = inner.session.as_mut() else {
				inner.in_flight.reset();
				return inner.orchestrator.state();
			};
			let behavior_data = session.package(now_millis());
			self.shared
				.events
				.dispatch(WidgetEvent::TelemetryFlushed(TelemetryFlushEvent {
					session_id: session_id.to_string(),
					sequence: session.sequence(),
					samples: behavior_data.sample_count(),
					is_final: false,
					timestamp: Utc::now(),
				}));
			let request = NextStepRequest {
				behavior_data,
				session_id: Some(session_id.to_string()),
			};
			(key, request, inner.gateway.clone())
		};

		let started = Instant::now();
		let result = gateway.next_step(&request).await;
		self.record_call(GatewayOperation::NextStep, started, result.is_ok());

		let followup = {
			let mut guard = self.shared.inner.lock().await;
			let inner = &mut *guard;
			if !inner.in_flight.finish(&key) {
				log::debug!("discarding stale next-step response");
				return inner.orchestrator.state();
			}
			match result {
				Ok(verdict) => {
					let low_confidence =
						verdict.is_low_confidence(inner.config.low_confidence_threshold);
					self.shared.events.dispatch(WidgetEvent::Verdict(VerdictEvent {
						confidence_score: verdict.confidence_score,
						is_bot_detected: verdict.is_bot_detected,
						low_confidence,
						next_challenge: verdict.next_challenge_kind,
						timestamp: Utc::now(),
					}));
					self.commit(inner, OrchestratorEvent::Verdict(verdict))
				}
				Err(err) => {
					log::warn!("next-step failed: {err}");
					self.shared
						.events
						.dispatch(WidgetEvent::error(GatewayOperation::NextStep.as_str(), &err));
					self.commit(inner, OrchestratorEvent::GatewayFailed)
				}
			}
		};

		match followup.fire() {
			Some(kind) => self.load_challenge(kind).await,
			None => self.state().await,
		}
	}

	/// Leave the `error` state and wait for a new gesture. The attempt counter
	/// is kept.
	pub async fn retry(&self) -> WidgetState {
		let mut guard = self.shared.inner.lock().await;
		let inner = &mut *guard;
		if !matches!(inner.orchestrator.state(), WidgetState::Error(_)) {
			return inner.orchestrator.state();
		}

		if let Some(session) = inner.session.as_mut()
			&& let Some(mut stale) = session.take_challenge()
		{
			stale.as_challenge_mut().finish(now_millis());
		}
		inner.in_flight.reset();
		self.commit(inner, OrchestratorEvent::Retry);
		self.commit(inner, OrchestratorEvent::Start);
		inner.orchestrator.state()
	}

	/// Flip a grid cell. `x`/`y` locate the click inside the tile (0..1).
	pub async fn toggle_cell(
		&self,
		cell_id: u32,
		x: f64,
		y: f64,
		timestamp: Millis,
	) -> WidgetResult<bool> {
		self.with_challenge(|active| active.image_mut()?.toggle_cell(cell_id, x, y, timestamp))
			.await
	}

	pub async fn toggle_image(
		&self,
		image_id: u32,
		x: f64,
		y: f64,
		timestamp: Millis,
	) -> WidgetResult<bool> {
		self.with_challenge(|active| active.abstract_mut()?.toggle_image(image_id, x, y, timestamp))
			.await
	}

	/// Pointer entering or leaving a tile of a selection challenge.
	pub async fn hover(&self, tile_id: u32, entering: bool, timestamp: Millis) -> WidgetResult<()> {
		self.with_challenge(|active| match active {
			ActiveChallenge::Image(challenge) => {
				challenge.hover(tile_id, entering, timestamp);
				Ok(())
			}
			ActiveChallenge::Abstract(challenge) => {
				challenge.hover(tile_id, entering, timestamp);
				Ok(())
			}
			ActiveChallenge::Handwriting(_) => Err(ChallengeError::WrongKind {
				expected: ChallengeKind::Image,
				found: ChallengeKind::Handwriting,
			}),
		})
		.await
	}

	/// Pointer movement over the challenge surface, `width`×`height` pixels.
	pub async fn challenge_pointer_move(
		&self,
		x: f64,
		y: f64,
		width: f64,
		height: f64,
		timestamp: Millis,
	) -> WidgetResult<()> {
		self.with_challenge(|active| {
			match active {
				ActiveChallenge::Image(challenge) => {
					challenge.pointer_move(x, y, width, height, timestamp)
				}
				ActiveChallenge::Abstract(challenge) => {
					challenge.pointer_move(x, y, width, height, timestamp)
				}
				ActiveChallenge::Handwriting(_) => {}
			}
			Ok(())
		})
		.await
	}

	pub async fn start_stroke(&self, x: f64, y: f64, timestamp: Millis) -> WidgetResult<()> {
		self.with_challenge(|active| active.handwriting_mut()?.start_stroke(x, y, timestamp))
			.await
	}

	pub async fn add_point(&self, x: f64, y: f64, timestamp: Millis) -> WidgetResult<()> {
		self.with_challenge(|active| active.handwriting_mut()?.add_point(x, y, timestamp))
			.await
	}

	pub async fn end_stroke(&self) -> WidgetResult<Option<StrokeMetrics>> {
		self.with_challenge(|active| active.handwriting_mut()?.end_stroke())
			.await
	}

	pub async fn undo(&self) -> WidgetResult<bool> {
		self.with_challenge(|active| active.handwriting_mut()?.undo())
			.await
	}

	pub async fn clear_drawing(&self) -> WidgetResult<()> {
		self.with_challenge(|active| {
			active.handwriting_mut()?.clear();
			Ok(())
		})
		.await
	}

	/// Submit the current answer. Client-side validation failures are
	/// returned without touching the network; a wrong answer silently loads
	/// a replacement challenge.
	pub async fn submit(&self) -> WidgetResult<WidgetState> {
		let (key, submission, gateway) = {
			let mut guard = self.shared.inner.lock().await;
			let inner = &mut *guard;
			let state = inner.orchestrator.state();
			if state.is_terminal() {
				return Ok(state);
			}
			if state.challenge_kind().is_none() {
				return Err(WidgetError::InvalidState(state));
			}
			let session = inner.session.as_ref().ok_or(WidgetError::NotMounted)?;
			let active = session
				.challenge()
				.ok_or(ChallengeError::NoActiveChallenge)?;
			let submission = active.as_challenge().prepare_submit()?;
			let key = format!("{}:verify:{}", session.id, submission.challenge_id());
			if !inner.in_flight.try_begin(key.clone()) {
				log::debug!("verify for {} already in flight", submission.challenge_id());
				return Ok(state);
			}
			(key, submission, inner.gateway.clone())
		};

		let started = Instant::now();
		let result = gateway.verify(&submission).await;
		self.record_call(submission.operation(), started, result.is_ok());
		let kind = submission.kind();

		let followup = {
			let mut guard = self.shared.inner.lock().await;
			let inner = &mut *guard;
			if !inner.in_flight.finish(&key) {
				log::debug!("discarding stale verify response for {}", submission.challenge_id());
				return Ok(inner.orchestrator.state());
			}
			match result {
				Ok(verdict) => {
					self.shared
						.events
						.dispatch(WidgetEvent::Verification(VerificationEvent {
							kind,
							challenge_id: submission.challenge_id().to_string(),
							success: verdict.success,
							timestamp: Utc::now(),
						}));

					let now = now_millis();
					if let Some(active) = inner.session.as_mut().and_then(Session::challenge_mut) {
						let challenge = active.as_challenge_mut();
						challenge.on_verdict(&verdict, now);
						self.report_behavior(inner.gateway.clone(), challenge.behavior_report(now));
					}

					if verdict.success {
						inner.redirect_url = verdict.redirect_url;
						self.commit(inner, OrchestratorEvent::ChallengePassed)
					} else {
						log::info!("{}", inner.config.message(MessageKey::WrongAnswer));
						Followup::load(kind)
					}
				}
				Err(err) => {
					log::warn!("{} failed: {err}", submission.operation());
					self.shared
						.events
						.dispatch(WidgetEvent::error(submission.operation().as_str(), &err));
					self.commit(inner, OrchestratorEvent::GatewayFailed)
				}
			}
		};

		Ok(match followup.fire() {
			Some(kind) => self.load_challenge(kind).await,
			None => self.state().await,
		})
	}

	/// Discard the current challenge at the user's request and load another.
	pub async fn refresh(&self) -> WidgetResult<WidgetState> {
		let kind = {
			let mut guard = self.shared.inner.lock().await;
			let inner = &mut *guard;
			let state = inner.orchestrator.state();
			if state.is_terminal() {
				return Ok(state);
			}
			let Some(kind) = state.challenge_kind() else {
				return Err(WidgetError::InvalidState(state));
			};
			if inner.in_flight.is_busy() {
				return Ok(state);
			}
			let active = inner
				.session
				.as_mut()
				.and_then(Session::challenge_mut)
				.ok_or(ChallengeError::NoActiveChallenge)?;
			if let Some(discarded) = active.as_challenge_mut().refresh() {
				log::debug!("refreshing {kind} challenge {}", discarded.challenge_id);
			}
			kind
		};
		Ok(self.load_challenge(kind).await)
	}

	/// Advance the active challenge's TTL by one second. An expired challenge
	/// is discarded and silently replaced.
	pub async fn tick(&self) -> WidgetState {
		let refetch = {
			let mut guard = self.shared.inner.lock().await;
			let inner = &mut *guard;
			let Some(active) = inner.session.as_mut().and_then(Session::challenge_mut) else {
				return inner.orchestrator.state();
			};
			match active.as_challenge_mut().tick() {
				Some(TtlStatus::Expired) => {
					let kind = active.kind();
					if let Some(expired) = active.as_challenge_mut().on_expire() {
						log::info!("{}", inner.config.message(MessageKey::ChallengeExpired));
						self.shared
							.events
							.dispatch(WidgetEvent::ChallengeExpired(ChallengeEvent {
								kind,
								challenge_id: expired.challenge_id,
								timestamp: Utc::now(),
							}));
					}
					Some(kind)
				}
				_ => None,
			}
		};

		match refetch {
			Some(kind) => self.load_challenge(kind).await,
			None => self.state().await,
		}
	}

	/// Periodic flush of the session's telemetry buffer.
	pub async fn flush_telemetry(&self) -> Option<TelemetryBatch> {
		let mut guard = self.shared.inner.lock().await;
		let session = guard.session.as_mut()?;
		let batch = session.flush(false, now_millis())?.clone();
		self.dispatch_flush(session.id, &batch);
		Some(batch)
	}

	pub async fn state(&self) -> WidgetState {
		self.shared.inner.lock().await.orchestrator.state()
	}

	/// Low-confidence verdicts counted in the current session.
	pub async fn attempts(&self) -> u32 {
		self.shared.inner.lock().await.orchestrator.attempts()
	}

	pub async fn session_id(&self) -> Option<Uuid> {
		self.shared
			.inner
			.lock()
			.await
			.session
			.as_ref()
			.map(|session| session.id)
	}

	pub async fn config(&self) -> WidgetConfig {
		self.shared.inner.lock().await.config.clone()
	}

	/// Localized message for the current state, if it shows one.
	pub async fn status_message(&self) -> Option<&'static str> {
		let guard = self.shared.inner.lock().await;
		match guard.orchestrator.state() {
			WidgetState::Error(kind) => Some(guard.config.message(kind.message_key())),
			WidgetState::Locked => Some(guard.config.message(MessageKey::Locked)),
			_ => None,
		}
	}

	/// Live challenge instance, if one is installed.
	pub async fn active_challenge(&self) -> Option<ChallengeInstance> {
		self.inspect_challenge(|active| active.as_challenge().instance().cloned())
			.await
			.flatten()
	}

	/// Read access to the active challenge.
	pub async fn inspect_challenge<T>(&self, inspect: impl FnOnce(&ActiveChallenge) -> T) -> Option<T> {
		let guard = self.shared.inner.lock().await;
		guard
			.session
			.as_ref()
			.and_then(Session::challenge)
			.map(inspect)
	}

	pub fn metrics(&self) -> Option<MetricsSnapshot> {
		self.shared
			.metrics
			.as_ref()
			.map(MetricsCollector::snapshot)
	}

	async fn record(&self, sample: BehaviorSample) -> bool {
		let mut guard = self.shared.inner.lock().await;
		guard
			.session
			.as_mut()
			.is_some_and(|session| session.record(sample))
	}

	async fn with_challenge<T, F>(&self, op: F) -> WidgetResult<T>
	where
		F: FnOnce(&mut ActiveChallenge) -> Result<T, ChallengeError>,
	{
		let mut guard = self.shared.inner.lock().await;
		let active = guard
			.session
			.as_mut()
			.and_then(Session::challenge_mut)
			.ok_or(ChallengeError::NoActiveChallenge)?;
		Ok(op(active)?)
	}

	async fn load_challenge(&self, kind: ChallengeKind) -> WidgetState {
		let Some(operation) = GatewayOperation::fetch_for(kind) else {
			return self.state().await;
		};

		let (key, gateway) = {
			let mut guard = self.shared.inner.lock().await;
			let inner = &mut *guard;
			if inner.orchestrator.state().challenge_kind() != Some(kind) {
				return inner.orchestrator.state();
			}
			let Some(session_id) = inner.session.as_ref().map(|session| session.id) else {
				return inner.orchestrator.state();
			};
			let key = format!("{session_id}:fetch:{kind}");
			if !inner.in_flight.try_begin(key.clone()) {
				log::debug!("{kind} challenge fetch deferred, request in flight");
				return inner.orchestrator.state();
			}
			(key, inner.gateway.clone())
		};

		let started = Instant::now();
		let result = gateway.fetch_challenge(kind).await;
		self.record_call(operation, started, result.is_ok());

		let mut guard = self.shared.inner.lock().await;
		let inner = &mut *guard;
		if !inner.in_flight.finish(&key) {
			log::debug!("discarding stale {kind} challenge");
			return inner.orchestrator.state();
		}

		match result {
			Ok(issued) => {
				let Some(session) = inner.session.as_mut() else {
					return inner.orchestrator.state();
				};
				if session.challenge().map(ActiveChallenge::kind) != Some(kind)
					&& let Some(active) = ActiveChallenge::for_kind(kind, &inner.config, now_millis())
				{
					session.set_challenge(active);
				}
				if let Some(active) = session.challenge_mut() {
					let challenge_id = issued.challenge_id.clone();
					active.as_challenge_mut().install(issued);
					self.shared
						.events
						.dispatch(WidgetEvent::ChallengeIssued(ChallengeEvent {
							kind,
							challenge_id,
							timestamp: Utc::now(),
						}));
				}
			}
			Err(err) => {
				log::warn!("loading {kind} challenge failed: {err}");
				self.shared
					.events
					.dispatch(WidgetEvent::error(operation.as_str(), &err));
				self.commit(inner, OrchestratorEvent::GatewayFailed);
			}
		}
		inner.orchestrator.state()
	}

	/// Apply an orchestrator event and perform the synchronous part of its
	/// effect. Anything that must run unlocked comes back as a [`Followup`].
	fn commit(&self, inner: &mut WidgetInner, event: OrchestratorEvent) -> Followup {
		let mut followup = Followup::default();
		let Some(transition) = inner.orchestrator.apply(event) else {
			return followup;
		};
		self.shared
			.events
			.dispatch(WidgetEvent::StateChanged(StateChangeEvent {
				from: transition.from,
				to: transition.to,
				attempts: inner.orchestrator.attempts(),
				timestamp: Utc::now(),
			}));

		match transition.effect {
			Effect::None | Effect::Evaluate => {}
			Effect::BeginCapture => {
				if let Some(session) = inner.session.as_mut() {
					session.start_capture();
				}
			}
			Effect::ShowError(kind) => {
				log::info!("{}", inner.config.message(kind.message_key()));
			}
			Effect::LoadChallenge(kind) => {
				if let Some(session) = inner.session.as_mut()
					&& let Some(active) = ActiveChallenge::for_kind(kind, &inner.config, now_millis())
				{
					session.set_challenge(active);
				}
				followup.load = Some(kind);
			}
			Effect::Complete { success } => {
				if let Some(session) = inner.session.as_mut() {
					self.close_session(session);
				}
				inner.in_flight.reset();
				if !inner.completed {
					inner.completed = true;
					let result = CompletionResult {
						success,
						redirect_url: inner.redirect_url.take(),
					};
					followup.completion = inner
						.on_complete
						.clone()
						.map(|callback| (callback, result));
				}
			}
		}
		followup
	}

	fn start_session(&self, inner: &mut WidgetInner) {
		let session = Session::new(&self.shared.environment, inner.config.debounce, now_millis());
		log::debug!("session {} started ({:?})", session.id, session.device);
		let cancellation = session.cancellation();
		inner.session = Some(session);
		inner.completed = false;
		inner.redirect_url = None;
		if inner.config.background_timers {
			self.spawn_timers(cancellation, inner.config.flush_interval);
		}
		self.commit(inner, OrchestratorEvent::Start);
	}

	fn end_session(&self, inner: &mut WidgetInner) -> Option<TelemetryBatch> {
		let mut session = inner.session.take()?;
		self.close_session(&mut session)
	}

	fn close_session(&self, session: &mut Session) -> Option<TelemetryBatch> {
		if session.cancellation().is_cancelled() {
			return None;
		}
		let now = now_millis();
		if let Some(active) = session.challenge_mut() {
			active.as_challenge_mut().finish(now);
		}
		let batch = session.close(now)?;
		self.dispatch_flush(session.id, &batch);
		Some(batch)
	}

	/// TTL ticker and periodic telemetry flush, both stopped by the session's
	/// cancellation token.
	fn spawn_timers(&self, cancellation: SessionCancellation, flush_every: Duration) {
		let shared = Arc::downgrade(&self.shared);
		tokio::spawn(async move {
			let mut ttl_tick = tokio::time::interval(Duration::from_secs(1));
			let mut flush_tick = tokio::time::interval(flush_every.max(Duration::from_millis(1)));
			ttl_tick.tick().await;
			flush_tick.tick().await;

			loop {
				let flush_due = tokio::select! {
					_ = cancellation.cancelled() => break,
					_ = ttl_tick.tick() => false,
					_ = flush_tick.tick() => true,
				};
				let Some(shared) = shared.upgrade() else {
					break;
				};
				let widget = CaptchaWidget { shared };
				if flush_due {
					widget.flush_telemetry().await;
				} else {
					widget.tick().await;
				}
			}
			log::trace!("session timers stopped");
		});
	}

	fn report_behavior(&self, gateway: Arc<dyn VerificationGateway>, report: BehaviorReport) {
		let events = self.shared.events.clone();
		tokio::spawn(async move {
			let operation = report.channel.operation();
			let started = Instant::now();
			let result = gateway.report_behavior(&report).await;
			events.dispatch(WidgetEvent::GatewayCall(GatewayCallEvent {
				operation,
				latency: started.elapsed(),
				success: result.is_ok(),
				timestamp: Utc::now(),
			}));
			if let Err(err) = result {
				log::warn!("{operation} report dropped: {err}");
			}
		});
	}

	fn record_call(&self, operation: GatewayOperation, started: Instant, success: bool) {
		self.shared
			.events
			.dispatch(WidgetEvent::GatewayCall(GatewayCallEvent {
				operation,
				latency: started.elapsed(),
				success,
				timestamp: Utc::now(),
			}));
	}

	fn dispatch_flush(&self, session_id: Uuid, batch: &TelemetryBatch) {
		self.shared
			.events
			.dispatch(WidgetEvent::TelemetryFlushed(TelemetryFlushEvent {
				session_id: session_id.to_string(),
				sequence: batch.sequence,
				samples: batch.data.sample_count(),
				is_final: batch.is_final,
				timestamp: Utc::now(),
			}));
	}
}
