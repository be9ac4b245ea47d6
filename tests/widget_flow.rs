use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use realcaptcha_rs::modules::CanvasSnapshot;
use realcaptcha_rs::{
    ActiveChallenge, BehaviorReport, CaptchaWidget, ChallengeError, ChallengeKind,
    ChallengePayload, ChallengeSubmission, CompletionResult, ConfidenceVerdict, ErrorKind,
    EventHandler, GatewayError, GatewayOperation, ImageItem, IssuedChallenge, NextStepRequest,
    TelemetryData, VerificationGateway, VerifyVerdict, WidgetError, WidgetEvent, WidgetState,
};
use url::Url;

/// Gateway double with scripted responses and call counters.
#[derive(Default)]
struct StubGateway {
    verdicts: Mutex<VecDeque<Result<ConfidenceVerdict, GatewayError>>>,
    verify_results: Mutex<VecDeque<Result<VerifyVerdict, GatewayError>>>,
    requests: Mutex<Vec<NextStepRequest>>,
    submissions: Mutex<Vec<ChallengeSubmission>>,
    next_step_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    report_calls: AtomicUsize,
    ttl: Option<Duration>,
    latency: Option<Duration>,
}

impl StubGateway {
    fn with_verdicts<I>(verdicts: I) -> Self
    where
        I: IntoIterator<Item = Result<ConfidenceVerdict, GatewayError>>,
    {
        Self {
            verdicts: Mutex::new(verdicts.into_iter().collect()),
            ..Self::default()
        }
    }

    fn with_verify_results<I>(mut self, results: I) -> Self
    where
        I: IntoIterator<Item = Result<VerifyVerdict, GatewayError>>,
    {
        self.verify_results = Mutex::new(results.into_iter().collect());
        self
    }

    fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn submitted_ids(&self) -> Vec<String> {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .map(|submission| submission.challenge_id().to_string())
            .collect()
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl VerificationGateway for StubGateway {
    async fn next_step(&self, request: &NextStepRequest) -> Result<ConfidenceVerdict, GatewayError> {
        self.next_step_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.delay().await;
        self.verdicts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::Transport("no scripted verdict".into())))
    }

    async fn fetch_challenge(&self, kind: ChallengeKind) -> Result<IssuedChallenge, GatewayError> {
        let serial = self.fetch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.delay().await;
        let url = |path: &str| Url::parse(&format!("https://cdn.example.com/{path}")).unwrap();
        let payload = match kind {
            ChallengeKind::Image => ChallengePayload::Image {
                image_url: url("grid.png"),
                question: "Select every bicycle".into(),
            },
            ChallengeKind::Handwriting => ChallengePayload::Handwriting {
                samples: vec![url("s1.png"), url("s2.png")],
            },
            ChallengeKind::Abstract => ChallengePayload::Abstract {
                images: (1..=4)
                    .map(|id| ImageItem {
                        id,
                        url: url(&format!("a{id}.png")),
                    })
                    .collect(),
                question: "Which images feel calm?".into(),
            },
            ChallengeKind::Initial => return Err(GatewayError::UnsupportedKind(kind)),
        };
        Ok(IssuedChallenge {
            challenge_id: format!("{kind}-{serial}"),
            ttl: self.ttl.unwrap_or(Duration::from_secs(45)),
            payload,
        })
    }

    async fn verify(&self, submission: &ChallengeSubmission) -> Result<VerifyVerdict, GatewayError> {
        self.submissions.lock().unwrap().push(submission.clone());
        self.delay().await;
        self.verify_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::Transport("no scripted verify".into())))
    }

    async fn report_behavior(&self, _report: &BehaviorReport) -> Result<(), GatewayError> {
        self.report_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingHandler {
    expired: AtomicUsize,
    issued: AtomicUsize,
}

impl EventHandler for RecordingHandler {
    fn handle(&self, event: &WidgetEvent) {
        match event {
            WidgetEvent::ChallengeExpired(_) => {
                self.expired.fetch_add(1, Ordering::SeqCst);
            }
            WidgetEvent::ChallengeIssued(_) => {
                self.issued.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

fn verdict(score: f64, next: Option<ChallengeKind>) -> Result<ConfidenceVerdict, GatewayError> {
    Ok(ConfidenceVerdict {
        confidence_score: score,
        is_bot_detected: false,
        next_challenge_kind: next,
        challenge_token: None,
    })
}

fn verified(success: bool) -> Result<VerifyVerdict, GatewayError> {
    Ok(VerifyVerdict {
        success,
        attempts: None,
        redirect_url: success.then(|| "https://site.example.com/welcome".to_string()),
    })
}

fn widget(gateway: Arc<StubGateway>) -> CaptchaWidget {
    CaptchaWidget::builder()
        .with_gateway(gateway)
        .with_background_timers(false)
        .build()
        .unwrap()
}

type Completions = Arc<Mutex<Vec<CompletionResult>>>;

async fn render(widget: &CaptchaWidget) -> Completions {
    let completions: Completions = Arc::default();
    let sink = completions.clone();
    widget
        .render("#captcha", move |result| sink.lock().unwrap().push(result))
        .await;
    completions
}

async fn enter_challenge(kind: ChallengeKind, gateway: StubGateway) -> (CaptchaWidget, Arc<StubGateway>, Completions) {
    let gateway = Arc::new(gateway);
    let widget = widget(gateway.clone());
    let completions = render(&widget).await;
    let expected = match kind {
        ChallengeKind::Image => WidgetState::ImageChallenge,
        ChallengeKind::Handwriting => WidgetState::HandwritingChallenge,
        _ => WidgetState::AbstractChallenge,
    };
    assert_eq!(widget.confirm_gesture().await, expected);
    (widget, gateway, completions)
}

fn handwriting_snapshot(active: &ActiveChallenge) -> CanvasSnapshot {
    match active {
        ActiveChallenge::Handwriting(challenge) => challenge.canvas_snapshot(),
        other => panic!("expected handwriting, found {:?}", other.kind()),
    }
}

#[tokio::test]
async fn confident_verdict_completes_exactly_once() {
    let gateway = Arc::new(StubGateway::with_verdicts([verdict(85.0, None)]));
    let widget = widget(gateway.clone());
    let completions = render(&widget).await;

    widget.pointer_move(10.0, 10.0, 1_000).await;
    widget.pointer_move(60.0, 40.0, 1_200).await;
    assert_eq!(widget.confirm_gesture().await, WidgetState::Success);
    assert_eq!(widget.confirm_gesture().await, WidgetState::Success);

    assert_eq!(gateway.next_step_calls.load(Ordering::SeqCst), 1);
    let completions = completions.lock().unwrap();
    assert_eq!(completions.len(), 1);
    assert!(completions[0].success);
}

#[tokio::test]
async fn next_step_carries_session_telemetry() {
    let gateway = Arc::new(StubGateway::with_verdicts([verdict(85.0, None)]));
    let widget = widget(gateway.clone());
    render(&widget).await;
    let session_id = widget.session_id().await.unwrap();

    widget.pointer_move(0.0, 0.0, 1_000).await;
    widget.pointer_move(40.0, 0.0, 1_020).await;
    widget.scroll(300.0, 1_100).await;
    widget.confirm_gesture().await;

    let requests = gateway.requests.lock().unwrap();
    assert_eq!(requests[0].session_id, Some(session_id.to_string()));
    assert_eq!(requests[0].behavior_data.sample_count(), 3);
}

#[tokio::test]
async fn three_low_confidence_verdicts_lock_the_widget() {
    let gateway = Arc::new(StubGateway::with_verdicts([
        verdict(5.0, None),
        verdict(5.0, None),
        verdict(5.0, None),
    ]));
    let widget = widget(gateway.clone());
    let completions = render(&widget).await;

    for _ in 0..2 {
        assert_eq!(
            widget.confirm_gesture().await,
            WidgetState::Error(ErrorKind::LowConfidence)
        );
        assert_eq!(widget.retry().await, WidgetState::AwaitingGesture);
    }
    assert_eq!(widget.confirm_gesture().await, WidgetState::Locked);
    assert_eq!(widget.attempts().await, 3);

    assert_eq!(widget.confirm_gesture().await, WidgetState::Locked);
    assert_eq!(widget.reset().await, WidgetState::Locked);
    assert_eq!(gateway.next_step_calls.load(Ordering::SeqCst), 3);

    let completions = completions.lock().unwrap();
    assert_eq!(completions.len(), 1);
    assert!(!completions[0].success);
}

#[tokio::test]
async fn concurrent_gestures_dispatch_one_call() {
    let gateway = Arc::new(
        StubGateway::with_verdicts([verdict(85.0, None), verdict(85.0, None)])
            .with_latency(Duration::from_millis(50)),
    );
    let widget = widget(gateway.clone());
    render(&widget).await;

    let (first, second) = tokio::join!(widget.confirm_gesture(), widget.confirm_gesture());
    assert_eq!(gateway.next_step_calls.load(Ordering::SeqCst), 1);
    assert!([first, second].contains(&WidgetState::Success));
    assert_eq!(widget.state().await, WidgetState::Success);
}

#[tokio::test]
async fn network_failure_does_not_count_an_attempt() {
    let gateway = Arc::new(StubGateway::with_verdicts([
        Err(GatewayError::Status {
            operation: GatewayOperation::NextStep,
            status: 503,
        }),
        verdict(90.0, None),
    ]));
    let widget = widget(gateway.clone());
    render(&widget).await;

    assert_eq!(
        widget.confirm_gesture().await,
        WidgetState::Error(ErrorKind::ConnectionFailed)
    );
    assert_eq!(widget.attempts().await, 0);
    assert_eq!(widget.retry().await, WidgetState::AwaitingGesture);
    assert_eq!(widget.confirm_gesture().await, WidgetState::Success);
}

#[tokio::test]
async fn stray_interaction_is_an_invalid_selection() {
    let gateway = Arc::new(StubGateway::default());
    let widget = widget(gateway.clone());
    render(&widget).await;
    assert_eq!(
        widget.stray_interaction().await,
        WidgetState::Error(ErrorKind::InvalidSelection)
    );
    assert_eq!(widget.attempts().await, 0);
    assert_eq!(gateway.next_step_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn pointer_moves_are_debounced() {
    let gateway = Arc::new(StubGateway::default());
    let widget = widget(gateway);
    render(&widget).await;

    assert!(widget.pointer_move(100.0, 100.0, 1_000).await);
    for step in 1..=20u64 {
        let offset = (step % 3) as f64;
        assert!(!widget.pointer_move(100.0 + offset, 100.0, 1_000 + step * 2).await);
    }

    let batch = widget.unmount().await.unwrap();
    match batch.data {
        TelemetryData::Desktop(data) => assert_eq!(data.mouse_movements.len(), 1),
        other => panic!("expected desktop telemetry, found {other:?}"),
    }
}

#[tokio::test]
async fn expired_challenge_is_replaced_and_never_submitted() {
    let handler = Arc::new(RecordingHandler::default());
    let gateway = Arc::new(
        StubGateway::with_verdicts([verdict(70.0, Some(ChallengeKind::Image))])
            .with_verify_results([verified(true)])
            .with_ttl(Duration::from_secs(2)),
    );
    let widget = CaptchaWidget::builder()
        .with_gateway(gateway.clone())
        .with_event_handler(handler.clone())
        .with_background_timers(false)
        .build()
        .unwrap();
    let completions = render(&widget).await;

    assert_eq!(widget.confirm_gesture().await, WidgetState::ImageChallenge);
    assert_eq!(widget.active_challenge().await.unwrap().challenge_id, "image-1");
    widget.toggle_cell(4, 0.5, 0.5, 2_000).await.unwrap();

    widget.tick().await;
    assert_eq!(widget.tick().await, WidgetState::ImageChallenge);
    assert_eq!(handler.expired.load(Ordering::SeqCst), 1);
    assert_eq!(handler.issued.load(Ordering::SeqCst), 2);
    assert_eq!(widget.active_challenge().await.unwrap().challenge_id, "image-2");

    widget.toggle_cell(1, 0.5, 0.5, 4_000).await.unwrap();
    assert_eq!(widget.submit().await.unwrap(), WidgetState::Success);
    assert_eq!(gateway.submitted_ids(), vec!["image-2".to_string()]);

    let completions = completions.lock().unwrap();
    assert_eq!(
        completions[0].redirect_url.as_deref(),
        Some("https://site.example.com/welcome")
    );
}

#[tokio::test]
async fn wrong_answer_loads_a_fresh_challenge() {
    let (widget, gateway, completions) = enter_challenge(
        ChallengeKind::Image,
        StubGateway::with_verdicts([verdict(60.0, Some(ChallengeKind::Image))])
            .with_verify_results([verified(false), verified(true)]),
    )
    .await;

    widget.toggle_cell(0, 0.2, 0.8, 1_000).await.unwrap();
    assert_eq!(widget.submit().await.unwrap(), WidgetState::ImageChallenge);
    assert_eq!(widget.active_challenge().await.unwrap().challenge_id, "image-2");
    assert_eq!(widget.attempts().await, 0);
    assert!(completions.lock().unwrap().is_empty());

    widget.toggle_cell(3, 0.5, 0.5, 2_000).await.unwrap();
    assert_eq!(widget.submit().await.unwrap(), WidgetState::Success);
    assert_eq!(gateway.submitted_ids(), vec!["image-1", "image-2"]);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(gateway.report_calls.load(Ordering::SeqCst), 2);
    assert_eq!(completions.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn manual_refresh_replaces_the_challenge() {
    let (widget, gateway, _) = enter_challenge(
        ChallengeKind::Image,
        StubGateway::with_verdicts([verdict(60.0, Some(ChallengeKind::Image))]),
    )
    .await;

    assert_eq!(widget.refresh().await.unwrap(), WidgetState::ImageChallenge);
    assert_eq!(widget.active_challenge().await.unwrap().challenge_id, "image-2");
    assert_eq!(gateway.fetch_calls.load(Ordering::SeqCst), 2);
    let refreshes = widget
        .inspect_challenge(|active| match active {
            ActiveChallenge::Image(challenge) => challenge.collector().refresh_count,
            _ => 0,
        })
        .await;
    assert_eq!(refreshes, Some(1));
}

#[tokio::test]
async fn abstract_selection_is_submitted_in_click_order() {
    let (widget, gateway, _) = enter_challenge(
        ChallengeKind::Abstract,
        StubGateway::with_verdicts([verdict(65.0, Some(ChallengeKind::Abstract))])
            .with_verify_results([verified(true)]),
    )
    .await;

    widget.toggle_image(3, 0.5, 0.5, 1_000).await.unwrap();
    widget.toggle_image(1, 0.5, 0.5, 1_500).await.unwrap();
    assert!(matches!(
        widget.toggle_image(9, 0.5, 0.5, 1_600).await,
        Err(WidgetError::Challenge(ChallengeError::UnknownTile(9)))
    ));
    assert_eq!(widget.submit().await.unwrap(), WidgetState::Success);

    let submissions = gateway.submissions.lock().unwrap();
    assert_eq!(
        submissions[0],
        ChallengeSubmission::Abstract {
            challenge_id: "abstract-1".into(),
            selections: vec![3, 1],
        }
    );
}

#[tokio::test]
async fn handwriting_undo_restores_the_previous_canvas() {
    let (widget, _, _) = enter_challenge(
        ChallengeKind::Handwriting,
        StubGateway::with_verdicts([verdict(60.0, Some(ChallengeKind::Handwriting))]),
    )
    .await;

    widget.start_stroke(20.0, 20.0, 1_000).await.unwrap();
    widget.add_point(60.0, 50.0, 1_040).await.unwrap();
    widget.add_point(90.0, 70.0, 1_080).await.unwrap();
    assert!(widget.end_stroke().await.unwrap().is_some());
    let after_first = widget.inspect_challenge(handwriting_snapshot).await.unwrap();

    widget.start_stroke(150.0, 30.0, 1_400).await.unwrap();
    widget.add_point(200.0, 110.0, 1_460).await.unwrap();
    widget.end_stroke().await.unwrap();
    assert_ne!(widget.inspect_challenge(handwriting_snapshot).await.unwrap(), after_first);

    assert!(widget.undo().await.unwrap());
    let history = widget
        .inspect_challenge(|active| match active {
            ActiveChallenge::Handwriting(challenge) => challenge.stroke_history_len(),
            _ => 0,
        })
        .await;
    assert_eq!(history, Some(1));
    assert_eq!(widget.inspect_challenge(handwriting_snapshot).await.unwrap(), after_first);
}

#[tokio::test]
async fn empty_drawing_is_rejected_before_any_network_call() {
    let (widget, gateway, _) = enter_challenge(
        ChallengeKind::Handwriting,
        StubGateway::with_verdicts([verdict(60.0, Some(ChallengeKind::Handwriting))]),
    )
    .await;

    widget.start_stroke(30.0, 30.0, 1_000).await.unwrap();
    assert!(widget.end_stroke().await.unwrap().is_none());

    assert!(matches!(
        widget.submit().await,
        Err(WidgetError::Challenge(ChallengeError::EmptyDrawing))
    ));
    assert!(gateway.submissions.lock().unwrap().is_empty());
    assert_eq!(widget.state().await, WidgetState::HandwritingChallenge);
}

#[tokio::test]
async fn verify_transport_failure_surfaces_connection_error() {
    let (widget, _, completions) = enter_challenge(
        ChallengeKind::Handwriting,
        StubGateway::with_verdicts([verdict(60.0, Some(ChallengeKind::Handwriting))]),
    )
    .await;

    widget.start_stroke(30.0, 30.0, 1_000).await.unwrap();
    widget.add_point(80.0, 60.0, 1_050).await.unwrap();
    widget.end_stroke().await.unwrap();

    assert_eq!(
        widget.submit().await.unwrap(),
        WidgetState::Error(ErrorKind::ConnectionFailed)
    );
    assert_eq!(widget.attempts().await, 0);
    assert!(completions.lock().unwrap().is_empty());

    assert_eq!(widget.retry().await, WidgetState::AwaitingGesture);
    assert!(widget.active_challenge().await.is_none());
}

#[tokio::test]
async fn unmount_returns_samples_from_every_flush() {
    let gateway = Arc::new(StubGateway::default());
    let widget = widget(gateway);
    render(&widget).await;

    widget.scroll(10.0, 1_000).await;
    let periodic = widget.flush_telemetry().await.unwrap();
    assert_eq!(periodic.data.sample_count(), 1);
    widget.scroll(20.0, 2_000).await;

    let last = widget.unmount().await.unwrap();
    assert!(last.is_final);
    assert_eq!(last.data.sample_count(), 2);
    match last.data {
        TelemetryData::Desktop(data) => {
            let positions: Vec<f64> = data.scroll_events.iter().map(|s| s.position).collect();
            assert_eq!(positions, vec![10.0, 20.0]);
            assert!(data.page_events.exit_time.is_some());
        }
        other => panic!("expected desktop telemetry, found {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_submits_send_one_verify() {
    let (widget, gateway, _) = enter_challenge(
        ChallengeKind::Image,
        StubGateway::with_verdicts([verdict(60.0, Some(ChallengeKind::Image))])
            .with_verify_results([verified(true), verified(true)])
            .with_latency(Duration::from_millis(50)),
    )
    .await;

    widget.toggle_cell(2, 0.5, 0.5, 1_000).await.unwrap();
    let (first, second) = tokio::join!(widget.submit(), widget.submit());
    let states = [first.unwrap(), second.unwrap()];

    assert!(states.contains(&WidgetState::Success));
    assert!(states.contains(&WidgetState::ImageChallenge));
    assert_eq!(gateway.submitted_ids(), vec!["image-1"]);
    assert_eq!(widget.state().await, WidgetState::Success);
}

#[tokio::test]
async fn expiry_during_verify_defers_refetch_to_the_verdict() {
    let handler = Arc::new(RecordingHandler::default());
    let gateway = Arc::new(
        StubGateway::with_verdicts([verdict(60.0, Some(ChallengeKind::Image))])
            .with_verify_results([verified(false)])
            .with_ttl(Duration::from_secs(1))
            .with_latency(Duration::from_millis(50)),
    );
    let widget = CaptchaWidget::builder()
        .with_gateway(gateway.clone())
        .with_event_handler(handler.clone())
        .with_background_timers(false)
        .build()
        .unwrap();
    render(&widget).await;
    assert_eq!(widget.confirm_gesture().await, WidgetState::ImageChallenge);
    widget.toggle_cell(5, 0.5, 0.5, 1_000).await.unwrap();

    let (submitted, ticked) = tokio::join!(widget.submit(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        widget.tick().await
    });
    assert_eq!(ticked, WidgetState::ImageChallenge);
    assert_eq!(handler.expired.load(Ordering::SeqCst), 1);

    assert_eq!(submitted.unwrap(), WidgetState::ImageChallenge);
    assert_eq!(gateway.fetch_calls.load(Ordering::SeqCst), 2);
    assert_eq!(gateway.submitted_ids(), vec!["image-1"]);
    assert_eq!(widget.active_challenge().await.unwrap().challenge_id, "image-2");
    assert_eq!(widget.attempts().await, 0);
}
