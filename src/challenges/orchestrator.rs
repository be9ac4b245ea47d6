//! Challenge orchestration state machine.
//!
//! Pure transition logic: no I/O, no timers. The widget driver feeds events in,
//! performs the [`Effect`] that comes back (start capture, call the gateway,
//! load a challenge, fire the completion callback), and feeds the result back
//! as the next event.
//!
//! | state             | event              | next state                         |
//! |-------------------|--------------------|------------------------------------|
//! | idle              | start              | awaiting-gesture                   |
//! | awaiting-gesture  | gesture confirmed  | evaluating                         |
//! | awaiting-gesture  | stray interaction  | error (invalid selection)          |
//! | evaluating        | verdict            | challenge / success / error / locked |
//! | evaluating, challenge | gateway failed | error (connection failed)          |
//! | challenge         | challenge passed   | success                            |
//! | error             | retry              | idle                               |

use serde::Serialize;

use super::core::{ChallengeKind, ConfidenceVerdict};
use crate::config::{MessageKey, WidgetConfig};

/// Why the widget is in the recoverable error state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidSelection,
    ConnectionFailed,
    LowConfidence,
}

impl ErrorKind {
    pub fn message_key(self) -> MessageKey {
        match self {
            ErrorKind::InvalidSelection => MessageKey::InvalidSelection,
            ErrorKind::ConnectionFailed => MessageKey::ConnectionFailed,
            ErrorKind::LowConfidence => MessageKey::LowConfidence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetState {
    Idle,
    AwaitingGesture,
    Evaluating,
    ImageChallenge,
    HandwritingChallenge,
    AbstractChallenge,
    Success,
    Error(ErrorKind),
    Locked,
}

impl WidgetState {
    pub fn for_challenge(kind: ChallengeKind) -> Option<Self> {
        match kind {
            ChallengeKind::Image => Some(WidgetState::ImageChallenge),
            ChallengeKind::Handwriting => Some(WidgetState::HandwritingChallenge),
            ChallengeKind::Abstract => Some(WidgetState::AbstractChallenge),
            ChallengeKind::Initial => None,
        }
    }

    pub fn challenge_kind(self) -> Option<ChallengeKind> {
        match self {
            WidgetState::ImageChallenge => Some(ChallengeKind::Image),
            WidgetState::HandwritingChallenge => Some(ChallengeKind::Handwriting),
            WidgetState::AbstractChallenge => Some(ChallengeKind::Abstract),
            _ => None,
        }
    }

    /// `success` and `locked` end the session.
    pub fn is_terminal(self) -> bool {
        matches!(self, WidgetState::Success | WidgetState::Locked)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    Start,
    StrayInteraction,
    GestureConfirmed,
    Verdict(ConfidenceVerdict),
    GatewayFailed,
    ChallengePassed,
    Retry,
}

/// Work the driver must perform after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    BeginCapture,
    Evaluate,
    LoadChallenge(ChallengeKind),
    ShowError(ErrorKind),
    Complete { success: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: WidgetState,
    pub to: WidgetState,
    pub effect: Effect,
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    state: WidgetState,
    attempts: u32,
    low_confidence_threshold: f64,
    lockout_threshold: u32,
}

impl Orchestrator {
    pub fn new(low_confidence_threshold: f64, lockout_threshold: u32) -> Self {
        Self {
            state: WidgetState::Idle,
            attempts: 0,
            low_confidence_threshold,
            lockout_threshold: lockout_threshold.max(1),
        }
    }

    pub fn from_config(config: &WidgetConfig) -> Self {
        Self::new(config.low_confidence_threshold, config.lockout_threshold)
    }

    pub fn state(&self) -> WidgetState {
        self.state
    }

    /// Low-confidence verdicts seen in this session.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_locked(&self) -> bool {
        self.state == WidgetState::Locked
    }

    pub fn set_thresholds(&mut self, low_confidence_threshold: f64, lockout_threshold: u32) {
        self.low_confidence_threshold = low_confidence_threshold;
        self.lockout_threshold = lockout_threshold.max(1);
    }

    /// Apply `event`. Returns `None` when the current state ignores it.
    pub fn apply(&mut self, event: OrchestratorEvent) -> Option<Transition> {
        use OrchestratorEvent as Ev;
        use WidgetState as St;

        let (next, effect) = match (self.state, event) {
            (St::Success | St::Locked, _) => return None,
            (St::Idle, Ev::Start) => (St::AwaitingGesture, Effect::BeginCapture),
            (St::AwaitingGesture, Ev::GestureConfirmed) => (St::Evaluating, Effect::Evaluate),
            (St::AwaitingGesture, Ev::StrayInteraction) => {
                let kind = ErrorKind::InvalidSelection;
                (St::Error(kind), Effect::ShowError(kind))
            }
            (St::Evaluating, Ev::Verdict(verdict)) => self.on_verdict(&verdict),
            (St::Evaluating, Ev::GatewayFailed) => {
                let kind = ErrorKind::ConnectionFailed;
                (St::Error(kind), Effect::ShowError(kind))
            }
            (state, Ev::GatewayFailed) if state.challenge_kind().is_some() => {
                let kind = ErrorKind::ConnectionFailed;
                (St::Error(kind), Effect::ShowError(kind))
            }
            (state, Ev::ChallengePassed) if state.challenge_kind().is_some() => {
                (St::Success, Effect::Complete { success: true })
            }
            (St::Error(_), Ev::Retry) => (St::Idle, Effect::None),
            _ => return None,
        };

        let from = self.state;
        self.state = next;
        Some(Transition {
            from,
            to: next,
            effect,
        })
    }

    fn on_verdict(&mut self, verdict: &ConfidenceVerdict) -> (WidgetState, Effect) {
        if verdict.is_low_confidence(self.low_confidence_threshold) {
            self.attempts += 1;
            if self.attempts >= self.lockout_threshold {
                return (WidgetState::Locked, Effect::Complete { success: false });
            }
            let kind = ErrorKind::LowConfidence;
            return (WidgetState::Error(kind), Effect::ShowError(kind));
        }

        if let Some(kind) = verdict.next_challenge_kind
            && let Some(state) = WidgetState::for_challenge(kind)
        {
            return (state, Effect::LoadChallenge(kind));
        }
        (WidgetState::Success, Effect::Complete { success: true })
    }
}
