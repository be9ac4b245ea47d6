//! Secondary challenge variants.
//!
//! All three variants follow the same lifecycle (install an issued challenge,
//! collect an answer, submit, then either pass or discard and refetch), so the
//! driver talks to them through the [`Challenge`] trait and owns the shared
//! fetch/submit/retry logic itself. [`ActiveChallenge`] is the tagged union the
//! session stores.

pub mod abstract_select;
pub mod handwriting;
pub mod image_grid;

pub use abstract_select::AbstractSelectChallenge;
pub use handwriting::HandwritingChallenge;
pub use image_grid::ImageGridChallenge;

use std::fmt;

use thiserror::Error;

use super::core::{
    BehaviorReport, ChallengeInstance, ChallengeKind, ChallengeSubmission, IssuedChallenge,
    TtlStatus, VerifyVerdict,
};
use crate::config::WidgetConfig;
use crate::modules::canvas::CanvasError;
use crate::modules::telemetry::Millis;

/// Client-side failures raised before anything reaches the gateway.
#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("no challenge is currently active")]
    NoActiveChallenge,
    #[error("challenge {0} has expired")]
    Expired(String),
    #[error("expected a {expected} challenge, found {found}")]
    WrongKind {
        expected: ChallengeKind,
        found: ChallengeKind,
    },
    #[error("unknown tile {0}")]
    UnknownTile(u32),
    #[error("nothing has been drawn yet")]
    EmptyDrawing,
    #[error("no stroke in progress")]
    NoStroke,
    #[error("canvas error: {0}")]
    Canvas(#[from] CanvasError),
}

/// Shared lifecycle of every secondary challenge.
pub trait Challenge: Send + fmt::Debug {
    fn kind(&self) -> ChallengeKind;

    fn instance(&self) -> Option<&ChallengeInstance>;

    fn instance_mut(&mut self) -> Option<&mut ChallengeInstance>;

    /// Bind a freshly issued challenge and reset the answer state.
    fn install(&mut self, issued: IssuedChallenge);

    /// Validate the current answer and build the verify request.
    fn prepare_submit(&self) -> Result<ChallengeSubmission, ChallengeError>;

    /// Record a verify result. A failed answer clears the answer state and
    /// discards the instance so it is never submitted again.
    fn on_verdict(&mut self, verdict: &VerifyVerdict, now: Millis);

    /// Discard the instance after its TTL ran out.
    fn on_expire(&mut self) -> Option<ChallengeInstance>;

    /// User-requested replacement.
    fn refresh(&mut self) -> Option<ChallengeInstance>;

    fn behavior_report(&self, now: Millis) -> BehaviorReport;

    fn finish(&mut self, now: Millis);

    /// Id of the live (installed, unexpired) instance.
    fn live_id(&self) -> Option<&str> {
        self.instance()
            .filter(|instance| !instance.is_expired())
            .map(|instance| instance.challenge_id.as_str())
    }

    /// Advance the TTL by one second.
    fn tick(&mut self) -> Option<TtlStatus> {
        self.instance_mut().map(|instance| instance.ttl.tick())
    }
}

/// Live instance or the reason there is none.
pub(crate) fn require_live(
    instance: Option<&ChallengeInstance>,
) -> Result<&ChallengeInstance, ChallengeError> {
    let instance = instance.ok_or(ChallengeError::NoActiveChallenge)?;
    if instance.is_expired() {
        return Err(ChallengeError::Expired(instance.challenge_id.clone()));
    }
    Ok(instance)
}

#[derive(Debug)]
pub enum ActiveChallenge {
    Image(ImageGridChallenge),
    Handwriting(HandwritingChallenge),
    Abstract(AbstractSelectChallenge),
}

impl ActiveChallenge {
    pub fn for_kind(kind: ChallengeKind, config: &WidgetConfig, now: Millis) -> Option<Self> {
        match kind {
            ChallengeKind::Image => Some(ActiveChallenge::Image(ImageGridChallenge::new(
                config.grid_size,
                now,
            ))),
            ChallengeKind::Handwriting => Some(ActiveChallenge::Handwriting(
                HandwritingChallenge::from_config(config, now),
            )),
            ChallengeKind::Abstract => Some(ActiveChallenge::Abstract(
                AbstractSelectChallenge::new(now),
            )),
            ChallengeKind::Initial => None,
        }
    }

    pub fn as_challenge(&self) -> &dyn Challenge {
        match self {
            ActiveChallenge::Image(challenge) => challenge,
            ActiveChallenge::Handwriting(challenge) => challenge,
            ActiveChallenge::Abstract(challenge) => challenge,
        }
    }

    pub fn as_challenge_mut(&mut self) -> &mut dyn Challenge {
        match self {
            ActiveChallenge::Image(challenge) => challenge,
            ActiveChallenge::Handwriting(challenge) => challenge,
            ActiveChallenge::Abstract(challenge) => challenge,
        }
    }

    pub fn kind(&self) -> ChallengeKind {
        self.as_challenge().kind()
    }

    pub fn image_mut(&mut self) -> Result<&mut ImageGridChallenge, ChallengeError> {
        match self {
            ActiveChallenge::Image(challenge) => Ok(challenge),
            other => Err(ChallengeError::WrongKind {
                expected: ChallengeKind::Image,
                found: other.kind(),
            }),
        }
    }

    pub fn handwriting_mut(&mut self) -> Result<&mut HandwritingChallenge, ChallengeError> {
        match self {
            ActiveChallenge::Handwriting(challenge) => Ok(challenge),
            other => Err(ChallengeError::WrongKind {
                expected: ChallengeKind::Handwriting,
                found: other.kind(),
            }),
        }
    }

    pub fn abstract_mut(&mut self) -> Result<&mut AbstractSelectChallenge, ChallengeError> {
        match self {
            ActiveChallenge::Abstract(challenge) => Ok(challenge),
            other => Err(ChallengeError::WrongKind {
                expected: ChallengeKind::Abstract,
                found: other.kind(),
            }),
        }
    }
}
