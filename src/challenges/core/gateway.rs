//! Contract with the remote verification gateway.
//!
//! The widget never judges behavior itself: it ships telemetry and answers to
//! the gateway and acts on the verdicts that come back. Tests swap in a stub
//! implementation of [`VerificationGateway`]; production uses the reqwest
//! adapter in [`super::reqwest_gateway`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

use super::types::{
    ChallengeKind, ChallengePayload, ConfidenceVerdict, ImageItem, IssuedChallenge, VerifyVerdict,
};
use crate::modules::telemetry::{PageEvents, TelemetryData};

/// Logical gateway operations and the paths they are served on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GatewayOperation {
    NextStep,
    ImageChallenge,
    ImageVerify,
    HandwritingChallenge,
    HandwritingVerify,
    AbstractChallenge,
    AbstractVerify,
    BehaviorImage,
    BehaviorWriting,
}

impl GatewayOperation {
    pub fn path(self) -> &'static str {
        match self {
            GatewayOperation::NextStep => "/api/next-captcha",
            GatewayOperation::ImageChallenge => "/api/image-captcha",
            GatewayOperation::ImageVerify => "/api/image-verify",
            GatewayOperation::HandwritingChallenge => "/api/handwriting-captcha",
            GatewayOperation::HandwritingVerify => "/api/handwriting-verify",
            GatewayOperation::AbstractChallenge => "/api/abstract-captcha",
            GatewayOperation::AbstractVerify => "/api/abstract-verify",
            GatewayOperation::BehaviorImage => "/api/behavior-data/image",
            GatewayOperation::BehaviorWriting => "/api/behavior-data/writing",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GatewayOperation::NextStep => "next-step",
            GatewayOperation::ImageChallenge => "image-challenge",
            GatewayOperation::ImageVerify => "image-verify",
            GatewayOperation::HandwritingChallenge => "handwriting-challenge",
            GatewayOperation::HandwritingVerify => "handwriting-verify",
            GatewayOperation::AbstractChallenge => "abstract-challenge",
            GatewayOperation::AbstractVerify => "abstract-verify",
            GatewayOperation::BehaviorImage => "behavior-data/image",
            GatewayOperation::BehaviorWriting => "behavior-data/writing",
        }
    }

    pub fn fetch_for(kind: ChallengeKind) -> Option<Self> {
        match kind {
            ChallengeKind::Image => Some(GatewayOperation::ImageChallenge),
            ChallengeKind::Handwriting => Some(GatewayOperation::HandwritingChallenge),
            ChallengeKind::Abstract => Some(GatewayOperation::AbstractChallenge),
            ChallengeKind::Initial => None,
        }
    }

    pub fn verify_for(kind: ChallengeKind) -> Option<Self> {
        match kind {
            ChallengeKind::Image => Some(GatewayOperation::ImageVerify),
            ChallengeKind::Handwriting => Some(GatewayOperation::HandwritingVerify),
            ChallengeKind::Abstract => Some(GatewayOperation::AbstractVerify),
            ChallengeKind::Initial => None,
        }
    }
}

impl fmt::Display for GatewayOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway transport error: {0}")]
    Transport(String),
    #[error("{operation} returned http {status}")]
    Status {
        operation: GatewayOperation,
        status: u16,
    },
    #[error("failed to decode {operation} response: {message}")]
    Decode {
        operation: GatewayOperation,
        message: String,
    },
    #[error("gateway cannot issue a {0} challenge")]
    UnsupportedKind(ChallengeKind),
    #[error("invalid gateway url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl GatewayError {
    pub fn decode(operation: GatewayOperation, message: impl ToString) -> Self {
        GatewayError::Decode {
            operation,
            message: message.to_string(),
        }
    }
}

/// Body of the next-step call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextStepRequest {
    pub behavior_data: TelemetryData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Answer to one secondary challenge.
#[derive(Debug, Clone, PartialEq)]
pub enum ChallengeSubmission {
    Image {
        challenge_id: String,
        selections: Vec<u32>,
    },
    Handwriting {
        challenge_id: String,
        /// `data:image/png;base64,...`
        image_base64: String,
    },
    Abstract {
        challenge_id: String,
        selections: Vec<u32>,
    },
}

impl ChallengeSubmission {
    pub fn kind(&self) -> ChallengeKind {
        match self {
            ChallengeSubmission::Image { .. } => ChallengeKind::Image,
            ChallengeSubmission::Handwriting { .. } => ChallengeKind::Handwriting,
            ChallengeSubmission::Abstract { .. } => ChallengeKind::Abstract,
        }
    }

    pub fn challenge_id(&self) -> &str {
        match self {
            ChallengeSubmission::Image { challenge_id, .. }
            | ChallengeSubmission::Handwriting { challenge_id, .. }
            | ChallengeSubmission::Abstract { challenge_id, .. } => challenge_id,
        }
    }

    pub fn operation(&self) -> GatewayOperation {
        match self {
            ChallengeSubmission::Image { .. } => GatewayOperation::ImageVerify,
            ChallengeSubmission::Handwriting { .. } => GatewayOperation::HandwritingVerify,
            ChallengeSubmission::Abstract { .. } => GatewayOperation::AbstractVerify,
        }
    }

    pub fn body(&self) -> Value {
        match self {
            ChallengeSubmission::Image {
                challenge_id,
                selections,
            }
            | ChallengeSubmission::Abstract {
                challenge_id,
                selections,
            } => json!({ "challenge_id": challenge_id, "selections": selections }),
            ChallengeSubmission::Handwriting {
                challenge_id,
                image_base64,
            } => json!({ "challenge_id": challenge_id, "image_base64": image_base64 }),
        }
    }
}

/// Sink a behavior report is posted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorChannel {
    Image,
    Writing,
}

impl BehaviorChannel {
    pub fn for_kind(kind: ChallengeKind) -> Self {
        match kind {
            ChallengeKind::Handwriting => BehaviorChannel::Writing,
            _ => BehaviorChannel::Image,
        }
    }

    pub fn operation(self) -> GatewayOperation {
        match self {
            BehaviorChannel::Image => GatewayOperation::BehaviorImage,
            BehaviorChannel::Writing => GatewayOperation::BehaviorWriting,
        }
    }
}

/// Collector output posted fire-and-forget after a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BehaviorReport {
    #[serde(skip)]
    pub channel: BehaviorChannel,
    pub behavior_data: Value,
    pub page_events: PageEvents,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captcha_type: Option<ChallengeKind>,
}

impl BehaviorReport {
    pub fn new(kind: ChallengeKind, behavior_data: Value, page_events: PageEvents) -> Self {
        let channel = BehaviorChannel::for_kind(kind);
        Self {
            channel,
            behavior_data,
            page_events,
            captcha_type: (channel == BehaviorChannel::Image).then_some(kind),
        }
    }
}

/// Remote verification service consumed by the widget.
#[async_trait]
pub trait VerificationGateway: Send + Sync {
    async fn next_step(&self, request: &NextStepRequest)
    -> Result<ConfidenceVerdict, GatewayError>;

    async fn fetch_challenge(&self, kind: ChallengeKind) -> Result<IssuedChallenge, GatewayError>;

    async fn verify(&self, submission: &ChallengeSubmission)
    -> Result<VerifyVerdict, GatewayError>;

    async fn report_behavior(&self, report: &BehaviorReport) -> Result<(), GatewayError>;
}

#[derive(Debug, Deserialize)]
struct NextStepWire {
    confidence_score: Option<f64>,
    /// Legacy field on a 0..1 scale.
    score: Option<f64>,
    #[serde(alias = "is_bot")]
    is_bot_detected: Option<bool>,
    #[serde(alias = "next_captcha")]
    next_challenge_kind: Option<String>,
    challenge_token: Option<String>,
}

/// Decode a next-step response, accepting both the documented and the legacy
/// field names.
pub fn parse_next_step(body: &[u8]) -> Result<ConfidenceVerdict, GatewayError> {
    let op = GatewayOperation::NextStep;
    let wire: NextStepWire =
        serde_json::from_slice(body).map_err(|err| GatewayError::decode(op, err))?;

    let confidence_score = match (wire.confidence_score, wire.score) {
        (Some(score), _) => score,
        (None, Some(score)) if score <= 1.0 => score * 100.0,
        (None, Some(score)) => score,
        (None, None) => return Err(GatewayError::decode(op, "missing confidence score")),
    };

    Ok(ConfidenceVerdict {
        confidence_score,
        is_bot_detected: wire.is_bot_detected.unwrap_or(false),
        next_challenge_kind: wire
            .next_challenge_kind
            .as_deref()
            .and_then(ChallengeKind::from_wire),
        challenge_token: wire.challenge_token,
    })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SampleWire {
    Url(String),
    Item { url: String },
}

impl SampleWire {
    fn url(&self) -> &str {
        match self {
            SampleWire::Url(url) | SampleWire::Item { url } => url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ImageItemWire {
    id: u32,
    url: String,
}

#[derive(Debug, Deserialize)]
struct IssuedWire {
    challenge_id: String,
    ttl: Option<u64>,
    question: Option<String>,
    #[serde(alias = "image_url")]
    url: Option<String>,
    #[serde(default)]
    samples: Vec<SampleWire>,
    #[serde(default)]
    images: Vec<ImageItemWire>,
}

/// Defaults applied to fields a challenge response may omit.
#[derive(Debug, Clone)]
pub struct IssueDefaults<'a> {
    pub base: &'a Url,
    pub ttl: Duration,
    pub question: &'a str,
}

/// Decode a `*-captcha` response. Relative image URLs are resolved against
/// `defaults.base`.
pub fn parse_issued(
    kind: ChallengeKind,
    body: &[u8],
    defaults: &IssueDefaults<'_>,
) -> Result<IssuedChallenge, GatewayError> {
    let op = GatewayOperation::fetch_for(kind).ok_or(GatewayError::UnsupportedKind(kind))?;
    let wire: IssuedWire =
        serde_json::from_slice(body).map_err(|err| GatewayError::decode(op, err))?;

    let question = wire
        .question
        .filter(|q| !q.trim().is_empty())
        .unwrap_or_else(|| defaults.question.to_string());

    let payload = match kind {
        ChallengeKind::Image => {
            let raw = wire
                .url
                .ok_or_else(|| GatewayError::decode(op, "missing image url"))?;
            ChallengePayload::Image {
                image_url: resolve(defaults.base, &raw)?,
                question,
            }
        }
        ChallengeKind::Handwriting => ChallengePayload::Handwriting {
            samples: wire
                .samples
                .iter()
                .map(|sample| resolve(defaults.base, sample.url()))
                .collect::<Result<_, _>>()?,
        },
        ChallengeKind::Abstract => ChallengePayload::Abstract {
            images: wire
                .images
                .iter()
                .map(|item| {
                    Ok(ImageItem {
                        id: item.id,
                        url: resolve(defaults.base, &item.url)?,
                    })
                })
                .collect::<Result<_, GatewayError>>()?,
            question,
        },
        ChallengeKind::Initial => return Err(GatewayError::UnsupportedKind(kind)),
    };

    Ok(IssuedChallenge {
        challenge_id: wire.challenge_id,
        ttl: wire
            .ttl
            .filter(|ttl| *ttl > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.ttl),
        payload,
    })
}

#[derive(Debug, Deserialize)]
struct VerifyWire {
    #[serde(default)]
    success: bool,
    attempts: Option<u32>,
    redirect_url: Option<String>,
}

pub fn parse_verify(operation: GatewayOperation, body: &[u8]) -> Result<VerifyVerdict, GatewayError> {
    let wire: VerifyWire =
        serde_json::from_slice(body).map_err(|err| GatewayError::decode(operation, err))?;
    Ok(VerifyVerdict {
        success: wire.success,
        attempts: wire.attempts,
        redirect_url: wire.redirect_url.filter(|url| !url.is_empty()),
    })
}

fn resolve(base: &Url, raw: &str) -> Result<Url, GatewayError> {
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(base.join(raw)?),
        Err(err) => Err(err.into()),
    }
}
