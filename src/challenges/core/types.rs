//! Core data structures shared across the orchestrator, the challenge variants,
//! and the gateway layer.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::ttl::ChallengeTtl;

/// Kind of challenge the widget can present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Initial,
    Image,
    Handwriting,
    Abstract,
}

impl ChallengeKind {
    /// Parse the `next_challenge_kind` value returned by the gateway.
    ///
    /// Accepts the documented names (`image`, `handwriting`, `abstract`) and the
    /// legacy backend names (`imagecaptcha`, ...). `none` and unknown values mean
    /// no secondary challenge.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "image" | "imagecaptcha" | "image_captcha" => Some(ChallengeKind::Image),
            "handwriting" | "handwritingcaptcha" | "handwriting_captcha" => {
                Some(ChallengeKind::Handwriting)
            }
            "abstract" | "abstractcaptcha" | "abstract_captcha" => Some(ChallengeKind::Abstract),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeKind::Initial => "initial",
            ChallengeKind::Image => "image",
            ChallengeKind::Handwriting => "handwriting",
            ChallengeKind::Abstract => "abstract",
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A selectable remote image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageItem {
    pub id: u32,
    pub url: Url,
}

/// Kind-specific content of an issued challenge.
#[derive(Debug, Clone, PartialEq)]
pub enum ChallengePayload {
    Image {
        image_url: Url,
        question: String,
    },
    Handwriting {
        samples: Vec<Url>,
    },
    Abstract {
        images: Vec<ImageItem>,
        question: String,
    },
}

impl ChallengePayload {
    pub fn kind(&self) -> ChallengeKind {
        match self {
            ChallengePayload::Image { .. } => ChallengeKind::Image,
            ChallengePayload::Handwriting { .. } => ChallengeKind::Handwriting,
            ChallengePayload::Abstract { .. } => ChallengeKind::Abstract,
        }
    }
}

/// Challenge as returned by the gateway, before it is bound to a countdown.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedChallenge {
    pub challenge_id: String,
    pub ttl: Duration,
    pub payload: ChallengePayload,
}

/// One issued challenge, alive until it expires or is verified.
#[derive(Debug, Clone)]
pub struct ChallengeInstance {
    pub challenge_id: String,
    pub kind: ChallengeKind,
    pub issued_at: DateTime<Utc>,
    pub ttl: ChallengeTtl,
    pub payload: ChallengePayload,
}

impl ChallengeInstance {
    pub fn from_issued(issued: IssuedChallenge) -> Self {
        Self {
            kind: issued.payload.kind(),
            challenge_id: issued.challenge_id,
            issued_at: Utc::now(),
            ttl: ChallengeTtl::new(issued.ttl),
            payload: issued.payload,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.ttl.is_expired()
    }
}

/// Server-computed signal returned by the next-step call.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceVerdict {
    pub confidence_score: f64,
    pub is_bot_detected: bool,
    pub next_challenge_kind: Option<ChallengeKind>,
    pub challenge_token: Option<String>,
}

impl ConfidenceVerdict {
    pub fn is_low_confidence(&self, threshold: f64) -> bool {
        self.is_bot_detected || self.confidence_score < threshold
    }
}

/// Verdict returned by one of the `*-verify` operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerifyVerdict {
    pub success: bool,
    pub attempts: Option<u32>,
    pub redirect_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_documented_and_legacy_kinds() {
        assert_eq!(ChallengeKind::from_wire("image"), Some(ChallengeKind::Image));
        assert_eq!(
            ChallengeKind::from_wire("HandwritingCaptcha"),
            Some(ChallengeKind::Handwriting)
        );
        assert_eq!(
            ChallengeKind::from_wire("abstractcaptcha"),
            Some(ChallengeKind::Abstract)
        );
        assert_eq!(ChallengeKind::from_wire("none"), None);
        assert_eq!(ChallengeKind::from_wire("initial"), None);
    }

    #[test]
    fn low_confidence_covers_bot_flag() {
        let verdict = ConfidenceVerdict {
            confidence_score: 90.0,
            is_bot_detected: true,
            next_challenge_kind: None,
            challenge_token: None,
        };
        assert!(verdict.is_low_confidence(50.0));

        let human = ConfidenceVerdict {
            is_bot_detected: false,
            ..verdict
        };
        assert!(!human.is_low_confidence(50.0));
        assert!(human.is_low_confidence(95.0));
    }

    #[test]
    fn image_item_reads_gateway_json() {
        let item: ImageItem =
            serde_json::from_str(r#"{"id":3,"url":"https://cdn.example.com/a3.png"}"#).unwrap();
        assert_eq!(item.id, 3);
        assert_eq!(item.url.path(), "/a3.png");
        let back = serde_json::to_value(&item).unwrap();
        assert_eq!(back["url"], "https://cdn.example.com/a3.png");
    }
}
