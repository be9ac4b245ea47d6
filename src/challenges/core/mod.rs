//! Shared challenge primitives.
//!
//! This module exposes the building blocks used by the orchestrator and the
//! challenge variants: challenge types, the TTL countdown, the in-flight guard,
//! and the verification gateway contract with its reqwest adapter.

pub mod gateway;
pub mod guard;
pub mod reqwest_gateway;
pub mod ttl;
pub mod types;

pub use gateway::{
    BehaviorChannel, BehaviorReport, ChallengeSubmission, GatewayError, GatewayOperation,
    IssueDefaults, NextStepRequest, VerificationGateway, parse_issued, parse_next_step,
    parse_verify,
};
pub use guard::InFlight;
pub use reqwest_gateway::ReqwestGateway;
pub use ttl::{ChallengeTtl, TtlStatus};
pub use types::{
    ChallengeInstance, ChallengeKind, ChallengePayload, ConfidenceVerdict, ImageItem,
    IssuedChallenge, VerifyVerdict,
};
