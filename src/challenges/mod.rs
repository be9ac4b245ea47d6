// Aggregates the challenge primitives, the orchestration state machine, and the secondary challenge variants.

pub mod core;
pub mod orchestrator;
pub mod variants;

pub use orchestrator::{Effect, ErrorKind, Orchestrator, OrchestratorEvent, Transition, WidgetState};
pub use variants::{
    AbstractSelectChallenge, ActiveChallenge, Challenge, ChallengeError, HandwritingChallenge,
    ImageGridChallenge,
};
