pub mod builtin;
pub mod markers;
pub mod pipeline;
pub mod prompt;

use anyhow::Result;
use async_trait::async_trait;

use crate::engine::state::{StateDelta, StateRecord};
use crate::engine::types::{AnswerSlot, FlagUpdate, StageId};

/// Trait that all stages must implement.
///
/// A stage reads a snapshot of the State Record and returns the fields it
/// changed plus what the engine should do next. Side effects must be safe to
/// repeat: after a crash the engine may run the last stage again.
#[async_trait]
pub trait Stage: Send + Sync {
    fn id(&self) -> StageId;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Run the stage. An `Err` is a failed attempt and may be retried.
    async fn run(&self, state: &StateRecord) -> Result<StageOutput>;
}

/// Request to pause for external input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspendRequest {
    pub reason: String,
    /// Stage that consumes the answer when the execution resumes.
    pub resume_stage: StageId,
    pub slot: AnswerSlot,
}

/// Control signal returned alongside a delta.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Continue(FlagUpdate),
    Suspend(SuspendRequest),
    Fail(String),
}

impl Default for Outcome {
    fn default() -> Self {
        Outcome::Continue(FlagUpdate::default())
    }
}

/// Everything a stage returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutput {
    pub delta: StateDelta,
    pub outcome: Outcome,
}

impl StageOutput {
    pub fn proceed(delta: StateDelta, flags: FlagUpdate) -> Self {
        Self {
            delta,
            outcome: Outcome::Continue(flags),
        }
    }

    pub fn suspend(
        delta: StateDelta,
        reason: impl Into<String>,
        resume_stage: StageId,
        slot: AnswerSlot,
    ) -> Self {
        Self {
            delta,
            outcome: Outcome::Suspend(SuspendRequest {
                reason: reason.into(),
                resume_stage,
                slot,
            }),
        }
    }

    pub fn fail(delta: StateDelta, error: impl Into<String>) -> Self {
        Self {
            delta,
            outcome: Outcome::Fail(error.into()),
        }
    }
}
