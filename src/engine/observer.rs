//! Observability port handed to the engine at construction.

use std::sync::Mutex;

use tracing::{error, info, warn};

use crate::engine::types::{ExecutionStatus, Next, Phase, StageId};

/// Something notable the engine did.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ExecutionStarted {
        execution_id: String,
    },
    ExecutionResumed {
        execution_id: String,
        stage: StageId,
    },
    StageStarted {
        execution_id: String,
        stage: StageId,
        attempt: u32,
    },
    StageRetrying {
        execution_id: String,
        stage: StageId,
        attempt: u32,
        error: String,
        delay_s: f64,
    },
    StageFailed {
        execution_id: String,
        stage: StageId,
        error: String,
        critical: bool,
    },
    Routed {
        execution_id: String,
        from: StageId,
        to: Next,
    },
    GuardForced {
        execution_id: String,
        phase: Phase,
        requested: StageId,
        forced: Next,
    },
    GateEvaluated {
        execution_id: String,
        passed: bool,
        enforced: bool,
        score: f64,
    },
    Suspended {
        execution_id: String,
        resume_stage: StageId,
        reason: String,
    },
    Finished {
        execution_id: String,
        status: ExecutionStatus,
    },
}

/// Receiver for engine events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Forwards events to `tracing`.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: EngineEvent) {
        match event {
            EngineEvent::ExecutionStarted { execution_id } => {
                info!(execution_id = %execution_id, "Starting execution");
            }
            EngineEvent::ExecutionResumed {
                execution_id,
                stage,
            } => {
                info!(execution_id = %execution_id, stage = %stage, "Resuming execution");
            }
            EngineEvent::StageStarted {
                execution_id,
                stage,
                attempt,
            } => {
                info!(execution_id = %execution_id, stage = %stage, attempt = attempt, "Running stage");
            }
            EngineEvent::StageRetrying {
                execution_id,
                stage,
                attempt,
                error,
                delay_s,
            } => {
                warn!(
                    execution_id = %execution_id,
                    stage = %stage,
                    attempt = attempt,
                    error = %error,
                    delay_s = delay_s,
                    "Stage attempt failed, retrying after backoff"
                );
            }
            EngineEvent::StageFailed {
                execution_id,
                stage,
                error,
                critical,
            } => {
                error!(
                    execution_id = %execution_id,
                    stage = %stage,
                    critical = critical,
                    error = %error,
                    "Stage failed"
                );
            }
            EngineEvent::Routed {
                execution_id,
                from,
                to,
            } => {
                info!(execution_id = %execution_id, from = %from, to = %to, "Routed");
            }
            EngineEvent::GuardForced {
                execution_id,
                phase,
                requested,
                forced,
            } => {
                warn!(
                    execution_id = %execution_id,
                    phase = %phase,
                    requested = %requested,
                    forced = %forced,
                    "Iteration guard forced progression"
                );
            }
            EngineEvent::GateEvaluated {
                execution_id,
                passed,
                enforced,
                score,
            } => {
                info!(
                    execution_id = %execution_id,
                    passed = passed,
                    enforced = enforced,
                    score = score,
                    "Quality gate evaluated"
                );
            }
            EngineEvent::Suspended {
                execution_id,
                resume_stage,
                reason,
            } => {
                info!(
                    execution_id = %execution_id,
                    resume_stage = %resume_stage,
                    reason = %reason,
                    "Execution suspended"
                );
            }
            EngineEvent::Finished {
                execution_id,
                status,
            } => {
                info!(execution_id = %execution_id, status = %status, "Execution finished");
            }
        }
    }
}

/// Collects events in memory; handy for assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: EngineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
