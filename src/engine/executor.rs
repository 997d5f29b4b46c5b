use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::engine::error::{EngineError, Result};
use crate::engine::gate::QualityGate;
use crate::engine::graph::{StageGraph, StageSpec};
use crate::engine::guard::GuardPolicy;
use crate::engine::observer::{EngineEvent, EventSink, TracingSink};
use crate::engine::state::{StateDelta, StateRecord};
use crate::engine::types::*;
use crate::stages::{Outcome, StageOutput, SuspendRequest};
use crate::storage::{Snapshot, SnapshotStore};

/// Tunables for the driver loop.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub guard: GuardPolicy,
    pub gate: QualityGate,
    pub suspend_ttl_hours: u64,
    pub terminal_ttl_hours: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            guard: GuardPolicy::default(),
            gate: QualityGate::default(),
            suspend_ttl_hours: 168,
            terminal_ttl_hours: 24,
        }
    }
}

/// Options for starting an execution.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Caller-chosen execution id; a fresh UUID otherwise.
    pub execution_id: Option<String>,
    /// Answers filled in before the first stage runs.
    pub answers: BTreeMap<AnswerSlot, String>,
}

/// Resumable handle returned when an execution pauses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuspendHandle {
    pub execution_id: String,
    pub resume_stage: StageId,
    pub answer_slot: AnswerSlot,
    pub reason: String,
}

/// Logical exit code at the entry API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseCode {
    Completed,
    Suspended,
    Failed,
}

/// Result of `start`, `resume` or `recover`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "lowercase")]
pub enum ExecutionResponse {
    Completed {
        execution_id: String,
        output: FinalOutput,
    },
    Suspended(SuspendHandle),
    Failed {
        execution_id: String,
        output: FinalOutput,
    },
}

impl ExecutionResponse {
    fn from_final(execution_id: &str, output: FinalOutput) -> Self {
        let execution_id = execution_id.to_string();
        if output.status == ExecutionStatus::Completed {
            ExecutionResponse::Completed {
                execution_id,
                output,
            }
        } else {
            ExecutionResponse::Failed {
                execution_id,
                output,
            }
        }
    }

    pub fn code(&self) -> ResponseCode {
        match self {
            ExecutionResponse::Completed { .. } => ResponseCode::Completed,
            ExecutionResponse::Suspended(_) => ResponseCode::Suspended,
            ExecutionResponse::Failed { .. } => ResponseCode::Failed,
        }
    }

    pub fn execution_id(&self) -> &str {
        match self {
            ExecutionResponse::Completed { execution_id, .. }
            | ExecutionResponse::Failed { execution_id, .. } => execution_id,
            ExecutionResponse::Suspended(handle) => &handle.execution_id,
        }
    }

    pub fn output(&self) -> Option<&FinalOutput> {
        match self {
            ExecutionResponse::Completed { output, .. }
            | ExecutionResponse::Failed { output, .. } => Some(output),
            ExecutionResponse::Suspended(_) => None,
        }
    }
}

/// Progress view of one execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub current_stage: StageId,
    pub completed_stages: Vec<StageId>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub phase_iteration_counts: BTreeMap<Phase, u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_stage: Option<StageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_slot: Option<AnswerSlot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_output: Option<FinalOutput>,
    pub updated_at: chrono::DateTime<Utc>,
}

impl From<&Snapshot> for StatusView {
    fn from(snapshot: &Snapshot) -> Self {
        let state = &snapshot.state;
        Self {
            execution_id: snapshot.execution_id.clone(),
            status: snapshot.status,
            current_stage: state.current_stage,
            completed_stages: state.completed_stages.clone(),
            errors: state.errors.clone(),
            warnings: state.warnings.clone(),
            phase_iteration_counts: state.phase_iteration_counts.clone(),
            resume_stage: snapshot.resume_stage,
            answer_slot: snapshot.answer_slot,
            reason: snapshot.reason.clone(),
            final_output: state.final_output.clone(),
            updated_at: snapshot.updated_at,
        }
    }
}

/// Marks an execution id as in flight for the lifetime of the guard.
struct Claim<'a> {
    active: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        active.remove(&self.id);
    }
}

/// The stage-graph execution engine.
pub struct Engine {
    graph: StageGraph,
    store: Arc<dyn SnapshotStore>,
    settings: EngineSettings,
    events: Arc<dyn EventSink>,
    active: Mutex<HashSet<String>>,
}

impl Engine {
    /// Build an engine; the graph is validated up front.
    pub fn new(
        graph: StageGraph,
        store: Arc<dyn SnapshotStore>,
        settings: EngineSettings,
    ) -> Result<Self> {
        let problems = graph.validate(&settings.guard.forward);
        if !problems.is_empty() {
            return Err(EngineError::Graph(problems.join("; ")));
        }
        Ok(Self {
            graph,
            store,
            settings,
            events: Arc::new(TracingSink),
            active: Mutex::new(HashSet::new()),
        })
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Start a new execution for `request`.
    pub async fn start(&self, request: &str, config: RequestConfig) -> Result<ExecutionResponse> {
        self.start_with(request, config, StartOptions::default())
            .await
    }

    /// Start under a caller-chosen id. Retrying with the same id after a
    /// store failure continues from whatever was persisted.
    pub async fn start_with_id(
        &self,
        execution_id: &str,
        request: &str,
        config: RequestConfig,
    ) -> Result<ExecutionResponse> {
        let options = StartOptions {
            execution_id: Some(execution_id.to_string()),
            ..Default::default()
        };
        self.start_with(request, config, options).await
    }

    pub async fn start_with(
        &self,
        request: &str,
        config: RequestConfig,
        options: StartOptions,
    ) -> Result<ExecutionResponse> {
        let execution_id = options
            .execution_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let _claim = self.claim(&execution_id)?;

        if let Some(existing) = self.load(&execution_id).await? {
            return match existing.status {
                ExecutionStatus::Running => self.continue_snapshot(existing).await,
                _ => self.respond_from(&existing),
            };
        }

        let entry = self
            .graph
            .entry()
            .ok_or_else(|| EngineError::Graph("graph has no stages".to_string()))?;
        let mut state = StateRecord::new(&execution_id, request, config, entry);
        for (slot, answer) in options.answers {
            state.inject_answer(slot, answer);
        }

        self.emit(EngineEvent::ExecutionStarted {
            execution_id: execution_id.clone(),
        });
        self.checkpoint(&state, entry).await?;
        self.drive(state, entry).await
    }

    /// Inject `answer` into a suspended execution and continue at its resume stage.
    ///
    /// Resuming an execution that already finished returns its stored output.
    pub async fn resume(&self, execution_id: &str, answer: &str) -> Result<ExecutionResponse> {
        let _claim = self.claim(execution_id)?;
        let snapshot = self.require(execution_id).await?;

        match snapshot.status {
            ExecutionStatus::Suspended => {}
            status if status.is_terminal() => return self.respond_from(&snapshot),
            status => {
                return Err(EngineError::InvalidState {
                    execution_id: execution_id.to_string(),
                    action: "resume",
                    status: status.to_string(),
                });
            }
        }

        let resume_stage = snapshot.resume_stage.ok_or_else(|| EngineError::InvalidState {
            execution_id: execution_id.to_string(),
            action: "resume",
            status: "suspended without a resume stage".to_string(),
        })?;

        let mut state = snapshot.state;
        if let Some(slot) = snapshot.answer_slot {
            state.inject_answer(slot, answer);
        }

        self.emit(EngineEvent::ExecutionResumed {
            execution_id: execution_id.to_string(),
            stage: resume_stage,
        });
        self.drive(state, resume_stage).await
    }

    /// Continue an execution whose last snapshot is a `running` checkpoint,
    /// e.g. after the process died mid-execution.
    pub async fn recover(&self, execution_id: &str) -> Result<ExecutionResponse> {
        let _claim = self.claim(execution_id)?;
        let snapshot = self.require(execution_id).await?;
        match snapshot.status {
            ExecutionStatus::Running => self.continue_snapshot(snapshot).await,
            status if status.is_terminal() => self.respond_from(&snapshot),
            status => Err(EngineError::InvalidState {
                execution_id: execution_id.to_string(),
                action: "recover",
                status: status.to_string(),
            }),
        }
    }

    pub async fn status(&self, execution_id: &str) -> Result<StatusView> {
        let snapshot = self.require(execution_id).await?;
        Ok(StatusView::from(&snapshot))
    }

    /// Cancel a suspended execution. Running or finished executions are refused.
    pub async fn cancel(&self, execution_id: &str) -> Result<StatusView> {
        let _claim = self.claim(execution_id)?;
        let snapshot = self.require(execution_id).await?;
        if snapshot.status != ExecutionStatus::Suspended {
            return Err(EngineError::InvalidState {
                execution_id: execution_id.to_string(),
                action: "cancel",
                status: snapshot.status.to_string(),
            });
        }

        let mut state = snapshot.state;
        let waiting_for = snapshot
            .answer_slot
            .map(|slot| slot.to_string())
            .unwrap_or_else(|| "input".to_string());
        let summary = format!("Execution cancelled while waiting for {}", waiting_for);
        let output = self.conclude(&mut state, ExecutionStatus::Cancelled, summary);
        let persisted = self.persist_terminal(&state, output.status).await?;
        self.emit(EngineEvent::Finished {
            execution_id: execution_id.to_string(),
            status: ExecutionStatus::Cancelled,
        });
        Ok(StatusView::from(&persisted))
    }

    pub async fn list(&self, status: Option<ExecutionStatus>) -> Result<Vec<StatusView>> {
        let snapshots = self
            .store
            .list(status)
            .await
            .map_err(|e| EngineError::store("*", e))?;
        Ok(snapshots.iter().map(StatusView::from).collect())
    }

    pub async fn purge_expired(&self) -> Result<usize> {
        self.store
            .purge_expired()
            .await
            .map_err(|e| EngineError::store("*", e))
    }

    fn claim(&self, execution_id: &str) -> Result<Claim<'_>> {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if !active.insert(execution_id.to_string()) {
            return Err(EngineError::Busy(execution_id.to_string()));
        }
        Ok(Claim {
            active: &self.active,
            id: execution_id.to_string(),
        })
    }

    async fn load(&self, execution_id: &str) -> Result<Option<Snapshot>> {
        self.store
            .get(execution_id)
            .await
            .map_err(|e| EngineError::store(execution_id, e))
    }

    async fn require(&self, execution_id: &str) -> Result<Snapshot> {
        self.load(execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(execution_id.to_string()))
    }

    fn respond_from(&self, snapshot: &Snapshot) -> Result<ExecutionResponse> {
        match snapshot.status {
            ExecutionStatus::Suspended => {
                let (Some(resume_stage), Some(answer_slot)) =
                    (snapshot.resume_stage, snapshot.answer_slot)
                else {
                    return Err(EngineError::InvalidState {
                        execution_id: snapshot.execution_id.clone(),
                        action: "read",
                        status: "suspended without a resume point".to_string(),
                    });
                };
                Ok(ExecutionResponse::Suspended(SuspendHandle {
                    execution_id: snapshot.execution_id.clone(),
                    resume_stage,
                    answer_slot,
                    reason: snapshot.reason.clone().unwrap_or_default(),
                }))
            }
            _ => {
                let output = snapshot.state.final_output.clone().unwrap_or_else(|| FinalOutput {
                    status: snapshot.status,
                    summary: format!("Execution {}", snapshot.status),
                    artifact: snapshot.state.artifact.clone(),
                    errors: snapshot.state.errors.clone(),
                    warnings: snapshot.state.warnings.clone(),
                });
                Ok(ExecutionResponse::from_final(&snapshot.execution_id, output))
            }
        }
    }

    async fn continue_snapshot(&self, snapshot: Snapshot) -> Result<ExecutionResponse> {
        let next = snapshot
            .resume_stage
            .unwrap_or(snapshot.state.current_stage);
        self.emit(EngineEvent::ExecutionResumed {
            execution_id: snapshot.execution_id.clone(),
            stage: next,
        });
        self.drive(snapshot.state, next).await
    }

    /// The driver loop: guard, invoke, merge, gate, route, checkpoint.
    async fn drive(&self, mut state: StateRecord, mut next: StageId) -> Result<ExecutionResponse> {
        let execution_id = state.execution_id.clone();

        if state.is_terminal() {
            let status = state
                .final_output
                .as_ref()
                .map(|o| o.status)
                .unwrap_or(ExecutionStatus::Completed);
            let snapshot = self.persist_terminal(&state, status).await?;
            return self.respond_from(&snapshot);
        }

        loop {
            let admission = self.settings.guard.admit(
                &self.graph,
                &mut state.phase_iteration_counts,
                &mut state.phase_visit,
                next,
            );
            for forced in &admission.overrides {
                state.record_warning(forced.warning());
                self.emit(EngineEvent::GuardForced {
                    execution_id: execution_id.clone(),
                    phase: forced.phase,
                    requested: forced.requested,
                    forced: forced.forced,
                });
            }
            let Some(stage_id) = admission.stage else {
                let summary =
                    "Execution ended: the iteration guard exhausted the final phase".to_string();
                return self.finish(state, ExecutionStatus::Completed, summary).await;
            };

            let spec = self.graph.get(stage_id)?;
            state.current_stage = stage_id;
            state.stage_invocations += 1;

            let StageOutput { delta, outcome } = self.invoke(spec, &state).await;
            let outcome = self.merge(&mut state, stage_id, delta, outcome);

            match outcome {
                Outcome::Continue(flags) => {
                    flags.apply(&mut state.flags);
                    state.mark_completed(stage_id);
                }
                Outcome::Fail(error) => {
                    let message = format!("{}: {}", stage_id, error);
                    state.record_error(message.clone());
                    self.emit(EngineEvent::StageFailed {
                        execution_id: execution_id.clone(),
                        stage: stage_id,
                        error,
                        critical: spec.critical,
                    });
                    if spec.critical {
                        let summary = format!("Execution halted: stage '{}' failed", stage_id);
                        return self.finish(state, ExecutionStatus::Failed, summary).await;
                    }
                }
                Outcome::Suspend(request) => {
                    return self.suspend(state, stage_id, request).await;
                }
            }

            if state.is_terminal() {
                let status = state
                    .final_output
                    .as_ref()
                    .map(|o| o.status)
                    .unwrap_or(ExecutionStatus::Completed);
                let snapshot = self.persist_terminal(&state, status).await?;
                self.emit(EngineEvent::Finished {
                    execution_id: execution_id.clone(),
                    status,
                });
                return self.respond_from(&snapshot);
            }

            let hop = spec.router.route(&state);
            if !spec.allows(hop) {
                return Err(self.routing_failure(state, stage_id, hop).await);
            }
            self.emit(EngineEvent::Routed {
                execution_id: execution_id.clone(),
                from: stage_id,
                to: hop,
            });

            match hop {
                Next::Terminate => {
                    let summary = "Execution completed".to_string();
                    return self.finish(state, ExecutionStatus::Completed, summary).await;
                }
                Next::Stage(target) => {
                    self.checkpoint(&state, target).await?;
                    next = target;
                }
            }
        }
    }

    /// Run one stage with timeout and retry. Errors become `Outcome::Fail`.
    async fn invoke(&self, spec: &StageSpec, state: &StateRecord) -> StageOutput {
        let stage_id = spec.id();
        let max_attempts = spec.policy.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            self.emit(EngineEvent::StageStarted {
                execution_id: state.execution_id.clone(),
                stage: stage_id,
                attempt,
            });

            let result = if let Some(timeout_s) = spec.policy.timeout_s {
                match tokio::time::timeout(seconds(timeout_s), spec.stage.run(state)).await {
                    Ok(r) => r,
                    Err(_) => Err(anyhow::anyhow!("Stage timed out after {}s", timeout_s)),
                }
            } else {
                spec.stage.run(state).await
            };

            match result {
                Ok(output) => return output,
                Err(e) => {
                    last_error = format!("{:#}", e);
                    if attempt < max_attempts {
                        let delay = spec.policy.backoff_s * 2.0_f64.powi((attempt - 1) as i32);
                        self.emit(EngineEvent::StageRetrying {
                            execution_id: state.execution_id.clone(),
                            stage: stage_id,
                            attempt,
                            error: last_error.clone(),
                            delay_s: delay,
                        });
                        tokio::time::sleep(seconds(delay)).await;
                    }
                }
            }
        }

        StageOutput::fail(
            StateDelta::new(),
            format!("failed after {} attempts: {}", max_attempts, last_error),
        )
    }

    /// Merge a delta and apply the quality gate to any new validation result.
    /// A rejected delta turns the outcome into a failure.
    fn merge(
        &self,
        state: &mut StateRecord,
        stage_id: StageId,
        delta: StateDelta,
        outcome: Outcome,
    ) -> Outcome {
        let had_result = delta.result.is_some();
        let validated = delta.validation.is_some();

        let outcome = match state.apply(stage_id, delta) {
            Ok(()) => outcome,
            Err(e) => Outcome::Fail(format!("rejected stage output: {}", e)),
        };

        if let Outcome::Fail(ref error) = outcome {
            match state.results.get_mut(&stage_id) {
                Some(result) if had_result => {
                    result.status = StageStatus::Failed;
                    result.errors.push(error.clone());
                }
                _ => {
                    state.results.insert(stage_id, StageResult::failed(error.clone()));
                }
            }
            return outcome;
        }

        if validated {
            self.apply_gate(state);
        }
        outcome
    }

    fn apply_gate(&self, state: &mut StateRecord) {
        // Enforcement needs at least one framework to enforce against.
        let enforce =
            state.config.enforce_compliance && !state.config.selected_frameworks.is_empty();
        let Some(validation) = state.validation.as_mut() else {
            return;
        };
        let verdict = self.settings.gate.evaluate(
            validation.compliance_score,
            validation.violations.len(),
            enforce,
        );
        let passed = verdict.passed;
        let score = verdict.score;
        let violations = verdict.violations;
        validation.gate = Some(verdict);

        state.flags.quality_gate_passed = passed;
        state.flags.regeneration_requested = !passed && enforce;
        if !passed {
            let profile = if enforce { "enforced" } else { "relaxed" };
            state.record_warning(format!(
                "quality gate ({}) not met: score {:.1}, {} violation(s)",
                profile, score, violations
            ));
        }

        self.emit(EngineEvent::GateEvaluated {
            execution_id: state.execution_id.clone(),
            passed,
            enforced: enforce,
            score,
        });
    }

    async fn suspend(
        &self,
        mut state: StateRecord,
        stage_id: StageId,
        request: SuspendRequest,
    ) -> Result<ExecutionResponse> {
        if let Err(e) = self.graph.get(request.resume_stage) {
            return Err(self.structural_failure(state, e.into()).await);
        }
        if request.resume_stage != stage_id {
            state.mark_completed(stage_id);
        }

        let now = Utc::now();
        let snapshot = Snapshot {
            execution_id: state.execution_id.clone(),
            status: ExecutionStatus::Suspended,
            resume_stage: Some(request.resume_stage),
            answer_slot: Some(request.slot),
            reason: Some(request.reason.clone()),
            created_at: state.created_at,
            updated_at: now,
            expires_at: Some(now + chrono::Duration::hours(self.settings.suspend_ttl_hours as i64)),
            state,
        };
        self.store
            .put(&snapshot.execution_id, &snapshot)
            .await
            .map_err(|e| EngineError::store(&snapshot.execution_id, e))?;

        self.emit(EngineEvent::Suspended {
            execution_id: snapshot.execution_id.clone(),
            resume_stage: request.resume_stage,
            reason: request.reason.clone(),
        });
        Ok(ExecutionResponse::Suspended(SuspendHandle {
            execution_id: snapshot.execution_id,
            resume_stage: request.resume_stage,
            answer_slot: request.slot,
            reason: request.reason,
        }))
    }

    async fn finish(
        &self,
        mut state: StateRecord,
        status: ExecutionStatus,
        summary: String,
    ) -> Result<ExecutionResponse> {
        let output = self.conclude(&mut state, status, summary);
        self.persist_terminal(&state, output.status).await?;
        self.emit(EngineEvent::Finished {
            execution_id: state.execution_id.clone(),
            status: output.status,
        });
        Ok(ExecutionResponse::from_final(&state.execution_id, output))
    }

    /// Build the final output from accumulated state unless a stage already did.
    fn conclude(
        &self,
        state: &mut StateRecord,
        status: ExecutionStatus,
        summary: String,
    ) -> FinalOutput {
        if let Some(ref output) = state.final_output {
            return output.clone();
        }
        let output = FinalOutput {
            status,
            summary,
            artifact: state.artifact.clone(),
            errors: state.errors.clone(),
            warnings: state.warnings.clone(),
        };
        state.final_output = Some(output.clone());
        output
    }

    async fn routing_failure(&self, state: StateRecord, stage: StageId, next: Next) -> EngineError {
        self.structural_failure(state, EngineError::Routing { stage, next })
            .await
    }

    /// Record a graph defect, persist the execution as failed and hand the
    /// error back for propagation.
    async fn structural_failure(&self, mut state: StateRecord, err: EngineError) -> EngineError {
        state.record_error(err.to_string());
        let summary = format!("Execution aborted: {}", err);
        self.conclude(&mut state, ExecutionStatus::Failed, summary);
        if let Err(store_err) = self.persist_terminal(&state, ExecutionStatus::Failed).await {
            tracing::error!(
                execution_id = %state.execution_id,
                error = %store_err,
                "Failed to persist aborted execution"
            );
        }
        self.emit(EngineEvent::Finished {
            execution_id: state.execution_id.clone(),
            status: ExecutionStatus::Failed,
        });
        err
    }

    async fn checkpoint(&self, state: &StateRecord, next: StageId) -> Result<()> {
        let snapshot = Snapshot {
            execution_id: state.execution_id.clone(),
            status: ExecutionStatus::Running,
            state: state.clone(),
            resume_stage: Some(next),
            answer_slot: None,
            reason: None,
            created_at: state.created_at,
            updated_at: Utc::now(),
            expires_at: None,
        };
        self.store
            .put(&state.execution_id, &snapshot)
            .await
            .map_err(|e| EngineError::store(&state.execution_id, e))
    }

    async fn persist_terminal(&self, state: &StateRecord, status: ExecutionStatus) -> Result<Snapshot> {
        let now = Utc::now();
        let snapshot = Snapshot {
            execution_id: state.execution_id.clone(),
            status,
            state: state.clone(),
            resume_stage: None,
            answer_slot: None,
            reason: None,
            created_at: state.created_at,
            updated_at: now,
            expires_at: Some(now + chrono::Duration::hours(self.settings.terminal_ttl_hours as i64)),
        };
        self.store
            .put(&state.execution_id, &snapshot)
            .await
            .map_err(|e| EngineError::store(&state.execution_id, e))?;
        Ok(snapshot)
    }

    fn emit(&self, event: EngineEvent) {
        self.events.emit(event);
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::ZERO)
}
