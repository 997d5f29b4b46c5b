//! The State Record threaded through every stage, and the delta merge rules.
//!
//! Stages never touch the canonical record. They receive a shared borrow and
//! return a [`StateDelta`]; only the engine calls [`StateRecord::apply`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::error::StateError;
use crate::engine::guard::PhaseVisit;
use crate::engine::types::*;

/// The single accumulating document for one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub execution_id: String,
    pub request: String,
    pub config: RequestConfig,

    pub current_stage: StageId,
    pub completed_stages: Vec<StageId>,
    pub phase_iteration_counts: BTreeMap<Phase, u32>,
    #[serde(default)]
    pub phase_visit: PhaseVisit,
    #[serde(default)]
    pub stage_invocations: u32,

    #[serde(default)]
    pub results: BTreeMap<StageId, StageResult>,
    #[serde(default)]
    pub flags: RoutingFlags,

    /// Append-only transcript shared with agent-backed stages.
    #[serde(default)]
    pub conversation: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    /// Notes from a reviewer who asked for changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<CostEstimate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_request: Option<ApprovalRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentReport>,

    // Answer slots filled from outside on resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_response: Option<String>,

    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<FinalOutput>,

    pub created_at: DateTime<Utc>,
}

/// The subset of fields a stage changed.
///
/// `Option` fields overwrite when `Some`; `Vec` fields are appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDelta {
    pub result: Option<StageResult>,
    pub analysis: Option<String>,
    pub artifact: Option<String>,
    pub guidance: Option<String>,
    pub review_notes: Option<String>,
    pub validation: Option<ValidationResult>,
    pub cost_estimate: Option<CostEstimate>,
    pub approval_request: Option<ApprovalRequest>,
    pub deployment: Option<DeploymentReport>,
    /// Answer slots the stage used up; they are emptied on merge.
    pub consumed: Vec<AnswerSlot>,
    pub conversation: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub final_output: Option<FinalOutput>,
}

impl StateDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, result: StageResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn say(mut self, line: impl Into<String>) -> Self {
        self.conversation.push(line.into());
        self
    }

    /// Reject the delta before any field is written.
    fn check(&self) -> Result<(), StateError> {
        if let Some(ref validation) = self.validation {
            let score = validation.compliance_score;
            if !(0.0..=100.0).contains(&score) || score.is_nan() {
                return Err(StateError::InvalidScore(score));
            }
        }
        Ok(())
    }
}

impl StateRecord {
    pub fn new(
        execution_id: impl Into<String>,
        request: impl Into<String>,
        config: RequestConfig,
        entry: StageId,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            request: request.into(),
            config,
            current_stage: entry,
            completed_stages: Vec::new(),
            phase_iteration_counts: BTreeMap::new(),
            phase_visit: PhaseVisit::default(),
            stage_invocations: 0,
            results: BTreeMap::new(),
            flags: RoutingFlags::default(),
            conversation: Vec::new(),
            analysis: None,
            artifact: None,
            guidance: None,
            review_notes: None,
            validation: None,
            cost_estimate: None,
            approval_request: None,
            deployment: None,
            clarification: None,
            approval_response: None,
            warnings: Vec::new(),
            errors: Vec::new(),
            final_output: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.final_output.is_some()
    }

    /// Merge a stage delta. Fields absent from the delta are left untouched.
    pub fn apply(&mut self, stage: StageId, delta: StateDelta) -> Result<(), StateError> {
        if self.is_terminal() {
            return Err(StateError::Terminal);
        }
        delta.check()?;

        let StateDelta {
            result,
            analysis,
            artifact,
            guidance,
            review_notes,
            validation,
            cost_estimate,
            approval_request,
            deployment,
            consumed,
            conversation,
            warnings,
            errors,
            final_output,
        } = delta;

        if let Some(result) = result {
            self.results.insert(stage, result);
        }
        if analysis.is_some() {
            self.analysis = analysis;
        }
        if artifact.is_some() {
            self.artifact = artifact;
        }
        if guidance.is_some() {
            self.guidance = guidance;
        }
        if review_notes.is_some() {
            self.review_notes = review_notes;
        }
        if validation.is_some() {
            self.validation = validation;
        }
        if cost_estimate.is_some() {
            self.cost_estimate = cost_estimate;
        }
        if approval_request.is_some() {
            self.approval_request = approval_request;
        }
        if deployment.is_some() {
            self.deployment = deployment;
        }
        for slot in consumed {
            match slot {
                AnswerSlot::Clarification => self.clarification = None,
                AnswerSlot::ApprovalResponse => self.approval_response = None,
            }
        }
        self.conversation.extend(conversation);
        self.warnings.extend(warnings);
        self.errors.extend(errors);
        if final_output.is_some() {
            self.final_output = final_output;
        }
        Ok(())
    }

    /// Record a stage as completed, keeping the list duplicate-free.
    pub fn mark_completed(&mut self, stage: StageId) {
        if !self.completed_stages.contains(&stage) {
            self.completed_stages.push(stage);
        }
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn record_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn answer(&self, slot: AnswerSlot) -> Option<&str> {
        match slot {
            AnswerSlot::Clarification => self.clarification.as_deref(),
            AnswerSlot::ApprovalResponse => self.approval_response.as_deref(),
        }
    }

    /// Write an externally supplied answer into the slot a stage expects.
    pub fn inject_answer(&mut self, slot: AnswerSlot, answer: impl Into<String>) {
        let answer = Some(answer.into());
        match slot {
            AnswerSlot::Clarification => self.clarification = answer,
            AnswerSlot::ApprovalResponse => self.approval_response = answer,
        }
    }

    pub fn has_completed(&self, stage: StageId) -> bool {
        self.completed_stages.contains(&stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> StateRecord {
        StateRecord::new(
            "exec-1",
            "a storage account",
            RequestConfig::default(),
            StageId::Requirements,
        )
    }

    fn validation(score: f64) -> ValidationResult {
        ValidationResult {
            result: StageResult::default(),
            compliance_score: score,
            violations: vec![],
            frameworks: Default::default(),
            framework_scores: Default::default(),
            gate: None,
        }
    }

    #[test]
    fn apply_leaves_untouched_fields_identical() {
        let mut state = record();
        state.analysis = Some("analysis".to_string());
        state.warnings.push("w0".to_string());
        let before = serde_json::to_value(&state).unwrap();

        let delta = StateDelta {
            artifact: Some("resource \"x\" \"y\" {}".to_string()),
            ..Default::default()
        };
        state.apply(StageId::Generation, delta).unwrap();
        let after = serde_json::to_value(&state).unwrap();

        let before = before.as_object().unwrap();
        let after = after.as_object().unwrap();
        for (key, value) in before {
            if key != "artifact" {
                assert_eq!(after.get(key), Some(value), "field {} leaked", key);
            }
        }
        assert_eq!(after["artifact"], "resource \"x\" \"y\" {}");
    }

    #[test]
    fn apply_appends_history_fields() {
        let mut state = record();
        state.errors.push("first".to_string());
        let delta = StateDelta {
            errors: vec!["second".to_string()],
            conversation: vec!["Architect: hi".to_string()],
            ..Default::default()
        };
        state.apply(StageId::Requirements, delta).unwrap();
        assert_eq!(state.errors, vec!["first", "second"]);
        assert_eq!(state.conversation, vec!["Architect: hi"]);
    }

    #[test]
    fn out_of_range_score_is_rejected_without_partial_write() {
        let mut state = record();
        let delta = StateDelta {
            artifact: Some("changed".to_string()),
            validation: Some(validation(101.0)),
            ..Default::default()
        };
        let err = state.apply(StageId::Validation, delta).unwrap_err();
        assert_eq!(err, StateError::InvalidScore(101.0));
        assert!(state.artifact.is_none());
        assert!(state.validation.is_none());

        let negative = StateDelta {
            validation: Some(validation(-0.5)),
            ..Default::default()
        };
        assert!(state.apply(StageId::Validation, negative).is_err());
    }

    #[test]
    fn boundary_scores_are_accepted() {
        let mut state = record();
        for score in [0.0, 100.0] {
            let delta = StateDelta {
                validation: Some(validation(score)),
                ..Default::default()
            };
            state.apply(StageId::Validation, delta).unwrap();
        }
    }

    #[test]
    fn terminal_record_rejects_mutation() {
        let mut state = record();
        let done = StateDelta {
            final_output: Some(FinalOutput {
                status: ExecutionStatus::Completed,
                summary: "done".to_string(),
                artifact: None,
                errors: vec![],
                warnings: vec![],
            }),
            ..Default::default()
        };
        state.apply(StageId::Respond, done).unwrap();
        let err = state
            .apply(StageId::Respond, StateDelta::new().with_warning("late"))
            .unwrap_err();
        assert_eq!(err, StateError::Terminal);
        assert!(state.warnings.is_empty());
    }

    #[test]
    fn completed_stages_stay_unique() {
        let mut state = record();
        state.mark_completed(StageId::Generation);
        state.mark_completed(StageId::Validation);
        state.mark_completed(StageId::Generation);
        assert_eq!(
            state.completed_stages,
            vec![StageId::Generation, StageId::Validation]
        );
    }

    #[test]
    fn consumed_answer_is_cleared_on_merge() {
        let mut state = record();
        state.inject_answer(AnswerSlot::ApprovalResponse, "changes add tags");
        let delta = StateDelta {
            review_notes: Some("add tags".to_string()),
            consumed: vec![AnswerSlot::ApprovalResponse],
            ..Default::default()
        };
        state.apply(StageId::ApprovalDecision, delta).unwrap();
        assert!(state.approval_response.is_none());
        assert_eq!(state.review_notes.as_deref(), Some("add tags"));
    }

    #[test]
    fn answers_land_in_their_slot() {
        let mut state = record();
        state.inject_answer(AnswerSlot::ApprovalResponse, "approve");
        assert_eq!(state.answer(AnswerSlot::ApprovalResponse), Some("approve"));
        assert_eq!(state.answer(AnswerSlot::Clarification), None);
    }
}
