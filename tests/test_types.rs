//! Tests for engine types: identifiers, status enums, flags and wire forms.

use infraflow::engine::types::*;

// --- StageId / Phase ---

#[test]
fn stage_ids_round_trip_through_strings() {
    for id in StageId::ALL {
        assert_eq!(id.as_str().parse::<StageId>().unwrap(), id);
    }
    assert!("teleport".parse::<StageId>().is_err());
}

#[test]
fn stage_phases() {
    assert_eq!(StageId::Requirements.phase(), Phase::Planning);
    assert_eq!(StageId::Consultation.phase(), Phase::Planning);
    assert_eq!(StageId::Validation.phase(), Phase::Validation);
    assert_eq!(StageId::CostEstimation.phase(), Phase::Approval);
    assert_eq!(StageId::ApprovalDecision.phase(), Phase::Approval);
    assert_eq!(StageId::Deployment.phase(), Phase::Deployment);
    assert_eq!(StageId::Respond.phase(), Phase::Complete);
}

#[test]
fn phase_parse_and_display() {
    assert_eq!("approval".parse::<Phase>().unwrap(), Phase::Approval);
    assert_eq!(Phase::Complete.to_string(), "complete");
    assert!("review".parse::<Phase>().is_err());
}

// --- Status Display / parsing ---

#[test]
fn execution_status_display_and_parse() {
    for status in [
        ExecutionStatus::Running,
        ExecutionStatus::Suspended,
        ExecutionStatus::Completed,
        ExecutionStatus::Failed,
        ExecutionStatus::Cancelled,
    ] {
        assert_eq!(status.to_string().parse::<ExecutionStatus>().unwrap(), status);
    }
    let err = "stalled".parse::<ExecutionStatus>().unwrap_err();
    assert!(err.contains("Invalid status 'stalled'"));
}

#[test]
fn terminal_statuses() {
    assert!(!ExecutionStatus::Running.is_terminal());
    assert!(!ExecutionStatus::Suspended.is_terminal());
    assert!(ExecutionStatus::Completed.is_terminal());
    assert!(ExecutionStatus::Failed.is_terminal());
    assert!(ExecutionStatus::Cancelled.is_terminal());
}

#[test]
fn stage_status_display() {
    assert_eq!(StageStatus::Pending.to_string(), "pending");
    assert_eq!(StageStatus::Completed.to_string(), "completed");
    assert_eq!(StageStatus::Failed.to_string(), "failed");
}

// --- Serialization ---

#[test]
fn next_serialization() {
    assert_eq!(
        serde_json::to_value(Next::Stage(StageId::CostEstimation)).unwrap(),
        serde_json::json!({ "stage": "cost_estimation" })
    );
    assert_eq!(
        serde_json::to_value(Next::Terminate).unwrap(),
        serde_json::json!("terminate")
    );
    assert_eq!(Next::Stage(StageId::Respond).to_string(), "respond");
}

#[test]
fn answer_slot_serialization() {
    assert_eq!(
        serde_json::to_value(AnswerSlot::ApprovalResponse).unwrap(),
        serde_json::json!("approval_response")
    );
    assert_eq!(AnswerSlot::Clarification.to_string(), "clarification");
}

#[test]
fn validation_result_flattens_stage_result() {
    let result = ValidationResult {
        result: StageResult::completed(StageData::new()).with_warning("low score"),
        compliance_score: 55.0,
        violations: vec!["rule_0: violated".to_string()],
        frameworks: Default::default(),
        framework_scores: Default::default(),
        gate: None,
    };
    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["status"], "completed");
    assert_eq!(value["warnings"][0], "low score");
    assert_eq!(value["compliance_score"], 55.0);
    assert!(value.get("gate").is_none());
}

// --- RequestConfig ---

#[test]
fn request_config_defaults() {
    let config = RequestConfig::default();
    assert!(!config.enforce_compliance);
    assert!(config.require_approval);
    assert!(!config.deploy);
    assert!(config.consultation_enabled);
    assert!(config.variables.is_empty());
}

#[test]
fn request_config_partial_and_unknown_keys() {
    let config: RequestConfig =
        serde_json::from_str(r#"{"enforce_compliance": true, "selected_frameworks": ["hipaa"]}"#)
            .unwrap();
    assert!(config.enforce_compliance);
    assert!(config.require_approval);
    assert!(config.selected_frameworks.contains("hipaa"));

    assert!(serde_json::from_str::<RequestConfig>(r#"{"turbo": true}"#).is_err());
}

// --- Flags ---

#[test]
fn flag_update_applies_only_set_fields() {
    let mut flags = RoutingFlags {
        needs_consultation: true,
        ..Default::default()
    };
    let update = FlagUpdate {
        approval_received: Some(true),
        ..Default::default()
    };
    assert!(!update.is_empty());
    update.apply(&mut flags);
    assert!(flags.needs_consultation);
    assert!(flags.approval_received);
    assert!(!flags.regeneration_requested);
    assert!(FlagUpdate::default().is_empty());
}

#[test]
fn stage_policy_default() {
    let policy = StagePolicy::default();
    assert_eq!(policy.max_retries, 0);
    assert!(policy.timeout_s.is_none());
    assert!((policy.backoff_s - 1.0).abs() < f64::EPSILON);
}
