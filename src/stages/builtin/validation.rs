use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use crate::collaborators::ComplianceValidator;
use crate::engine::state::{StateDelta, StateRecord};
use crate::engine::types::*;
use crate::stages::{Stage, StageOutput};

/// Compliance check of the current artifact. The engine applies the quality
/// gate to the score this stage reports.
pub struct ValidationStage {
    pub validator: Arc<dyn ComplianceValidator>,
}

#[async_trait]
impl Stage for ValidationStage {
    fn id(&self) -> StageId {
        StageId::Validation
    }

    fn description(&self) -> &str {
        "Score the configuration against the selected compliance frameworks"
    }

    async fn run(&self, state: &StateRecord) -> Result<StageOutput> {
        let Some(ref artifact) = state.artifact else {
            return Ok(StageOutput::fail(StateDelta::new(), "no configuration to validate"));
        };

        let frameworks = &state.config.selected_frameworks;
        let report = self.validator.validate(artifact, frameworks);

        let mut data = StageData::new();
        data.insert("rules_checked".to_string(), json!(report.rules_checked));
        data.insert("violations".to_string(), json!(report.violations.len()));
        let result = StageResult::completed(data);

        let delta = StateDelta {
            result: Some(result.clone()),
            validation: Some(ValidationResult {
                result,
                compliance_score: report.score,
                violations: report.violations,
                frameworks: frameworks.clone(),
                framework_scores: report.framework_scores,
                gate: None,
            }),
            ..Default::default()
        };
        Ok(StageOutput::proceed(delta, FlagUpdate::default()))
    }
}
