use anyhow::Result;
use async_trait::async_trait;

use crate::engine::state::{StateDelta, StateRecord};
use crate::engine::types::*;
use crate::stages::{Stage, StageOutput};

/// Compiles the final output from everything the execution accumulated.
pub struct RespondStage;

fn summary(state: &StateRecord) -> String {
    let mut lines = Vec::new();

    match state.artifact {
        Some(ref artifact) => lines.push(format!(
            "Generated a Terraform configuration ({} lines).",
            artifact.lines().count()
        )),
        None => lines.push("No configuration was produced.".to_string()),
    }

    if let Some(ref validation) = state.validation {
        let gate = match validation.gate {
            Some(ref g) if g.passed => "passed",
            Some(_) => "not met",
            None => "not evaluated",
        };
        lines.push(format!(
            "Compliance score {:.1} with {} violation(s); quality gate {}.",
            validation.compliance_score,
            validation.violations.len(),
            gate
        ));
    }

    if let Some(ref cost) = state.cost_estimate {
        lines.push(format!("Estimated cost ${:.2}/month.", cost.monthly_usd));
    }

    let approval = if !state.config.require_approval {
        "Approval not required."
    } else if state.flags.approval_received {
        "Approved by reviewer."
    } else {
        "Not approved."
    };
    lines.push(approval.to_string());

    match state.deployment {
        Some(ref report) if report.success => lines.push(format!(
            "Deployed {} resource(s).",
            report.resources.len()
        )),
        Some(_) => lines.push("Deployment failed.".to_string()),
        None => lines.push("Not deployed.".to_string()),
    }

    if !state.warnings.is_empty() {
        lines.push(format!("{} warning(s) recorded.", state.warnings.len()));
    }

    lines.join(" ")
}

#[async_trait]
impl Stage for RespondStage {
    fn id(&self) -> StageId {
        StageId::Respond
    }

    fn description(&self) -> &str {
        "Compile the final response"
    }

    async fn run(&self, state: &StateRecord) -> Result<StageOutput> {
        let output = FinalOutput {
            status: ExecutionStatus::Completed,
            summary: summary(state),
            artifact: state.artifact.clone(),
            errors: state.errors.clone(),
            warnings: state.warnings.clone(),
        };
        let delta = StateDelta {
            result: Some(StageResult::completed(StageData::new())),
            final_output: Some(output),
            ..Default::default()
        };
        Ok(StageOutput::proceed(delta, FlagUpdate::default()))
    }
}
