use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use crate::collaborators::Reasoner;
use crate::engine::state::{StateDelta, StateRecord};
use crate::engine::types::*;
use crate::stages::markers::{Sentinel, declared_resources, extract_artifact, strip_sentinels};
use crate::stages::prompt::{self, ENGINEER_PROMPT, ENGINEER_ROLE};
use crate::stages::{Stage, StageOutput};

use super::transcript;

/// Configuration generation by the engineer agent.
pub struct GenerationStage {
    pub reasoner: Arc<dyn Reasoner>,
}

/// Validation findings and consultant guidance folded into the next prompt.
fn feedback(state: &StateRecord) -> String {
    let mut lines = Vec::new();

    if let Some(ref validation) = state.validation
        && !validation.violations.is_empty()
    {
        lines.push(format!(
            "The previous draft scored {:.1} on compliance. Fix these violations:",
            validation.compliance_score
        ));
        lines.extend(validation.violations.iter().map(|v| format!("- {}", v)));
    }
    if let Some(ref guidance) = state.guidance {
        lines.push(format!("Consultant guidance:\n{}", guidance));
    }
    if let Some(ref notes) = state.review_notes {
        lines.push(format!("The reviewer requested changes:\n{}", notes));
    }

    lines.join("\n")
}

#[async_trait]
impl Stage for GenerationStage {
    fn id(&self) -> StageId {
        StageId::Generation
    }

    fn description(&self) -> &str {
        "Write or revise the Terraform configuration"
    }

    async fn run(&self, state: &StateRecord) -> Result<StageOutput> {
        let analysis = state
            .analysis
            .clone()
            .unwrap_or_else(|| state.request.clone());
        let vars = BTreeMap::from([
            ("role", ENGINEER_ROLE.to_string()),
            ("frameworks", prompt::framework_list(&state.config.selected_frameworks)),
            ("analysis", analysis),
            ("feedback", feedback(state)),
            ("consult_token", Sentinel::ConsultationNeeded.token().to_string()),
        ]);
        let system = prompt::render(ENGINEER_PROMPT, &vars);

        let reply = self.reasoner.invoke(&system, &transcript(state)).await?;
        let consult = Sentinel::ConsultationNeeded.in_reply(&reply);
        let artifact = extract_artifact(&reply);
        let flags = FlagUpdate {
            needs_consultation: Some(consult),
            regeneration_requested: Some(false),
            ..Default::default()
        };

        let Some(artifact) = artifact else {
            if consult {
                let delta = StateDelta::new()
                    .with_result(StageResult::completed(StageData::new()))
                    .say(format!("{}: {}", ENGINEER_ROLE, strip_sentinels(&reply)));
                return Ok(StageOutput::proceed(delta, flags));
            }
            return Ok(StageOutput::fail(
                StateDelta::new(),
                "engineer reply contained no configuration block",
            ));
        };

        let mut data = StageData::new();
        data.insert("lines".to_string(), json!(artifact.lines().count()));
        data.insert("resources".to_string(), json!(declared_resources(&artifact).len()));
        data.insert("consultation_requested".to_string(), json!(consult));

        let delta = StateDelta {
            result: Some(StageResult::completed(data)),
            artifact: Some(artifact.clone()),
            ..Default::default()
        }
        .say(format!(
            "{}: produced configuration ({} lines)",
            ENGINEER_ROLE,
            artifact.lines().count()
        ));
        Ok(StageOutput::proceed(delta, flags))
    }
}
