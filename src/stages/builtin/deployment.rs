use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::collaborators::Provisioner;
use crate::engine::state::{StateDelta, StateRecord};
use crate::engine::types::*;
use crate::stages::{Stage, StageOutput};

/// Hands the approved artifact to the provisioning collaborator.
pub struct DeploymentStage {
    pub provisioner: Arc<dyn Provisioner>,
}

#[async_trait]
impl Stage for DeploymentStage {
    fn id(&self) -> StageId {
        StageId::Deployment
    }

    fn description(&self) -> &str {
        "Provision the approved configuration"
    }

    async fn run(&self, state: &StateRecord) -> Result<StageOutput> {
        if !state.config.deploy {
            let delta = StateDelta::new()
                .with_result(StageResult::completed(StageData::new()))
                .with_warning("deployment skipped: not requested");
            return Ok(StageOutput::proceed(delta, FlagUpdate::default()));
        }
        if state.config.require_approval && !state.flags.approval_received {
            return Ok(StageOutput::fail(
                StateDelta::new(),
                "refusing to deploy: approval was required but not received",
            ));
        }
        let Some(ref artifact) = state.artifact else {
            return Ok(StageOutput::fail(StateDelta::new(), "no configuration to deploy"));
        };

        let report = self
            .provisioner
            .deploy(&state.execution_id, artifact, &state.config.variables)
            .await?;

        if !report.success {
            let error = report
                .error
                .clone()
                .unwrap_or_else(|| "provisioning failed".to_string());
            let delta = StateDelta {
                deployment: Some(report),
                ..Default::default()
            };
            return Ok(StageOutput::fail(delta, error));
        }

        info!(
            execution_id = %state.execution_id,
            resources = report.resources.len(),
            "Deployment succeeded"
        );
        let mut data = StageData::new();
        data.insert("resources".to_string(), json!(report.resources));
        let delta = StateDelta {
            result: Some(StageResult::completed(data)),
            deployment: Some(report),
            ..Default::default()
        };
        Ok(StageOutput::proceed(delta, FlagUpdate::default()))
    }
}
