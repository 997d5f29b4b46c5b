use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::collaborators::Reasoner;
use crate::engine::state::{StateDelta, StateRecord};
use crate::engine::types::*;
use crate::stages::markers::strip_sentinels;
use crate::stages::prompt::{self, CONSULTANT_PROMPT, CONSULTANT_ROLE};
use crate::stages::{Stage, StageOutput};

use super::transcript;

/// Expert guidance for the engineer. Failures here are not fatal.
pub struct ConsultationStage {
    pub reasoner: Arc<dyn Reasoner>,
}

#[async_trait]
impl Stage for ConsultationStage {
    fn id(&self) -> StageId {
        StageId::Consultation
    }

    fn description(&self) -> &str {
        "Advise the engineer on provider and module usage"
    }

    async fn run(&self, state: &StateRecord) -> Result<StageOutput> {
        let draft = state
            .artifact
            .clone()
            .unwrap_or_else(|| "(no draft yet)".to_string());
        let vars = BTreeMap::from([
            ("role", CONSULTANT_ROLE.to_string()),
            ("artifact", draft),
        ]);
        let system = prompt::render(CONSULTANT_PROMPT, &vars);

        let reply = self.reasoner.invoke(&system, &transcript(state)).await?;
        let guidance = strip_sentinels(&reply);

        let delta = StateDelta {
            result: Some(StageResult::completed(StageData::new())),
            guidance: Some(guidance.clone()),
            ..Default::default()
        }
        .say(format!("{}: {}", CONSULTANT_ROLE, guidance));
        Ok(StageOutput::proceed(
            delta,
            FlagUpdate {
                needs_consultation: Some(false),
                ..Default::default()
            },
        ))
    }
}
