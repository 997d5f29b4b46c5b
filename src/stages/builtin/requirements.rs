use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use crate::collaborators::Reasoner;
use crate::engine::state::{StateDelta, StateRecord};
use crate::engine::types::*;
use crate::stages::markers::{Sentinel, strip_sentinels};
use crate::stages::prompt::{self, ARCHITECT_PROMPT, ARCHITECT_ROLE};
use crate::stages::{Stage, StageOutput};

use super::transcript;

/// Requirements analysis by the architect agent. May pause once to ask the
/// user a clarifying question.
pub struct RequirementsStage {
    pub reasoner: Arc<dyn Reasoner>,
}

#[async_trait]
impl Stage for RequirementsStage {
    fn id(&self) -> StageId {
        StageId::Requirements
    }

    fn description(&self) -> &str {
        "Analyse the request into requirements; may ask the user one clarifying question"
    }

    async fn run(&self, state: &StateRecord) -> Result<StageOutput> {
        let vars = BTreeMap::from([
            ("role", ARCHITECT_ROLE.to_string()),
            ("frameworks", prompt::framework_list(&state.config.selected_frameworks)),
            ("ask_token", Sentinel::UserInputRequired.token().to_string()),
        ]);
        let system = prompt::render(ARCHITECT_PROMPT, &vars);

        let mut conversation = transcript(state);
        if let Some(ref answer) = state.clarification {
            conversation.push(format!("User clarification: {}", answer));
        }

        let reply = self.reasoner.invoke(&system, &conversation).await?;
        let text = strip_sentinels(&reply);
        let asks = Sentinel::UserInputRequired.in_reply(&reply);

        if asks && state.clarification.is_none() {
            let mut data = StageData::new();
            data.insert("question".to_string(), json!(text));
            let delta = StateDelta {
                result: Some(StageResult {
                    status: StageStatus::Pending,
                    data,
                    ..Default::default()
                }),
                ..Default::default()
            }
            .say(format!("{}: {}", ARCHITECT_ROLE, text));
            return Ok(StageOutput::suspend(
                delta,
                format!("Clarification needed: {}", text),
                StageId::Requirements,
                AnswerSlot::Clarification,
            ));
        }

        let mut data = StageData::new();
        data.insert("clarified".to_string(), json!(state.clarification.is_some()));
        let mut result = StageResult::completed(data);
        if asks {
            result = result.with_warning("architect asked again after clarification; continuing");
        }

        let delta = StateDelta {
            result: Some(result),
            analysis: Some(text.clone()),
            ..Default::default()
        }
        .say(format!("{}: {}", ARCHITECT_ROLE, text));
        Ok(StageOutput::proceed(delta, FlagUpdate::default()))
    }
}
