use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::collaborators::Reasoner;
use crate::engine::state::{StateDelta, StateRecord};
use crate::engine::types::*;
use crate::stages::markers::{Sentinel, declared_resources};
use crate::stages::prompt::{self, APPROVAL_PROMPT, APPROVAL_ROLE};
use crate::stages::{Stage, StageOutput};

const APPROVE_WORDS: &[&str] = &["approve", "approved", "yes", "y", "lgtm"];
const DENY_WORDS: &[&str] = &["deny", "denied", "reject", "rejected", "no", "n"];

/// `tf-YYYYMMDD-HHMMSS-<first 16 hex of sha256(template)>`
pub fn approval_request_id(template_hash: &str, at: DateTime<Utc>) -> String {
    let short = template_hash.get(..16).unwrap_or(template_hash);
    format!("tf-{}-{}", at.format("%Y%m%d-%H%M%S"), short)
}

fn summarize(state: &StateRecord, artifact: &str) -> String {
    let mut parts = vec![format!(
        "{} resource(s) declared",
        declared_resources(artifact).len()
    )];
    if let Some(ref validation) = state.validation {
        parts.push(format!("compliance score {:.1}", validation.compliance_score));
    }
    if let Some(ref cost) = state.cost_estimate {
        parts.push(format!("estimated ${:.2}/month", cost.monthly_usd));
    }
    parts.join(", ")
}

/// Prepares the approval request and waits for a human unless approval is
/// off or an answer is already on the record.
pub struct ApprovalRequestStage;

#[async_trait]
impl Stage for ApprovalRequestStage {
    fn id(&self) -> StageId {
        StageId::ApprovalRequest
    }

    fn description(&self) -> &str {
        "Prepare an approval request and wait for the reviewer"
    }

    async fn run(&self, state: &StateRecord) -> Result<StageOutput> {
        let Some(ref artifact) = state.artifact else {
            return Ok(StageOutput::fail(StateDelta::new(), "no configuration to approve"));
        };

        let template_hash = hex::encode(Sha256::digest(artifact.as_bytes()));
        let request = match state.approval_request {
            // Same artifact as last time: keep the id the reviewer already saw.
            Some(ref existing) if existing.template_hash == template_hash => existing.clone(),
            _ => {
                let now = Utc::now();
                ApprovalRequest {
                    id: approval_request_id(&template_hash, now),
                    template_hash,
                    summary: summarize(state, artifact),
                    created_at: now,
                }
            }
        };

        let mut data = StageData::new();
        data.insert("request_id".to_string(), json!(request.id));

        if !state.config.require_approval {
            data.insert("auto_approved".to_string(), json!(true));
            let delta = StateDelta {
                result: Some(StageResult::completed(data)),
                approval_request: Some(request),
                ..Default::default()
            };
            return Ok(StageOutput::proceed(
                delta,
                FlagUpdate {
                    approval_received: Some(true),
                    ..Default::default()
                },
            ));
        }

        let flags = FlagUpdate {
            approval_received: Some(false),
            ..Default::default()
        };

        if state.approval_response.is_some() {
            data.insert("answer_present".to_string(), json!(true));
            let delta = StateDelta {
                result: Some(StageResult::completed(data)),
                approval_request: Some(request),
                ..Default::default()
            };
            return Ok(StageOutput::proceed(delta, flags));
        }

        let reason = format!("Approval required for {}: {}", request.id, request.summary);
        let delta = StateDelta {
            result: Some(StageResult::completed(data)),
            approval_request: Some(request),
            ..Default::default()
        };
        Ok(StageOutput::suspend(
            delta,
            reason,
            StageId::ApprovalDecision,
            AnswerSlot::ApprovalResponse,
        ))
    }
}

/// What the reviewer's answer amounts to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Decision {
    Approved,
    Denied,
    ChangesRequested(String),
}

fn word(token: &str) -> String {
    token.trim_end_matches(['.', '!', ':', ',']).to_ascii_lowercase()
}

/// Reads a bare keyword or a reviewer command such as
/// `approve tf-... [notes]`, `reject tf-... [notes]` or `changes [tf-...] <notes>`.
/// Returns the decision and the request id the reviewer named, if any.
fn command_decision(answer: &str) -> Option<(Decision, Option<String>)> {
    let trimmed = answer.trim();
    let whole = word(trimmed);
    if APPROVE_WORDS.contains(&whole.as_str()) {
        return Some((Decision::Approved, None));
    }
    if DENY_WORDS.contains(&whole.as_str()) {
        return Some((Decision::Denied, None));
    }

    let (head, rest) = trimmed.split_once(char::is_whitespace)?;
    let mut rest = rest.trim_start();
    let mut named = None;
    let (first, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    if first.starts_with("tf-") {
        named = Some(first.to_string());
        rest = tail.trim_start();
    }
    let notes = rest.trim();

    match word(head).as_str() {
        "approve" if named.is_some() => Some((Decision::Approved, named)),
        "reject" | "deny" if named.is_some() => Some((Decision::Denied, named)),
        "changes" if !notes.is_empty() => {
            Some((Decision::ChangesRequested(notes.to_string()), named))
        }
        _ => None,
    }
}

/// Classifies the reviewer's answer.
pub struct ApprovalDecisionStage {
    pub reasoner: Arc<dyn Reasoner>,
}

impl ApprovalDecisionStage {
    async fn classify(&self, answer: &str, request_id: &str) -> Result<Option<Decision>> {
        let vars = BTreeMap::from([
            ("role", APPROVAL_ROLE.to_string()),
            ("approved_token", Sentinel::Approved.token().to_string()),
            ("denied_token", Sentinel::Denied.token().to_string()),
            ("changes_token", Sentinel::ChangesRequested.token().to_string()),
            ("request_id", request_id.to_string()),
        ]);
        let system = prompt::render(APPROVAL_PROMPT, &vars);
        let reply = self
            .reasoner
            .invoke(&system, &[format!("Reviewer reply: {}", answer)])
            .await?;

        Ok(if Sentinel::Denied.in_reply(&reply) {
            Some(Decision::Denied)
        } else if Sentinel::ChangesRequested.in_reply(&reply) {
            Some(Decision::ChangesRequested(answer.trim().to_string()))
        } else if Sentinel::Approved.in_reply(&reply) {
            Some(Decision::Approved)
        } else {
            None
        })
    }
}

#[async_trait]
impl Stage for ApprovalDecisionStage {
    fn id(&self) -> StageId {
        StageId::ApprovalDecision
    }

    fn description(&self) -> &str {
        "Decide whether the reviewer's answer grants approval"
    }

    async fn run(&self, state: &StateRecord) -> Result<StageOutput> {
        let Some(ref answer) = state.approval_response else {
            return Ok(StageOutput::fail(StateDelta::new(), "no approval response recorded"));
        };
        let request_id = state
            .approval_request
            .as_ref()
            .map(|r| r.id.clone())
            .unwrap_or_default();

        let mut warnings = Vec::new();
        let (decision, decided_by) = match command_decision(answer) {
            Some((_, Some(named))) if named != request_id => {
                warnings.push(format!(
                    "reply names request {} but the open request is {}; treated as not approved",
                    named, request_id
                ));
                (Decision::Denied, "command")
            }
            Some((decision, named)) => {
                (decision, if named.is_some() { "command" } else { "keyword" })
            }
            None => match self.classify(answer, &request_id).await {
                Ok(Some(decision)) => (decision, "reasoner"),
                Ok(None) => {
                    warnings.push(
                        "approval reply was ambiguous; treated as not approved".to_string(),
                    );
                    (Decision::Denied, "reasoner")
                }
                Err(err) => {
                    warn!(request_id = %request_id, error = %err, "approval classifier failed");
                    warnings.push(format!(
                        "approval classifier unavailable: {}; treated as not approved",
                        err
                    ));
                    (Decision::Denied, "fallback")
                }
            },
        };

        let approved = decision == Decision::Approved;
        let mut data = StageData::new();
        data.insert("approved".to_string(), json!(approved));
        data.insert("decided_by".to_string(), json!(decided_by));
        let mut result = StageResult::completed(data);
        for warning in warnings {
            result = result.with_warning(warning);
        }

        let mut delta = StateDelta::new().say(format!("Reviewer: {}", answer));
        let flags = FlagUpdate {
            approval_received: Some(approved),
            ..Default::default()
        };
        match decision {
            Decision::ChangesRequested(notes) => {
                result.data.insert("decision".to_string(), json!("changes_requested"));
                // The next approval round needs a fresh answer for the new artifact.
                delta.review_notes = Some(notes);
                delta.consumed.push(AnswerSlot::ApprovalResponse);
            }
            Decision::Approved => {
                result.data.insert("decision".to_string(), json!("approved"));
            }
            Decision::Denied => {
                result.data.insert("decision".to_string(), json!("rejected"));
            }
        }

        Ok(StageOutput::proceed(delta.with_result(result), flags))
    }
}
