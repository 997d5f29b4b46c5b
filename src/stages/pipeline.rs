//! The default infrastructure pipeline wired from the built-in stages.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::collaborators::Collaborators;
use crate::engine::graph::{RuleRouter, StageGraph, StageSpec};
use crate::engine::state::StateRecord;
use crate::engine::types::{Next, StageId, StagePolicy};
use crate::stages::builtin::*;

/// Per-stage execution settings for [`standard_graph`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Overrides keyed by stage; stages not listed use [`default_policy`].
    pub policies: BTreeMap<StageId, StagePolicy>,
    /// Stages whose failure is recorded and skipped instead of halting.
    pub non_critical: BTreeSet<StageId>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            policies: BTreeMap::new(),
            non_critical: BTreeSet::from([StageId::Consultation, StageId::CostEstimation]),
        }
    }
}

impl PipelineOptions {
    pub fn policy(&self, stage: StageId) -> StagePolicy {
        self.policies
            .get(&stage)
            .cloned()
            .unwrap_or_else(|| default_policy(stage))
    }
}

/// Agent-backed stages get a timeout and retries; deterministic stages run once.
pub fn default_policy(stage: StageId) -> StagePolicy {
    match stage {
        StageId::Requirements
        | StageId::Generation
        | StageId::Consultation
        | StageId::ApprovalDecision => StagePolicy {
            timeout_s: Some(300.0),
            max_retries: 2,
            backoff_s: 1.0,
        },
        StageId::Deployment => StagePolicy {
            timeout_s: Some(1800.0),
            max_retries: 0,
            backoff_s: 1.0,
        },
        _ => StagePolicy::default(),
    }
}

fn approved(state: &StateRecord) -> bool {
    state.flags.approval_received
}

fn approved_for_deploy(state: &StateRecord) -> bool {
    state.flags.approval_received && state.config.deploy
}

fn changes_requested(state: &StateRecord) -> bool {
    state
        .results
        .get(&StageId::ApprovalDecision)
        .and_then(|r| r.data.get("decision"))
        .is_some_and(|d| d == "changes_requested")
}

/// Build the nine-stage graph. `requirements` is the entry.
pub fn standard_graph(collaborators: &Collaborators, options: &PipelineOptions) -> StageGraph {
    use StageId::*;

    let spec = |stage: Arc<dyn crate::stages::Stage>| {
        let id = stage.id();
        StageSpec::new(stage)
            .policy(options.policy(id))
            .critical(!options.non_critical.contains(&id))
    };
    let to = Next::Stage;

    StageGraph::new()
        .with(
            spec(Arc::new(RequirementsStage {
                reasoner: collaborators.reasoner.clone(),
            }))
            .successors([to(Generation)])
            .router(RuleRouter::always(to(Generation))),
        )
        .with(
            spec(Arc::new(GenerationStage {
                reasoner: collaborators.reasoner.clone(),
            }))
            .successors([to(Consultation), to(Validation)])
            .router(
                RuleRouter::new()
                    .when(
                        "needs_consultation",
                        |s| s.flags.needs_consultation && s.config.consultation_enabled,
                        to(Consultation),
                    )
                    .otherwise(to(Validation)),
            ),
        )
        .with(
            spec(Arc::new(ConsultationStage {
                reasoner: collaborators.reasoner.clone(),
            }))
            .successors([to(Generation)])
            .router(RuleRouter::always(to(Generation))),
        )
        .with(
            spec(Arc::new(ValidationStage {
                validator: collaborators.validator.clone(),
            }))
            .successors([to(Generation), to(CostEstimation)])
            .router(
                RuleRouter::new()
                    .when(
                        "regeneration_requested",
                        |s| s.flags.regeneration_requested,
                        to(Generation),
                    )
                    .otherwise(to(CostEstimation)),
            ),
        )
        .with(
            spec(Arc::new(CostEstimationStage))
                .successors([to(ApprovalRequest)])
                .router(RuleRouter::always(to(ApprovalRequest))),
        )
        .with(
            spec(Arc::new(ApprovalRequestStage))
                .successors([to(Deployment), to(Respond), to(ApprovalDecision)])
                .router(
                    RuleRouter::new()
                        .when("approved_for_deploy", approved_for_deploy, to(Deployment))
                        .when("approved", approved, to(Respond))
                        .otherwise(to(ApprovalDecision)),
                ),
        )
        .with(
            spec(Arc::new(ApprovalDecisionStage {
                reasoner: collaborators.reasoner.clone(),
            }))
            .successors([to(Deployment), to(Generation), to(Respond)])
            .router(
                RuleRouter::new()
                    .when("approved_for_deploy", approved_for_deploy, to(Deployment))
                    .when("changes_requested", changes_requested, to(Generation))
                    .otherwise(to(Respond)),
            ),
        )
        .with(
            spec(Arc::new(DeploymentStage {
                provisioner: collaborators.provisioner.clone(),
            }))
            .successors([to(Respond)])
            .router(RuleRouter::always(to(Respond))),
        )
        .with(
            spec(Arc::new(RespondStage))
                .successors([Next::Terminate])
                .router(RuleRouter::always(Next::Terminate)),
        )
}
