mod approval;
mod consultation;
mod cost;
mod deployment;
mod generation;
mod requirements;
mod respond;
mod validation;

pub use approval::{ApprovalDecisionStage, ApprovalRequestStage, approval_request_id};
pub use consultation::ConsultationStage;
pub use cost::{CostEstimationStage, monthly_rate};
pub use deployment::DeploymentStage;
pub use generation::GenerationStage;
pub use requirements::RequirementsStage;
pub use respond::RespondStage;
pub use validation::ValidationStage;

/// The user request line every agent transcript starts with.
pub(crate) fn transcript(state: &crate::engine::state::StateRecord) -> Vec<String> {
    let mut lines = vec![format!("User request: {}", state.request)];
    lines.extend(state.conversation.iter().cloned());
    lines
}
