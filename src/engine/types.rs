use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form structured payload attached to a stage result.
pub type StageData = serde_json::Map<String, serde_json::Value>;

/// The fixed set of stages an execution can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Requirements,
    Generation,
    Consultation,
    Validation,
    CostEstimation,
    ApprovalRequest,
    ApprovalDecision,
    Deployment,
    Respond,
}

impl StageId {
    pub const ALL: [StageId; 9] = [
        StageId::Requirements,
        StageId::Generation,
        StageId::Consultation,
        StageId::Validation,
        StageId::CostEstimation,
        StageId::ApprovalRequest,
        StageId::ApprovalDecision,
        StageId::Deployment,
        StageId::Respond,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageId::Requirements => "requirements",
            StageId::Generation => "generation",
            StageId::Consultation => "consultation",
            StageId::Validation => "validation",
            StageId::CostEstimation => "cost_estimation",
            StageId::ApprovalRequest => "approval_request",
            StageId::ApprovalDecision => "approval_decision",
            StageId::Deployment => "deployment",
            StageId::Respond => "respond",
        }
    }

    /// Logical phase the stage belongs to, used by the iteration guard.
    pub fn phase(self) -> Phase {
        match self {
            StageId::Requirements | StageId::Generation | StageId::Consultation => Phase::Planning,
            StageId::Validation => Phase::Validation,
            StageId::CostEstimation | StageId::ApprovalRequest | StageId::ApprovalDecision => {
                Phase::Approval
            }
            StageId::Deployment => Phase::Deployment,
            StageId::Respond => Phase::Complete,
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| format!("Unknown stage '{}'", s))
    }
}

/// Logical grouping of stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Planning,
    Validation,
    Approval,
    Deployment,
    Complete,
}

impl Phase {
    /// Default forward progression used when the iteration guard forces advancement.
    pub const FORWARD: [Phase; 5] = [
        Phase::Planning,
        Phase::Validation,
        Phase::Approval,
        Phase::Deployment,
        Phase::Complete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Validation => "validation",
            Phase::Approval => "approval",
            Phase::Deployment => "deployment",
            Phase::Complete => "complete",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::FORWARD
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("Unknown phase '{}'", s))
    }
}

/// Where routing goes after a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Next {
    Stage(StageId),
    Terminate,
}

impl std::fmt::Display for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Next::Stage(id) => write!(f, "{}", id),
            Next::Terminate => write!(f, "terminate"),
        }
    }
}

/// Status of an individual stage result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "pending"),
            StageStatus::Completed => write!(f, "completed"),
            StageStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Status of a whole execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Running,
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Suspended => write!(f, "suspended"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "suspended" => Ok(ExecutionStatus::Suspended),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            _ => Err(format!(
                "Invalid status '{}'. Use: running, suspended, completed, failed, cancelled",
                s
            )),
        }
    }
}

/// Options recognized on an incoming request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestConfig {
    pub enforce_compliance: bool,
    pub selected_frameworks: BTreeSet<String>,
    pub require_approval: bool,
    /// Run the provisioning collaborator after approval.
    pub deploy: bool,
    /// Allow the generation stage to ask the consultant for guidance.
    pub consultation_enabled: bool,
    /// Variables handed to the provisioning collaborator.
    pub variables: BTreeMap<String, String>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            enforce_compliance: false,
            selected_frameworks: BTreeSet::new(),
            require_approval: true,
            deploy: false,
            consultation_enabled: true,
            variables: BTreeMap::new(),
        }
    }
}

/// Result slot every stage writes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StageResult {
    pub status: StageStatus,
    #[serde(default)]
    pub data: StageData,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl StageResult {
    pub fn completed(data: StageData) -> Self {
        Self {
            status: StageStatus::Completed,
            data,
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Failed,
            errors: vec![error.into()],
            ..Self::default()
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Quality gate decision stored next to the validation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub passed: bool,
    pub enforced: bool,
    pub min_score: f64,
    pub max_violations: usize,
    pub score: f64,
    pub violations: usize,
}

/// Result of the validation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    #[serde(flatten)]
    pub result: StageResult,
    pub compliance_score: f64,
    pub violations: Vec<String>,
    #[serde(default)]
    pub frameworks: BTreeSet<String>,
    /// Per-framework score over the rules tagged with that framework.
    #[serde(default)]
    pub framework_scores: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateVerdict>,
}

/// Deterministic monthly cost estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub monthly_usd: f64,
    pub line_items: Vec<CostLineItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostLineItem {
    pub resource_type: String,
    pub count: usize,
    pub monthly_usd: f64,
}

/// Approval request prepared for a human reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub template_hash: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome reported by the provisioning collaborator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeploymentReport {
    pub success: bool,
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
}

/// Boolean signals stage functions set for routers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingFlags {
    pub needs_consultation: bool,
    pub approval_received: bool,
    pub quality_gate_passed: bool,
    pub regeneration_requested: bool,
}

/// Partial update to [`RoutingFlags`]; `None` leaves a flag untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagUpdate {
    pub needs_consultation: Option<bool>,
    pub approval_received: Option<bool>,
    pub quality_gate_passed: Option<bool>,
    pub regeneration_requested: Option<bool>,
}

impl FlagUpdate {
    pub fn is_empty(&self) -> bool {
        *self == FlagUpdate::default()
    }

    pub fn apply(&self, flags: &mut RoutingFlags) {
        if let Some(v) = self.needs_consultation {
            flags.needs_consultation = v;
        }
        if let Some(v) = self.approval_received {
            flags.approval_received = v;
        }
        if let Some(v) = self.quality_gate_passed {
            flags.quality_gate_passed = v;
        }
        if let Some(v) = self.regeneration_requested {
            flags.regeneration_requested = v;
        }
    }
}

/// State Record field that receives an externally supplied answer on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSlot {
    Clarification,
    ApprovalResponse,
}

impl std::fmt::Display for AnswerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnswerSlot::Clarification => write!(f, "clarification"),
            AnswerSlot::ApprovalResponse => write!(f, "approval_response"),
        }
    }
}

/// Terminal, renderable result of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalOutput {
    pub status: ExecutionStatus,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Timeout and retry policy for a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagePolicy {
    /// Expected upper bound for one attempt, in seconds.
    pub timeout_s: Option<f64>,
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Initial backoff duration in seconds (doubles each attempt).
    pub backoff_s: f64,
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self {
            timeout_s: None,
            max_retries: 0,
            backoff_s: 1.0,
        }
    }
}
