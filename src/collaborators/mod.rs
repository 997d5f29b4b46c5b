//! External collaborators the stages delegate to.

pub mod compliance;
pub mod llm;
pub mod provision;
pub mod scripted;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::types::DeploymentReport;

/// Text-in, text-out reasoning service backing agent stages.
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// `conversation` is the transcript so far, oldest first.
    async fn invoke(&self, system: &str, conversation: &[String]) -> Result<String>;
}

/// Score and violations for one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub score: f64,
    /// Most severe first.
    pub violations: Vec<String>,
    pub rules_checked: usize,
    #[serde(default)]
    pub framework_scores: BTreeMap<String, f64>,
}

/// Pure compliance check over an artifact.
pub trait ComplianceValidator: Send + Sync {
    fn validate(&self, artifact: &str, frameworks: &BTreeSet<String>) -> ComplianceReport;
}

/// Applies an artifact to real (or simulated) infrastructure.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Must be safe to call again with the same inputs.
    async fn deploy(
        &self,
        execution_id: &str,
        artifact: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<DeploymentReport>;
}

/// The collaborator set a pipeline is wired with.
#[derive(Clone)]
pub struct Collaborators {
    pub reasoner: Arc<dyn Reasoner>,
    pub validator: Arc<dyn ComplianceValidator>,
    pub provisioner: Arc<dyn Provisioner>,
}
