//! Scripted collaborators and an engine harness shared by the integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use infraflow::collaborators::scripted::ScriptedReasoner;
use infraflow::collaborators::{
    Collaborators, ComplianceReport, ComplianceValidator, Provisioner, Reasoner,
};
use infraflow::engine::observer::{EngineEvent, RecordingSink};
use infraflow::engine::types::*;
use infraflow::engine::{Engine, EngineSettings};
use infraflow::stages::pipeline::{PipelineOptions, standard_graph};
use infraflow::stages::prompt;
use infraflow::storage::memory_store::MemorySnapshotStore;

pub const HCL_REPLY: &str = "Here you go.\n\n```hcl\nresource \"azurerm_resource_group\" \"main\" {\n  name     = \"rg\"\n  location = \"westeurope\"\n}\n\nresource \"azurerm_storage_account\" \"main\" {\n  name = \"st\"\n}\n```\n";

/// Replies for every role: plain analysis, a configuration, short guidance
/// and an approving classifier.
pub fn reasoner() -> ScriptedReasoner {
    ScriptedReasoner::new()
        .on(prompt::ARCHITECT_ROLE, "Requirements: one storage account in westeurope.")
        .on(prompt::ENGINEER_ROLE, HCL_REPLY)
        .on(prompt::CONSULTANT_ROLE, "Pin the azurerm provider to 3.x.")
        .on(prompt::APPROVAL_ROLE, "<<APPROVED>>")
}

pub fn report(score: f64, violations: usize) -> ComplianceReport {
    ComplianceReport {
        score,
        violations: (0..violations)
            .map(|i| format!("rule_{}: violated", i))
            .collect(),
        rules_checked: 10,
        framework_scores: BTreeMap::new(),
    }
}

/// Returns queued reports in order; the last one repeats.
pub struct FixedValidator {
    reports: Mutex<VecDeque<ComplianceReport>>,
}

impl FixedValidator {
    pub fn new(reports: Vec<ComplianceReport>) -> Self {
        Self {
            reports: Mutex::new(reports.into()),
        }
    }

    pub fn always(score: f64, violations: usize) -> Self {
        Self::new(vec![report(score, violations)])
    }
}

impl ComplianceValidator for FixedValidator {
    fn validate(&self, _artifact: &str, _frameworks: &BTreeSet<String>) -> ComplianceReport {
        let mut reports = self.reports.lock().unwrap();
        if reports.len() > 1 {
            reports.pop_front().unwrap()
        } else {
            reports.front().cloned().unwrap()
        }
    }
}

/// Counts deploy calls; optionally reports failure.
#[derive(Default)]
pub struct CountingProvisioner {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl CountingProvisioner {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provisioner for CountingProvisioner {
    async fn deploy(
        &self,
        _execution_id: &str,
        _artifact: &str,
        _variables: &BTreeMap<String, String>,
    ) -> Result<DeploymentReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Ok(DeploymentReport {
                success: false,
                resources: Vec::new(),
                error: Some("quota exceeded".to_string()),
                workspace: None,
            });
        }
        Ok(DeploymentReport {
            success: true,
            resources: vec!["azurerm_storage_account.main".to_string()],
            error: None,
            workspace: None,
        })
    }
}

/// No retries, no backoff, a short timeout: keeps failing tests fast.
pub fn fast_options() -> PipelineOptions {
    let mut options = PipelineOptions::default();
    for id in StageId::ALL {
        options.policies.insert(
            id,
            StagePolicy {
                timeout_s: Some(5.0),
                max_retries: 0,
                backoff_s: 0.0,
            },
        );
    }
    options
}

pub struct Harness {
    pub engine: Arc<Engine>,
    pub store: Arc<MemorySnapshotStore>,
    pub events: Arc<RecordingSink>,
    pub provisioner: Arc<CountingProvisioner>,
}

impl Harness {
    /// Stages in the order they were started (first attempts only).
    pub fn path(&self, execution_id: &str) -> Vec<StageId> {
        self.events
            .events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::StageStarted {
                    execution_id: id,
                    stage,
                    attempt: 1,
                } if id == execution_id => Some(stage),
                _ => None,
            })
            .collect()
    }

    pub fn guard_overrides(&self) -> usize {
        self.events
            .events()
            .iter()
            .filter(|e| matches!(e, EngineEvent::GuardForced { .. }))
            .count()
    }
}

pub fn harness_with(
    reasoner: Arc<dyn Reasoner>,
    validator: FixedValidator,
    provisioner: CountingProvisioner,
    options: PipelineOptions,
) -> Harness {
    let provisioner = Arc::new(provisioner);
    let collaborators = Collaborators {
        reasoner,
        validator: Arc::new(validator),
        provisioner: provisioner.clone(),
    };
    let store = Arc::new(MemorySnapshotStore::new());
    let events = Arc::new(RecordingSink::new());
    let engine = Engine::new(
        standard_graph(&collaborators, &options),
        store.clone(),
        EngineSettings::default(),
    )
    .unwrap()
    .with_events(events.clone());

    Harness {
        engine: Arc::new(engine),
        store,
        events,
        provisioner,
    }
}

pub fn harness(reasoner: Arc<dyn Reasoner>, validator: FixedValidator) -> Harness {
    harness_with(
        reasoner,
        validator,
        CountingProvisioner::default(),
        fast_options(),
    )
}

/// Request options with approval switched off. Enforcing requests select
/// SOX so the enforced gate profile applies.
pub fn unattended(enforce: bool) -> RequestConfig {
    let selected_frameworks = if enforce {
        BTreeSet::from(["SOX".to_string()])
    } else {
        BTreeSet::new()
    };
    RequestConfig {
        enforce_compliance: enforce,
        selected_frameworks,
        require_approval: false,
        ..Default::default()
    }
}
