use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Deserialize;

use crate::collaborators::llm::LlmSettings;
use crate::engine::EngineSettings;
use crate::engine::gate::QualityGate;
use crate::engine::guard::GuardPolicy;
use crate::engine::types::{StageId, StagePolicy};
use crate::stages::pipeline::{PipelineOptions, default_policy};

/// `server:` section.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_body: Option<usize>,
}

/// `ttl:` section, in hours.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct TtlConfig {
    pub suspended: Option<u64>,
    pub terminal: Option<u64>,
}

/// `provisioner:` section.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// `workspace` (write files only) or `terraform`.
    pub kind: Option<String>,
    pub terraform_bin: Option<String>,
    /// Per-command timeout in seconds.
    pub timeout: Option<f64>,
}

/// One entry under `stages:`. Fields left out keep the stage's built-in value.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StageOverride {
    pub timeout_s: Option<f64>,
    pub max_retries: Option<u32>,
    pub backoff_s: Option<f64>,
}

impl StageOverride {
    pub fn merge(&self, base: StagePolicy) -> StagePolicy {
        StagePolicy {
            timeout_s: self.timeout_s.or(base.timeout_s),
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            backoff_s: self.backoff_s.unwrap_or(base.backoff_s),
        }
    }
}

/// Configuration loaded from `infraflow.yaml`.
/// All fields are optional; missing fields fall back to CLI/env/defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct InfraFlowConfig {
    pub server: ServerConfig,
    pub store_dir: Option<String>,
    pub workspace_dir: Option<String>,
    pub guard: Option<GuardPolicy>,
    pub gate: Option<QualityGate>,
    pub ttl: TtlConfig,
    pub non_critical: Option<BTreeSet<StageId>>,
    /// Per-stage timeout/retry overrides.
    pub stages: BTreeMap<StageId, StageOverride>,
    pub llm: LlmSettings,
    pub provisioner: ProvisionerConfig,
}

impl InfraFlowConfig {
    /// Load configuration from a YAML file.
    ///
    /// - If `path` is `Some`, load that specific file (error if missing).
    /// - If `path` is `None`, auto-detect `infraflow.yaml` in cwd; return defaults if absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_path = match path {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!("Config file not found: {}", p.display());
                }
                p.to_path_buf()
            }
            None => {
                let default_path = Path::new("infraflow.yaml");
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path.to_path_buf()
            }
        };

        let contents = std::fs::read_to_string(&file_path)
            .with_context(|| format!("Failed to read config file: {}", file_path.display()))?;

        let config: InfraFlowConfig = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", file_path.display()))?;

        Ok(config)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let defaults = EngineSettings::default();
        EngineSettings {
            guard: self.guard.clone().unwrap_or(defaults.guard),
            gate: self.gate.unwrap_or(defaults.gate),
            suspend_ttl_hours: self.ttl.suspended.unwrap_or(defaults.suspend_ttl_hours),
            terminal_ttl_hours: self.ttl.terminal.unwrap_or(defaults.terminal_ttl_hours),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        let defaults = PipelineOptions::default();
        PipelineOptions {
            policies: self
                .stages
                .iter()
                .map(|(id, stage)| (*id, stage.merge(default_policy(*id))))
                .collect(),
            non_critical: self.non_critical.clone().unwrap_or(defaults.non_critical),
        }
    }
}
