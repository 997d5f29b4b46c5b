use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use crate::engine::state::{StateDelta, StateRecord};
use crate::engine::types::*;
use crate::stages::markers::declared_resources;
use crate::stages::{Stage, StageOutput};

const DEFAULT_RATE: f64 = 25.0;

const RATES: &[(&str, f64)] = &[
    ("azurerm_resource_group", 0.0),
    ("azurerm_virtual_network", 0.0),
    ("azurerm_subnet", 0.0),
    ("azurerm_network_security_group", 0.0),
    ("azurerm_log_analytics_workspace", 30.0),
    ("azurerm_key_vault", 5.0),
    ("azurerm_storage_account", 20.0),
    ("azurerm_public_ip", 4.0),
    ("azurerm_application_gateway", 250.0),
    ("azurerm_linux_virtual_machine", 70.0),
    ("azurerm_windows_virtual_machine", 100.0),
    ("azurerm_kubernetes_cluster", 150.0),
    ("azurerm_mssql_server", 0.0),
    ("azurerm_mssql_database", 150.0),
    ("azurerm_postgresql_flexible_server", 120.0),
    ("azurerm_service_plan", 55.0),
    ("azurerm_linux_web_app", 0.0),
    ("azurerm_container_registry", 20.0),
    ("aws_s3_bucket", 23.0),
    ("aws_instance", 70.0),
    ("aws_db_instance", 150.0),
    ("aws_vpc", 0.0),
    ("google_storage_bucket", 20.0),
    ("google_compute_instance", 70.0),
];

/// Monthly USD rate for one instance of a resource type.
pub fn monthly_rate(resource_type: &str) -> f64 {
    RATES
        .iter()
        .find(|(kind, _)| *kind == resource_type)
        .map(|(_, rate)| *rate)
        .unwrap_or(DEFAULT_RATE)
}

/// Deterministic monthly estimate from the declared resource types.
pub struct CostEstimationStage;

#[async_trait]
impl Stage for CostEstimationStage {
    fn id(&self) -> StageId {
        StageId::CostEstimation
    }

    fn description(&self) -> &str {
        "Estimate the monthly cost of the declared resources"
    }

    async fn run(&self, state: &StateRecord) -> Result<StageOutput> {
        let Some(ref artifact) = state.artifact else {
            return Ok(StageOutput::fail(StateDelta::new(), "no configuration to estimate"));
        };

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for (kind, _) in declared_resources(artifact) {
            *counts.entry(kind).or_default() += 1;
        }

        let line_items: Vec<CostLineItem> = counts
            .into_iter()
            .map(|(resource_type, count)| {
                let monthly_usd = monthly_rate(&resource_type) * count as f64;
                CostLineItem {
                    resource_type,
                    count,
                    monthly_usd,
                }
            })
            .collect();
        let monthly_usd = line_items.iter().map(|i| i.monthly_usd).sum::<f64>();

        let mut data = StageData::new();
        data.insert("monthly_usd".to_string(), json!(monthly_usd));
        data.insert("resource_types".to_string(), json!(line_items.len()));

        let delta = StateDelta {
            result: Some(StageResult::completed(data)),
            cost_estimate: Some(CostEstimate {
                monthly_usd,
                line_items,
            }),
            ..Default::default()
        };
        Ok(StageOutput::proceed(delta, FlagUpdate::default()))
    }
}
