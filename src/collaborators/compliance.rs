use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context as _, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::collaborators::{ComplianceReport, ComplianceValidator};

/// Declaration order is sort order: critical findings come first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One framework-tagged rule.
pub struct ComplianceRule {
    pub id: &'static str,
    pub name: &'static str,
    pub severity: Severity,
    pub frameworks: &'static [&'static str],
    /// Must be present somewhere in the artifact.
    pub required: Option<Regex>,
    /// Must not be present anywhere in the artifact.
    pub forbidden: Option<Regex>,
}

impl ComplianceRule {
    pub fn new(
        id: &'static str,
        name: &'static str,
        severity: Severity,
        frameworks: &'static [&'static str],
    ) -> Self {
        Self {
            id,
            name,
            severity,
            frameworks,
            required: None,
            forbidden: None,
        }
    }

    pub fn requires(mut self, pattern: &str) -> Result<Self> {
        self.required = Some(compile(pattern)?);
        Ok(self)
    }

    pub fn forbids(mut self, pattern: &str) -> Result<Self> {
        self.forbidden = Some(compile(pattern)?);
        Ok(self)
    }

    fn tagged(&self, framework: &str) -> bool {
        self.frameworks
            .iter()
            .any(|f| f.eq_ignore_ascii_case(framework))
    }

    fn applies_to(&self, frameworks: &BTreeSet<String>) -> bool {
        frameworks.is_empty() || frameworks.iter().any(|f| self.tagged(f))
    }

    /// `None` when the artifact satisfies the rule.
    fn check(&self, artifact: &str) -> Option<String> {
        if let Some(ref required) = self.required
            && !required.is_match(artifact)
        {
            return Some(format!("{} [{}]: missing {}", self.id, self.severity, self.name));
        }
        if let Some(ref forbidden) = self.forbidden
            && let Some(found) = forbidden.find(artifact)
        {
            let excerpt: String = found.as_str().chars().take(50).collect();
            return Some(format!(
                "{} [{}]: {} (found `{}`)",
                self.id, self.severity, self.name, excerpt
            ));
        }
        None
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .with_context(|| format!("Invalid compliance pattern: {}", pattern))
}

/// Regex rule set validator.
pub struct RuleValidator {
    rules: Vec<ComplianceRule>,
}

impl RuleValidator {
    pub fn new(rules: Vec<ComplianceRule>) -> Self {
        Self { rules }
    }

    /// Built-in rules covering PCI DSS, HIPAA, SOX, GDPR and ISO 27001.
    pub fn standard() -> Result<Self> {
        let rules = vec![
            ComplianceRule::new("pci_001", "hardcoded card data", Severity::Critical, &["PCI DSS"])
                .forbids(r"\b4[0-9]{12}(?:[0-9]{3})?\b|\b5[1-5][0-9]{14}\b|\b3[47][0-9]{13}\b")?,
            ComplianceRule::new("pci_002", "encryption at rest", Severity::Critical, &["PCI DSS", "HIPAA"])
                .requires(r"encrypt\w*\s*=\s*true|encryption")?
                .forbids(r"encrypt\w*\s*=\s*false")?,
            ComplianceRule::new("hipaa_001", "HTTPS-only transport", Severity::Critical, &["HIPAA", "SOX"])
                .requires(r"https_traffic_only\w*\s*=\s*true|ssl_enforcement_enabled\s*=\s*true|min_tls_version")?,
            ComplianceRule::new("hipaa_002", "audit logging", Severity::High, &["HIPAA", "SOX", "ISO 27001"])
                .requires(r"diagnostic_setting|log_analytics|audit")?,
            ComplianceRule::new("sox_001", "network segmentation", Severity::High, &["SOX", "ISO 27001"])
                .requires(r"network_security_group|subnet|virtual_network|network_rules")?,
            ComplianceRule::new("sox_002", "backup and recovery", Severity::High, &["SOX", "ISO 27001"])
                .requires(r#"backup|recovery|geo_redundant|replication_type\s*=\s*"\w*grs""#)?,
            ComplianceRule::new("gdpr_001", "EU data residency", Severity::Critical, &["GDPR"])
                .requires(r#"location\s*=\s*"[^"]*(europe|eu-)"#)?,
            ComplianceRule::new("gdpr_002", "data retention policy", Severity::High, &["GDPR"])
                .requires(r"retention|lifecycle|delete_after")?,
            ComplianceRule::new("iso_001", "least-privilege role assignment", Severity::High, &["ISO 27001", "SOX", "HIPAA"])
                .forbids(r#"role_definition_name\s*=\s*"owner"|actions\s*=\s*\[\s*"\*"\s*\]"#)?,
            ComplianceRule::new("azure_001", "no public database access", Severity::Critical, &["PCI DSS", "HIPAA", "SOX"])
                .forbids(r#"public_network_access_enabled\s*=\s*true|start_ip_address\s*=\s*"0\.0\.0\.0""#)?,
            ComplianceRule::new("azure_002", "web application firewall", Severity::High, &["PCI DSS", "ISO 27001"])
                .requires(r"web_application_firewall|waf_configuration|firewall_policy")?,
            ComplianceRule::new("azure_003", "governance tags", Severity::Medium, &["SOX", "ISO 27001"])
                .requires(r"(?s)tags\s*=\s*\{[^}]*(environment|owner)\s*=")?,
        ];
        Ok(Self::new(rules))
    }
}

impl ComplianceValidator for RuleValidator {
    fn validate(&self, artifact: &str, frameworks: &BTreeSet<String>) -> ComplianceReport {
        let applicable: Vec<&ComplianceRule> = self
            .rules
            .iter()
            .filter(|rule| rule.applies_to(frameworks))
            .collect();

        let mut failed: Vec<(&ComplianceRule, String)> = applicable
            .iter()
            .filter_map(|rule| rule.check(artifact).map(|v| (*rule, v)))
            .collect();
        // Stable, so equal keys keep rule order.
        failed.sort_by_key(|(rule, _)| (rule.severity, Reverse(rule.frameworks.len())));

        let checked = applicable.len();
        let score = percent(checked, failed.len());

        let names: BTreeSet<String> = if frameworks.is_empty() {
            self.rules
                .iter()
                .flat_map(|rule| rule.frameworks.iter().map(|f| f.to_string()))
                .collect()
        } else {
            frameworks.clone()
        };
        let framework_scores = names
            .into_iter()
            .map(|name| {
                let tagged = applicable.iter().filter(|r| r.tagged(&name)).count();
                let violated = failed.iter().filter(|(r, _)| r.tagged(&name)).count();
                (name, percent(tagged, violated))
            })
            .collect();

        ComplianceReport {
            score,
            violations: failed.into_iter().map(|(_, v)| v).collect(),
            rules_checked: checked,
            framework_scores,
        }
    }
}

/// Share of `total` that passed; 100 when there is nothing to check.
fn percent(total: usize, failed: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        (total - failed) as f64 / total as f64 * 100.0
    }
}
