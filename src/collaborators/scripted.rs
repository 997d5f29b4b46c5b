use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::collaborators::Reasoner;
use crate::stages::prompt;

struct Script {
    needle: String,
    replies: VecDeque<String>,
}

/// Deterministic reasoner: replies are chosen by matching a needle against
/// the system context. The last reply of a script repeats once the others
/// are used up.
#[derive(Default)]
pub struct ScriptedReasoner {
    scripts: Mutex<Vec<Script>>,
    fallback: String,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `reply` for system contexts containing `needle`.
    pub fn on(self, needle: &str, reply: impl Into<String>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            match scripts.iter_mut().find(|s| s.needle == needle) {
                Some(script) => script.replies.push_back(reply.into()),
                None => scripts.push(Script {
                    needle: needle.to_string(),
                    replies: VecDeque::from([reply.into()]),
                }),
            }
        }
        self
    }

    pub fn fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = reply.into();
        self
    }

    /// Canned replies for every agent role; used by `--offline`.
    pub fn offline() -> Self {
        Self::new()
            .on(
                prompt::ARCHITECT_ROLE,
                "Requirements analysis: a single-region deployment with encryption at rest, \
                 HTTPS-only access, audit logging and standard governance tags.",
            )
            .on(prompt::ENGINEER_ROLE, OFFLINE_TEMPLATE)
            .on(
                prompt::CONSULTANT_ROLE,
                "Pin provider versions and keep storage accounts private.",
            )
            .on(prompt::APPROVAL_ROLE, "Unclear response. <<DENIED>>")
    }

    /// Every `(system, conversation)` pair seen so far.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, needle: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(system, _)| system.contains(needle))
            .count()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn invoke(&self, system: &str, conversation: &[String]) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((system.to_string(), conversation.to_vec()));
        }

        let mut scripts = self
            .scripts
            .lock()
            .map_err(|_| anyhow!("scripted reasoner lock poisoned"))?;
        let reply = scripts
            .iter_mut()
            .find(|s| system.contains(&s.needle))
            .and_then(|script| {
                if script.replies.len() > 1 {
                    script.replies.pop_front()
                } else {
                    script.replies.front().cloned()
                }
            });
        Ok(reply.unwrap_or_else(|| self.fallback.clone()))
    }
}

const OFFLINE_TEMPLATE: &str = r#"Here is the configuration.

```hcl
terraform {
  required_providers {
    azurerm = {
      source  = "hashicorp/azurerm"
      version = "~> 3.0"
    }
  }
}

provider "azurerm" {
  features {}
}

resource "azurerm_resource_group" "main" {
  name     = "rg-infraflow"
  location = "westeurope"
  tags = { environment = "dev", owner = "platform" }
}

resource "azurerm_storage_account" "main" {
  name                            = "stinfraflow"
  resource_group_name             = azurerm_resource_group.main.name
  location                        = azurerm_resource_group.main.location
  account_tier                    = "Standard"
  account_replication_type        = "GRS"
  enable_https_traffic_only       = true
  infrastructure_encryption_enabled = true
  public_network_access_enabled   = false
  min_tls_version                 = "TLS1_2"
  tags = { environment = "dev", owner = "platform" }
}
```
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripts_pop_then_repeat_last() {
        let reasoner = ScriptedReasoner::new()
            .on("engineer", "first")
            .on("engineer", "second")
            .fallback("none");
        assert_eq!(reasoner.invoke("you are an engineer", &[]).await.unwrap(), "first");
        assert_eq!(reasoner.invoke("you are an engineer", &[]).await.unwrap(), "second");
        assert_eq!(reasoner.invoke("you are an engineer", &[]).await.unwrap(), "second");
        assert_eq!(reasoner.invoke("architect", &[]).await.unwrap(), "none");
        assert_eq!(reasoner.call_count("engineer"), 3);
    }
}
