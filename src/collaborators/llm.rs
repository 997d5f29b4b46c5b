use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::collaborators::Reasoner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provider {
    OpenAI,
    OpenAICompatible,
    Azure,
}

impl Provider {
    fn resolve(name: Option<&str>) -> Self {
        match name.unwrap_or("openai").to_ascii_lowercase().as_str() {
            "openai_compatible" | "compatible" => Self::OpenAICompatible,
            "azure" => Self::Azure,
            _ => Self::OpenAI,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::OpenAICompatible => "openai_compatible",
            Self::Azure => "azure",
        }
    }
}

/// Chat-completions settings. Unset values fall back to environment variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmSettings {
    pub provider: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    /// Per-request timeout in seconds.
    pub timeout: Option<f64>,
    pub azure_endpoint: Option<String>,
    pub azure_deployment: Option<String>,
    pub azure_api_version: Option<String>,
}

fn setting_or_env(value: &Option<String>, env_key: &str) -> Option<String> {
    value
        .clone()
        .filter(|v| !v.is_empty())
        .or_else(|| std::env::var(env_key).ok().filter(|v| !v.is_empty()))
}

/// Reasoner backed by an OpenAI, OpenAI-compatible or Azure chat endpoint.
pub struct OpenAiReasoner {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
    provider: Provider,
    model: String,
    temperature: Option<f64>,
    max_tokens: Option<u64>,
}

impl OpenAiReasoner {
    pub fn from_settings(settings: &LlmSettings) -> Result<Self> {
        let provider = Provider::resolve(settings.provider.as_deref());
        let mut headers = HeaderMap::new();

        let (endpoint, model) = match provider {
            Provider::OpenAI | Provider::OpenAICompatible => {
                let base_url = if provider == Provider::OpenAICompatible {
                    setting_or_env(&settings.base_url, "OPENAI_COMPATIBLE_BASE_URL")
                        .or_else(|| setting_or_env(&settings.base_url, "LLM_BASE_URL"))
                        .ok_or_else(|| {
                            anyhow!(
                                "llm ({}) requires 'base_url' or OPENAI_COMPATIBLE_BASE_URL/LLM_BASE_URL",
                                provider.name()
                            )
                        })?
                } else {
                    setting_or_env(&settings.base_url, "OPENAI_BASE_URL")
                        .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                };

                let api_key = setting_or_env(&settings.api_key, "OPENAI_API_KEY")
                    .ok_or_else(|| anyhow!("llm (openai) requires 'api_key' or OPENAI_API_KEY"))?;
                headers.insert(
                    HeaderName::from_static("authorization"),
                    HeaderValue::from_str(&format!("Bearer {api_key}"))?,
                );

                let endpoint = format!("{}/chat/completions", base_url.trim_end_matches('/'));
                let model = setting_or_env(&settings.model, "LLM_MODEL")
                    .unwrap_or_else(|| "gpt-4o-mini".to_string());
                (endpoint, model)
            }
            Provider::Azure => {
                let azure_endpoint =
                    setting_or_env(&settings.azure_endpoint, "AZURE_OPENAI_ENDPOINT").ok_or_else(
                        || anyhow!("llm (azure) requires 'azure_endpoint' or AZURE_OPENAI_ENDPOINT"),
                    )?;
                let api_version =
                    setting_or_env(&settings.azure_api_version, "AZURE_OPENAI_API_VERSION")
                        .unwrap_or_else(|| "2024-08-01-preview".to_string());
                let deployment =
                    setting_or_env(&settings.azure_deployment, "AZURE_OPENAI_CHAT_DEPLOYMENT")
                        .ok_or_else(|| {
                            anyhow!(
                                "llm (azure) requires 'azure_deployment' or AZURE_OPENAI_CHAT_DEPLOYMENT"
                            )
                        })?;

                let api_key = setting_or_env(&settings.api_key, "AZURE_OPENAI_API_KEY")
                    .ok_or_else(|| {
                        anyhow!("llm (azure) requires 'api_key' or AZURE_OPENAI_API_KEY")
                    })?;
                headers.insert(
                    HeaderName::from_static("api-key"),
                    HeaderValue::from_str(&api_key)?,
                );

                let endpoint = format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
                    azure_endpoint.trim_end_matches('/'),
                    deployment,
                    api_version
                );
                let model = settings.model.clone().unwrap_or(deployment);
                (endpoint, model)
            }
        };

        let timeout_s = settings.timeout.unwrap_or(120.0).max(1.0);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(timeout_s))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            headers,
            provider,
            model,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_body(&self, system: &str, conversation: &[String]) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": system })];
        let transcript = if conversation.is_empty() {
            "Begin.".to_string()
        } else {
            conversation.join("\n\n")
        };
        messages.push(json!({ "role": "user", "content": transcript }));

        let mut body = json!({ "model": self.model, "messages": messages });
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }
}

fn extract_text(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            if !s.is_empty() {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(s);
            }
        }
        Value::Array(items) => {
            for item in items {
                extract_text(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(text) = map.get("text").or_else(|| map.get("content")) {
                extract_text(text, out);
            }
        }
        _ => {}
    }
}

fn extract_chat_reply(data: &Value) -> Option<String> {
    let first = data.get("choices")?.as_array()?.first()?;
    let mut out = String::new();

    if let Some(content) = first.get("message").and_then(|m| m.get("content")) {
        extract_text(content, &mut out);
    }
    if out.is_empty()
        && let Some(text) = first.get("text").and_then(|v| v.as_str())
    {
        out.push_str(text);
    }

    if out.is_empty() { None } else { Some(out) }
}

#[async_trait]
impl Reasoner for OpenAiReasoner {
    async fn invoke(&self, system: &str, conversation: &[String]) -> Result<String> {
        let body = self.build_body(system, conversation);

        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("llm: request failed: {}", e))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| anyhow!("llm: failed to read response body: {}", e))?;

        if !status.is_success() {
            bail!(
                "llm: request to {} ({}) returned {}: {}",
                self.provider.name(),
                self.endpoint,
                status,
                response_text
            );
        }

        let parsed: Value = serde_json::from_str(&response_text)
            .map_err(|e| anyhow!("llm: response is not JSON: {}", e))?;
        extract_chat_reply(&parsed).ok_or_else(|| anyhow!("llm: response contained no reply text"))
    }
}
