//! Structured markers read out of reasoner replies.
//!
//! Routing intent is only ever taken from the fixed sentinel tokens below.
//! Everything else in a reply is content.

use std::sync::LazyLock;

use regex::Regex;

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[^\n]*\n(.*?)```").unwrap());

static RESOURCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*resource\s+"([A-Za-z0-9_-]+)"\s+"([A-Za-z0-9_-]+)""#).unwrap()
});

/// The closed set of sentinel tokens a reasoner may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentinel {
    ConsultationNeeded,
    UserInputRequired,
    Approved,
    Denied,
    ChangesRequested,
}

impl Sentinel {
    pub const ALL: [Sentinel; 5] = [
        Sentinel::ConsultationNeeded,
        Sentinel::UserInputRequired,
        Sentinel::Approved,
        Sentinel::Denied,
        Sentinel::ChangesRequested,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Sentinel::ConsultationNeeded => "<<TERRAFORM_CONSULTATION_NEEDED>>",
            Sentinel::UserInputRequired => "<<USER_INPUT_REQUIRED>>",
            Sentinel::Approved => "<<APPROVED>>",
            Sentinel::Denied => "<<DENIED>>",
            Sentinel::ChangesRequested => "<<CHANGES_REQUESTED>>",
        }
    }

    pub fn in_reply(self, reply: &str) -> bool {
        reply.contains(self.token())
    }
}

/// Every sentinel present in `reply`, in declaration order.
pub fn sentinels(reply: &str) -> Vec<Sentinel> {
    Sentinel::ALL
        .into_iter()
        .filter(|s| s.in_reply(reply))
        .collect()
}

/// Reply text with sentinel tokens removed.
pub fn strip_sentinels(reply: &str) -> String {
    Sentinel::ALL
        .iter()
        .fold(reply.to_string(), |text, s| text.replace(s.token(), ""))
        .trim()
        .to_string()
}

/// Pull the configuration artifact out of a reply.
///
/// Prefers the longest `hcl`/`terraform` fenced block; otherwise the first
/// fenced block that looks like configuration.
pub fn extract_artifact(reply: &str) -> Option<String> {
    let blocks: Vec<(String, String)> = FENCE_RE
        .captures_iter(reply)
        .map(|caps| {
            let lang = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            (lang.to_ascii_lowercase(), body.trim().to_string())
        })
        .filter(|(_, body)| !body.is_empty())
        .collect();

    let tagged = blocks
        .iter()
        .filter(|(lang, _)| matches!(lang.as_str(), "hcl" | "terraform" | "tf"))
        .max_by_key(|(_, body)| body.len());
    if let Some((_, body)) = tagged {
        return Some(body.clone());
    }

    blocks
        .into_iter()
        .find(|(_, body)| body.contains("resource \"") || body.contains("terraform {"))
        .map(|(_, body)| body)
}

/// `(type, name)` of every `resource` block declared in an artifact.
pub fn declared_resources(artifact: &str) -> Vec<(String, String)> {
    RESOURCE_RE
        .captures_iter(artifact)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect()
}
