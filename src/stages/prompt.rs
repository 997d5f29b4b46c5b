//! System prompts for the agent-backed stages and `${name}` rendering.

use std::collections::BTreeMap;

pub const ARCHITECT_ROLE: &str = "Cloud Architect";
pub const ENGINEER_ROLE: &str = "Cloud Engineer";
pub const CONSULTANT_ROLE: &str = "Terraform Consultant";
pub const APPROVAL_ROLE: &str = "Approval Reviewer";

pub const ARCHITECT_PROMPT: &str = "You are the ${role} on an infrastructure team.
Analyse the user's request and produce a short requirements summary covering
workloads, data sensitivity, region and availability needs.
Compliance frameworks in scope: ${frameworks}.
If, and only if, a decision cannot be made without the user, ask exactly one
question and end your reply with ${ask_token}.";

pub const ENGINEER_PROMPT: &str = "You are the ${role} on an infrastructure team.
Write a complete Terraform configuration for the requirements below, in a single
```hcl fenced block.
Compliance frameworks in scope: ${frameworks}.
Requirements:
${analysis}
${feedback}
If you need expert help with provider or module usage, say so briefly and end
your reply with ${consult_token} instead of guessing.";

pub const CONSULTANT_PROMPT: &str = "You are the ${role}.
An engineer asked for help with the configuration below. Give concrete,
short guidance: provider versions, resource arguments, module choices.
Current draft:
${artifact}";

pub const APPROVAL_PROMPT: &str = "You are the ${role}.
A human replied to a deployment approval request. Decide whether the reply
grants approval, refuses it, or asks for changes to the configuration.
Answer with ${approved_token}, ${denied_token} or ${changes_token} and nothing else.
Approval request: ${request_id}";

/// Substitute `${name}` placeholders. Unknown names render as empty strings.
pub fn render(template: &str, vars: &BTreeMap<&str, String>) -> String {
    let mut result = template.to_string();
    let mut start = 0;

    loop {
        let open = match result[start..].find("${") {
            Some(pos) => start + pos,
            None => break,
        };
        let close = match result[open..].find('}') {
            Some(pos) => open + pos,
            None => break,
        };

        let name = &result[open + 2..close];
        let value = vars.get(name).cloned().unwrap_or_default();
        result.replace_range(open..=close, &value);
        start = open + value.len();
    }

    result
}

/// Comma-separated framework list, or a placeholder when none is selected.
pub fn framework_list<'a>(frameworks: impl IntoIterator<Item = &'a String>) -> String {
    let list: Vec<&str> = frameworks.into_iter().map(String::as_str).collect();
    if list.is_empty() {
        "none selected (apply general best practice)".to_string()
    } else {
        list.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_names() {
        let vars = BTreeMap::from([("role", "Engineer".to_string())]);
        assert_eq!(render("Hello ${role}!", &vars), "Hello Engineer!");
    }

    #[test]
    fn unknown_names_render_empty() {
        assert_eq!(render("a${missing}b", &BTreeMap::new()), "ab");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let vars = BTreeMap::from([("x", "${x}".to_string())]);
        assert_eq!(render("${x}${x}", &vars), "${x}${x}");
    }

    #[test]
    fn unterminated_placeholder_is_left_alone() {
        assert_eq!(render("cost ${oops", &BTreeMap::new()), "cost ${oops");
    }

    #[test]
    fn empty_framework_list_has_placeholder() {
        let none: Vec<String> = vec![];
        assert!(framework_list(&none).starts_with("none selected"));
        let some = vec!["GDPR".to_string(), "SOX".to_string()];
        assert_eq!(framework_list(&some), "GDPR, SOX");
    }
}
