//! Cross-step result substitution.
//!
//! Before a node executes, `{{step_X.result.Y}}` and `{{step_X.Y}}`
//! placeholders in its derived request are replaced with field `Y` of
//! node `step_X`'s recorded result. Replacement is textual; a missing
//! step or field leaves the placeholder intact. Because substitution
//! runs after the topological order is fixed, the referenced node has
//! always executed already.

use crate::driver::{ExecutionRequest, StepResult};
use std::collections::HashMap;

/// Replace result placeholders in one string.
#[must_use]
pub fn substitute_placeholders(text: &str, results: &HashMap<String, StepResult>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{step_") {
        out.push_str(&rest[..start]);
        let body = &rest[start + 2..];
        let Some(end) = body.find("}}") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };

        let token = &body[..end];
        let replacement = parse_token(token)
            .and_then(|(step_id, field)| results.get(&step_id).and_then(|r| r.field(&field)));
        match replacement {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[start..start + end + 4]),
        }
        rest = &rest[start + end + 4..];
    }

    out.push_str(rest);
    out
}

/// Apply substitution to every rewritable field of a request: the
/// argument vector plus `path`, `dst_path`, and `command`.
pub fn apply_substitution(request: &mut ExecutionRequest, results: &HashMap<String, StepResult>) {
    for arg in &mut request.args {
        *arg = substitute_placeholders(arg, results);
    }
    for field in [&mut request.path, &mut request.dst_path, &mut request.command] {
        if let Some(value) = field {
            *value = substitute_placeholders(value, results);
        }
    }
}

/// Extract `(step_id, field)` pairs referenced by a string.
#[must_use]
pub fn extract_placeholders(text: &str) -> Vec<(String, String)> {
    let mut found = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("{{step_") {
        let body = &rest[start + 2..];
        let Some(end) = body.find("}}") else { break };
        if let Some(pair) = parse_token(&body[..end]) {
            if !found.contains(&pair) {
                found.push(pair);
            }
        }
        rest = &rest[start + end + 4..];
    }

    found
}

/// Split a `step_X.result.Y` / `step_X.Y` token into the node id and
/// the field name.
fn parse_token(token: &str) -> Option<(String, String)> {
    let rest = token.strip_prefix("step_")?;
    let dot = rest.find('.')?;
    let (step, tail) = rest.split_at(dot);
    let tail = &tail[1..];
    let field = tail.strip_prefix("result.").unwrap_or(tail);

    if step.is_empty() || !is_identifier(step) || field.is_empty() || !is_identifier(field) {
        return None;
    }
    Some((format!("step_{step}"), field.to_string()))
}

fn is_identifier(text: &str) -> bool {
    text.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
