//! Step parser: declarative step records to typed, validated steps.
//!
//! Records are string-keyed JSON maps. Parsing one record never aborts
//! the batch; errors are collected per record and surviving steps keep
//! flowing down the pipeline.

use crate::context::StepContext;
use crate::error::{Error, Result};
use crate::step::{Step, StepBuilder, StepKind};
use crate::template;
use serde_json::Value;
use tracing::debug;

/// Outcome of parsing a batch of declarative records.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// Steps that parsed and validated
    pub steps: Vec<Step>,
    /// Per-record errors, indexed in the message
    pub errors: Vec<Error>,
    /// Non-fatal notes
    pub warnings: Vec<String>,
}

impl ParseOutcome {
    /// Whether every record produced a step
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parse a sequence of declarative step records against a context.
///
/// Each record needs a `type` naming a step kind and a `cmd` list.
/// Records that fail to parse are skipped with an error; subsequent
/// records are still attempted.
#[must_use]
pub fn parse_steps(records: &[Value], ctx: &StepContext) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();

    for (index, record) in records.iter().enumerate() {
        match parse_step(record, ctx) {
            Ok(step) => outcome.steps.push(step),
            Err(err) => {
                debug!(index, %err, "skipping invalid step record");
                outcome
                    .errors
                    .push(Error::invalid_step(format!("step {index}: {err}")));
            }
        }
    }

    outcome
}

/// Parse a single declarative step record.
///
/// # Errors
///
/// Returns [`Error::InvalidStep`] when the record is not a map, names an
/// unknown kind, has a non-list `cmd`, or violates the kind's arity.
pub fn parse_step(record: &Value, ctx: &StepContext) -> Result<Step> {
    let map = record
        .as_object()
        .ok_or_else(|| Error::invalid_step("step record must be a map"))?;

    let kind_name = map
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_step("step must have a 'type' field"))?;
    let kind = StepKind::from_name(kind_name)
        .ok_or_else(|| Error::invalid_step(format!("unknown step type: {kind_name}")))?;

    let raw_cmd = map
        .get("cmd")
        .ok_or_else(|| Error::invalid_step("step must have a 'cmd' field"))?
        .as_array()
        .ok_or_else(|| Error::invalid_step("step 'cmd' must be a list"))?;

    let cmd = resolve_cmd(kind, raw_cmd, ctx);

    let mut builder = Step::builder(kind).args(cmd);
    builder = apply_optional_fields(builder, map, ctx)?;
    builder.build()
}

/// Resolve each command argument; for two-argument file operations the
/// source and destination additionally receive file-pattern expansion.
fn resolve_cmd(kind: StepKind, raw_cmd: &[Value], ctx: &StepContext) -> Vec<String> {
    raw_cmd
        .iter()
        .enumerate()
        .map(|(position, value)| {
            let text = coerce_to_string(value);
            if kind.expands_patterns() && raw_cmd.len() >= 2 && position < 2 {
                template::expand_patterns(&text, ctx, kind)
            } else {
                template::resolve(&text, ctx)
            }
        })
        .collect()
}

fn apply_optional_fields(
    mut builder: StepBuilder,
    map: &serde_json::Map<String, Value>,
    ctx: &StepContext,
) -> Result<StepBuilder> {
    if let Some(allow) = map.get("allow_failure") {
        builder = builder.allow_failure(allow.as_bool().unwrap_or(false));
    }
    if let Some(show) = map.get("show_output") {
        builder = builder.show_output(show.as_bool().unwrap_or(false));
    }
    if let Some(cwd) = map.get("cwd").and_then(Value::as_str) {
        builder = builder.cwd(template::resolve(cwd, ctx));
    }
    // The guard stays unresolved for lazy evaluation at execution time.
    if let Some(when) = map.get("when").and_then(Value::as_str) {
        builder = builder.when(when);
    }
    if let Some(name) = map.get("name").and_then(Value::as_str) {
        builder = builder.name(template::resolve(name, ctx));
    }
    if let Some(env) = map.get("force_env_type").and_then(Value::as_str) {
        builder = builder.force_env_type(env);
    }
    if let Some(workers) = map.get("max_workers") {
        let workers = workers
            .as_u64()
            .ok_or_else(|| Error::invalid_step("'max_workers' must be a positive integer"))?;
        builder = builder.max_workers(usize::try_from(workers).unwrap_or(usize::MAX));
    }
    Ok(builder)
}

/// String coercion for command elements: `null` becomes the empty
/// string, other scalars their display form.
fn coerce_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> StepContext {
        StepContext::new()
            .contest_name("abc300")
            .language("python")
            .workspace_path("./workspace")
            .contest_current_path("./contest_current")
            .contest_template_path("./templates/python")
            .source_file_name("main.py")
            .file_pattern("source", ["*.py"])
    }

    #[test]
    fn test_parse_copy_record() {
        let record = json!({
            "type": "copy",
            "cmd": ["{contest_template_path}/main.py",
                    "{contest_current_path}/{source_file_name}"],
            "allow_failure": false,
            "when": "test -d {contest_template_path}"
        });

        let step = parse_step(&record, &context()).unwrap();
        assert_eq!(step.kind(), StepKind::Copy);
        assert_eq!(
            step.cmd(),
            ["./templates/python/main.py", "./contest_current/main.py"]
        );
        assert!(step.when().is_some());
        assert!(!step.allow_failure());
    }

    #[test]
    fn test_pattern_expansion_applies_to_first_two_args() {
        let record = json!({
            "type": "copy",
            "cmd": ["{contest_current_path}/{source}", "backup/{source}", "{source}"]
        });
        let step = parse_step(&record, &context()).unwrap();
        assert_eq!(step.cmd()[0], "./contest_current/*.py");
        assert_eq!(step.cmd()[1], "backup/*.py");
        // The third argument gets plain resolution only.
        assert_eq!(step.cmd()[2], "{source}");
    }

    #[test]
    fn test_missing_type_is_error() {
        let outcome = parse_steps(&[json!({"cmd": ["x"]})], &context());
        assert_eq!(outcome.steps.len(), 0);
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn test_unknown_kind_skips_record_but_continues() {
        let records = vec![
            json!({"type": "teleport", "cmd": ["a", "b"]}),
            json!({"type": "mkdir", "cmd": ["out"]}),
        ];
        let outcome = parse_steps(&records, &context());
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.steps[0].kind(), StepKind::Mkdir);
    }

    #[test]
    fn test_cmd_must_be_list() {
        let record = json!({"type": "shell", "cmd": "echo hi"});
        assert!(matches!(
            parse_step(&record, &context()),
            Err(Error::InvalidStep { .. })
        ));
    }

    #[test]
    fn test_null_argument_coerces_to_empty() {
        let record = json!({"type": "shell", "cmd": ["echo", null, 42]});
        let step = parse_step(&record, &context()).unwrap();
        assert_eq!(step.cmd(), ["echo", "", "42"]);
    }

    #[test]
    fn test_optional_fields() {
        let record = json!({
            "type": "shell",
            "cmd": ["make"],
            "cwd": "{workspace_path}",
            "name": "build {contest_name}",
            "show_output": true,
            "force_env_type": "docker",
            "max_workers": 4
        });
        let step = parse_step(&record, &context()).unwrap();
        assert_eq!(step.cwd(), Some("./workspace"));
        assert_eq!(step.name(), Some("build abc300"));
        assert!(step.show_output());
        assert_eq!(step.force_env_type(), Some("docker"));
        assert_eq!(step.max_workers(), 4);
    }

    #[test]
    fn test_invalid_guard_is_collected() {
        let record = json!({
            "type": "shell",
            "cmd": ["make"],
            "when": "rm -rf /"
        });
        let outcome = parse_steps(&[record], &context());
        assert!(outcome.steps.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }
}
