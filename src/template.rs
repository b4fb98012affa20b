//! Template resolution for step commands and paths.
//!
//! Two passes run over declarative step fields: [`resolve`] substitutes
//! `{name}` placeholders from the [`StepContext`], and [`expand_patterns`]
//! substitutes named file-pattern tokens. Both are single left-to-right
//! scans: a substituted value is emitted verbatim and never rescanned, so
//! a string with no remaining `{...}` tokens is a fixed point.

use crate::context::StepContext;
use crate::step::StepKind;

/// Replace every `{name}` placeholder in `template` with the context value.
///
/// Unknown names pass through unchanged, which also leaves runtime result
/// placeholders (`{{step_X.Y}}`) intact for later substitution.
#[must_use]
pub fn resolve(template: &str, ctx: &StepContext) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(close) = template[i + 1..].find('}') {
                let name = &template[i + 1..i + 1 + close];
                if let Some(value) = ctx.value_of(name) {
                    out.push_str(value);
                } else {
                    out.push_str(&template[i..=i + 1 + close]);
                }
                i += close + 2;
                continue;
            }
        }
        let ch = template[i..].chars().next().unwrap_or('\0');
        out.push(ch);
        i += ch.len_utf8();
    }

    out
}

/// Expand `{pattern_name}` tokens against the context's file patterns,
/// then run ordinary placeholder resolution on the result.
///
/// The first pattern of the named list is used. For tree kinds
/// (`MoveTree`, `RmTree`, `CopyTree`) a pattern containing `/` only
/// contributes its directory prefix: `test/*.in` substitutes as `test`,
/// since a tree operation targets the directory rather than the globbed
/// files inside it.
#[must_use]
pub fn expand_patterns(template: &str, ctx: &StepContext, kind: StepKind) -> String {
    for (name, patterns) in ctx.file_patterns() {
        let placeholder = format!("{{{name}}}");
        if !template.contains(&placeholder) || patterns.is_empty() {
            continue;
        }

        let pattern = patterns[0].as_str();
        let substitution = if kind.is_tree_op() && pattern.contains('/') {
            pattern.split('/').next().unwrap_or(pattern)
        } else {
            pattern
        };

        let expanded = template.replace(&placeholder, substitution);
        return resolve(&expanded, ctx);
    }

    resolve(template, ctx)
}

/// Whether the string still contains an unresolved `{...}` token
#[must_use]
pub fn contains_token(text: &str) -> bool {
    if let Some(open) = text.find('{') {
        return text[open + 1..].contains('}');
    }
    false
}
