//! `when` guard predicates.
//!
//! A guard is a restricted `test`-style expression evaluated immediately
//! before a step runs. The expression is parsed once into a small AST at
//! step-construction time and evaluated without re-tokenising; operands
//! are resolved against the step context only at evaluation time, and a
//! resolved operand containing shell metacharacters is rejected. No shell
//! is ever invoked.

use crate::context::StepContext;
use crate::error::{Error, Result};
use crate::template;
use std::path::Path;

const UNSAFE_CHARS: [char; 8] = [';', '|', '&', '$', '`', '(', ')', '\n'];

/// File-test primitives supported by guards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTestFlag {
    /// `-d`: path is a directory
    Dir,
    /// `-f`: path is a regular file
    File,
    /// `-e`: path exists
    Exists,
    /// `-n`: string is non-empty
    NonEmptyString,
    /// `-r`: path is readable
    Readable,
    /// `-w`: path is writable
    Writable,
    /// `-x`: path is executable
    Executable,
    /// `-s`: path exists and is non-empty
    NonEmptyFile,
}

impl FileTestFlag {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "-d" => Some(Self::Dir),
            "-f" => Some(Self::File),
            "-e" => Some(Self::Exists),
            "-n" => Some(Self::NonEmptyString),
            "-r" => Some(Self::Readable),
            "-w" => Some(Self::Writable),
            "-x" => Some(Self::Executable),
            "-s" => Some(Self::NonEmptyFile),
            _ => None,
        }
    }
}

/// String comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=` or `==`
    Eq,
    /// `!=`
    Ne,
}

/// Parsed guard predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// A file or string test against a single operand
    FileTest {
        /// The test primitive
        flag: FileTestFlag,
        /// The operand, unresolved
        operand: String,
    },
    /// Negation of an inner predicate
    Not(Box<Predicate>),
    /// Literal string comparison
    Compare {
        /// The comparison operator
        op: CompareOp,
        /// Left operand, unresolved
        lhs: String,
        /// Right operand, unresolved
        rhs: String,
    },
    /// Short-circuit conjunction of clauses
    All(Vec<Predicate>),
}

/// A parsed `when` guard.
///
/// Keeps the original expression for diagnostics alongside the predicate
/// AST whose operands remain unresolved until [`Guard::evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Guard {
    raw: String,
    predicate: Predicate,
}

impl Guard {
    /// Parse a guard expression into its predicate AST.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStep`] for malformed expressions and
    /// [`Error::UnsafePredicate`] when an operand already carries shell
    /// metacharacters.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(Error::invalid_step("guard expression is empty"));
        }
        if raw.contains('\n') {
            return Err(Error::unsafe_predicate(raw));
        }

        let clauses: Vec<Predicate> = raw
            .split("&&")
            .map(|clause| parse_clause(clause, raw))
            .collect::<Result<_>>()?;

        let predicate = if clauses.len() == 1 {
            clauses.into_iter().next().unwrap_or(Predicate::All(Vec::new()))
        } else {
            Predicate::All(clauses)
        };

        Ok(Self {
            raw: raw.to_string(),
            predicate,
        })
    }

    /// The original guard expression
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The parsed predicate
    #[must_use]
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Resolve the operands against `ctx` and evaluate the predicate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsafePredicate`] when a resolved operand contains
    /// shell metacharacters.
    pub fn evaluate(&self, ctx: &StepContext) -> Result<bool> {
        evaluate_predicate(&self.predicate, ctx)
    }
}

impl std::fmt::Display for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_clause(clause: &str, raw: &str) -> Result<Predicate> {
    let tokens: Vec<&str> = clause.split_whitespace().collect();
    let Some((&first, rest)) = tokens.split_first() else {
        return Err(Error::invalid_step(format!(
            "empty clause in guard '{raw}'"
        )));
    };
    if first != "test" {
        return Err(Error::invalid_step(format!(
            "guard clause must start with 'test': '{raw}'"
        )));
    }

    let (negate, rest) = match rest.split_first() {
        Some((&"!", remainder)) => (true, remainder),
        _ => (false, rest),
    };

    let predicate = parse_terms(rest, raw)?;
    if negate {
        Ok(Predicate::Not(Box::new(predicate)))
    } else {
        Ok(predicate)
    }
}

fn parse_terms(terms: &[&str], raw: &str) -> Result<Predicate> {
    match terms {
        [flag_token, operand] if flag_token.starts_with('-') => {
            let Some(flag) = FileTestFlag::from_token(flag_token) else {
                return Err(Error::invalid_step(format!(
                    "unsupported test flag '{flag_token}' in guard '{raw}'"
                )));
            };
            let operand = strip_quotes(operand);
            check_operand(&operand)?;
            Ok(Predicate::FileTest { flag, operand })
        }
        [lhs, op_token, rhs] => {
            let op = match strip_quotes(op_token).as_str() {
                "=" | "==" => CompareOp::Eq,
                "!=" => CompareOp::Ne,
                other => {
                    return Err(Error::invalid_step(format!(
                        "unsupported comparison '{other}' in guard '{raw}'"
                    )))
                }
            };
            let lhs = strip_quotes(lhs);
            let rhs = strip_quotes(rhs);
            check_operand(&lhs)?;
            check_operand(&rhs)?;
            Ok(Predicate::Compare { op, lhs, rhs })
        }
        _ => Err(Error::invalid_step(format!(
            "malformed guard clause in '{raw}'"
        ))),
    }
}

fn strip_quotes(token: &str) -> String {
    let bytes = token.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'\'' && last == b'\'') || (first == b'"' && last == b'"') {
            return token[1..token.len() - 1].to_string();
        }
    }
    token.to_string()
}

fn check_operand(operand: &str) -> Result<()> {
    if operand.contains(UNSAFE_CHARS) {
        return Err(Error::unsafe_predicate(operand));
    }
    Ok(())
}

fn evaluate_predicate(predicate: &Predicate, ctx: &StepContext) -> Result<bool> {
    match predicate {
        Predicate::FileTest { flag, operand } => {
            let resolved = template::resolve(operand, ctx);
            check_operand(&resolved)?;
            Ok(evaluate_file_test(*flag, &resolved))
        }
        Predicate::Not(inner) => Ok(!evaluate_predicate(inner, ctx)?),
        Predicate::Compare { op, lhs, rhs } => {
            let lhs = template::resolve(lhs, ctx);
            let rhs = template::resolve(rhs, ctx);
            check_operand(&lhs)?;
            check_operand(&rhs)?;
            Ok(match op {
                CompareOp::Eq => lhs == rhs,
                CompareOp::Ne => lhs != rhs,
            })
        }
        Predicate::All(clauses) => {
            for clause in clauses {
                if !evaluate_predicate(clause, ctx)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

fn evaluate_file_test(flag: FileTestFlag, operand: &str) -> bool {
    let path = Path::new(operand);
    match flag {
        FileTestFlag::Dir => path.is_dir(),
        FileTestFlag::File => path.is_file(),
        FileTestFlag::Exists => path.exists(),
        FileTestFlag::NonEmptyString => !operand.is_empty(),
        FileTestFlag::NonEmptyFile => {
            std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
        }
        FileTestFlag::Readable => {
            std::fs::File::open(path).is_ok() || std::fs::read_dir(path).is_ok()
        }
        FileTestFlag::Writable => std::fs::metadata(path)
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false),
        FileTestFlag::Executable => is_executable(path),
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_test() {
        let guard = Guard::parse("test -d {contest_template_path}").unwrap();
        assert_eq!(
            guard.predicate(),
            &Predicate::FileTest {
                flag: FileTestFlag::Dir,
                operand: "{contest_template_path}".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_negation() {
        let guard = Guard::parse("test ! -f out.txt").unwrap();
        assert!(matches!(guard.predicate(), Predicate::Not(_)));
    }

    #[test]
    fn test_parse_string_compare_with_quotes() {
        let guard = Guard::parse("test {language} '=' 'python'").unwrap();
        assert_eq!(
            guard.predicate(),
            &Predicate::Compare {
                op: CompareOp::Eq,
                lhs: "{language}".to_string(),
                rhs: "python".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_conjunction() {
        let guard = Guard::parse("test -n {language} && test -d {workspace_path}").unwrap();
        match guard.predicate() {
            Predicate::All(clauses) => assert_eq!(clauses.len(), 2),
            other => panic!("expected conjunction, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_non_test_clause() {
        assert!(matches!(
            Guard::parse("rm -rf /"),
            Err(Error::InvalidStep { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_unsafe_operand() {
        assert!(matches!(
            Guard::parse("test -d $(pwd)"),
            Err(Error::UnsafePredicate { .. })
        ));
        assert!(matches!(
            Guard::parse("test -d a|b"),
            Err(Error::UnsafePredicate { .. })
        ));
    }

    #[test]
    fn test_unsafe_resolved_operand_rejected() {
        let ctx = StepContext::new().contest_name("x; rm -rf /");
        let guard = Guard::parse("test -n {contest_name}").unwrap();
        assert!(matches!(
            guard.evaluate(&ctx),
            Err(Error::UnsafePredicate { .. })
        ));
    }

    #[test]
    fn test_string_comparison_semantics() {
        let ctx = StepContext::new().language("python");
        assert!(Guard::parse("test {language} = python")
            .unwrap()
            .evaluate(&ctx)
            .unwrap());
        assert!(Guard::parse("test {language} == python")
            .unwrap()
            .evaluate(&ctx)
            .unwrap());
        assert!(!Guard::parse("test {language} != python")
            .unwrap()
            .evaluate(&ctx)
            .unwrap());
    }

    #[test]
    fn test_non_empty_string_flag() {
        let ctx = StepContext::new().language("python");
        assert!(Guard::parse("test -n {language}")
            .unwrap()
            .evaluate(&ctx)
            .unwrap());
        assert!(!Guard::parse("test -n {contest_name}")
            .unwrap()
            .evaluate(&ctx)
            .unwrap());
    }

    #[test]
    fn test_conjunction_short_circuits() {
        let guard =
            Guard::parse("test -n {language} && test -n {contest_name}").unwrap();

        // language is unset: the first clause is false and the unsafe
        // second operand is never resolved.
        let unsafe_ctx = StepContext::new().contest_name("a;b");
        assert!(!guard.evaluate(&unsafe_ctx).unwrap());

        // With the first clause true, the unsafe operand is reached.
        let reached = StepContext::new().language("python").contest_name("a;b");
        assert!(matches!(
            guard.evaluate(&reached),
            Err(Error::UnsafePredicate { .. })
        ));
    }
}
