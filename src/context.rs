//! The named-value environment consulted by the template resolver.
//!
//! A [`StepContext`] is built once per workflow run and never mutated
//! afterwards; the resolver reads it through [`StepContext::value_of`] and
//! [`StepContext::file_patterns`].

use std::collections::BTreeMap;

/// Immutable evaluation environment for step generation.
///
/// Carries the identifiers and paths that `{name}` placeholders resolve
/// against, plus the named file-pattern lists used by pattern expansion.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    contest_name: String,
    problem_name: String,
    language: String,
    env_type: String,
    command_type: String,
    workspace_path: String,
    contest_current_path: String,
    contest_stock_path: Option<String>,
    contest_template_path: Option<String>,
    contest_temp_path: Option<String>,
    source_file_name: Option<String>,
    language_id: Option<String>,
    run_command: Option<String>,
    file_patterns: BTreeMap<String, Vec<String>>,
}

impl StepContext {
    /// Create an empty context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the contest identifier
    #[must_use]
    pub fn contest_name(mut self, name: impl Into<String>) -> Self {
        self.contest_name = name.into();
        self
    }

    /// Set the problem identifier
    #[must_use]
    pub fn problem_name(mut self, name: impl Into<String>) -> Self {
        self.problem_name = name.into();
        self
    }

    /// Set the language tag
    #[must_use]
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the environment tag (e.g. "local", "docker")
    #[must_use]
    pub fn env_type(mut self, env_type: impl Into<String>) -> Self {
        self.env_type = env_type.into();
        self
    }

    /// Set the command tag the workflow was invoked for
    #[must_use]
    pub fn command_type(mut self, command_type: impl Into<String>) -> Self {
        self.command_type = command_type.into();
        self
    }

    /// Set the workspace path
    #[must_use]
    pub fn workspace_path(mut self, path: impl Into<String>) -> Self {
        self.workspace_path = path.into();
        self
    }

    /// Set the current-work path
    #[must_use]
    pub fn contest_current_path(mut self, path: impl Into<String>) -> Self {
        self.contest_current_path = path.into();
        self
    }

    /// Set the stock path
    #[must_use]
    pub fn contest_stock_path(mut self, path: impl Into<String>) -> Self {
        self.contest_stock_path = Some(path.into());
        self
    }

    /// Set the template path
    #[must_use]
    pub fn contest_template_path(mut self, path: impl Into<String>) -> Self {
        self.contest_template_path = Some(path.into());
        self
    }

    /// Set the temporary path
    #[must_use]
    pub fn contest_temp_path(mut self, path: impl Into<String>) -> Self {
        self.contest_temp_path = Some(path.into());
        self
    }

    /// Set the source file name
    #[must_use]
    pub fn source_file_name(mut self, name: impl Into<String>) -> Self {
        self.source_file_name = Some(name.into());
        self
    }

    /// Set the language id
    #[must_use]
    pub fn language_id(mut self, id: impl Into<String>) -> Self {
        self.language_id = Some(id.into());
        self
    }

    /// Set the run command
    #[must_use]
    pub fn run_command(mut self, command: impl Into<String>) -> Self {
        self.run_command = Some(command.into());
        self
    }

    /// Register a named file-pattern list (e.g. `source` -> `["*.py"]`)
    #[must_use]
    pub fn file_pattern(
        mut self,
        name: impl Into<String>,
        patterns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.file_patterns
            .insert(name.into(), patterns.into_iter().map(Into::into).collect());
        self
    }

    /// Look up a named value.
    ///
    /// `language_name` is accepted as an alias for `language`.
    #[must_use]
    pub fn value_of(&self, name: &str) -> Option<&str> {
        match name {
            "contest_name" => Some(&self.contest_name),
            "problem_name" => Some(&self.problem_name),
            "language" | "language_name" => Some(&self.language),
            "env_type" => Some(&self.env_type),
            "command_type" => Some(&self.command_type),
            "workspace_path" | "local_workspace_path" => Some(&self.workspace_path),
            "contest_current_path" => Some(&self.contest_current_path),
            "contest_stock_path" => self.contest_stock_path.as_deref(),
            "contest_template_path" => self.contest_template_path.as_deref(),
            "contest_temp_path" => self.contest_temp_path.as_deref(),
            "source_file_name" => self.source_file_name.as_deref(),
            "language_id" => self.language_id.as_deref(),
            "run_command" => self.run_command.as_deref(),
            _ => None,
        }
    }

    /// The named file-pattern lists
    #[must_use]
    pub fn file_patterns(&self) -> &BTreeMap<String, Vec<String>> {
        &self.file_patterns
    }

    /// Serialise the context to a flat key -> value dictionary.
    ///
    /// This is the shape the template resolver operates over; optional
    /// values that were never set are omitted rather than rendered empty.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("contest_name".to_string(), self.contest_name.clone());
        map.insert("problem_name".to_string(), self.problem_name.clone());
        map.insert("language".to_string(), self.language.clone());
        map.insert("language_name".to_string(), self.language.clone());
        map.insert("env_type".to_string(), self.env_type.clone());
        map.insert("command_type".to_string(), self.command_type.clone());
        map.insert("workspace_path".to_string(), self.workspace_path.clone());
        map.insert(
            "contest_current_path".to_string(),
            self.contest_current_path.clone(),
        );
        let optionals = [
            ("contest_stock_path", &self.contest_stock_path),
            ("contest_template_path", &self.contest_template_path),
            ("contest_temp_path", &self.contest_temp_path),
            ("source_file_name", &self.source_file_name),
            ("language_id", &self.language_id),
            ("run_command", &self.run_command),
        ];
        for (key, value) in optionals {
            if let Some(value) = value {
                map.insert(key.to_string(), value.clone());
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_context() -> StepContext {
        StepContext::new()
            .contest_name("abc300")
            .problem_name("a")
            .language("python")
            .env_type("local")
            .command_type("test")
            .workspace_path("./workspace")
            .contest_current_path("./contest_current")
            .contest_template_path("./templates/python")
            .source_file_name("main.py")
            .file_pattern("source", ["*.py"])
    }

    #[test]
    fn test_value_lookup() {
        let ctx = sample_context();
        assert_eq!(ctx.value_of("contest_name"), Some("abc300"));
        assert_eq!(ctx.value_of("language"), Some("python"));
        assert_eq!(ctx.value_of("language_name"), Some("python"));
        assert_eq!(ctx.value_of("contest_stock_path"), None);
        assert_eq!(ctx.value_of("unknown_key"), None);
    }

    #[test]
    fn test_to_map_omits_unset_optionals() {
        let ctx = sample_context();
        let map = ctx.to_map();
        assert_eq!(map.get("contest_name").map(String::as_str), Some("abc300"));
        assert_eq!(
            map.get("contest_template_path").map(String::as_str),
            Some("./templates/python")
        );
        assert!(!map.contains_key("contest_stock_path"));
        assert!(!map.contains_key("run_command"));
    }

    #[test]
    fn test_file_patterns() {
        let ctx = sample_context();
        assert_eq!(
            ctx.file_patterns().get("source"),
            Some(&vec!["*.py".to_string()])
        );
    }
}
