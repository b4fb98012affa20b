//! The driver port: the engine's only boundary to real I/O.
//!
//! Drivers are injected, never selected inside the core. They receive a
//! fully resolved [`ExecutionRequest`] and return a [`StepResult`]; they
//! must not touch the graph or the steps.

use crate::error::Result;
use crate::step::{Step, StepKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The derived, per-run value handed to a driver.
///
/// Built from a [`Step`] immediately before execution — after result
/// substitution — so the step itself stays immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// The step kind being executed
    pub kind: StepKind,
    /// The resolved argument vector
    pub args: Vec<String>,
    /// Working directory, if any
    pub cwd: Option<String>,
    /// Environment hint (a forced override, or the context's tag)
    pub env_type: Option<String>,
    /// Whether output should be surfaced
    pub show_output: bool,
    /// Primary path operand, for path-bearing kinds
    pub path: Option<String>,
    /// Destination path operand, for two-path kinds
    pub dst_path: Option<String>,
    /// Joined command line, for execution kinds
    pub command: Option<String>,
}

impl ExecutionRequest {
    /// Derive a request from a step.
    #[must_use]
    pub fn from_step(step: &Step) -> Self {
        let kind = step.kind();
        let args: Vec<String> = step.cmd().to_vec();

        let (path, dst_path) = match kind {
            StepKind::Mkdir
            | StepKind::Touch
            | StepKind::Remove
            | StepKind::RmTree => (args.first().cloned(), None),
            StepKind::Copy
            | StepKind::CopyTree
            | StepKind::Move
            | StepKind::MoveTree
            | StepKind::DockerCp => (args.first().cloned(), args.get(1).cloned()),
            StepKind::Chmod => (args.get(1).cloned(), None),
            _ => (None, None),
        };

        let command = match kind {
            StepKind::Shell
            | StepKind::Python
            | StepKind::Build
            | StepKind::Test
            | StepKind::Oj
            | StepKind::Run
            | StepKind::DockerExec
            | StepKind::DockerRun => Some(args.join(" ")),
            _ => None,
        };

        Self {
            kind,
            args,
            cwd: step.cwd().map(str::to_string),
            env_type: step.force_env_type().map(str::to_string),
            show_output: step.show_output(),
            path,
            dst_path,
            command,
        }
    }
}

/// Result of executing one step.
///
/// Drivers produce these for leaf executions; the engine produces them
/// (with `skipped` set) for nodes it short-circuits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Whether the execution succeeded
    pub success: bool,
    /// Process exit code, when one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Captured standard output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Captured standard error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Error description for failed executions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Path the operation acted on, when meaningful
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Existence probe outcome, when meaningful
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
    /// Whether the engine skipped this node instead of executing it
    #[serde(default)]
    pub skipped: bool,
}

impl StepResult {
    /// A successful result
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// A failed result carrying an error message
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// A result for a node skipped by a false guard
    #[must_use]
    pub fn skipped_by_guard() -> Self {
        Self {
            success: true,
            skipped: true,
            ..Self::default()
        }
    }

    /// A result for a node skipped because an upstream step failed
    #[must_use]
    pub fn skipped_by_failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            skipped: true,
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Look up a field by its placeholder name.
    ///
    /// Known fields with unset values render as the empty string;
    /// unknown names return `None` so the placeholder stays intact.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "success" => Some(self.success.to_string()),
            "skipped" => Some(self.skipped.to_string()),
            "exit_code" => Some(self.exit_code.map(|c| c.to_string()).unwrap_or_default()),
            "stdout" => Some(self.stdout.clone().unwrap_or_default()),
            "stderr" => Some(self.stderr.clone().unwrap_or_default()),
            "error_message" => Some(self.error_message.clone().unwrap_or_default()),
            "path" => Some(self.path.clone().unwrap_or_default()),
            "exists" => Some(self.exists.map(|e| e.to_string()).unwrap_or_default()),
            _ => None,
        }
    }
}

/// Uniform execution port implemented by file, process, and container
/// drivers alike.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Execute one request and report its result.
    ///
    /// A failed *execution* is an `Ok` result with `success == false`;
    /// `Err` means the driver could not run the request at all.
    ///
    /// # Errors
    ///
    /// Returns an error when the request cannot be attempted (missing
    /// binary, unusable working directory, and the like).
    async fn execute(&self, request: ExecutionRequest) -> Result<StepResult>;
}
