//! Step model: the closed kind enumeration, the immutable [`Step`]
//! record, and its validating builder.
//!
//! Steps are constructed exclusively through [`StepBuilder`]; arity and
//! argument invariants are checked at build time so the rest of the
//! pipeline can rely on them.

use crate::error::{Error, Result};
use crate::guard::Guard;
use serde::{Deserialize, Serialize};

/// The closed set of step kinds the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Create a directory (and parents)
    Mkdir,
    /// Create an empty file
    Touch,
    /// Copy a file
    Copy,
    /// Copy a directory tree
    #[serde(rename = "copytree")]
    CopyTree,
    /// Move a file
    Move,
    /// Move a directory tree
    #[serde(rename = "movetree")]
    MoveTree,
    /// Remove a file
    Remove,
    /// Remove a directory tree
    #[serde(rename = "rmtree")]
    RmTree,
    /// Run a command line
    Shell,
    /// Run a Python script
    Python,
    /// Build the project
    Build,
    /// Run a test target
    Test,
    /// Invoke the online-judge helper
    Oj,
    /// Run the configured run command
    Run,
    /// Execute a command inside a container
    DockerExec,
    /// Copy between host and container
    DockerCp,
    /// Run a container
    DockerRun,
    /// Build a container image
    DockerBuild,
    /// Commit a container to an image
    DockerCommit,
    /// Remove a container
    DockerRm,
    /// Remove an image
    DockerRmi,
    /// Change file permissions
    Chmod,
    /// Surface a result value
    Result,
}

impl StepKind {
    /// Parse a wire-format kind name (e.g. `"copy"`, `"docker_exec"`)
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "mkdir" => Some(Self::Mkdir),
            "touch" => Some(Self::Touch),
            "copy" => Some(Self::Copy),
            "copytree" => Some(Self::CopyTree),
            "move" => Some(Self::Move),
            "movetree" => Some(Self::MoveTree),
            "remove" => Some(Self::Remove),
            "rmtree" => Some(Self::RmTree),
            "shell" => Some(Self::Shell),
            "python" => Some(Self::Python),
            "build" => Some(Self::Build),
            "test" => Some(Self::Test),
            "oj" => Some(Self::Oj),
            "run" => Some(Self::Run),
            "docker_exec" => Some(Self::DockerExec),
            "docker_cp" => Some(Self::DockerCp),
            "docker_run" => Some(Self::DockerRun),
            "docker_build" => Some(Self::DockerBuild),
            "docker_commit" => Some(Self::DockerCommit),
            "docker_rm" => Some(Self::DockerRm),
            "docker_rmi" => Some(Self::DockerRmi),
            "chmod" => Some(Self::Chmod),
            "result" => Some(Self::Result),
            _ => None,
        }
    }

    /// The wire-format name of this kind
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mkdir => "mkdir",
            Self::Touch => "touch",
            Self::Copy => "copy",
            Self::CopyTree => "copytree",
            Self::Move => "move",
            Self::MoveTree => "movetree",
            Self::Remove => "remove",
            Self::RmTree => "rmtree",
            Self::Shell => "shell",
            Self::Python => "python",
            Self::Build => "build",
            Self::Test => "test",
            Self::Oj => "oj",
            Self::Run => "run",
            Self::DockerExec => "docker_exec",
            Self::DockerCp => "docker_cp",
            Self::DockerRun => "docker_run",
            Self::DockerBuild => "docker_build",
            Self::DockerCommit => "docker_commit",
            Self::DockerRm => "docker_rm",
            Self::DockerRmi => "docker_rmi",
            Self::Chmod => "chmod",
            Self::Result => "result",
        }
    }

    /// Minimum number of arguments this kind requires
    #[must_use]
    pub fn min_args(self) -> usize {
        match self {
            Self::Copy
            | Self::CopyTree
            | Self::Move
            | Self::MoveTree
            | Self::DockerCp
            | Self::DockerExec
            | Self::DockerCommit
            | Self::Chmod => 2,
            _ => 1,
        }
    }

    /// Kinds that operate on a whole directory tree
    #[must_use]
    pub fn is_tree_op(self) -> bool {
        matches!(self, Self::CopyTree | Self::MoveTree | Self::RmTree)
    }

    /// Two-argument file operations whose source and destination receive
    /// file-pattern expansion
    #[must_use]
    pub fn expands_patterns(self) -> bool {
        matches!(self, Self::Copy | Self::CopyTree | Self::Move | Self::MoveTree)
    }

    /// File operations that produce a file or directory at a destination
    /// the preparation pass may need to create a parent for
    #[must_use]
    pub fn is_file_producing(self) -> bool {
        matches!(self, Self::Copy | Self::Move | Self::MoveTree | Self::Touch)
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single declarative unit of work.
///
/// Immutable after construction; the executor derives per-run request
/// values from it but never writes back.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    kind: StepKind,
    cmd: Vec<String>,
    cwd: Option<String>,
    when: Option<Guard>,
    name: Option<String>,
    allow_failure: bool,
    show_output: bool,
    auto_generated: bool,
    force_env_type: Option<String>,
    max_workers: usize,
}

impl Step {
    /// Start building a step of the given kind
    #[must_use]
    pub fn builder(kind: StepKind) -> StepBuilder {
        StepBuilder::new(kind)
    }

    /// The step kind
    #[must_use]
    pub fn kind(&self) -> StepKind {
        self.kind
    }

    /// The resolved argument vector
    #[must_use]
    pub fn cmd(&self) -> &[String] {
        &self.cmd
    }

    /// The working directory, if any
    #[must_use]
    pub fn cwd(&self) -> Option<&str> {
        self.cwd.as_deref()
    }

    /// The guard predicate, if any (operands are still unresolved)
    #[must_use]
    pub fn when(&self) -> Option<&Guard> {
        self.when.as_ref()
    }

    /// The display name, if any
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether a failure of this step is tolerated
    #[must_use]
    pub fn allow_failure(&self) -> bool {
        self.allow_failure
    }

    /// Whether the step's output should be surfaced to the user
    #[must_use]
    pub fn show_output(&self) -> bool {
        self.show_output
    }

    /// Whether the preparation pass generated this step
    #[must_use]
    pub fn auto_generated(&self) -> bool {
        self.auto_generated
    }

    /// A forced environment override, if any
    #[must_use]
    pub fn force_env_type(&self) -> Option<&str> {
        self.force_env_type.as_deref()
    }

    /// Maximum-workers hint (always >= 1)
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}

/// Validating builder for [`Step`].
#[derive(Debug, Clone)]
pub struct StepBuilder {
    kind: StepKind,
    cmd: Vec<String>,
    cwd: Option<String>,
    when: Option<String>,
    name: Option<String>,
    allow_failure: bool,
    show_output: bool,
    auto_generated: bool,
    force_env_type: Option<String>,
    max_workers: usize,
}

impl StepBuilder {
    fn new(kind: StepKind) -> Self {
        Self {
            kind,
            cmd: Vec::new(),
            cwd: None,
            when: None,
            name: None,
            allow_failure: false,
            show_output: false,
            auto_generated: false,
            force_env_type: None,
            max_workers: 1,
        }
    }

    /// Add one argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.cmd.push(arg.into());
        self
    }

    /// Add multiple arguments
    #[must_use]
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.cmd.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set the guard expression (kept unresolved until execution)
    #[must_use]
    pub fn when(mut self, when: impl Into<String>) -> Self {
        self.when = Some(when.into());
        self
    }

    /// Set the display name
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Tolerate a failure of this step
    #[must_use]
    pub fn allow_failure(mut self, allow: bool) -> Self {
        self.allow_failure = allow;
        self
    }

    /// Surface the step's output
    #[must_use]
    pub fn show_output(mut self, show: bool) -> Self {
        self.show_output = show;
        self
    }

    /// Mark the step as generated by the preparation pass
    #[must_use]
    pub fn auto_generated(mut self, auto: bool) -> Self {
        self.auto_generated = auto;
        self
    }

    /// Force an environment override
    #[must_use]
    pub fn force_env_type(mut self, env: impl Into<String>) -> Self {
        self.force_env_type = Some(env.into());
        self
    }

    /// Set the maximum-workers hint
    #[must_use]
    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Validate the invariants and produce the step.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStep`] when the argument vector is empty,
    /// shorter than the kind's minimum arity, or has an empty required
    /// argument; when `max_workers` is zero; or when the guard expression
    /// fails to parse.
    pub fn build(self) -> Result<Step> {
        if self.cmd.is_empty() {
            return Err(Error::invalid_step(format!(
                "step '{}' must have a non-empty cmd",
                self.kind
            )));
        }

        let min = self.kind.min_args();
        if self.cmd.len() < min {
            return Err(Error::invalid_step(format!(
                "step '{}' requires at least {} argument(s), got {}",
                self.kind,
                min,
                self.cmd.len()
            )));
        }

        if self.cmd.iter().take(min).any(String::is_empty) {
            return Err(Error::invalid_step(format!(
                "step '{}' has an empty required argument",
                self.kind
            )));
        }

        if self.max_workers == 0 {
            return Err(Error::invalid_step(format!(
                "step '{}' max_workers must be >= 1",
                self.kind
            )));
        }

        let when = self.when.map(|raw| Guard::parse(&raw)).transpose()?;

        Ok(Step {
            kind: self.kind,
            cmd: self.cmd,
            cwd: self.cwd,
            when,
            name: self.name,
            allow_failure: self.allow_failure,
            show_output: self.show_output,
            auto_generated: self.auto_generated,
            force_env_type: self.force_env_type,
            max_workers: self.max_workers,
        })
    }
}
