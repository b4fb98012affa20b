//! Local driver: file operations via `tokio::fs`, execution operations
//! via `tokio::process`, container operations via the container CLI.
//!
//! Processes are spawned directly (binaries resolved with `which`);
//! no shell is involved. A failed operation is an unsuccessful result,
//! not an error — errors mean the request could not be attempted at
//! all.

use crate::driver::{Driver, ExecutionRequest, StepResult};
use crate::error::{Error, Result};
use crate::step::StepKind;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

/// Driver executing steps on the local machine.
#[derive(Debug, Clone, Default)]
pub struct LocalDriver {
    docker_path: Option<PathBuf>,
    python_path: Option<PathBuf>,
}

impl LocalDriver {
    /// Create a driver with default binary lookup
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the container CLI binary
    #[must_use]
    pub fn docker_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.docker_path = Some(path.into());
        self
    }

    /// Override the Python interpreter
    #[must_use]
    pub fn python_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.python_path = Some(path.into());
        self
    }

    fn resolve_docker(&self) -> Result<PathBuf> {
        match &self.docker_path {
            Some(path) => Ok(path.clone()),
            None => which::which("docker")
                .map_err(|_| Error::custom("docker binary not found in PATH")),
        }
    }

    fn resolve_python(&self) -> Result<PathBuf> {
        match &self.python_path {
            Some(path) => Ok(path.clone()),
            None => which::which("python3")
                .or_else(|_| which::which("python"))
                .map_err(|_| Error::custom("python binary not found in PATH")),
        }
    }

    async fn execute_file_op(&self, request: &ExecutionRequest) -> StepResult {
        let args = &request.args;
        let outcome = match request.kind {
            StepKind::Mkdir => tokio::fs::create_dir_all(&args[0]).await,
            StepKind::Touch => tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&args[0])
                .await
                .map(|_| ()),
            StepKind::Copy => tokio::fs::copy(&args[0], &args[1]).await.map(|_| ()),
            StepKind::CopyTree => {
                copy_tree(PathBuf::from(&args[0]), PathBuf::from(&args[1])).await
            }
            StepKind::Move => rename_or_copy(&args[0], &args[1]).await,
            StepKind::MoveTree => tokio::fs::rename(&args[0], &args[1]).await,
            StepKind::Remove => tokio::fs::remove_file(&args[0]).await,
            StepKind::RmTree => tokio::fs::remove_dir_all(&args[0]).await,
            StepKind::Chmod => chmod(&args[0], &args[1]).await,
            _ => unreachable!("not a file operation"),
        };

        let path = request
            .dst_path
            .clone()
            .or_else(|| request.path.clone())
            .or_else(|| args.first().cloned());

        match outcome {
            Ok(()) => StepResult {
                success: true,
                exists: path.as_deref().map(|p| Path::new(p).exists()),
                path,
                ..StepResult::default()
            },
            Err(err) => StepResult {
                success: false,
                error_message: Some(format!("{} failed: {err}", request.kind)),
                path,
                ..StepResult::default()
            },
        }
    }

    async fn execute_process(&self, request: &ExecutionRequest) -> Result<StepResult> {
        let argv = process_argv(request);
        let Some((program, rest)) = argv.split_first() else {
            return Err(Error::custom("empty command"));
        };

        let binary = match request.kind {
            StepKind::Python => self.resolve_python()?,
            _ => which::which(program)
                .map_err(|_| Error::custom(format!("{program} not found in PATH")))?,
        };
        let rest: Vec<&String> = match request.kind {
            // For Python the whole argument vector is the script line.
            StepKind::Python => argv.iter().collect(),
            _ => rest.iter().collect(),
        };

        self.spawn(&binary, &rest, request).await
    }

    async fn execute_container_op(&self, request: &ExecutionRequest) -> Result<StepResult> {
        let docker = self.resolve_docker()?;
        let subcommand = match request.kind {
            StepKind::DockerExec => "exec",
            StepKind::DockerCp => "cp",
            StepKind::DockerRun => "run",
            StepKind::DockerBuild => "build",
            StepKind::DockerCommit => "commit",
            StepKind::DockerRm => "rm",
            StepKind::DockerRmi => "rmi",
            _ => unreachable!("not a container operation"),
        };

        let mut argv: Vec<String> = vec![subcommand.to_string()];
        argv.extend(request.args.iter().cloned());
        let argv_refs: Vec<&String> = argv.iter().collect();
        self.spawn(&docker, &argv_refs, request).await
    }

    async fn spawn(
        &self,
        binary: &Path,
        args: &[&String],
        request: &ExecutionRequest,
    ) -> Result<StepResult> {
        debug!(binary = %binary.display(), ?args, "spawning process");

        let mut command = Command::new(binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }

        let output = command.output().await.map_err(|err| Error::Io {
            message: format!("failed to spawn {}", binary.display()),
            source: err,
        })?;

        let exit_code = output.status.code().unwrap_or(-1);
        trace!(exit_code, "process finished");

        Ok(StepResult {
            success: output.status.success(),
            exit_code: Some(exit_code),
            stdout: Some(String::from_utf8_lossy(&output.stdout).trim_end().to_string()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).trim_end().to_string()),
            ..StepResult::default()
        })
    }
}

#[async_trait]
impl Driver for LocalDriver {
    async fn execute(&self, request: ExecutionRequest) -> Result<StepResult> {
        match request.kind {
            StepKind::Mkdir
            | StepKind::Touch
            | StepKind::Copy
            | StepKind::CopyTree
            | StepKind::Move
            | StepKind::MoveTree
            | StepKind::Remove
            | StepKind::RmTree
            | StepKind::Chmod => Ok(self.execute_file_op(&request).await),
            StepKind::Shell
            | StepKind::Python
            | StepKind::Build
            | StepKind::Test
            | StepKind::Oj
            | StepKind::Run => self.execute_process(&request).await,
            StepKind::DockerExec
            | StepKind::DockerCp
            | StepKind::DockerRun
            | StepKind::DockerBuild
            | StepKind::DockerCommit
            | StepKind::DockerRm
            | StepKind::DockerRmi => self.execute_container_op(&request).await,
            StepKind::Result => Ok(StepResult {
                success: true,
                stdout: Some(request.args.join(" ")),
                ..StepResult::default()
            }),
        }
    }
}

/// A single-element command line is split on whitespace; a longer
/// vector is already an argv.
fn process_argv(request: &ExecutionRequest) -> Vec<String> {
    if request.args.len() == 1 {
        request.args[0]
            .split_whitespace()
            .map(ToString::to_string)
            .collect()
    } else {
        request.args.clone()
    }
}

async fn rename_or_copy(src: &str, dst: &str) -> std::io::Result<()> {
    if tokio::fs::rename(src, dst).await.is_ok() {
        return Ok(());
    }
    // Rename fails across filesystems; fall back to copy + remove.
    tokio::fs::copy(src, dst).await?;
    tokio::fs::remove_file(src).await
}

fn copy_tree(
    src: PathBuf,
    dst: PathBuf,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<()>> + Send>> {
    Box::pin(async move {
        tokio::fs::create_dir_all(&dst).await?;
        let mut entries = tokio::fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                copy_tree(entry.path(), target).await?;
            } else {
                tokio::fs::copy(entry.path(), target).await?;
            }
        }
        Ok(())
    })
}

#[cfg(unix)]
async fn chmod(mode: &str, path: &str) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = u32::from_str_radix(mode, 8)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid mode"))?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn chmod(_mode: &str, path: &str) -> std::io::Result<()> {
    // Permission bits are not meaningful here; succeed if the path exists.
    tokio::fs::metadata(path).await.map(|_| ())
}
