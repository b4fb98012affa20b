//! Resource effects: what a step consumes and produces in the
//! filesystem abstraction.
//!
//! Effects are derived deterministically from a step's kind and argument
//! vector and drive every dependency edge the graph builder emits. Paths
//! are normalised (forward slashes, no trailing `/`, `.` components
//! stripped) before they enter the sets.

use crate::step::{Step, StepKind};
use std::collections::BTreeSet;

/// Directory required by script and container steps that have no
/// explicit path arguments.
const DEFAULT_WORKSPACE: &str = "./workspace";

/// The four path sets summarising a step's filesystem footprint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceEffect {
    /// Files this step creates
    pub creates_files: BTreeSet<String>,
    /// Directories this step creates
    pub creates_dirs: BTreeSet<String>,
    /// Files this step reads
    pub reads_files: BTreeSet<String>,
    /// Directories this step requires to exist
    pub requires_dirs: BTreeSet<String>,
}

impl ResourceEffect {
    /// An effect with all four sets empty
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether all four sets are empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.creates_files.is_empty()
            && self.creates_dirs.is_empty()
            && self.reads_files.is_empty()
            && self.requires_dirs.is_empty()
    }

    /// Resource-conflict test used for adjacent execution ordering.
    ///
    /// A conflict exists when the two steps create the same file, create
    /// the same directory, or one creates a file the other reads.
    #[must_use]
    pub fn conflicts_with(&self, other: &Self) -> bool {
        intersects(&self.creates_files, &other.creates_files)
            || intersects(&self.creates_dirs, &other.creates_dirs)
            || intersects(&self.creates_files, &other.reads_files)
            || intersects(&self.reads_files, &other.creates_files)
    }
}

fn intersects(a: &BTreeSet<String>, b: &BTreeSet<String>) -> bool {
    a.intersection(b).next().is_some()
}

/// Normalise a path for set membership: forward slashes, no trailing
/// `/`, `.` and empty components stripped. `..` components are kept.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let absolute = path.starts_with('/');
    let parts: Vec<&str> = path
        .split('/')
        .filter(|comp| !comp.is_empty() && *comp != ".")
        .collect();

    if parts.is_empty() {
        return if absolute { "/".to_string() } else { ".".to_string() };
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// The parent directory of a normalised path (`.` for top-level
/// relative names, `/` for root children).
#[must_use]
pub fn parent_dir(path: &str) -> String {
    let normalized = normalize_path(path);
    if normalized == "/" || normalized == "." {
        return normalized;
    }
    match normalized.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => normalized[..idx].to_string(),
        None => ".".to_string(),
    }
}

/// Whether `parent` is `child` itself or an ancestor of it on the path
/// tree.
///
/// Absolute paths are compared after lexical resolution of `.` and `..`
/// components; paths without a root anchor fall back to the string rule
/// `child == parent || child starts with parent + "/"`.
#[must_use]
pub fn is_parent_directory(parent: &str, child: &str) -> bool {
    let (parent, child) = match (lexical_resolve(parent), lexical_resolve(child)) {
        (Some(parent), Some(child)) => (parent, child),
        _ => (normalize_path(parent), normalize_path(child)),
    };
    child == parent || child.starts_with(&format!("{parent}/"))
}

fn lexical_resolve(path: &str) -> Option<String> {
    if !path.starts_with('/') {
        return None;
    }
    let mut parts: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            comp => parts.push(comp),
        }
    }
    Some(format!("/{}", parts.join("/")))
}

/// Derive the resource effect of a step.
///
/// Kinds without entries in the effect table yield an empty effect.
/// A step missing a required argument yields an empty effect plus a
/// warning; the validating builder normally rules this out.
#[must_use]
pub fn extract_effect(step: &Step) -> (ResourceEffect, Vec<String>) {
    let mut effect = ResourceEffect::empty();
    let mut warnings = Vec::new();
    let cmd = step.cmd();

    let mut missing = |what: &str| {
        warnings.push(format!(
            "step '{}' is missing {what}; no resource effect extracted",
            step.kind()
        ));
    };

    match step.kind() {
        StepKind::Mkdir => {
            if let Some(path) = cmd.first() {
                effect.creates_dirs.insert(normalize_path(path));
            } else {
                missing("a directory path");
            }
        }
        StepKind::Touch => {
            if let Some(path) = cmd.first() {
                let file = normalize_path(path);
                let parent = parent_dir(&file);
                if parent != "." {
                    effect.requires_dirs.insert(parent);
                }
                effect.creates_files.insert(file);
            } else {
                missing("a file path");
            }
        }
        StepKind::Copy | StepKind::Move => {
            if let [src, dst, ..] = cmd {
                let dst = normalize_path(dst);
                let parent = parent_dir(&dst);
                if parent != "." {
                    effect.requires_dirs.insert(parent);
                }
                effect.creates_files.insert(dst);
                effect.reads_files.insert(normalize_path(src));
            } else {
                missing("source and destination paths");
            }
        }
        StepKind::MoveTree => {
            if let [src, dst, ..] = cmd {
                effect.creates_dirs.insert(normalize_path(dst));
                effect.reads_files.insert(normalize_path(src));
            } else {
                missing("source and destination paths");
            }
        }
        StepKind::Remove | StepKind::RmTree => {
            if let Some(path) = cmd.first() {
                effect.reads_files.insert(normalize_path(path));
            } else {
                missing("a target path");
            }
        }
        StepKind::Build => {
            let dir = cmd
                .first()
                .filter(|dir| !dir.is_empty())
                .map_or(DEFAULT_WORKSPACE, String::as_str);
            effect.requires_dirs.insert(normalize_path(dir));
        }
        StepKind::Test => {
            if let [_, target, ..] = cmd {
                let target = normalize_path(target);
                let parent = parent_dir(&target);
                if parent != "." {
                    effect.requires_dirs.insert(parent);
                }
                effect.reads_files.insert(target);
            } else {
                missing("a test target");
            }
        }
        StepKind::Shell
        | StepKind::Python
        | StepKind::DockerExec
        | StepKind::DockerCp
        | StepKind::DockerRun
        | StepKind::DockerBuild
        | StepKind::DockerCommit
        | StepKind::DockerRm
        | StepKind::DockerRmi => {
            effect.requires_dirs.insert(normalize_path(DEFAULT_WORKSPACE));
        }
        StepKind::CopyTree | StepKind::Oj | StepKind::Run | StepKind::Chmod | StepKind::Result => {}
    }

    (effect, warnings)
}
