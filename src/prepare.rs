//! Preparation pass: insert the `mkdir` steps users leave out.
//!
//! A single walk over the step sequence tracks a virtual filesystem
//! (directories and files known to exist after each step) and prepends
//! auto-generated directory creation wherever a destination parent or a
//! working directory is unowned. Two post-walk optimisations remove the
//! redundancy this can introduce.

use crate::resource::{normalize_path, parent_dir};
use crate::step::{Step, StepKind};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Walk the steps once and insert preparation steps.
///
/// Original steps keep their relative order; auto-generated `mkdir`
/// steps (with `allow_failure` set) are inserted immediately before the
/// step that needs them.
#[must_use]
pub fn resolve_dependencies(steps: &[Step]) -> Vec<Step> {
    let mut resolved = Vec::with_capacity(steps.len());
    let mut existing_dirs: HashSet<String> = HashSet::new();
    let mut existing_files: HashSet<String> = HashSet::new();

    for step in steps {
        if should_prepare(step) {
            let prep_steps = preparation_steps(step, &existing_dirs);
            for prep in &prep_steps {
                if prep.kind() == StepKind::Mkdir {
                    existing_dirs.insert(normalize_path(&prep.cmd()[0]));
                }
            }
            if !prep_steps.is_empty() {
                debug!(
                    kind = %step.kind(),
                    count = prep_steps.len(),
                    "inserted preparation steps"
                );
            }
            resolved.extend(prep_steps);
        }

        resolved.push(step.clone());
        update_tracking(step, &mut existing_dirs, &mut existing_files);
    }

    resolved
}

/// A guarded step whose resolved arguments look malformed (consecutive
/// slashes, or a trailing `/.`) may never run; preparation I/O for it
/// cannot be justified, so nothing is inserted.
fn should_prepare(step: &Step) -> bool {
    if step.when().is_none() {
        return true;
    }
    !step
        .cmd()
        .iter()
        .any(|arg| arg.contains("//") || arg.ends_with("/."))
}

fn preparation_steps(step: &Step, existing_dirs: &HashSet<String>) -> Vec<Step> {
    let mut prep = Vec::new();

    if step.kind().is_file_producing() {
        if let Some(destination) = destination_of(step) {
            let parent = parent_dir(destination);
            if parent != "." && parent != "/" && !existing_dirs.contains(&parent) {
                prep.extend(mkdir_prep(&parent));
            }
        }
    }

    if let Some(cwd) = step.cwd() {
        if !existing_dirs.contains(&normalize_path(cwd)) {
            prep.extend(mkdir_prep(cwd));
        }
    }

    prep
}

fn destination_of(step: &Step) -> Option<&str> {
    match step.kind() {
        StepKind::Touch => step.cmd().first().map(String::as_str),
        _ => step.cmd().get(1).map(String::as_str),
    }
}

fn mkdir_prep(path: &str) -> Option<Step> {
    Step::builder(StepKind::Mkdir)
        .arg(path)
        .allow_failure(true)
        .auto_generated(true)
        .build()
        .ok()
}

/// Reflect a step's filesystem footprint into the tracking sets so that
/// later steps in the same walk see what it will have created.
fn update_tracking(
    step: &Step,
    existing_dirs: &mut HashSet<String>,
    existing_files: &mut HashSet<String>,
) {
    let cmd = step.cmd();
    match step.kind() {
        StepKind::Mkdir => {
            if let Some(path) = cmd.first() {
                existing_dirs.insert(normalize_path(path));
            }
        }
        StepKind::Touch => {
            if let Some(path) = cmd.first() {
                existing_files.insert(normalize_path(path));
                let parent = parent_dir(path);
                if parent != "." {
                    existing_dirs.insert(parent);
                }
            }
        }
        StepKind::Copy | StepKind::Move => {
            if let Some(dst) = cmd.get(1) {
                existing_files.insert(normalize_path(dst));
                let parent = parent_dir(dst);
                if parent != "." {
                    existing_dirs.insert(parent);
                }
            }
        }
        StepKind::MoveTree => {
            if let Some(dst) = cmd.get(1) {
                existing_dirs.insert(normalize_path(dst));
                let parent = parent_dir(dst);
                if parent != "." {
                    existing_dirs.insert(parent);
                }
            }
        }
        StepKind::Remove | StepKind::RmTree => {
            if let Some(path) = cmd.first() {
                let path = normalize_path(path);
                existing_files.remove(&path);
                existing_dirs.remove(&path);
            }
        }
        _ => {}
    }
}

/// Post-walk optimisations: coalesce consecutive `mkdir` runs and drop
/// repeated copy/move operations. Idempotent.
#[must_use]
pub fn optimize_steps(steps: &[Step]) -> Vec<Step> {
    dedup_copy_steps(&coalesce_mkdir_steps(steps))
}

/// Replace each run of consecutive `mkdir` steps sharing the same
/// `allow_failure` and `show_output` flags with its order-preserving,
/// path-deduplicated projection.
fn coalesce_mkdir_steps(steps: &[Step]) -> Vec<Step> {
    let mut optimized = Vec::with_capacity(steps.len());
    let mut i = 0;

    while i < steps.len() {
        let step = &steps[i];
        if step.kind() != StepKind::Mkdir {
            optimized.push(step.clone());
            i += 1;
            continue;
        }

        let mut run_end = i + 1;
        while run_end < steps.len()
            && steps[run_end].kind() == StepKind::Mkdir
            && steps[run_end].allow_failure() == step.allow_failure()
            && steps[run_end].show_output() == step.show_output()
        {
            run_end += 1;
        }

        let mut seen_paths = HashSet::new();
        for mkdir in &steps[i..run_end] {
            if seen_paths.insert(normalize_path(&mkdir.cmd()[0])) {
                optimized.push(mkdir.clone());
            }
        }

        i = run_end;
    }

    optimized
}

/// Drop repeated `(kind, source, destination)` copy/move triples; when
/// duplicates disagree on `allow_failure`, the stricter step wins.
fn dedup_copy_steps(steps: &[Step]) -> Vec<Step> {
    let mut optimized: Vec<Step> = Vec::with_capacity(steps.len());
    let mut seen: HashMap<(StepKind, String, String), usize> = HashMap::new();

    for step in steps {
        let is_copy_like = matches!(
            step.kind(),
            StepKind::Copy | StepKind::CopyTree | StepKind::Move | StepKind::MoveTree
        );
        if !is_copy_like || step.cmd().len() < 2 {
            optimized.push(step.clone());
            continue;
        }

        let key = (
            step.kind(),
            step.cmd()[0].clone(),
            step.cmd()[1].clone(),
        );
        match seen.get(&key).copied() {
            None => {
                seen.insert(key, optimized.len());
                optimized.push(step.clone());
            }
            Some(index) => {
                if optimized[index].allow_failure() && !step.allow_failure() {
                    optimized[index] = step.clone();
                }
            }
        }
    }

    optimized
}
