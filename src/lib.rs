//! # stepflow
//!
//! A dependency-aware workflow engine for declarative step definitions.
//!
//! Users describe *what* must happen — file operations, shell commands,
//! script invocations, container operations — and the engine decides how
//! and in what order: it expands templates, inserts the preparation steps
//! the user omitted, builds a dependency graph over resource effects, and
//! executes it sequentially or through a bounded worker pool.
//!
//! ## Features
//!
//! - **Declarative input** - steps are plain serde maps with a `type` and
//!   a `cmd` list
//! - **Automatic preparation** - destination parent directories are
//!   created without being asked for
//! - **Real dependency tracking** - producer/consumer edges over files
//!   and directories, cycle detection with actionable traces
//! - **Bounded parallelism** - level-by-level execution through one
//!   worker pool, with per-task timeouts
//! - **Failure policy** - `allow_failure` tolerates a failure; anything
//!   else skips every dependent step
//! - **Injected drivers** - all I/O goes through one async port
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use stepflow::{LocalDriver, StepContext, WorkflowEngine};
//!
//! #[tokio::main]
//! async fn main() {
//!     let ctx = StepContext::new()
//!         .contest_name("abc300")
//!         .problem_name("a")
//!         .language("python")
//!         .workspace_path("./workspace")
//!         .contest_current_path("./contest_current")
//!         .contest_template_path("./templates/python")
//!         .source_file_name("main.py");
//!
//!     let records = vec![
//!         json!({
//!             "type": "copy",
//!             "cmd": ["{contest_template_path}/main.py",
//!                     "{contest_current_path}/{source_file_name}"],
//!             "when": "test -d {contest_template_path}"
//!         }),
//!         json!({"type": "shell", "cmd": ["echo ready"]}),
//!     ];
//!
//!     let engine = WorkflowEngine::new(Arc::new(LocalDriver::new()));
//!     let outcome = engine.run(&records, &ctx).await;
//!     println!("success: {}", outcome.success);
//! }
//! ```
//!
//! ## Architecture
//!
//! Data flows through five stages with no back-edges:
//!
//! - [`template`] - `{var}` and file-pattern substitution
//! - [`parser`] - declarative records to validated [`Step`] values
//! - [`prepare`] - preparation insertion and redundancy removal
//! - [`builder`] / [`graph`] - resource-effect indexing, edge emission,
//!   topological order, parallel levels
//! - [`executor`] - sequential or pooled execution with failure
//!   propagation and result substitution
//!
//! Drivers live behind the [`Driver`] port in [`driver`]; a local
//! implementation ships in [`drivers`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

// Re-export the most commonly used types and traits
pub use builder::{build_graph, GraphBuildOutcome};
pub use context::StepContext;
pub use driver::{Driver, ExecutionRequest, StepResult};
pub use drivers::LocalDriver;
pub use error::{Error, Result};
pub use executor::{
    calculate_optimal_workers, ExecutionReport, Executor, ExecutorOptions, NodeExecution,
};
pub use graph::{CycleTrace, DependencyEdge, EdgeKind, ExecutionGraph, NodeStatus, StepNode};
pub use guard::{Guard, Predicate};
pub use parser::{parse_step, parse_steps, ParseOutcome};
pub use prepare::{optimize_steps, resolve_dependencies};
pub use resource::{extract_effect, is_parent_directory, normalize_path, ResourceEffect};
pub use step::{Step, StepBuilder, StepKind};
pub use substitute::{apply_substitution, extract_placeholders, substitute_placeholders};
pub use template::{contains_token, expand_patterns, resolve};
pub use workflow::{
    CommandWorkflow, NodeOutcome, ParallelSettings, WorkflowDefinition, WorkflowEngine,
    WorkflowOutcome,
};

// Core modules
pub mod builder;
pub mod context;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod executor;
pub mod graph;
pub mod guard;
pub mod parser;
pub mod prepare;
pub mod resource;
pub mod step;
pub mod substitute;
pub mod template;
pub mod workflow;
