//! The assembled pipeline: parse, prepare, build, execute.
//!
//! [`WorkflowEngine`] wires the stages together and returns a
//! [`WorkflowOutcome`] in which errors are data; nothing crosses this
//! boundary as an exception. Graph-construction errors (principally
//! cycles) abort the pipeline before any driver is invoked.

use crate::builder::build_graph;
use crate::context::StepContext;
use crate::driver::{Driver, StepResult};
use crate::error::Error;
use crate::executor::{Executor, ExecutorOptions};
use crate::graph::NodeStatus;
use crate::parser::parse_steps;
use crate::prepare::{optimize_steps, resolve_dependencies};
use crate::step::StepKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Per-command workflow collection, as contributed by a language
/// configuration under `commands.<cmd>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflows keyed by command name
    pub commands: BTreeMap<String, CommandWorkflow>,
}

/// One command's workflow: its step records plus execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandWorkflow {
    /// Declarative step records
    pub steps: Vec<Value>,
    /// Parallel execution settings
    #[serde(default)]
    pub parallel: ParallelSettings,
}

/// Parallelism settings for one command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParallelSettings {
    /// Whether to execute through the worker pool
    #[serde(default)]
    pub enabled: bool,
    /// Requested worker cap
    #[serde(default)]
    pub max_workers: Option<usize>,
}

/// One node's user-facing outcome.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    /// The graph node id
    pub node_id: String,
    /// The step's display name, if any
    pub name: Option<String>,
    /// The step kind
    pub kind: StepKind,
    /// Whether the preparation pass generated the step
    pub auto_generated: bool,
    /// Final status
    pub status: NodeStatus,
    /// The recorded result, when one exists
    pub result: Option<StepResult>,
}

/// Aggregated result of one workflow run.
#[derive(Debug, Default)]
pub struct WorkflowOutcome {
    /// Whether the run finished without errors
    pub success: bool,
    /// User-step outcomes in topological order
    pub results: Vec<NodeOutcome>,
    /// Auto-generated preparation-step outcomes in topological order
    pub preparation_results: Vec<NodeOutcome>,
    /// Everything that went wrong, as data
    pub errors: Vec<Error>,
    /// Tolerated failures and other notes
    pub warnings: Vec<String>,
}

impl WorkflowOutcome {
    fn count(&self, status: NodeStatus) -> usize {
        self.results
            .iter()
            .chain(&self.preparation_results)
            .filter(|outcome| outcome.status == status)
            .count()
    }

    /// Number of completed nodes
    #[must_use]
    pub fn completed_nodes(&self) -> usize {
        self.count(NodeStatus::Completed)
    }

    /// Number of failed nodes
    #[must_use]
    pub fn failed_nodes(&self) -> usize {
        self.count(NodeStatus::Failed)
    }

    /// Number of skipped nodes
    #[must_use]
    pub fn skipped_nodes(&self) -> usize {
        self.count(NodeStatus::Skipped)
    }
}

/// Drives declarative step records through the full pipeline.
pub struct WorkflowEngine {
    driver: Arc<dyn Driver>,
    options: ExecutorOptions,
}

impl WorkflowEngine {
    /// Create an engine with default (sequential) options
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            options: ExecutorOptions::default(),
        }
    }

    /// Create an engine with explicit executor options
    #[must_use]
    pub fn with_options(driver: Arc<dyn Driver>, options: ExecutorOptions) -> Self {
        Self { driver, options }
    }

    /// Run a sequence of declarative step records.
    ///
    /// Step-generation errors are collected while the surviving steps
    /// still flow through; a graph cycle aborts before execution.
    pub async fn run(&self, records: &[Value], ctx: &StepContext) -> WorkflowOutcome {
        let mut outcome = WorkflowOutcome::default();

        // Stage B: records -> validated steps.
        let parsed = parse_steps(records, ctx);
        outcome.errors.extend(parsed.errors);
        outcome.warnings.extend(parsed.warnings);

        // Stage C: preparation insertion plus optimisation.
        let prepared = optimize_steps(&resolve_dependencies(&parsed.steps));
        debug!(
            input = parsed.steps.len(),
            prepared = prepared.len(),
            "steps prepared"
        );

        // Stage D: graph construction; cycles abort here.
        let build = build_graph(&prepared);
        outcome.warnings.extend(build.warnings);
        if !build.errors.is_empty() {
            outcome.errors.extend(build.errors);
            return outcome;
        }
        let Some(mut graph) = build.graph else {
            outcome.success = outcome.errors.is_empty();
            return outcome;
        };

        // Stage E: execution.
        let executor = Executor::with_options(Arc::clone(&self.driver), self.options.clone());
        match executor.execute(&mut graph, ctx).await {
            Err(err) => outcome.errors.push(err),
            Ok(report) => {
                outcome.errors.extend(report.errors);
                outcome.warnings.extend(report.warnings);
                for execution in report.outcomes {
                    let Some(node) = graph.node(&execution.node_id) else {
                        continue;
                    };
                    let step = node.step();
                    let item = NodeOutcome {
                        node_id: execution.node_id,
                        name: step.name().map(str::to_string),
                        kind: step.kind(),
                        auto_generated: step.auto_generated(),
                        status: execution.status,
                        result: execution.result,
                    };
                    if item.auto_generated {
                        outcome.preparation_results.push(item);
                    } else {
                        outcome.results.push(item);
                    }
                }
            }
        }

        outcome.success = outcome.errors.is_empty();
        outcome
    }

    /// Run the workflow registered for `command`, applying its parallel
    /// settings on top of the engine's options.
    pub async fn run_command(
        &self,
        definition: &WorkflowDefinition,
        command: &str,
        ctx: &StepContext,
    ) -> WorkflowOutcome {
        let Some(workflow) = definition.commands.get(command) else {
            return WorkflowOutcome {
                errors: vec![Error::custom(format!(
                    "no workflow registered for command '{command}'"
                ))],
                ..WorkflowOutcome::default()
            };
        };

        let mut options = self.options.clone();
        if workflow.parallel.enabled {
            options.parallel = true;
            if let Some(max_workers) = workflow.parallel.max_workers {
                options.max_workers = max_workers;
            }
        }

        let engine = Self {
            driver: Arc::clone(&self.driver),
            options,
        };
        engine.run(&workflow.steps, ctx).await
    }
}
