//! Graph execution: sequential walk or level-parallel worker pool.
//!
//! The executor owns all runtime mutation: node status transitions,
//! result recording, and the failure bookkeeping that turns one failed
//! node into skipped dependents. Drivers only ever see derived requests.

use crate::context::StepContext;
use crate::driver::{Driver, ExecutionRequest, StepResult};
use crate::error::{Error, Result};
use crate::graph::{ExecutionGraph, NodeStatus, StepNode};
use crate::substitute;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Default per-task deadline
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);

/// Execution tuning knobs.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Run levels through a worker pool instead of one node at a time
    pub parallel: bool,
    /// Requested worker cap; clamped to `[1, cores * 2]`
    pub max_workers: usize,
    /// Per-task deadline
    pub task_timeout: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            parallel: false,
            max_workers: 4,
            task_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }
}

/// Clamp a requested worker count to `[1, cores * 2]`.
#[must_use]
pub fn calculate_optimal_workers(requested: usize) -> usize {
    let cores = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    requested.min(cores * 2).max(1)
}

/// One node's observable outcome, in topological position.
#[derive(Debug, Clone)]
pub struct NodeExecution {
    /// The node id
    pub node_id: String,
    /// Final status (or `Pending` if execution stopped earlier)
    pub status: NodeStatus,
    /// The recorded result, when one exists
    pub result: Option<StepResult>,
}

/// Everything an execution produced.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// Per-node outcomes ordered by topological position
    pub outcomes: Vec<NodeExecution>,
    /// Hard failures and timeouts
    pub errors: Vec<Error>,
    /// Tolerated failures and other notes
    pub warnings: Vec<String>,
}

enum GuardDecision {
    Run,
    Skip,
    Fail(Error),
}

/// Runs a validated graph against an injected driver.
pub struct Executor {
    driver: Arc<dyn Driver>,
    options: ExecutorOptions,
}

impl Executor {
    /// Create an executor with default options (sequential mode)
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            options: ExecutorOptions::default(),
        }
    }

    /// Create an executor with explicit options
    #[must_use]
    pub fn with_options(driver: Arc<dyn Driver>, options: ExecutorOptions) -> Self {
        Self { driver, options }
    }

    /// The active options
    #[must_use]
    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Execute the graph in the configured mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircularDependency`] when the graph cannot be
    /// ordered; execution failures are reported as data, not errors.
    pub async fn execute(
        &self,
        graph: &mut ExecutionGraph,
        ctx: &StepContext,
    ) -> Result<ExecutionReport> {
        if self.options.parallel {
            self.execute_parallel(graph, ctx).await
        } else {
            self.execute_sequential(graph, ctx).await
        }
    }

    /// Walk the topological order one node at a time. A hard failure
    /// skips every transitive dependent and stops the walk.
    async fn execute_sequential(
        &self,
        graph: &mut ExecutionGraph,
        ctx: &StepContext,
    ) -> Result<ExecutionReport> {
        let order = graph.execution_order()?;
        let mut report = ExecutionReport::default();
        debug!(nodes = order.len(), "sequential execution starting");

        for node_id in &order {
            let Some(node) = graph.node(node_id) else { continue };
            let allow_failure = node.step().allow_failure();

            match evaluate_guard(node, ctx) {
                GuardDecision::Run => {}
                GuardDecision::Skip => {
                    debug!(%node_id, "guard false, skipping");
                    graph.record_result(node_id, NodeStatus::Skipped, StepResult::skipped_by_guard());
                    continue;
                }
                GuardDecision::Fail(err) => {
                    graph.record_result(
                        node_id,
                        NodeStatus::Failed,
                        StepResult::failed(err.to_string()),
                    );
                    if allow_failure {
                        report.warnings.push(format!(
                            "step {node_id} guard failed but failures are allowed: {err}"
                        ));
                        continue;
                    }
                    report.errors.push(err);
                    self.skip_dependents(graph, node_id);
                    break;
                }
            }

            let request = self.derive_request(graph, node_id);
            if let Some(node) = graph.node_mut(node_id) {
                node.set_status(NodeStatus::Running);
            }

            let (_, result, failure) = run_node(
                Arc::clone(&self.driver),
                node_id.clone(),
                request,
                self.options.task_timeout,
            )
            .await;

            let status = if result.success {
                NodeStatus::Completed
            } else {
                NodeStatus::Failed
            };
            graph.record_result(node_id, status, result);

            if let Some(err) = failure {
                if allow_failure {
                    report
                        .warnings
                        .push(format!("step {node_id} failed but failures are allowed: {err}"));
                } else {
                    report.errors.push(err);
                    self.skip_dependents(graph, node_id);
                    break;
                }
            }
        }

        report.outcomes = collect_outcomes(graph, &order);
        Ok(report)
    }

    /// Run each parallel level through one semaphore-bounded pool.
    ///
    /// Level boundaries are barriers: every task of level `k` completes
    /// before anything in level `k + 1` is submitted.
    async fn execute_parallel(
        &self,
        graph: &mut ExecutionGraph,
        ctx: &StepContext,
    ) -> Result<ExecutionReport> {
        let order = graph.execution_order()?;
        let levels = graph.parallel_levels()?;
        let workers = calculate_optimal_workers(self.options.max_workers);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut report = ExecutionReport::default();
        // Nodes that hard-failed or were skipped because of one; their
        // dependents must not run.
        let mut poisoned: HashSet<String> = HashSet::new();
        debug!(
            nodes = order.len(),
            levels = levels.len(),
            workers,
            "parallel execution starting"
        );

        for level in levels {
            let mut join_set: JoinSet<(String, StepResult, Option<Error>)> = JoinSet::new();
            let mut in_flight: HashSet<String> = HashSet::new();

            for node_id in level {
                let Some(node) = graph.node(&node_id) else { continue };
                let allow_failure = node.step().allow_failure();

                if graph
                    .dependencies_of(&node_id)
                    .iter()
                    .any(|dep| poisoned.contains(dep))
                {
                    graph.record_result(
                        &node_id,
                        NodeStatus::Skipped,
                        StepResult::skipped_by_failure("skipped due to upstream failure"),
                    );
                    poisoned.insert(node_id);
                    continue;
                }

                match evaluate_guard(node, ctx) {
                    GuardDecision::Run => {}
                    GuardDecision::Skip => {
                        graph.record_result(
                            &node_id,
                            NodeStatus::Skipped,
                            StepResult::skipped_by_guard(),
                        );
                        continue;
                    }
                    GuardDecision::Fail(err) => {
                        graph.record_result(
                            &node_id,
                            NodeStatus::Failed,
                            StepResult::failed(err.to_string()),
                        );
                        if allow_failure {
                            report.warnings.push(format!(
                                "step {node_id} guard failed but failures are allowed: {err}"
                            ));
                        } else {
                            poisoned.insert(node_id);
                            report.errors.push(err);
                        }
                        continue;
                    }
                }

                let request = self.derive_request(graph, &node_id);
                if let Some(node) = graph.node_mut(&node_id) {
                    node.set_status(NodeStatus::Running);
                }

                let driver = Arc::clone(&self.driver);
                let semaphore = Arc::clone(&semaphore);
                let task_timeout = self.options.task_timeout;
                in_flight.insert(node_id.clone());
                join_set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    run_node(driver, node_id, request, task_timeout).await
                });
            }

            while let Some(joined) = join_set.join_next().await {
                let Ok((node_id, result, failure)) = joined else {
                    // The task itself died; the stragglers are settled
                    // after the drain.
                    warn!("worker task aborted before reporting a result");
                    continue;
                };
                in_flight.remove(&node_id);

                let allow_failure = graph
                    .node(&node_id)
                    .is_some_and(|node| node.step().allow_failure());
                let status = if result.success {
                    NodeStatus::Completed
                } else {
                    NodeStatus::Failed
                };
                graph.record_result(&node_id, status, result);

                if let Some(err) = failure {
                    if allow_failure {
                        report
                            .warnings
                            .push(format!("step {node_id} failed but failures are allowed: {err}"));
                    } else {
                        poisoned.insert(node_id);
                        report.errors.push(err);
                    }
                }
            }

            for node_id in in_flight {
                let message = "worker task panicked or was cancelled";
                graph.record_result(&node_id, NodeStatus::Failed, StepResult::failed(message));
                poisoned.insert(node_id.clone());
                report.errors.push(Error::driver_failure(node_id, message));
            }
        }

        report.outcomes = collect_outcomes(graph, &order);
        Ok(report)
    }

    /// Derive the request for a node, applying result substitution from
    /// everything recorded so far.
    fn derive_request(&self, graph: &ExecutionGraph, node_id: &str) -> ExecutionRequest {
        let node = graph.node(node_id).expect("node exists");
        let mut request = ExecutionRequest::from_step(node.step());
        substitute::apply_substitution(&mut request, graph.execution_results());
        request
    }

    /// Transitively mark every pending dependent of a failed node as
    /// skipped.
    fn skip_dependents(&self, graph: &mut ExecutionGraph, failed_id: &str) {
        for dependent in graph.transitive_dependents(failed_id) {
            let pending = graph
                .node(&dependent)
                .is_some_and(|node| node.status() == NodeStatus::Pending);
            if pending {
                graph.record_result(
                    &dependent,
                    NodeStatus::Skipped,
                    StepResult::skipped_by_failure(format!(
                        "skipped because {failed_id} failed"
                    )),
                );
            }
        }
    }
}

fn evaluate_guard(node: &StepNode, ctx: &StepContext) -> GuardDecision {
    match node.step().when() {
        None => GuardDecision::Run,
        Some(guard) => match guard.evaluate(ctx) {
            Ok(true) => GuardDecision::Run,
            Ok(false) => GuardDecision::Skip,
            Err(err) => GuardDecision::Fail(err),
        },
    }
}

/// Invoke the driver for one node under the task deadline, mapping
/// timeouts, driver errors, and unsuccessful results to a uniform
/// `(result, failure)` pair.
async fn run_node(
    driver: Arc<dyn Driver>,
    node_id: String,
    request: ExecutionRequest,
    task_timeout: Duration,
) -> (String, StepResult, Option<Error>) {
    let seconds = task_timeout.as_secs();
    match timeout(task_timeout, driver.execute(request)).await {
        Err(_) => {
            warn!(%node_id, seconds, "task deadline exceeded");
            let err = Error::timeout(&node_id, seconds);
            let result = StepResult::failed(err.to_string());
            (node_id, result, Some(err))
        }
        Ok(Err(err)) => {
            let result = StepResult::failed(err.to_string());
            let failure = Error::driver_failure(&node_id, err.to_string());
            (node_id, result, Some(failure))
        }
        Ok(Ok(result)) => {
            if result.success {
                (node_id, result, None)
            } else {
                let message = result
                    .error_message
                    .clone()
                    .or_else(|| result.stderr.clone())
                    .unwrap_or_else(|| {
                        format!("exit code {}", result.exit_code.unwrap_or(-1))
                    });
                let failure = Error::driver_failure(&node_id, message);
                (node_id, result, Some(failure))
            }
        }
    }
}

fn collect_outcomes(graph: &ExecutionGraph, order: &[String]) -> Vec<NodeExecution> {
    order
        .iter()
        .filter_map(|node_id| graph.node(node_id))
        .map(|node| NodeExecution {
            node_id: node.id().to_string(),
            status: node.status(),
            result: node.result().cloned(),
        })
        .collect()
}
