//! End-to-end scenarios driving the whole pipeline with a recording
//! driver: preparation insertion, coalescing, cycle rejection, parallel
//! levels, failure propagation, and result substitution.

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use stepflow::{
    build_graph, parse_steps, optimize_steps, resolve_dependencies, DependencyEdge, Driver,
    EdgeKind, Error, ExecutionGraph, ExecutionRequest, Executor, ExecutorOptions, NodeStatus,
    ResourceEffect, Step, StepContext, StepKind, StepNode, StepResult, WorkflowEngine,
};

/// Driver that records every request, emulates `echo`, and fails on
/// demand.
struct RecordingDriver {
    executed: Mutex<Vec<(StepKind, Vec<String>)>>,
    fail_on: Vec<String>,
}

impl RecordingDriver {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            executed: Mutex::new(Vec::new()),
            fail_on: Vec::new(),
        })
    }

    fn failing_on(fragments: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            executed: Mutex::new(Vec::new()),
            fail_on: fragments.iter().map(ToString::to_string).collect(),
        })
    }

    fn executed(&self) -> Vec<(StepKind, Vec<String>)> {
        self.executed.lock().unwrap().clone()
    }

    fn executed_args(&self) -> Vec<String> {
        self.executed()
            .into_iter()
            .map(|(_, args)| args.join(" "))
            .collect()
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    async fn execute(&self, request: ExecutionRequest) -> stepflow::Result<StepResult> {
        let tag = request.args.join(" ");
        self.executed
            .lock()
            .unwrap()
            .push((request.kind, request.args.clone()));

        if self.fail_on.iter().any(|f| tag.contains(f.as_str())) {
            return Ok(StepResult::failed(format!("scripted failure for '{tag}'")));
        }

        let stdout = tag.strip_prefix("echo ").map(ToString::to_string);
        Ok(StepResult {
            success: true,
            exit_code: Some(0),
            stdout,
            ..StepResult::default()
        })
    }
}

fn shell_node(id: &str, index: usize, command: &str) -> StepNode {
    let step = Step::builder(StepKind::Shell).arg(command).build().unwrap();
    StepNode::new(id, step, ResourceEffect::empty(), index)
}

/// S1: a copy into a missing directory gains an auto-generated mkdir
/// with a directory-creation edge in front of it.
#[tokio::test]
async fn scenario_copy_with_implicit_mkdir() {
    let ctx = StepContext::new();
    let records = vec![json!({"type": "copy", "cmd": ["src.txt", "out/result.txt"]})];

    let parsed = parse_steps(&records, &ctx);
    assert!(parsed.is_success());
    let prepared = optimize_steps(&resolve_dependencies(&parsed.steps));

    assert_eq!(prepared.len(), 2);
    assert_eq!(prepared[0].kind(), StepKind::Mkdir);
    assert!(prepared[0].allow_failure());
    assert!(prepared[0].auto_generated());
    assert_eq!(prepared[1].kind(), StepKind::Copy);

    let graph = build_graph(&prepared).graph.expect("acyclic graph");
    assert_eq!(graph.edges().len(), 1);
    let edge = &graph.edges()[0];
    assert_eq!(edge.kind, EdgeKind::DirectoryCreation);
    assert_eq!(edge.from, "step_0");
    assert_eq!(edge.to, "step_1");
    assert_eq!(graph.execution_order().unwrap(), ["step_0", "step_1"]);

    let driver = RecordingDriver::new();
    let outcome = WorkflowEngine::new(driver.clone()).run(&records, &ctx).await;
    assert!(outcome.success);
    assert_eq!(outcome.preparation_results.len(), 1);
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(driver.executed_args(), ["out", "src.txt out/result.txt"]);
}

/// S2: duplicate mkdirs coalesce while the touch keeps its
/// directory-creation edge.
#[tokio::test]
async fn scenario_mkdir_coalescing() {
    let ctx = StepContext::new();
    let records = vec![
        json!({"type": "mkdir", "cmd": ["a"]}),
        json!({"type": "mkdir", "cmd": ["b"]}),
        json!({"type": "mkdir", "cmd": ["a"]}),
        json!({"type": "touch", "cmd": ["a/x.txt"]}),
    ];

    let parsed = parse_steps(&records, &ctx);
    let prepared = optimize_steps(&resolve_dependencies(&parsed.steps));

    assert_eq!(prepared.len(), 3);
    assert_eq!(prepared[0].cmd(), ["a"]);
    assert_eq!(prepared[1].cmd(), ["b"]);
    assert_eq!(prepared[2].kind(), StepKind::Touch);

    let graph = build_graph(&prepared).graph.expect("acyclic graph");
    assert!(graph
        .edges()
        .iter()
        .any(|e| e.from == "step_0" && e.to == "step_2" && e.kind == EdgeKind::DirectoryCreation));
}

/// S3: a forced cycle is rejected with a trace before any driver call.
#[tokio::test]
async fn scenario_cycle_rejection() {
    let mut graph = ExecutionGraph::new();
    graph.add_node(shell_node("step_0", 0, "produce b"));
    graph.add_node(shell_node("step_1", 1, "produce a"));
    graph.add_edge(DependencyEdge {
        from: "step_0".to_string(),
        to: "step_1".to_string(),
        kind: EdgeKind::FileCreation,
        resource_path: Some("a.txt".to_string()),
        description: "File a.txt must be created before being read".to_string(),
    });
    graph.add_edge(DependencyEdge {
        from: "step_1".to_string(),
        to: "step_0".to_string(),
        kind: EdgeKind::FileCreation,
        resource_path: Some("b.txt".to_string()),
        description: "File b.txt must be created before being read".to_string(),
    });

    let trace = graph.detect_cycle().expect("cycle expected");
    assert!(trace.nodes.len() >= 2);

    let driver = RecordingDriver::new();
    let executor = Executor::new(driver.clone());
    let err = executor
        .execute(&mut graph, &StepContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CircularDependency { .. }));
    let text = err.to_string();
    assert!(text.contains("step_0"));
    assert!(text.contains("step_1"));
    assert!(text.contains("Resolution suggestions"));

    // No executor invocation reached the driver.
    assert!(driver.executed().is_empty());
}

/// S4: independent mkdirs form one level, their touches the next;
/// levels execute strictly in order.
#[tokio::test]
async fn scenario_parallel_level_computation() {
    let ctx = StepContext::new();
    let records = vec![
        json!({"type": "mkdir", "cmd": ["a"]}),
        json!({"type": "mkdir", "cmd": ["b"]}),
        json!({"type": "touch", "cmd": ["a/1"]}),
        json!({"type": "touch", "cmd": ["b/1"]}),
    ];

    let parsed = parse_steps(&records, &ctx);
    let prepared = optimize_steps(&resolve_dependencies(&parsed.steps));
    let graph = build_graph(&prepared).graph.expect("acyclic graph");
    assert_eq!(
        graph.parallel_levels().unwrap(),
        vec![
            vec!["step_0".to_string(), "step_1".to_string()],
            vec!["step_2".to_string(), "step_3".to_string()],
        ]
    );

    let driver = RecordingDriver::new();
    let engine = WorkflowEngine::with_options(
        driver.clone(),
        ExecutorOptions {
            parallel: true,
            max_workers: 4,
            ..ExecutorOptions::default()
        },
    );
    let outcome = engine.run(&records, &ctx).await;
    assert!(outcome.success);

    let order = driver.executed_args();
    let position = |tag: &str| order.iter().position(|e| e == tag).expect("executed");
    assert!(position("a") < position("a/1"));
    assert!(position("b") < position("b/1"));
    assert!(position("a") < position("b/1"));
    assert!(position("b") < position("a/1"));
}

/// S5: a hard failure skips its dependent; an independent step still
/// completes; the workflow is unsuccessful and carries the failure.
#[tokio::test]
async fn scenario_failure_propagation() {
    let ctx = StepContext::new();
    let records = vec![
        json!({"type": "copy", "cmd": ["seed.txt", "mid.txt"]}),
        json!({"type": "copy", "cmd": ["mid.txt", "final.txt"]}),
        json!({"type": "mkdir", "cmd": ["independent"]}),
    ];

    let driver = RecordingDriver::failing_on(&["seed.txt"]);
    let engine = WorkflowEngine::with_options(
        driver.clone(),
        ExecutorOptions {
            parallel: true,
            max_workers: 2,
            ..ExecutorOptions::default()
        },
    );
    let outcome = engine.run(&records, &ctx).await;

    assert!(!outcome.success);
    let status_of = |id: &str| {
        outcome
            .results
            .iter()
            .find(|o| o.node_id == id)
            .unwrap_or_else(|| panic!("missing {id}"))
            .status
    };
    assert_eq!(status_of("step_0"), NodeStatus::Failed);
    assert_eq!(status_of("step_1"), NodeStatus::Skipped);
    assert_eq!(status_of("step_2"), NodeStatus::Completed);
    assert!(outcome
        .errors
        .iter()
        .any(|e| e.to_string().contains("seed.txt")));

    // The skipped node is marked as an engine skip, not a guard skip.
    let skipped = outcome
        .results
        .iter()
        .find(|o| o.node_id == "step_1")
        .and_then(|o| o.result.as_ref())
        .expect("skip result recorded");
    assert!(skipped.skipped);
    assert!(!skipped.success);
}

/// S6: a downstream command sees the upstream stdout substituted in
/// place of its placeholder at execution time.
#[tokio::test]
async fn scenario_result_substitution() {
    let ctx = StepContext::new();
    let records = vec![
        json!({"type": "shell", "cmd": ["echo 42"]}),
        json!({"type": "shell", "cmd": ["echo {{step_0.stdout}}"]}),
    ];

    let driver = RecordingDriver::new();
    let outcome = WorkflowEngine::new(driver.clone()).run(&records, &ctx).await;
    assert!(outcome.success);

    let executed = driver.executed_args();
    assert_eq!(executed, ["echo 42", "echo 42"]);

    let first = outcome.results[0].result.as_ref().unwrap();
    assert_eq!(first.stdout.as_deref(), Some("42"));
}

/// Guard-false skips execute no driver call and do not poison
/// dependents, unlike upstream-failure skips.
#[tokio::test]
async fn scenario_guard_skip_is_soft() {
    let ctx = StepContext::new();
    let records = vec![
        json!({
            "type": "shell",
            "cmd": ["echo guarded"],
            "when": "test -d /no/such/directory/at/all"
        }),
        json!({"type": "shell", "cmd": ["echo after"]}),
    ];

    let driver = RecordingDriver::new();
    let outcome = WorkflowEngine::new(driver.clone()).run(&records, &ctx).await;
    assert!(outcome.success);
    assert_eq!(outcome.results[0].status, NodeStatus::Skipped);
    let skipped = outcome.results[0].result.as_ref().unwrap();
    assert!(skipped.skipped);
    assert!(skipped.success);
    assert_eq!(driver.executed_args(), ["echo after"]);
}
