//! Whole-pipeline tests against the local driver and a real temporary
//! directory: preparation mkdirs actually land on disk, guards consult
//! the real filesystem, and parallel execution produces the same tree.

use futures::future::join_all;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use stepflow::{
    ExecutorOptions, LocalDriver, NodeStatus, StepContext, StepKind, WorkflowEngine,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}

fn contest_context(root: &str) -> StepContext {
    StepContext::new()
        .contest_name("abc300")
        .problem_name("a")
        .language("python")
        .env_type("local")
        .command_type("open")
        .workspace_path(root)
        .contest_current_path(format!("{root}/current"))
        .contest_template_path(format!("{root}/templates"))
        .source_file_name("main.py")
}

#[tokio::test]
async fn copy_workflow_creates_missing_directories_on_disk() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_string_lossy().to_string();

    std::fs::create_dir_all(format!("{root}/templates")).unwrap();
    std::fs::write(format!("{root}/templates/main.py"), b"print('hi')\n").unwrap();

    let records = vec![json!({
        "type": "copy",
        "cmd": ["{contest_template_path}/main.py",
                "{contest_current_path}/{source_file_name}"],
        "when": "test -d {contest_template_path}"
    })];

    let engine = WorkflowEngine::new(Arc::new(LocalDriver::new()));
    let outcome = engine.run(&records, &contest_context(&root)).await;

    assert!(outcome.success, "errors: {:?}", outcome.errors);
    assert_eq!(outcome.preparation_results.len(), 1);
    assert_eq!(outcome.preparation_results[0].kind, StepKind::Mkdir);
    assert!(Path::new(&format!("{root}/current/main.py")).is_file());
}

#[tokio::test]
async fn false_guard_leaves_the_disk_untouched() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_string_lossy().to_string();
    // No templates directory this time: the guard is false.

    let records = vec![json!({
        "type": "copy",
        "cmd": ["{contest_template_path}/main.py",
                "{contest_current_path}/{source_file_name}"],
        "when": "test -d {contest_template_path}"
    })];

    let engine = WorkflowEngine::new(Arc::new(LocalDriver::new()));
    let outcome = engine.run(&records, &contest_context(&root)).await;

    assert!(outcome.success);
    assert_eq!(outcome.results[0].status, NodeStatus::Skipped);
    assert!(!Path::new(&format!("{root}/current/main.py")).exists());
}

#[tokio::test]
async fn parallel_run_produces_the_same_tree() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_string_lossy().to_string();

    let records = vec![
        json!({"type": "mkdir", "cmd": [format!("{root}/a")]}),
        json!({"type": "mkdir", "cmd": [format!("{root}/b")]}),
        json!({"type": "touch", "cmd": [format!("{root}/a/1")]}),
        json!({"type": "touch", "cmd": [format!("{root}/b/1")]}),
    ];

    let engine = WorkflowEngine::with_options(
        Arc::new(LocalDriver::new()),
        ExecutorOptions {
            parallel: true,
            max_workers: 4,
            ..ExecutorOptions::default()
        },
    );
    let outcome = engine.run(&records, &StepContext::new()).await;

    assert!(outcome.success, "errors: {:?}", outcome.errors);
    assert!(Path::new(&format!("{root}/a/1")).is_file());
    assert!(Path::new(&format!("{root}/b/1")).is_file());
}

#[tokio::test]
async fn independent_workflows_run_concurrently() {
    init_tracing();
    let driver = Arc::new(LocalDriver::new());

    let runs = (0..3).map(|index| {
        let driver = Arc::clone(&driver);
        async move {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().to_string_lossy().to_string();
            let records = vec![
                json!({"type": "mkdir", "cmd": [format!("{root}/work_{index}")]}),
                json!({"type": "touch", "cmd": [format!("{root}/work_{index}/flag")]}),
            ];
            let outcome = WorkflowEngine::new(driver)
                .run(&records, &StepContext::new())
                .await;
            let flag_exists = Path::new(&format!("{root}/work_{index}/flag")).is_file();
            (outcome.success, flag_exists)
        }
    });

    for (success, flag_exists) in join_all(runs).await {
        assert!(success);
        assert!(flag_exists);
    }
}

#[test]
fn engine_runs_outside_the_macro_runtime() {
    // The engine only needs a runtime at call time, not construction.
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_string_lossy().to_string();
    let engine = WorkflowEngine::new(Arc::new(LocalDriver::new()));
    let records = vec![json!({"type": "mkdir", "cmd": [format!("{root}/made")]})];

    let outcome = tokio_test::block_on(engine.run(&records, &StepContext::new()));
    assert!(outcome.success);
    assert!(Path::new(&format!("{root}/made")).is_dir());
}
