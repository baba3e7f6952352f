// tests/runtime_fake_backend.rs

mod common;
use crate::common::init_tracing;

use std::error::Error;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

use cycleflow::engine::{CoreScheduler, Runtime, RuntimeOptions, SchedulerEvent};
use cycleflow::job::JobRequest;
use cycleflow_test_utils::builders::WorkflowConfigBuilder;
use cycleflow_test_utils::fake_backend::{FakeJobBackend, FakeOutcome};

type TestResult = Result<(), Box<dyn Error>>;

/// Simple chain over three integer cycles: a => b at points 1..3.
fn three_cycle_chain() -> cycleflow::workflow::CompiledWorkflow {
    WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("3"))
        .runahead_limit("P0")
        .graph("P1", "a => b")
        .simple_task("a")
        .simple_task("b")
        .compile()
}

#[tokio::test]
async fn runtime_with_fake_backend_runs_cycling_chain() -> TestResult {
    init_tracing();

    let core = CoreScheduler::new(three_cycle_chain());

    let (event_tx, event_rx) = mpsc::channel::<SchedulerEvent>(64);

    let submitted: Arc<Mutex<Vec<JobRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let backend = FakeJobBackend::new(event_tx.clone(), Arc::clone(&submitted));

    let runtime = Runtime::new(core, event_rx, backend, RuntimeOptions::default());

    // Enforce an upper bound on how long this test may run.
    match timeout(Duration::from_secs(5), runtime.run()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(format!("runtime error: {e}").into()),
        Err(_) => panic!("runtime did not finish within 5 seconds"),
    }

    let jobs_run: Vec<String> = submitted
        .lock()
        .unwrap()
        .iter()
        .map(|j| j.id.to_string())
        .collect();
    // Runahead P0 serializes the cycles completely.
    assert_eq!(jobs_run, vec!["a.1", "b.1", "a.2", "b.2", "a.3", "b.3"]);

    Ok(())
}

#[tokio::test]
async fn suicide_removes_running_instance_with_a_kill() -> TestResult {
    init_tracing();

    // c is long-running; b's failure makes it moot and must kill it.
    let workflow = WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("1"))
        .graph("R1", "a => c\na => b\nb:fail? => !c")
        .simple_task("a")
        .simple_task("b")
        .simple_task("c")
        .compile();
    let core = CoreScheduler::new(workflow);

    let (event_tx, event_rx) = mpsc::channel::<SchedulerEvent>(64);

    let submitted: Arc<Mutex<Vec<JobRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let backend = FakeJobBackend::new(event_tx.clone(), Arc::clone(&submitted))
        // b fails; c never completes on its own (no scripted outcome is
        // consumed because the kill removes it first).
        .with_outcomes("b", vec![FakeOutcome::Fail(1)]);

    let runtime = Runtime::new(core, event_rx, backend, RuntimeOptions::default());

    match timeout(Duration::from_secs(5), runtime.run()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(format!("runtime error: {e}").into()),
        Err(_) => panic!("runtime did not finish within 5 seconds"),
    }

    let jobs_run: Vec<String> = submitted
        .lock()
        .unwrap()
        .iter()
        .map(|j| j.id.to_string())
        .collect();
    assert!(jobs_run.contains(&"c.1".to_string()), "c was submitted: {jobs_run:?}");

    Ok(())
}

#[tokio::test]
async fn custom_output_messages_flow_through_the_runtime() -> TestResult {
    init_tracing();

    let workflow = WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("1"))
        .graph("R1", "a:ready => b\na")
        .task(
            "a",
            cycleflow_test_utils::builders::NamespaceBuilder::new()
                .script("echo ready")
                .output("ready", "a is ready")
                .build(),
        )
        .simple_task("b")
        .compile();
    let core = CoreScheduler::new(workflow);

    let (event_tx, event_rx) = mpsc::channel::<SchedulerEvent>(64);

    let submitted: Arc<Mutex<Vec<JobRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let backend = FakeJobBackend::new(event_tx.clone(), Arc::clone(&submitted))
        .with_outcomes(
            "a",
            vec![FakeOutcome::SucceedWith(vec!["a is ready".to_string()])],
        );

    let runtime = Runtime::new(core, event_rx, backend, RuntimeOptions::default());

    match timeout(Duration::from_secs(5), runtime.run()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(format!("runtime error: {e}").into()),
        Err(_) => panic!("runtime did not finish within 5 seconds"),
    }

    let jobs_run: Vec<String> = submitted
        .lock()
        .unwrap()
        .iter()
        .map(|j| j.id.to_string())
        .collect();
    assert_eq!(jobs_run, vec!["a.1", "b.1"]);

    Ok(())
}
