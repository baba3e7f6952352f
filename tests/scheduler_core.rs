// tests/scheduler_core.rs

//! Deterministic, synchronous tests of the core scheduler: spawning,
//! propagation, suicide, queue limits, runahead, retries, flows, holds.

mod common;
use crate::common::init_tracing;

use chrono::Duration;

use cycleflow::broadcast::BroadcastTarget;
use cycleflow::cycling::CyclePoint;
use cycleflow::engine::{OperatorCommand, StopMode, TaskMatcher};
use cycleflow::flow::FlowSpec;
use cycleflow::pool::TaskState;
use cycleflow_test_utils::builders::{NamespaceBuilder, WorkflowConfigBuilder};
use cycleflow_test_utils::sim::Sim;

fn p(n: i64) -> CyclePoint {
    CyclePoint::Integer(n)
}

#[test]
fn single_cycle_chain_runs_in_dependency_order() {
    init_tracing();

    let workflow = WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("1"))
        .graph("R1", "a => b => c")
        .simple_task("a")
        .simple_task("b")
        .simple_task("c")
        .compile();
    let mut sim = Sim::new(workflow);

    sim.tick();
    assert_eq!(sim.submitted_ids(), vec!["a.1"]);

    sim.succeed("a");
    assert_eq!(sim.submitted_ids(), vec!["a.1", "b.1"]);

    sim.succeed("b");
    sim.succeed("c");

    assert_eq!(sim.submitted_ids(), vec!["a.1", "b.1", "c.1"]);
    assert_eq!(sim.exited.as_deref(), Some("workflow complete"));
    assert!(sim.core.pool_is_empty());
}

#[test]
fn cycling_chain_spawns_successive_points() {
    init_tracing();

    let workflow = WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("3"))
        .runahead_limit("P1")
        .graph("P1", "a => b")
        .simple_task("a")
        .simple_task("b")
        .compile();
    let mut sim = Sim::new(workflow);

    sim.tick();
    // Runahead P1 from base 1 admits points 1 and 2.
    assert_eq!(sim.submitted_ids(), vec!["a.1", "a.2"]);

    sim.succeed("a"); // a.1
    sim.succeed("b"); // b.1
    sim.succeed("a"); // a.2
    sim.succeed("b"); // b.2
    sim.succeed("a"); // a.3
    sim.succeed("b"); // b.3

    assert_eq!(
        sim.submitted_ids(),
        vec!["a.1", "a.2", "b.1", "a.3", "b.2", "b.3"]
    );
    assert_eq!(sim.exited.as_deref(), Some("workflow complete"));
}

#[test]
fn intercycle_dependency_serializes_cycles() {
    init_tracing();

    let workflow = WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("3"))
        .graph("P1", "a[-P1] => a")
        .simple_task("a")
        .compile();
    let mut sim = Sim::new(workflow);

    // The first instance's only dependency reaches before the initial
    // point, so it starts; later instances wait for their predecessor.
    sim.tick();
    assert_eq!(sim.submitted_ids(), vec!["a.1"]);

    sim.succeed("a");
    assert_eq!(sim.submitted_ids(), vec!["a.1", "a.2"]);
    sim.succeed("a");
    sim.succeed("a");

    assert_eq!(sim.submitted_ids(), vec!["a.1", "a.2", "a.3"]);
    assert_eq!(sim.exited.as_deref(), Some("workflow complete"));
}

#[test]
fn suicide_trigger_removes_target_before_it_is_ever_queued() {
    init_tracing();

    let workflow = WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("1"))
        .graph("R1", "a & b\na? & b? => !c")
        .simple_task("a")
        .simple_task("b")
        .simple_task("c")
        .compile();
    let mut sim = Sim::new(workflow);

    sim.tick();
    assert_eq!(sim.submitted_ids(), vec!["a.1", "b.1"]);

    sim.succeed("a");
    // c.1 is spawned to track the suicide expression, but must not run.
    assert!(sim.snapshot().get("c", &p(1)).is_some());

    sim.fail("b", 1);
    // a finished and b finished: the suicide fires, c goes before ever
    // being queued or submitted.
    assert!(sim.snapshot().get("c", &p(1)).is_none());
    assert!(!sim.submitted_ids().contains(&"c.1".to_string()));

    assert_eq!(sim.exited.as_deref(), Some("workflow complete"));
}

#[test]
fn queue_limit_never_exceeds_two_active() {
    init_tracing();

    let mut builder = WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("1"))
        .graph("R1", "t1 & t2 & t3 & t4 & t5")
        .queue("pool", 2, &["t1", "t2", "t3", "t4", "t5"]);
    for name in ["t1", "t2", "t3", "t4", "t5"] {
        builder = builder.simple_task(name);
    }
    let mut sim = Sim::new(builder.compile());

    sim.tick();
    assert_eq!(sim.pending_count(), 2);
    assert_eq!(sim.submitted_ids(), vec!["t1.1", "t2.1"]);

    let mut max_pending = sim.pending_count();
    for name in ["t1", "t2", "t3", "t4", "t5"] {
        sim.succeed(name);
        max_pending = max_pending.max(sim.pending_count());
    }

    assert!(max_pending <= 2, "queue limit exceeded: {max_pending}");
    assert_eq!(sim.submitted.len(), 5);
    assert_eq!(sim.exited.as_deref(), Some("workflow complete"));
}

#[test]
fn runahead_limit_bounds_active_cycles() {
    init_tracing();

    let workflow = WorkflowConfigBuilder::new()
        .integer_cycling("1", None)
        .runahead_limit("P2")
        .graph("P1", "a")
        .simple_task("a")
        .compile();
    let mut sim = Sim::new(workflow);

    sim.tick();

    for _ in 0..10 {
        let snapshot = sim.snapshot();
        let points: Vec<i64> = snapshot
            .tasks
            .iter()
            .filter(|t| !matches!(t.state, TaskState::Succeeded | TaskState::Failed | TaskState::Expired))
            .map(|t| match t.id.point {
                CyclePoint::Integer(p) => p,
                _ => unreachable!("integer workflow"),
            })
            .collect();
        let base = *points.iter().min().unwrap();
        let max = *points.iter().max().unwrap();
        assert!(
            max - base <= 2,
            "more than 2 cycles of non-terminal instances ahead of {base}: {points:?}"
        );

        sim.succeed("a");
    }
}

#[test]
fn failed_task_retries_then_exhausts() {
    init_tracing();

    let workflow = WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("1"))
        .graph("R1", "a")
        .task(
            "a",
            NamespaceBuilder::new()
                .script("false")
                .retry_delays(&["PT1S", "PT2S"])
                .build(),
        )
        .compile();
    let mut sim = Sim::new(workflow);

    sim.tick();
    assert_eq!(sim.submitted.len(), 1);

    // First failure: retry scheduled at failure time + PT1S.
    let t_fail1 = sim.now;
    sim.fail("a", 1);
    let summary = sim.snapshot();
    let a = summary.get("a", &p(1)).unwrap();
    assert_eq!(a.state, TaskState::Waiting);
    assert_eq!(a.retry_at, Some(t_fail1 + Duration::seconds(1)));

    // Not due yet: nothing resubmits.
    sim.tick();
    assert_eq!(sim.submitted.len(), 1);

    sim.advance_secs(1);
    assert_eq!(sim.submitted.len(), 2);

    // Second failure: delay PT2S from the new failure time.
    let t_fail2 = sim.now;
    sim.fail("a", 1);
    let summary = sim.snapshot();
    assert_eq!(
        summary.get("a", &p(1)).unwrap().retry_at,
        Some(t_fail2 + Duration::seconds(2))
    );

    sim.advance_secs(2);
    assert_eq!(sim.submitted.len(), 3);

    // Third failure: both retries consumed, the task fails for good.
    sim.fail("a", 1);
    let summary = sim.snapshot();
    let a = summary.get("a", &p(1)).unwrap();
    assert_eq!(a.state, TaskState::Failed);
    assert!(a.incomplete, "success was required");
    assert!(sim.last_stall.is_some());
    assert_eq!(sim.submitted.len(), 3);
}

#[test]
fn flow_merge_is_commutative_and_idempotent() {
    init_tracing();

    let workflow = WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("1"))
        .graph("R1", "a => b")
        .simple_task("a")
        .simple_task("b")
        .compile();
    let mut sim = Sim::new(workflow);

    sim.tick();

    // Trigger b.1 ahead of its prerequisite, in a fresh flow.
    sim.command(OperatorCommand::Trigger {
        name: "b".to_string(),
        point: p(1),
        flow: FlowSpec::New,
        wait: false,
    });
    let flows_after_trigger = sim.snapshot().get("b", &p(1)).unwrap().flows.clone();
    assert_eq!(flows_after_trigger.len(), 1);

    // The original flow arrives when a.1 completes: sets union.
    sim.succeed("a");
    let merged = sim.snapshot().get("b", &p(1)).unwrap().flows.clone();
    assert_eq!(merged.len(), 2);
    assert!(merged.iter().any(|f| flows_after_trigger.contains(f)));

    // Merging an already-present flow changes nothing.
    sim.command(OperatorCommand::Trigger {
        name: "b".to_string(),
        point: p(1),
        flow: FlowSpec::Current,
        wait: false,
    });
    let again = sim.snapshot().get("b", &p(1)).unwrap().flows.clone();
    assert_eq!(again, merged);
}

#[test]
fn none_flow_instances_run_but_spawn_no_successors() {
    init_tracing();

    let workflow = WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("1"))
        .graph("R1", "x => y")
        .simple_task("x")
        .simple_task("y")
        .compile();
    let mut sim = Sim::new(workflow);

    // Remove the auto-spawned x.1 and re-trigger it in the none flow.
    sim.tick();
    sim.command(OperatorCommand::Remove(TaskMatcher::new("x", Some(p(1)))));
    sim.command(OperatorCommand::Trigger {
        name: "x".to_string(),
        point: p(1),
        flow: FlowSpec::None,
        wait: false,
    });

    sim.succeed("x");
    // x ran and reported, but y must not spawn from a none-flow completion.
    assert!(sim.snapshot().get("y", &p(1)).is_none());
    assert!(!sim.submitted_ids().contains(&"y.1".to_string()));
}

#[test]
fn hold_blocks_release_until_released() {
    init_tracing();

    let workflow = WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("1"))
        .graph("R1", "a")
        .task(
            "a",
            NamespaceBuilder::new()
                .script("false")
                .retry_delays(&["PT1S"])
                .build(),
        )
        .compile();
    let mut sim = Sim::new(workflow);

    sim.tick();
    sim.fail("a", 1);
    sim.command(OperatorCommand::Hold(TaskMatcher::new("a", Some(p(1)))));

    // Retry delay elapses, but the hold keeps the instance back.
    sim.advance_secs(5);
    assert_eq!(sim.submitted.len(), 1);
    assert_eq!(sim.snapshot().get("a", &p(1)).unwrap().state, TaskState::Waiting);

    sim.command(OperatorCommand::Release(TaskMatcher::new("a", Some(p(1)))));
    sim.tick();
    assert_eq!(sim.submitted.len(), 2);
}

#[test]
fn stop_request_suppresses_spawning_and_drains() {
    init_tracing();

    let workflow = WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("5"))
        .runahead_limit("P0")
        .graph("P1", "a => b")
        .simple_task("a")
        .simple_task("b")
        .compile();
    let mut sim = Sim::new(workflow);

    sim.tick();
    assert_eq!(sim.submitted_ids(), vec!["a.1"]);

    sim.command(OperatorCommand::Stop(StopMode::Request));
    // Idempotent: a second stop changes nothing.
    sim.command(OperatorCommand::Stop(StopMode::Request));
    assert!(sim.exited.is_none(), "active instance still draining");

    sim.succeed("a");
    // b.1 would normally spawn from a.1's success; stop suppresses it.
    assert!(sim.snapshot().get("b", &p(1)).is_none());
    assert!(sim.exited.is_some());
}

#[test]
fn incomplete_required_output_is_surfaced_and_stalls() {
    init_tracing();

    let workflow = WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("1"))
        .graph("R1", "a => b")
        .simple_task("a")
        .simple_task("b")
        .compile();
    let mut sim = Sim::new(workflow);

    sim.tick();
    sim.fail("a", 1);

    let snapshot = sim.snapshot();
    let a = snapshot.get("a", &p(1)).unwrap();
    assert_eq!(a.state, TaskState::Failed);
    assert!(a.incomplete);

    let stall = sim.last_stall.clone().expect("workflow should stall");
    assert!(stall.contains("a.1"), "stall reason names the task: {stall}");
    assert!(sim.exited.is_none());
}

#[test]
fn custom_output_triggers_downstream_before_terminal_state() {
    init_tracing();

    let workflow = WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("1"))
        .graph("R1", "a:ready => b")
        .task(
            "a",
            NamespaceBuilder::new()
                .script("echo a ready; sleep 10")
                .output("ready", "a ready")
                .build(),
        )
        .simple_task("b")
        .compile();
    let mut sim = Sim::new(workflow);

    sim.tick();
    assert_eq!(sim.submitted_ids(), vec!["a.1"]);

    // The output message arrives while a is still running.
    sim.message("a", "a ready");
    assert_eq!(sim.submitted_ids(), vec!["a.1", "b.1"]);
    assert_eq!(
        sim.snapshot().get("a", &p(1)).unwrap().state,
        TaskState::Submitted
    );

    sim.succeed("b");
    sim.succeed("a");
    assert_eq!(sim.exited.as_deref(), Some("workflow complete"));
}

#[test]
fn broadcast_overrides_apply_at_submission_time() {
    init_tracing();

    let workflow = WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("2"))
        .runahead_limit("P0")
        .graph("P1", "x => a")
        .simple_task("x")
        .task(
            "a",
            NamespaceBuilder::new().script("echo base").env("X", "0").build(),
        )
        .compile();
    let mut sim = Sim::new(workflow);

    // Wildcard override, then a point-specific one that beats it at 1.
    sim.command(OperatorCommand::BroadcastSet {
        target: BroadcastTarget::AllPoints,
        namespace: "a".to_string(),
        settings: vec![("env.X".to_string(), "1".to_string())],
        expiry: None,
    });
    sim.command(OperatorCommand::BroadcastSet {
        target: BroadcastTarget::Point(p(1)),
        namespace: "a".to_string(),
        settings: vec![
            ("env.X".to_string(), "2".to_string()),
            ("script".to_string(), "echo patched".to_string()),
        ],
        expiry: None,
    });

    sim.tick();
    sim.succeed("x"); // x.1 -> a.1 submitted
    let a1 = sim
        .submitted
        .iter()
        .find(|j| j.id.to_string() == "a.1")
        .expect("a.1 submitted")
        .clone();
    assert_eq!(a1.env.get("X"), Some(&"2".to_string()));
    assert_eq!(a1.script, "echo patched");

    sim.succeed("a"); // a.1
    sim.succeed("x"); // x.2 -> a.2: only the wildcard applies there
    let a2 = sim
        .submitted
        .iter()
        .find(|j| j.id.to_string() == "a.2")
        .expect("a.2 submitted")
        .clone();
    assert_eq!(a2.env.get("X"), Some(&"1".to_string()));
    assert_eq!(a2.script, "echo base");
}

#[test]
fn reload_rebinds_live_instances() {
    init_tracing();

    let workflow = WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("1"))
        .graph("R1", "a => b")
        .simple_task("a")
        .simple_task("b")
        .compile();
    let mut sim = Sim::new(workflow);

    sim.tick();
    sim.succeed("a");
    assert_eq!(sim.submitted_ids(), vec!["a.1", "b.1"]);

    // Recompile with an extra downstream task; b.1 keeps its identity.
    let reloaded = WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("1"))
        .graph("R1", "a => b => c")
        .simple_task("a")
        .simple_task("b")
        .simple_task("c")
        .compile();
    sim.command(OperatorCommand::Reload(Box::new(reloaded)));

    let snapshot = sim.snapshot();
    let b = snapshot.get("b", &p(1)).expect("b.1 survives reload");
    assert_eq!(b.state, TaskState::Submitted);

    sim.succeed("b");
    assert_eq!(sim.submitted_ids(), vec!["a.1", "b.1", "c.1"]);
    sim.succeed("c");
    assert_eq!(sim.exited.as_deref(), Some("workflow complete"));
}
