// tests/checkpoint_roundtrip.rs

mod common;
use crate::common::init_tracing;

use cycleflow::broadcast::BroadcastTarget;
use cycleflow::checkpoint;
use cycleflow::engine::{CoreScheduler, OperatorCommand};
use cycleflow_test_utils::builders::{NamespaceBuilder, WorkflowConfigBuilder};
use cycleflow_test_utils::sim::Sim;

fn workflow() -> cycleflow::workflow::CompiledWorkflow {
    WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("3"))
        .runahead_limit("P1")
        .graph("P1", "a => b")
        .simple_task("a")
        .task(
            "b",
            NamespaceBuilder::new()
                .script("false")
                .retry_delays(&["PT30S"])
                .build(),
        )
        .compile()
}

#[test]
fn checkpoint_reproduces_pool_broadcasts_and_flows() {
    init_tracing();

    let mut sim = Sim::new(workflow());

    // Build up some non-trivial state: one cycle in flight, a retry timer
    // pending, and a broadcast set.
    sim.tick();
    sim.command(OperatorCommand::BroadcastSet {
        target: BroadcastTarget::AllPoints,
        namespace: "b".to_string(),
        settings: vec![("env.X".to_string(), "1".to_string())],
        expiry: None,
    });
    sim.succeed("a"); // a.1 -> b.1 submitted
    sim.fail("b", 1); // b.1 waiting on its retry timer

    let saved = sim.core.checkpoint();

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("checkpoint.json");
    checkpoint::save(&path, &saved).expect("save");
    let loaded = checkpoint::load(&path).expect("load");

    // The snapshot is value-identical across the disk round trip.
    assert_eq!(
        serde_json::to_value(&saved).unwrap(),
        serde_json::to_value(&loaded).unwrap()
    );

    // Restoring against a fresh compile of the same definition reproduces
    // the pool exactly: states, submit numbers, flows, retry timers.
    let restored = CoreScheduler::restore(workflow(), loaded);
    let before = sim.snapshot();
    let after = restored.snapshot();

    assert_eq!(before.tasks.len(), after.tasks.len());
    for (b, a) in before.tasks.iter().zip(after.tasks.iter()) {
        assert_eq!(b.id, a.id);
        assert_eq!(b.state, a.state);
        assert_eq!(b.submit_num, a.submit_num);
        assert_eq!(b.flows, a.flows);
        assert_eq!(b.retry_at, a.retry_at);
        assert_eq!(b.completed_outputs, a.completed_outputs);
    }

    // The restored scheduler carries on where the old one stopped.
    let mut resumed = Sim::from_core(restored);
    resumed.now = sim.now;
    resumed.advance_secs(30); // the retry timer elapses
    assert_eq!(resumed.submitted_ids(), vec!["b.1"]);
    let b = resumed
        .submitted
        .first()
        .expect("b.1 resubmitted after restore");
    // Submit numbers continue from the checkpoint, and the restored
    // broadcast store still applies.
    assert_eq!(b.submit_num, 2);
    assert_eq!(b.env.get("X"), Some(&"1".to_string()));
}

#[test]
fn restart_flag_requires_checkpoint_state() {
    init_tracing();

    // A checkpoint from a cold scheduler restores to a cold scheduler.
    let core = CoreScheduler::new(workflow());
    let saved = core.checkpoint();
    assert!(saved.tasks.is_empty());
    assert_eq!(saved.flow_counter, 1);

    let restored = CoreScheduler::restore(workflow(), saved);
    assert!(restored.pool_is_empty());
}
