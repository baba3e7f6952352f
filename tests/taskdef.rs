// tests/taskdef.rs

mod common;
use crate::common::init_tracing;

use cycleflow_test_utils::builders::{NamespaceBuilder, WorkflowConfigBuilder};

#[test]
fn inheritance_flattens_with_last_writer_wins() {
    init_tracing();

    let compiled = WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("1"))
        .graph("R1", "a")
        .task(
            "root",
            NamespaceBuilder::new()
                .script("echo root")
                .env("SHARED", "root")
                .env("ROOT_ONLY", "yes")
                .build(),
        )
        .task(
            "FAM",
            NamespaceBuilder::new()
                .inherit("root")
                .env("SHARED", "fam")
                .retry_delays(&["PT5S"])
                .build(),
        )
        .task(
            "a",
            NamespaceBuilder::new()
                .inherit("FAM")
                .script("echo a")
                .env("OWN", "a")
                .build(),
        )
        .compile();

    let def = compiled.defs.get("a").expect("a resolved");
    assert_eq!(def.ancestry, vec!["root", "FAM", "a"]);
    // The task's own script wins over the family's.
    assert_eq!(def.script, "echo a");
    // Env merges per key: nearest ancestor wins, distant keys survive.
    assert_eq!(def.env.get("SHARED"), Some(&"fam".to_string()));
    assert_eq!(def.env.get("ROOT_ONLY"), Some(&"yes".to_string()));
    assert_eq!(def.env.get("OWN"), Some(&"a".to_string()));
    // Unset on the task itself: inherited from the family.
    assert_eq!(def.retry_delays.len(), 1);
}

#[test]
fn multiple_inheritance_applies_later_parents_last() {
    init_tracing();

    let compiled = WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("1"))
        .graph("R1", "a")
        .task("P1", NamespaceBuilder::new().env("X", "first").build())
        .task("P2", NamespaceBuilder::new().env("X", "second").build())
        .task(
            "a",
            NamespaceBuilder::new()
                .inherit("P1")
                .inherit("P2")
                .script("true")
                .build(),
        )
        .compile();

    let def = compiled.defs.get("a").expect("a resolved");
    assert_eq!(def.ancestry, vec!["P1", "P2", "a"]);
    assert_eq!(def.env.get("X"), Some(&"second".to_string()));
}

#[test]
fn family_queue_membership_reaches_inheriting_tasks() {
    init_tracing();

    let compiled = WorkflowConfigBuilder::new()
        .integer_cycling("1", Some("1"))
        .graph("R1", "a & b")
        .queue("fam_queue", 1, &["FAM"])
        .task("FAM", NamespaceBuilder::new().script("true").build())
        .task("a", NamespaceBuilder::new().inherit("FAM").build())
        .task("b", NamespaceBuilder::new().script("true").build())
        .compile();

    assert_eq!(compiled.queues.queue_of("a"), "fam_queue");
    assert_eq!(compiled.queues.queue_of("b"), "default");
}

#[test]
fn inheritance_loops_are_rejected_at_validation() {
    init_tracing();

    let result = std::panic::catch_unwind(|| {
        WorkflowConfigBuilder::new()
            .integer_cycling("1", Some("1"))
            .graph("R1", "a")
            .task("x", NamespaceBuilder::new().inherit("y").build())
            .task("y", NamespaceBuilder::new().inherit("x").build())
            .task("a", NamespaceBuilder::new().script("true").build())
            .build()
    });
    assert!(result.is_err(), "inheritance loop must fail validation");
}
