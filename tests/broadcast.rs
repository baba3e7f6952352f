// tests/broadcast.rs

mod common;
use crate::common::init_tracing;

use std::collections::BTreeMap;

use cycleflow::broadcast::{BroadcastStore, BroadcastTarget};
use cycleflow::cycling::CyclePoint;

fn p(n: i64) -> CyclePoint {
    CyclePoint::Integer(n)
}

/// Apply overrides in order, last writer wins.
fn applied(overrides: Vec<(String, String)>) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for (key, value) in overrides {
        map.insert(key, value);
    }
    map
}

#[test]
fn point_specific_overrides_beat_wildcard() {
    init_tracing();

    let mut store = BroadcastStore::new();
    store.set(BroadcastTarget::AllPoints, "a", "env.X", "1", None);
    store.set(BroadcastTarget::Point(p(2)), "a", "env.X", "2", None);

    let ns = vec!["a".to_string()];

    let at_2 = applied(store.get_overrides(&ns, &p(2)));
    assert_eq!(at_2.get("env.X"), Some(&"2".to_string()));

    let at_3 = applied(store.get_overrides(&ns, &p(3)));
    assert_eq!(at_3.get("env.X"), Some(&"1".to_string()));
}

#[test]
fn namespace_chain_applies_root_first() {
    init_tracing();

    let mut store = BroadcastStore::new();
    store.set(BroadcastTarget::AllPoints, "FAM", "env.X", "family", None);
    store.set(BroadcastTarget::AllPoints, "a", "env.X", "task", None);

    // Root-first chain: the task's own namespace wins.
    let chain = vec!["FAM".to_string(), "a".to_string()];
    let result = applied(store.get_overrides(&chain, &p(1)));
    assert_eq!(result.get("env.X"), Some(&"task".to_string()));
}

#[test]
fn expire_removes_point_entries_but_leaves_wildcard() {
    init_tracing();

    let mut store = BroadcastStore::new();
    store.set(BroadcastTarget::AllPoints, "a", "env.X", "1", None);
    store.set(BroadcastTarget::Point(p(2)), "a", "env.X", "2", None);
    store.set(BroadcastTarget::Point(p(5)), "a", "env.X", "5", None);

    let removed = store.expire(&p(2));
    assert_eq!(removed, 1);

    let ns = vec!["a".to_string()];
    let at_2 = applied(store.get_overrides(&ns, &p(2)));
    assert_eq!(at_2.get("env.X"), Some(&"1".to_string()), "wildcard survives");

    let at_5 = applied(store.get_overrides(&ns, &p(5)));
    assert_eq!(at_5.get("env.X"), Some(&"5".to_string()), "later point untouched");
}

#[test]
fn cancel_removes_selected_keys() {
    init_tracing();

    let mut store = BroadcastStore::new();
    store.set(BroadcastTarget::AllPoints, "a", "env.X", "1", None);
    store.set(BroadcastTarget::AllPoints, "a", "script", "echo hi", None);

    let removed = store.cancel(
        BroadcastTarget::AllPoints,
        "a",
        &["env.X".to_string()],
    );
    assert_eq!(removed, 1);

    let ns = vec!["a".to_string()];
    let rest = applied(store.get_overrides(&ns, &p(1)));
    assert!(!rest.contains_key("env.X"));
    assert_eq!(rest.get("script"), Some(&"echo hi".to_string()));

    // Cancel with no keys clears the namespace.
    let removed = store.cancel(BroadcastTarget::AllPoints, "a", &[]);
    assert_eq!(removed, 1);
    assert!(store.is_empty());
}

#[test]
fn timed_entries_expire_as_the_base_advances() {
    init_tracing();

    let mut store = BroadcastStore::new();
    store.set(BroadcastTarget::AllPoints, "a", "env.X", "1", Some(p(3)));
    store.set(BroadcastTarget::AllPoints, "a", "env.Y", "2", None);

    assert_eq!(store.expire_due(&p(2)), 0);
    assert_eq!(store.expire_due(&p(3)), 1);

    let ns = vec!["a".to_string()];
    let rest = applied(store.get_overrides(&ns, &p(4)));
    assert!(!rest.contains_key("env.X"));
    assert!(rest.contains_key("env.Y"));
}

#[test]
fn entry_list_round_trips() {
    init_tracing();

    let mut store = BroadcastStore::new();
    store.set(BroadcastTarget::AllPoints, "a", "env.X", "1", None);
    store.set(BroadcastTarget::Point(p(7)), "b", "script", "echo b", Some(p(9)));

    let entries = store.entries();
    assert_eq!(entries.len(), 2);

    let rebuilt = BroadcastStore::from_entries(entries.clone());
    assert_eq!(rebuilt.entries(), entries);
}
