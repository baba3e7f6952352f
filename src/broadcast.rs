// src/broadcast.rs

//! The broadcast override store.
//!
//! Broadcasts let running tasks (or the operator) mutate the configuration
//! seen by not-yet-submitted instances: a mapping from
//! (cycle-point-or-wildcard, namespace) to key/value overrides. Overrides
//! are consulted at the moment an instance's effective runtime configuration
//! is computed, never cached on the instance, so a later broadcast still
//! affects anything unsubmitted.
//!
//! The store is owned by the control loop and only mutated inside a step;
//! it has no internal locking. It is persisted through the checkpoint
//! contract as a flat entry list.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cycling::CyclePoint;

/// Target cycle point of a broadcast: one point or every point.
///
/// `AllPoints` sorts before any concrete point, which is also the
/// application order (wildcard first, point-specific second).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BroadcastTarget {
    AllPoints,
    Point(CyclePoint),
}

impl std::fmt::Display for BroadcastTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BroadcastTarget::AllPoints => write!(f, "*"),
            BroadcastTarget::Point(p) => write!(f, "{p}"),
        }
    }
}

/// One broadcast setting, as exposed in checkpoints and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastEntry {
    pub target: BroadcastTarget,
    pub namespace: String,
    pub key: String,
    pub value: String,
    /// Entry is dropped once the earliest incomplete point passes this.
    pub expiry: Option<CyclePoint>,
}

/// Store of broadcast overrides keyed by (target, namespace, key).
#[derive(Debug, Clone, Default)]
pub struct BroadcastStore {
    settings: BTreeMap<BroadcastTarget, BTreeMap<String, BTreeMap<String, (String, Option<CyclePoint>)>>>,
}

impl BroadcastStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.values().all(|by_ns| by_ns.is_empty())
    }

    /// Add or replace one override. Logged for operator visibility.
    pub fn set(
        &mut self,
        target: BroadcastTarget,
        namespace: &str,
        key: &str,
        value: &str,
        expiry: Option<CyclePoint>,
    ) {
        info!(
            target = %target,
            namespace,
            key,
            value,
            "broadcast set"
        );
        self.settings
            .entry(target)
            .or_default()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), (value.to_string(), expiry));
    }

    /// Cancel overrides for (target, namespace); with `keys` empty, every
    /// key under that namespace goes. Returns the number removed.
    pub fn cancel(&mut self, target: BroadcastTarget, namespace: &str, keys: &[String]) -> usize {
        let mut removed = 0;
        if let Some(by_ns) = self.settings.get_mut(&target) {
            if let Some(by_key) = by_ns.get_mut(namespace) {
                if keys.is_empty() {
                    removed = by_key.len();
                    by_key.clear();
                } else {
                    for key in keys {
                        if by_key.remove(key).is_some() {
                            removed += 1;
                        }
                    }
                }
            }
        }
        if removed > 0 {
            info!(target = %target, namespace, removed, "broadcast cancel");
        }
        self.prune();
        removed
    }

    /// Remove all point-specific entries targeted at or before `point`.
    ///
    /// Wildcard entries are untouched. Returns the number removed.
    pub fn expire(&mut self, point: &CyclePoint) -> usize {
        let mut removed = 0;
        self.settings.retain(|target, by_ns| {
            let expired = matches!(
                target,
                BroadcastTarget::Point(p)
                    if p.try_cmp(point).map(|o| o != Ordering::Greater).unwrap_or(false)
            );
            if expired {
                removed += by_ns.values().map(BTreeMap::len).sum::<usize>();
            }
            !expired
        });
        if removed > 0 {
            info!(point = %point, removed, "broadcast expire");
        }
        removed
    }

    /// Drop entries whose own expiry point is at or before `point`.
    ///
    /// Called as the earliest incomplete point advances, so timed overrides
    /// disappear once their owning cycle is fully superseded.
    pub fn expire_due(&mut self, point: &CyclePoint) -> usize {
        let mut removed = 0;
        for by_ns in self.settings.values_mut() {
            for by_key in by_ns.values_mut() {
                by_key.retain(|_, (_, expiry)| {
                    let due = expiry
                        .as_ref()
                        .and_then(|e| e.try_cmp(point).ok())
                        .is_some_and(|o| o != Ordering::Greater);
                    if due {
                        removed += 1;
                    }
                    !due
                });
            }
        }
        if removed > 0 {
            info!(point = %point, removed, "timed broadcasts expired");
        }
        self.prune();
        removed
    }

    /// Overrides applying to an instance of the given inheritance chain at
    /// the given point, in application order.
    ///
    /// Precedence: wildcard before point-specific, root namespaces before
    /// the task's own; a later (key, value) pair overrides an earlier one on
    /// key conflict.
    pub fn get_overrides(&self, namespaces: &[String], point: &CyclePoint) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for target in [BroadcastTarget::AllPoints, BroadcastTarget::Point(*point)] {
            let Some(by_ns) = self.settings.get(&target) else {
                continue;
            };
            for ns in namespaces {
                if let Some(by_key) = by_ns.get(ns) {
                    for (key, (value, _expiry)) in by_key {
                        out.push((key.clone(), value.clone()));
                    }
                }
            }
        }
        out
    }

    /// Flatten to an entry list (checkpoint format).
    pub fn entries(&self) -> Vec<BroadcastEntry> {
        let mut out = Vec::new();
        for (target, by_ns) in &self.settings {
            for (namespace, by_key) in by_ns {
                for (key, (value, expiry)) in by_key {
                    out.push(BroadcastEntry {
                        target: *target,
                        namespace: namespace.clone(),
                        key: key.clone(),
                        value: value.clone(),
                        expiry: *expiry,
                    });
                }
            }
        }
        out
    }

    /// Rebuild from an entry list (checkpoint restore).
    pub fn from_entries(entries: Vec<BroadcastEntry>) -> Self {
        let mut store = Self::new();
        for e in entries {
            store
                .settings
                .entry(e.target)
                .or_default()
                .entry(e.namespace)
                .or_default()
                .insert(e.key, (e.value, e.expiry));
        }
        store
    }

    /// Remove empty leaves left by cancellation.
    fn prune(&mut self) {
        for by_ns in self.settings.values_mut() {
            by_ns.retain(|_, by_key| !by_key.is_empty());
        }
        self.settings.retain(|_, by_ns| !by_ns.is_empty());
    }
}
