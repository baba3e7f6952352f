// src/flow.rs

//! Flow identifiers and merge rules.
//!
//! A flow is a causal chain of triggering. Instances carry a *set* of flow
//! ids; when two triggering paths converge on the same (name, point), the
//! sets are unioned rather than duplicating the instance. The reserved
//! `none` flow runs and reports status but never spawns successors.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

/// An opaque flow identifier. `FlowId::NONE` is the reserved "no flow" id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct FlowId(u64);

impl FlowId {
    pub const NONE: FlowId = FlowId(0);

    pub fn is_none_flow(&self) -> bool {
        *self == FlowId::NONE
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none_flow() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

pub type FlowSet = BTreeSet<FlowId>;

/// How a trigger request selects flow membership for the new instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowSpec {
    /// Continue the currently active flows.
    Current,
    /// Mint a fresh flow id and use only that.
    New,
    /// The reserved `none` flow: run, but spawn no successors.
    None,
    /// Specific existing flow ids.
    Ids(Vec<u64>),
}

/// Mints flow ids and tracks which flows are currently in play.
#[derive(Debug, Clone)]
pub struct FlowManager {
    counter: u64,
    active: FlowSet,
}

impl FlowManager {
    pub fn new() -> Self {
        Self {
            counter: 0,
            active: FlowSet::new(),
        }
    }

    /// Start the original flow at workflow start-up.
    pub fn start_initial(&mut self) -> FlowId {
        let id = self.mint();
        info!(flow = %id, "initial flow started");
        id
    }

    /// Mint a fresh flow id and mark it active.
    pub fn mint(&mut self) -> FlowId {
        self.counter += 1;
        let id = FlowId(self.counter);
        self.active.insert(id);
        id
    }

    /// Flows currently in play (used when spawning parentless tasks).
    pub fn active(&self) -> &FlowSet {
        &self.active
    }

    /// Resolve a trigger request's flow specification to a concrete set.
    pub fn resolve(&mut self, spec: &FlowSpec) -> FlowSet {
        match spec {
            FlowSpec::Current => self.active.clone(),
            FlowSpec::New => {
                let id = self.mint();
                info!(flow = %id, "new flow minted for trigger");
                FlowSet::from([id])
            }
            FlowSpec::None => FlowSet::from([FlowId::NONE]),
            FlowSpec::Ids(ids) => {
                let set: FlowSet = ids.iter().map(|id| FlowId(*id)).collect();
                self.active.extend(set.iter().copied());
                set
            }
        }
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Restore from a checkpoint.
    pub fn restore(counter: u64, active: FlowSet) -> Self {
        Self { counter, active }
    }
}

impl Default for FlowManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Union `incoming` into `existing`; returns true when membership grew.
///
/// This is the convergence merge rule: commutative and idempotent, so the
/// result is independent of arrival order.
pub fn merge_flows(existing: &mut FlowSet, incoming: &FlowSet) -> bool {
    let before = existing.len();
    existing.extend(incoming.iter().copied());
    existing.len() > before
}

/// Flows that propagate to successors: everything except the `none` flow.
pub fn spawnable_flows(flows: &FlowSet) -> FlowSet {
    flows.iter().copied().filter(|f| !f.is_none_flow()).collect()
}
