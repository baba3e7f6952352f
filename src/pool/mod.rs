// src/pool/mod.rs

//! The task pool: the authoritative set of live task-instance records.
//!
//! - [`task_instance`] defines [`TaskInstance`], its prerequisites, and the
//!   state machine.
//! - [`queues`] enforces per-queue concurrency limits at release time.
//! - [`matcher`] propagates completed outputs to downstream instances,
//!   spawning on demand and driving suicide removal.
//!
//! The pool itself is a (cycle point, task name)-keyed map plus a state
//! index, with runahead limiting over the earliest incomplete point.

pub mod matcher;
pub mod queues;
pub mod task_instance;

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::cycling::{CyclePoint, Interval, Sequence};
use crate::errors::{CycleflowError, Result};
use crate::types::CyclingMode;

pub use queues::{DEFAULT_QUEUE, TaskQueues};
pub use task_instance::{Prerequisite, TaskId, TaskInstance, TaskState};

/// Bound on how far past the earliest incomplete point instances may become
/// active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunaheadLimit {
    /// An interval past the base point.
    Interval(Interval),
    /// A number of cycle points past the base point, stepped per sequence.
    Count(u32),
}

impl RunaheadLimit {
    pub fn parse(s: &str, mode: CyclingMode) -> Result<Self> {
        let s = s.trim();
        if s.chars().all(|c| c.is_ascii_digit()) && !s.is_empty() {
            let n: u32 = s.parse().map_err(|_| {
                CycleflowError::ConfigError(format!("invalid runahead limit: {s}"))
            })?;
            return Ok(RunaheadLimit::Count(n));
        }
        Ok(RunaheadLimit::Interval(Interval::parse(s, mode)?))
    }

    /// The furthest point (inclusive) at which instances may be released,
    /// given the earliest incomplete point.
    pub fn bound(&self, base: &CyclePoint, sequences: &[(String, Sequence)]) -> Result<CyclePoint> {
        match self {
            RunaheadLimit::Interval(iv) => base.add(iv),
            RunaheadLimit::Count(n) => {
                let mut best = *base;
                for (_, seq) in sequences {
                    let mut p = *base;
                    for _ in 0..*n {
                        match seq.next_after(&p)? {
                            Some(next) => p = next,
                            None => break,
                        }
                    }
                    if best.try_cmp(&p)? == std::cmp::Ordering::Less {
                        best = p;
                    }
                }
                Ok(best)
            }
        }
    }
}

impl Default for RunaheadLimit {
    fn default() -> Self {
        RunaheadLimit::Count(3)
    }
}

/// The pool of live task instances, keyed by (cycle point, task name) so
/// iteration order is the deterministic release order.
#[derive(Debug, Clone, Default)]
pub struct TaskPool {
    tasks: BTreeMap<TaskId, TaskInstance>,
    state_index: BTreeMap<TaskState, BTreeSet<TaskId>>,
}

impl TaskPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskInstance> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut TaskInstance> {
        self.tasks.get_mut(id)
    }

    pub fn insert(&mut self, instance: TaskInstance) {
        self.state_index
            .entry(instance.state)
            .or_default()
            .insert(instance.id.clone());
        self.tasks.insert(instance.id.clone(), instance);
    }

    pub fn remove(&mut self, id: &TaskId) -> Option<TaskInstance> {
        let instance = self.tasks.remove(id)?;
        if let Some(ids) = self.state_index.get_mut(&instance.state) {
            ids.remove(id);
        }
        Some(instance)
    }

    /// Transition an instance's state, keeping the index consistent.
    pub fn set_state(&mut self, id: &TaskId, state: TaskState) -> Result<()> {
        let instance = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| CycleflowError::TaskNotFound(id.to_string()))?;
        if instance.state == state {
            return Ok(());
        }
        debug!(task = %id, from = %instance.state, to = %state, "state transition");
        if let Some(ids) = self.state_index.get_mut(&instance.state) {
            ids.remove(id);
        }
        instance.state = state;
        self.state_index.entry(state).or_default().insert(id.clone());
        Ok(())
    }

    /// Instances in (point, name) order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskInstance> {
        self.tasks.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &TaskId> {
        self.tasks.keys()
    }

    /// Ids currently in the given state, in (point, name) order.
    pub fn ids_in_state(&self, state: TaskState) -> Vec<TaskId> {
        self.state_index
            .get(&state)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn count_in_state(&self, state: TaskState) -> usize {
        self.state_index.get(&state).map(BTreeSet::len).unwrap_or(0)
    }

    /// Currently active (submitted/running) instance count per queue.
    pub fn active_per_queue(&self, queues: &TaskQueues) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for instance in self.tasks.values() {
            if instance.state.is_active() {
                *counts
                    .entry(queues.queue_of(&instance.id.name).to_string())
                    .or_insert(0) += 1;
            }
        }
        counts
    }

    /// The earliest incomplete point: the smallest point among instances
    /// that are non-terminal or terminal-but-incomplete. `None` for an
    /// empty (or fully complete) pool.
    pub fn runahead_base(&self) -> Option<CyclePoint> {
        self.tasks
            .values()
            .filter(|t| !t.state.is_terminal() || t.incomplete)
            .map(|t| t.id.point)
            .min()
    }

    /// Drop terminal, complete instances whose point has been fully
    /// superseded by the runahead base. Instances awaiting a flow merge
    /// (`flow_wait`) are kept.
    pub fn prune_completed(&mut self, base: &CyclePoint) -> Vec<TaskId> {
        let doomed: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| {
                t.state.is_terminal()
                    && !t.incomplete
                    && !t.flow_wait
                    && t.id
                        .point
                        .try_cmp(base)
                        .map(|o| o == std::cmp::Ordering::Less)
                        .unwrap_or(false)
            })
            .map(|t| t.id.clone())
            .collect();
        for id in &doomed {
            self.remove(id);
        }
        if !doomed.is_empty() {
            info!(pruned = doomed.len(), base = %base, "completed instances pruned");
        }
        doomed
    }

    /// Drop every terminal, complete instance. Used when nothing in the
    /// pool is incomplete, i.e. all remaining cycles are fully superseded.
    pub fn prune_all_completed(&mut self) -> Vec<TaskId> {
        let doomed: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.state.is_terminal() && !t.incomplete && !t.flow_wait)
            .map(|t| t.id.clone())
            .collect();
        for id in &doomed {
            self.remove(id);
        }
        if !doomed.is_empty() {
            info!(pruned = doomed.len(), "all remaining completed instances pruned");
        }
        doomed
    }
}
