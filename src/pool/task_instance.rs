// src/pool/task_instance.rs

//! Task instance records and their state machine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cycling::CyclePoint;
use crate::errors::Result;
use crate::flow::FlowSet;
use crate::graph::TaskGraphEntry;
use crate::graph::expr::{OUTPUT_FAILED, OUTPUT_FINISHED, OUTPUT_SUCCEEDED, PrereqExpr};
use crate::taskdef::TaskDefinition;

/// Identifier of one task instance: (cycle point, task name).
///
/// Point comes first so the derived ordering is ascending cycle point then
/// task name — the release order the scheduler guarantees.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId {
    pub point: CyclePoint,
    pub name: String,
}

impl TaskId {
    pub fn new(name: impl Into<String>, point: CyclePoint) -> Self {
        Self {
            point,
            name: name.into(),
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.point)
    }
}

/// Lifecycle state of a task instance.
///
/// `waiting → queued → submitted → running → {succeeded | failed | expired}`.
/// Holds are a reversible flag on the instance, not a state; removal is
/// deletion from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Waiting,
    Queued,
    Submitted,
    Running,
    Succeeded,
    Failed,
    Expired,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Expired
        )
    }

    /// Active states count against queue limits and block shutdown.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Submitted | TaskState::Running)
    }

    pub fn is_killable(&self) -> bool {
        self.is_active()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting",
            TaskState::Queued => "queued",
            TaskState::Submitted => "submitted",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Expired => "expired",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One leaf condition of a prerequisite, resolved to an absolute upstream
/// point at spawn time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCondition {
    pub task: String,
    pub point: CyclePoint,
    pub output: String,
    pub satisfied: bool,
}

/// Expression structure over condition indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CondTree {
    All(Vec<CondTree>),
    Any(Vec<CondTree>),
    Leaf(usize),
}

/// A prerequisite bound to one instance: the expression tree plus the
/// satisfaction state of each leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prerequisite {
    pub suicide: bool,
    pub conditions: Vec<ResolvedCondition>,
    pub tree: CondTree,
}

impl Prerequisite {
    /// Resolve a compiled expression against the instance's own point:
    /// each leaf's offset becomes an absolute upstream point.
    pub fn resolve(expr: &PrereqExpr, point: &CyclePoint, suicide: bool) -> Result<Self> {
        let mut conditions = Vec::new();
        let tree = build_tree(expr, point, &mut conditions)?;
        Ok(Self {
            suicide,
            conditions,
            tree,
        })
    }

    /// Mark any leaf matching (task, point, output) satisfied.
    /// Returns true if a leaf newly flipped.
    pub fn satisfy(&mut self, task: &str, point: &CyclePoint, output: &str) -> bool {
        let mut changed = false;
        for cond in &mut self.conditions {
            if !cond.satisfied
                && cond.task == task
                && cond.point == *point
                && cond.output == output
            {
                cond.satisfied = true;
                changed = true;
            }
        }
        changed
    }

    pub fn is_satisfied(&self) -> bool {
        eval_tree(&self.tree, &self.conditions)
    }

    /// Human-readable unsatisfied leaves, for stall reporting.
    pub fn unsatisfied(&self) -> Vec<String> {
        self.conditions
            .iter()
            .filter(|c| !c.satisfied)
            .map(|c| format!("{}.{}:{}", c.task, c.point, c.output))
            .collect()
    }
}

fn build_tree(
    expr: &PrereqExpr,
    point: &CyclePoint,
    conditions: &mut Vec<ResolvedCondition>,
) -> Result<CondTree> {
    Ok(match expr {
        PrereqExpr::All(children) => CondTree::All(
            children
                .iter()
                .map(|c| build_tree(c, point, conditions))
                .collect::<Result<Vec<_>>>()?,
        ),
        PrereqExpr::Any(children) => CondTree::Any(
            children
                .iter()
                .map(|c| build_tree(c, point, conditions))
                .collect::<Result<Vec<_>>>()?,
        ),
        PrereqExpr::Cond(trigger) => {
            let upstream_point = match &trigger.offset {
                Some(offset) => point.add(offset)?,
                None => *point,
            };
            conditions.push(ResolvedCondition {
                task: trigger.task.clone(),
                point: upstream_point,
                output: trigger.output.clone(),
                satisfied: false,
            });
            CondTree::Leaf(conditions.len() - 1)
        }
    })
}

fn eval_tree(tree: &CondTree, conditions: &[ResolvedCondition]) -> bool {
    match tree {
        CondTree::All(children) => children.iter().all(|c| eval_tree(c, conditions)),
        CondTree::Any(children) => children.iter().any(|c| eval_tree(c, conditions)),
        CondTree::Leaf(i) => conditions[*i].satisfied,
    }
}

/// The authoritative record for one (task name, cycle point) execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: TaskId,
    /// Index of the sequence this instance belongs to.
    pub seq: usize,
    pub flows: FlowSet,
    pub state: TaskState,
    pub submit_num: u32,
    /// Output name → completed. Recorded independently of state: a task can
    /// report a custom output before reaching `succeeded`.
    pub outputs: BTreeMap<String, bool>,
    pub prereqs: Vec<Prerequisite>,
    pub suicides: Vec<Prerequisite>,
    pub is_held: bool,
    /// Spawned by runahead advance (or trigger) rather than by an upstream
    /// output; such instances run with no prerequisites.
    pub parentless: bool,
    /// Operator-triggered: bypass prerequisites and runahead.
    pub force_ready: bool,
    /// `--wait` trigger: completed outputs are replayed when another flow
    /// catches up to this point.
    pub flow_wait: bool,
    /// 1-based execution attempt; bumped on retry scheduling.
    pub try_num: u32,
    /// Failure retry due time; instance stays `waiting` until then.
    pub retry_at: Option<DateTime<Utc>>,
    /// Reached a terminal state with a required output missing.
    pub incomplete: bool,
}

impl TaskInstance {
    pub fn spawn(
        id: TaskId,
        entry: &TaskGraphEntry,
        def: &TaskDefinition,
        flows: FlowSet,
        parentless: bool,
        initial: &CyclePoint,
    ) -> Result<Self> {
        let prereqs = entry
            .prereqs
            .iter()
            .map(|e| Prerequisite::resolve(e, &id.point, false))
            .collect::<Result<Vec<_>>>()?;
        let suicides = entry
            .suicides
            .iter()
            .map(|e| Prerequisite::resolve(e, &id.point, true))
            .collect::<Result<Vec<_>>>()?;
        let outputs = def.output_names().into_iter().map(|n| (n, false)).collect();

        debug!(task = %id, ?flows, parentless, "task instance spawned");

        let mut instance = Self {
            id,
            seq: entry.seq,
            flows,
            state: TaskState::Waiting,
            submit_num: 0,
            outputs,
            prereqs,
            suicides,
            is_held: false,
            parentless,
            force_ready: false,
            flow_wait: false,
            try_num: 1,
            retry_at: None,
            incomplete: false,
        };
        instance.satisfy_pre_initial(initial);
        Ok(instance)
    }

    /// Dependencies reaching back before the workflow's initial cycle point
    /// reference history that never existed; they are dropped (treated as
    /// satisfied) so the first cycles can start.
    fn satisfy_pre_initial(&mut self, initial: &CyclePoint) {
        for prereq in self.prereqs.iter_mut().chain(self.suicides.iter_mut()) {
            for cond in &mut prereq.conditions {
                let pre_initial = cond
                    .point
                    .try_cmp(initial)
                    .map(|o| o == std::cmp::Ordering::Less)
                    .unwrap_or(false);
                if pre_initial && !cond.satisfied {
                    cond.satisfied = true;
                }
            }
        }
    }

    /// Re-bind to a recompiled graph entry (reload), re-applying previously
    /// satisfied leaves by (task, point, output) key.
    pub fn rebind(
        &mut self,
        entry: &TaskGraphEntry,
        satisfied: &[(String, CyclePoint, String)],
        initial: &CyclePoint,
    ) -> Result<()> {
        let prereqs = entry
            .prereqs
            .iter()
            .map(|e| Prerequisite::resolve(e, &self.id.point, false))
            .collect::<Result<Vec<_>>>()?;
        let suicides = entry
            .suicides
            .iter()
            .map(|e| Prerequisite::resolve(e, &self.id.point, true))
            .collect::<Result<Vec<_>>>()?;
        self.prereqs = prereqs;
        self.suicides = suicides;
        self.seq = entry.seq;
        for (task, point, output) in satisfied {
            for prereq in self.prereqs.iter_mut().chain(self.suicides.iter_mut()) {
                prereq.satisfy(task, point, output);
            }
        }
        self.satisfy_pre_initial(initial);
        Ok(())
    }

    /// All normal prerequisites satisfied (vacuously true when none).
    pub fn prereqs_satisfied(&self) -> bool {
        self.prereqs.iter().all(Prerequisite::is_satisfied)
    }

    /// Whether this instance may ever be released on its own.
    ///
    /// An instance spawned only so a suicide trigger can watch it (empty
    /// normal prerequisites, not parentless, not force-triggered) must not
    /// auto-run.
    pub fn releasable(&self) -> bool {
        self.force_ready || self.parentless || !self.prereqs.is_empty()
    }

    pub fn suicide_satisfied(&self) -> bool {
        self.suicides.iter().any(Prerequisite::is_satisfied)
    }

    /// Record an output as complete. Returns true when newly completed.
    ///
    /// Unknown outputs are recorded too (a reload may have added them).
    pub fn complete_output(&mut self, output: &str) -> bool {
        let slot = self.outputs.entry(output.to_string()).or_insert(false);
        if *slot {
            false
        } else {
            *slot = true;
            true
        }
    }

    pub fn output_completed(&self, output: &str) -> bool {
        if output == OUTPUT_FINISHED {
            return self.output_completed(OUTPUT_SUCCEEDED) || self.output_completed(OUTPUT_FAILED);
        }
        self.outputs.get(output).copied().unwrap_or(false)
    }

    pub fn completed_outputs(&self) -> Vec<String> {
        self.outputs
            .iter()
            .filter(|(_, done)| **done)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Unsatisfied normal prerequisite leaves, for stall reporting.
    pub fn unsatisfied_conditions(&self) -> Vec<String> {
        self.prereqs.iter().flat_map(|p| p.unsatisfied()).collect()
    }
}
