// src/query.rs

//! Read-only pool snapshots and query filters.
//!
//! External readers never touch the live pool: the runtime takes a snapshot
//! between steps and queries run against that.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cycling::CyclePoint;
use crate::errors::{CycleflowError, Result};
use crate::flow::FlowId;
use crate::pool::{TaskId, TaskState};

/// Read-only summary of one task instance.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub state: TaskState,
    pub flows: Vec<FlowId>,
    pub is_held: bool,
    pub submit_num: u32,
    pub completed_outputs: Vec<String>,
    pub unsatisfied: Vec<String>,
    pub incomplete: bool,
    pub retry_at: Option<DateTime<Utc>>,
}

/// Read-only view of the whole pool, in (point, name) order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolSnapshot {
    pub tasks: Vec<TaskSummary>,
}

/// Filter over a [`PoolSnapshot`]: cycle-point range, name pattern, states.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Anchored regular expression over task names.
    pub name_pattern: Option<String>,
    pub min_point: Option<CyclePoint>,
    pub max_point: Option<CyclePoint>,
    /// `None` matches every state.
    pub states: Option<Vec<TaskState>>,
}

impl PoolSnapshot {
    pub fn filter(&self, filter: &TaskFilter) -> Result<Vec<&TaskSummary>> {
        let regex = match &filter.name_pattern {
            Some(pattern) => Some(
                regex::Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
                    CycleflowError::ConfigError(format!("invalid name pattern '{pattern}': {e}"))
                })?,
            ),
            None => None,
        };

        let mut out = Vec::new();
        for task in &self.tasks {
            if let Some(re) = &regex {
                if !re.is_match(&task.id.name) {
                    continue;
                }
            }
            if let Some(min) = &filter.min_point {
                if task.id.point.try_cmp(min)? == std::cmp::Ordering::Less {
                    continue;
                }
            }
            if let Some(max) = &filter.max_point {
                if task.id.point.try_cmp(max)? == std::cmp::Ordering::Greater {
                    continue;
                }
            }
            if let Some(states) = &filter.states {
                if !states.contains(&task.state) {
                    continue;
                }
            }
            out.push(task);
        }
        Ok(out)
    }

    pub fn get(&self, name: &str, point: &CyclePoint) -> Option<&TaskSummary> {
        self.tasks
            .iter()
            .find(|t| t.id.name == name && t.id.point == *point)
    }

    /// All states currently held by instances of the given task name.
    pub fn states_of(&self, name: &str) -> Vec<(CyclePoint, TaskState)> {
        self.tasks
            .iter()
            .filter(|t| t.id.name == name)
            .map(|t| (t.id.point, t.state))
            .collect()
    }
}
