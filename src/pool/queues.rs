// src/pool/queues.rs

//! Per-queue concurrency limiting.
//!
//! Queues are stateless apart from counting currently active members;
//! limits are enforced at release time only, never at spawn time.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::model::WorkflowConfig;
use crate::taskdef::TaskDefStore;

pub const DEFAULT_QUEUE: &str = "default";

/// Static queue assignment: task name → queue name, plus per-queue limits.
#[derive(Debug, Clone, Default)]
pub struct TaskQueues {
    /// Queue name → limit (0 = unlimited).
    limits: BTreeMap<String, usize>,
    /// Task name → queue name.
    assignment: BTreeMap<String, String>,
}

impl TaskQueues {
    /// Build queue assignments from config.
    ///
    /// A queue member may name a family; membership then applies to every
    /// task inheriting from it. Tasks in no declared queue fall into the
    /// unlimited `default` queue. Later queue declarations win when
    /// memberships overlap.
    pub fn from_config(cfg: &WorkflowConfig, defs: &TaskDefStore) -> Self {
        let mut limits = BTreeMap::new();
        limits.insert(DEFAULT_QUEUE.to_string(), 0usize);

        let mut assignment: BTreeMap<String, String> = BTreeMap::new();
        for name in defs.names() {
            assignment.insert(name.to_string(), DEFAULT_QUEUE.to_string());
        }

        for (queue, section) in cfg.scheduling.queues.iter() {
            limits.insert(queue.clone(), section.limit);
            for member in &section.members {
                for name in defs.names() {
                    let in_queue = defs
                        .get(name)
                        .is_some_and(|def| def.ancestry.iter().any(|ns| ns == member));
                    if in_queue {
                        assignment.insert(name.to_string(), queue.clone());
                    }
                }
            }
        }

        debug!(queues = limits.len(), "task queues configured");
        Self { limits, assignment }
    }

    pub fn queue_of(&self, task: &str) -> &str {
        self.assignment
            .get(task)
            .map(String::as_str)
            .unwrap_or(DEFAULT_QUEUE)
    }

    pub fn limit_of(&self, queue: &str) -> usize {
        self.limits.get(queue).copied().unwrap_or(0)
    }

    /// Whether the queue has a free slot given the current active count.
    pub fn has_capacity(&self, queue: &str, active: usize) -> bool {
        let limit = self.limit_of(queue);
        limit == 0 || active < limit
    }
}
