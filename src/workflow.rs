// src/workflow.rs

//! Compilation of a validated [`WorkflowConfig`] into the static structures
//! the scheduler runs against: sequences, compiled graph, resolved task
//! definitions, and queue assignments.

use std::collections::BTreeSet;

use tracing::info;

use crate::config::model::WorkflowConfig;
use crate::cycling::CyclePoint;
use crate::errors::Result;
use crate::graph::{self, CompiledGraph};
use crate::pool::{RunaheadLimit, TaskQueues};
use crate::taskdef::TaskDefStore;
use crate::types::CyclingMode;

/// Everything derived from the workflow definition at compile time.
///
/// Reload swaps the whole structure while live task instances are re-bound
/// by (name, point) key.
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    pub mode: CyclingMode,
    pub initial: CyclePoint,
    pub final_point: Option<CyclePoint>,
    pub runahead: RunaheadLimit,
    pub graph: CompiledGraph,
    pub defs: TaskDefStore,
    pub queues: TaskQueues,
    pub config: WorkflowConfig,
}

/// Compile a validated configuration.
///
/// Validation has already checked graph syntax and references, so failures
/// here indicate a bug rather than bad user input.
pub fn compile(config: WorkflowConfig) -> Result<CompiledWorkflow> {
    let mode = config.scheduling.cycling_mode;
    let initial = CyclePoint::parse(&config.scheduling.initial_cycle_point, mode)?;
    let final_point = match &config.scheduling.final_cycle_point {
        Some(s) => Some(CyclePoint::parse(s, mode)?),
        None => None,
    };
    let runahead = match &config.scheduling.runahead_limit {
        Some(s) => RunaheadLimit::parse(s, mode)?,
        None => RunaheadLimit::default(),
    };

    let defined: BTreeSet<String> = config.runtime.keys().cloned().collect();
    let graph = graph::compiler::compile(
        &config.scheduling.graph,
        &defined,
        initial,
        final_point,
        mode,
    )?;
    let defs = TaskDefStore::build(&config, &graph)?;
    let queues = TaskQueues::from_config(&config, &defs);

    info!(
        tasks = graph.entries.len(),
        sequences = graph.sequences.len(),
        initial = %initial,
        "workflow compiled"
    );

    Ok(CompiledWorkflow {
        mode,
        initial,
        final_point,
        runahead,
        graph,
        defs,
        queues,
        config,
    })
}

impl CompiledWorkflow {
    /// Recurrence expression of a sequence, used as its stable identity
    /// across reloads.
    pub fn recurrence(&self, seq: usize) -> &str {
        &self.graph.sequences[seq].0
    }

    /// Find the sequence index a (task, point) pair belongs to, if any.
    pub fn seq_for(&self, task: &str, point: &CyclePoint) -> Result<Option<usize>> {
        let Some(entries) = self.graph.entries.get(task) else {
            return Ok(None);
        };
        for entry in entries {
            if self.graph.sequence(entry.seq).is_on_sequence(point)? {
                return Ok(Some(entry.seq));
            }
        }
        Ok(None)
    }
}
