// src/pool/matcher.rs

//! Output propagation: the prerequisite/output matcher and spawner.
//!
//! On every completed output, downstream candidates are looked up in the
//! compiled reverse index, spawned on demand through flow-merge rules,
//! their prerequisite leaves satisfied, and suicide triggers evaluated.
//! Propagation runs to a fixed point within one control-loop step, before
//! any queue-release decision, so queue accounting never sees a partially
//! propagated pool.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::flow::{merge_flows, spawnable_flows};
use crate::graph::expr::{OUTPUT_FAILED, OUTPUT_FINISHED, OUTPUT_SUCCEEDED};
use crate::pool::task_instance::{TaskId, TaskInstance};
use crate::pool::TaskPool;
use crate::workflow::CompiledWorkflow;

/// What one propagation pass did to the pool.
#[derive(Debug, Default)]
pub struct MatchOutcome {
    /// Instances removed by suicide triggers.
    pub removed: Vec<TaskId>,
    /// Removed instances that were submitted/running and need a kill
    /// request to the job backend.
    pub kills: Vec<TaskId>,
    pub progressed: bool,
}

/// Propagate freshly completed outputs of `source` through the graph.
///
/// The caller records the outputs on the source instance first; this walks
/// the reverse index, spawning or merging downstream candidates and
/// satisfying their prerequisite leaves. `stopped` suppresses new spawning
/// (a stop request lets existing instances finish but creates no more).
pub fn propagate_outputs(
    pool: &mut TaskPool,
    workflow: &CompiledWorkflow,
    source: &TaskId,
    outputs: Vec<String>,
    stopped: bool,
) -> Result<MatchOutcome> {
    let mut outcome = MatchOutcome::default();
    let mut worklist: VecDeque<(TaskId, String)> = outputs
        .into_iter()
        .map(|o| (source.clone(), o))
        .collect();

    while let Some((id, output)) = worklist.pop_front() {
        let src_flows = match pool.get(&id) {
            Some(instance) => instance.flows.clone(),
            // Source already pruned or removed: nothing to propagate from.
            None => continue,
        };
        let spawn_flows = spawnable_flows(&src_flows);
        if spawn_flows.is_empty() {
            // Only the none flow: the completion runs and reports, but has
            // no effect on the rest of the workflow.
            debug!(task = %id, output = %output, "none-flow output; not propagated");
            continue;
        }

        let mut keys = vec![output.clone()];
        if output == OUTPUT_SUCCEEDED || output == OUTPUT_FAILED {
            keys.push(OUTPUT_FINISHED.to_string());
        }

        for key in keys {
            for dref in workflow.graph.downstream_of(&id.name, &key).to_vec() {
                let candidate_point = match &dref.offset {
                    Some(offset) => id.point.sub(offset)?,
                    None => id.point,
                };
                let seq = workflow.graph.sequence(dref.seq);
                if !seq.is_on_sequence(&candidate_point)? {
                    continue;
                }
                let candidate = TaskId::new(dref.task.clone(), candidate_point);

                if !pool.contains(&candidate) {
                    if stopped {
                        continue;
                    }
                    let Some(entry) = workflow.graph.entry(&dref.task, dref.seq) else {
                        warn!(task = %candidate, "downstream entry missing; skipping");
                        continue;
                    };
                    let Some(def) = workflow.defs.get(&dref.task) else {
                        warn!(task = %candidate, "downstream definition missing; skipping");
                        continue;
                    };
                    let mut instance = TaskInstance::spawn(
                        candidate.clone(),
                        entry,
                        def,
                        spawn_flows.clone(),
                        false,
                        &workflow.initial,
                    )?;
                    backfill_satisfied(pool, &mut instance);
                    pool.insert(instance);
                    outcome.progressed = true;
                } else {
                    let instance = pool.get_mut(&candidate).expect("candidate just checked");
                    let grew = merge_flows(&mut instance.flows, &spawn_flows);
                    if grew {
                        debug!(task = %candidate, flows = ?instance.flows, "flow merge");
                        outcome.progressed = true;
                        // A --wait instance's flow has caught up: replay its
                        // completed outputs into the merged flows.
                        if instance.flow_wait && instance.state.is_terminal() {
                            instance.flow_wait = false;
                            for done in instance.completed_outputs() {
                                worklist.push_back((candidate.clone(), done));
                            }
                        }
                    }
                }

                // Satisfy the referencing leaf on both normal and suicide
                // prerequisites.
                if let Some(instance) = pool.get_mut(&candidate) {
                    let mut changed = false;
                    for prereq in instance
                        .prereqs
                        .iter_mut()
                        .chain(instance.suicides.iter_mut())
                    {
                        changed |= prereq.satisfy(&id.name, &id.point, &key);
                    }
                    outcome.progressed |= changed;

                    if instance.suicide_satisfied() {
                        remove_by_suicide(pool, &candidate, &mut outcome);
                    }
                }
            }
        }
    }

    Ok(outcome)
}

/// Satisfy a fresh instance's prerequisite leaves against outputs already
/// completed by instances in the pool.
pub fn backfill_satisfied(pool: &TaskPool, instance: &mut TaskInstance) {
    let mut satisfied: Vec<(String, crate::cycling::CyclePoint, String)> = Vec::new();
    for prereq in instance.prereqs.iter().chain(instance.suicides.iter()) {
        for cond in &prereq.conditions {
            if cond.satisfied {
                continue;
            }
            let upstream = TaskId::new(cond.task.clone(), cond.point);
            if pool
                .get(&upstream)
                .is_some_and(|up| up.output_completed(&cond.output))
            {
                satisfied.push((cond.task.clone(), cond.point, cond.output.clone()));
            }
        }
    }
    for (task, point, output) in satisfied {
        for prereq in instance
            .prereqs
            .iter_mut()
            .chain(instance.suicides.iter_mut())
        {
            prereq.satisfy(&task, &point, &output);
        }
    }
}

fn remove_by_suicide(pool: &mut TaskPool, id: &TaskId, outcome: &mut MatchOutcome) {
    let Some(instance) = pool.get(id) else {
        return;
    };
    if instance.state.is_killable() {
        // Never remove an active instance without also asking the job
        // backend to kill it.
        outcome.kills.push(id.clone());
    }
    let state = instance.state;
    pool.remove(id);
    info!(task = %id, state = %state, "suicide trigger fired; instance removed");
    outcome.removed.push(id.clone());
    outcome.progressed = true;
}
