// src/engine/event_handlers.rs

//! Event handling logic for the core scheduler.
//!
//! Each handler applies one event's state transitions and runs the matcher
//! cascade; queue-release and runahead decisions happen afterwards in the
//! core's release phase, once propagation has reached a fixed point.
//!
//! Run-time errors on a single instance are isolated and logged here; they
//! never escape to crash the control loop.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::engine::core::CoreScheduler;
use crate::engine::{JobStatus, OperatorCommand, StopMode, TaskMatcher};
use crate::flow::merge_flows;
use crate::graph::expr::{OUTPUT_FAILED, OUTPUT_STARTED, OUTPUT_SUCCEEDED};
use crate::pool::matcher::backfill_satisfied;
use crate::pool::task_instance::{TaskId, TaskInstance, TaskState};
use crate::workflow::CompiledWorkflow;

/// Pool-side effects of one handled event, folded into the step result.
#[derive(Debug, Default)]
pub struct Effects {
    pub kills: Vec<TaskId>,
    pub polls: Vec<TaskId>,
    pub progressed: bool,
}

impl Effects {
    fn merge(&mut self, other: Effects) {
        self.kills.extend(other.kills);
        self.polls.extend(other.polls);
        self.progressed |= other.progressed;
    }
}

/// Handle an asynchronous job status callback.
pub fn handle_job_status(
    core: &mut CoreScheduler,
    task: TaskId,
    submit_num: u32,
    status: JobStatus,
    now: DateTime<Utc>,
) -> Effects {
    let mut effects = Effects::default();

    let Some(instance) = core.pool.get(&task) else {
        // Suicided or removed while the job was in flight.
        debug!(task = %task, ?status, "status for unknown instance; dropping");
        return effects;
    };
    if instance.submit_num != submit_num {
        debug!(
            task = %task,
            submit_num,
            current = instance.submit_num,
            "stale status callback; dropping"
        );
        return effects;
    }

    match status {
        JobStatus::Started => {
            if core.pool.set_state(&task, TaskState::Running).is_ok() {
                effects.progressed = true;
            }
            effects.merge(core.record_and_propagate(&task, OUTPUT_STARTED));
        }
        JobStatus::Message(message) => {
            let output = core
                .workflow
                .defs
                .get(&task.name)
                .and_then(|def| def.output_for_message(&message))
                .map(str::to_string);
            match output {
                Some(output) => {
                    info!(task = %task, output = %output, "custom output completed");
                    effects.merge(core.record_and_propagate(&task, &output));
                }
                None => {
                    // Malformed or undeclared message: isolated to this
                    // instance, the loop carries on.
                    warn!(task = %task, message = %message, "unregistered output message; ignoring");
                }
            }
        }
        JobStatus::Succeeded => {
            let _ = core.pool.set_state(&task, TaskState::Succeeded);
            effects.progressed = true;
            effects.merge(core.record_and_propagate(&task, OUTPUT_SUCCEEDED));
            core.check_incomplete(&task);
        }
        JobStatus::Failed(exit_code) => {
            effects.merge(handle_job_failure(core, &task, exit_code, now));
        }
    }

    effects
}

fn handle_job_failure(
    core: &mut CoreScheduler,
    task: &TaskId,
    exit_code: i32,
    now: DateTime<Utc>,
) -> Effects {
    let mut effects = Effects {
        progressed: true,
        ..Effects::default()
    };

    let (try_num, configured_retries) = {
        let instance = core.pool.get(task).expect("caller checked existence");
        let retries = core
            .workflow
            .defs
            .get(&task.name)
            .map(|def| def.retry_delays.clone())
            .unwrap_or_default();
        (instance.try_num, retries)
    };

    let delay = configured_retries.get(try_num as usize - 1).copied();
    match delay {
        Some(delay) if !core.stop_requested => {
            // Delay is measured from failure time, not from when the retry
            // is eventually released.
            let seconds = delay.as_seconds().unwrap_or_else(|| {
                warn!(task = %task, delay = %delay, "non-exact retry delay; treating as zero");
                0
            });
            let retry_at = now + Duration::seconds(seconds);
            let _ = core.pool.set_state(task, TaskState::Waiting);
            if let Some(instance) = core.pool.get_mut(task) {
                instance.try_num += 1;
                instance.retry_at = Some(retry_at);
            }
            info!(
                task = %task,
                exit_code,
                try_num,
                retry_at = %retry_at,
                "job failed; retry scheduled"
            );
        }
        _ => {
            let _ = core.pool.set_state(task, TaskState::Failed);
            if !configured_retries.is_empty() {
                warn!(
                    task = %task,
                    exit_code,
                    retries = configured_retries.len(),
                    "retries exhausted; task failed permanently"
                );
            } else {
                warn!(task = %task, exit_code, "job failed");
            }
            effects.merge(core.record_and_propagate(task, OUTPUT_FAILED));
            core.check_incomplete(task);
        }
    }

    effects
}

/// Handle an operator command.
pub fn handle_command(
    core: &mut CoreScheduler,
    command: OperatorCommand,
    _now: DateTime<Utc>,
) -> Effects {
    let mut effects = Effects::default();

    match command {
        OperatorCommand::Hold(matcher) => {
            for id in matching_ids(core, &matcher) {
                if let Some(instance) = core.pool.get_mut(&id) {
                    if !instance.is_held {
                        instance.is_held = true;
                        info!(task = %id, "held");
                        effects.progressed = true;
                    }
                }
            }
        }
        OperatorCommand::Release(matcher) => {
            for id in matching_ids(core, &matcher) {
                if let Some(instance) = core.pool.get_mut(&id) {
                    if instance.is_held {
                        instance.is_held = false;
                        info!(task = %id, "released from hold");
                        effects.progressed = true;
                    }
                }
            }
        }
        OperatorCommand::Kill(matcher) => {
            for id in matching_ids(core, &matcher) {
                let killable = core
                    .pool
                    .get(&id)
                    .is_some_and(|i| i.state.is_killable());
                if killable {
                    info!(task = %id, "kill requested by operator");
                    effects.kills.push(id);
                }
            }
        }
        OperatorCommand::Poll(matcher) => {
            for id in matching_ids(core, &matcher) {
                let active = core.pool.get(&id).is_some_and(|i| i.state.is_active());
                if active {
                    effects.polls.push(id);
                }
            }
        }
        OperatorCommand::Remove(matcher) => {
            for id in matching_ids(core, &matcher) {
                let killable = core
                    .pool
                    .get(&id)
                    .is_some_and(|i| i.state.is_killable());
                if killable {
                    effects.kills.push(id.clone());
                }
                core.pool.remove(&id);
                info!(task = %id, "removed by operator");
                effects.progressed = true;
            }
        }
        OperatorCommand::Trigger {
            name,
            point,
            flow,
            wait,
        } => {
            effects.merge(handle_trigger(core, name, point, flow, wait));
        }
        OperatorCommand::BroadcastSet {
            target,
            namespace,
            settings,
            expiry,
        } => {
            for (key, value) in settings {
                core.broadcasts.set(target, &namespace, &key, &value, expiry);
            }
        }
        OperatorCommand::BroadcastCancel {
            target,
            namespace,
            keys,
        } => {
            core.broadcasts.cancel(target, &namespace, &keys);
        }
        OperatorCommand::BroadcastExpire { point } => {
            core.broadcasts.expire(&point);
        }
        OperatorCommand::Reload(new_workflow) => {
            handle_reload(core, *new_workflow);
            effects.progressed = true;
        }
        OperatorCommand::Stop(mode) => {
            if !core.stop_requested {
                info!(?mode, "stop requested; no further instances will spawn");
            }
            core.stop_requested = true;
            if mode == StopMode::Now {
                for instance in core.pool.iter() {
                    if instance.state.is_killable() {
                        effects.kills.push(instance.id.clone());
                    }
                }
            }
        }
    }

    effects
}

fn matching_ids(core: &CoreScheduler, matcher: &TaskMatcher) -> Vec<TaskId> {
    core.pool
        .ids()
        .filter(|id| matcher.matches(id))
        .cloned()
        .collect()
}

fn handle_trigger(
    core: &mut CoreScheduler,
    name: String,
    point: crate::cycling::CyclePoint,
    flow: crate::flow::FlowSpec,
    wait: bool,
) -> Effects {
    let mut effects = Effects::default();
    let flows = core.flows.resolve(&flow);
    let id = TaskId::new(name.clone(), point);

    if core.pool.contains(&id) {
        let instance = core.pool.get_mut(&id).expect("existence just checked");
        let grew = merge_flows(&mut instance.flows, &flows);
        if !instance.state.is_terminal() && !instance.state.is_active() {
            instance.force_ready = true;
            info!(task = %id, "existing instance force-triggered");
            effects.progressed = true;
        } else if grew {
            info!(task = %id, flows = ?instance.flows, "trigger merged flows into existing instance");
            effects.progressed = true;
        }
        return effects;
    }

    let seq = match core.workflow.seq_for(&name, &point) {
        Ok(Some(seq)) => seq,
        Ok(None) => {
            warn!(task = %id, "trigger for invalid (task, point); ignoring");
            return effects;
        }
        Err(e) => {
            warn!(task = %id, error = %e, "trigger failed; ignoring");
            return effects;
        }
    };

    let spawned = (|| -> crate::errors::Result<TaskInstance> {
        let entry = core
            .workflow
            .graph
            .entry(&name, seq)
            .ok_or_else(|| crate::errors::CycleflowError::TaskNotFound(id.to_string()))?;
        let def = core
            .workflow
            .defs
            .get(&name)
            .ok_or_else(|| crate::errors::CycleflowError::TaskNotFound(id.to_string()))?;
        let mut instance =
            TaskInstance::spawn(id.clone(), entry, def, flows, false, &core.workflow.initial)?;
        instance.force_ready = true;
        instance.flow_wait = wait;
        backfill_satisfied(&core.pool, &mut instance);
        Ok(instance)
    })();

    match spawned {
        Ok(instance) => {
            info!(task = %id, wait, "instance spawned by operator trigger");
            core.pool.insert(instance);
            effects.progressed = true;
        }
        Err(e) => warn!(task = %id, error = %e, "trigger failed; ignoring"),
    }
    effects
}

/// Swap in a recompiled workflow, re-binding live instances by
/// (name, point) key. Instance state, outputs, and satisfied prerequisite
/// leaves survive; orphaned tasks keep their old definition until done.
fn handle_reload(core: &mut CoreScheduler, mut new_workflow: CompiledWorkflow) {
    let ids: Vec<TaskId> = core.pool.ids().cloned().collect();
    let mut rebound = 0usize;
    let mut orphaned = 0usize;

    for id in ids {
        let seq = match new_workflow.seq_for(&id.name, &id.point) {
            Ok(seq) => seq,
            Err(e) => {
                warn!(task = %id, error = %e, "reload: re-bind failed; keeping old bindings");
                continue;
            }
        };
        match seq {
            Some(seq) => {
                let entry = new_workflow
                    .graph
                    .entry(&id.name, seq)
                    .expect("seq_for only returns sequences with entries")
                    .clone();
                let Some(instance) = core.pool.get_mut(&id) else {
                    continue;
                };
                let satisfied: Vec<_> = instance
                    .prereqs
                    .iter()
                    .chain(instance.suicides.iter())
                    .flat_map(|p| p.conditions.iter())
                    .filter(|c| c.satisfied)
                    .map(|c| (c.task.clone(), c.point, c.output.clone()))
                    .collect();
                if let Err(e) = instance.rebind(&entry, &satisfied, &new_workflow.initial) {
                    warn!(task = %id, error = %e, "reload: re-bind failed; keeping old bindings");
                    continue;
                }
                rebound += 1;
            }
            None => {
                // Task no longer in the graph: keep the instance (and its
                // old definition) until it finishes.
                if let Some(def) = core.workflow.defs.get(&id.name) {
                    new_workflow.defs.insert(def.clone());
                }
                orphaned += 1;
            }
        }
    }

    core.workflow = new_workflow;
    info!(rebound, orphaned, "workflow reloaded");
}
