// src/engine/core.rs

//! Pure core scheduler state machine.
//!
//! This module contains a synchronous, deterministic core that consumes
//! [`SchedulerEvent`]s and produces:
//! - updated pool / broadcast / flow state
//! - a list of [`CoreCommand`]s describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending job requests to the job backend
//! - timers, checkpointing, Ctrl-C / shutdown
//!
//! Within one step, matcher propagation reaches a fixed point before any
//! runahead or queue-release decision, so queue accounting is never stale.
//! The core has **no** channels, no Tokio types, and performs no IO; the
//! current time is passed in, which keeps every step reproducible in tests.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::broadcast::BroadcastStore;
use crate::checkpoint::Checkpoint;
use crate::cycling::CyclePoint;
use crate::engine::event_handlers::{self, Effects};
use crate::engine::{CoreCommand, CoreStep, SchedulerEvent};
use crate::errors::Result;
use crate::flow::{FlowManager, spawnable_flows};
use crate::job::JobRequest;
use crate::pool::matcher::{self, backfill_satisfied};
use crate::pool::task_instance::{TaskId, TaskInstance, TaskState};
use crate::pool::TaskPool;
use crate::query::{PoolSnapshot, TaskSummary};
use crate::types::CyclingMode;
use crate::workflow::CompiledWorkflow;

/// The single-threaded scheduling engine: task pool, broadcast store, and
/// flow manager behind one `step` entry point.
#[derive(Debug)]
pub struct CoreScheduler {
    pub(crate) workflow: CompiledWorkflow,
    pub(crate) pool: TaskPool,
    pub(crate) broadcasts: BroadcastStore,
    pub(crate) flows: FlowManager,
    /// Last auto-spawned point per parentless (task, recurrence).
    pub(crate) parentless_cursor: BTreeMap<(String, String), CyclePoint>,
    pub(crate) stop_requested: bool,
}

impl CoreScheduler {
    pub fn new(workflow: CompiledWorkflow) -> Self {
        let mut flows = FlowManager::new();
        flows.start_initial();
        Self {
            workflow,
            pool: TaskPool::new(),
            broadcasts: BroadcastStore::new(),
            flows,
            parentless_cursor: BTreeMap::new(),
            stop_requested: false,
        }
    }

    /// Rebuild from a checkpoint against the same (or a recompiled)
    /// workflow definition.
    pub fn restore(workflow: CompiledWorkflow, checkpoint: Checkpoint) -> Self {
        let mut pool = TaskPool::new();
        for instance in checkpoint.tasks {
            pool.insert(instance);
        }
        let flows = FlowManager::restore(
            checkpoint.flow_counter,
            checkpoint.active_flows.into_iter().collect(),
        );
        let parentless_cursor = checkpoint
            .parentless_cursor
            .into_iter()
            .map(|(task, recurrence, point)| ((task, recurrence), point))
            .collect();
        info!(tasks = pool.len(), "scheduler state restored from checkpoint");
        Self {
            workflow,
            pool,
            broadcasts: BroadcastStore::from_entries(checkpoint.broadcasts),
            flows,
            parentless_cursor,
            stop_requested: checkpoint.stop_requested,
        }
    }

    /// Handle a single event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: SchedulerEvent, now: DateTime<Utc>) -> CoreStep {
        let effects = match event {
            SchedulerEvent::Job {
                task,
                submit_num,
                status,
            } => event_handlers::handle_job_status(self, task, submit_num, status, now),
            SchedulerEvent::Command(command) => {
                event_handlers::handle_command(self, *command, now)
            }
            SchedulerEvent::Tick => Effects::default(),
            SchedulerEvent::Shutdown => {
                return CoreStep {
                    commands: Vec::new(),
                    keep_running: false,
                    progressed: false,
                    stall: None,
                };
            }
        };

        self.finish_step(effects, now)
    }

    /// Release phase: runs after every event, once propagation is done.
    fn finish_step(&mut self, effects: Effects, now: DateTime<Utc>) -> CoreStep {
        let mut commands = Vec::new();
        let mut progressed = effects.progressed;

        if !effects.kills.is_empty() {
            commands.push(CoreCommand::KillJobs(effects.kills));
            progressed = true;
        }
        if !effects.polls.is_empty() {
            commands.push(CoreCommand::PollJobs(effects.polls));
        }

        // Housekeeping ahead of spawning: advance the runahead base, prune
        // superseded instances and timed broadcasts.
        match self.pool.runahead_base() {
            Some(base) => {
                self.broadcasts.expire_due(&base);
                progressed |= !self.pool.prune_completed(&base).is_empty();
            }
            None => {
                // Nothing incomplete: everything terminal is superseded.
                progressed |= !self.pool.prune_all_completed().is_empty();
            }
        }

        progressed |= self.spawn_parentless();
        progressed |= self.release_retries(now);
        progressed |= self.expire_due_instances(now);
        progressed |= self.queue_ready_instances();

        let submissions = self.dispatch_from_queues();
        if !submissions.is_empty() {
            progressed = true;
            commands.push(CoreCommand::SubmitJobs(submissions));
        }

        let mut keep_running = true;
        let mut stall = None;

        if let Some(reason) = self.exit_reason() {
            info!(reason = %reason, "scheduler finished");
            commands.push(CoreCommand::RequestExit {
                reason: reason.clone(),
            });
            keep_running = false;
        } else {
            stall = self.stall_reason();
        }

        CoreStep {
            commands,
            keep_running,
            progressed,
            stall,
        }
    }

    /// Record outputs on an instance and cascade them through the matcher.
    pub(crate) fn record_and_propagate(&mut self, id: &TaskId, output: &str) -> Effects {
        let mut effects = Effects::default();
        let Some(instance) = self.pool.get_mut(id) else {
            return effects;
        };
        if !instance.complete_output(output) {
            return effects;
        }
        effects.progressed = true;

        match matcher::propagate_outputs(
            &mut self.pool,
            &self.workflow,
            id,
            vec![output.to_string()],
            self.stop_requested,
        ) {
            Ok(outcome) => {
                effects.kills.extend(outcome.kills);
                effects.progressed |= outcome.progressed;
            }
            Err(e) => {
                // Isolated: a propagation error on one output must not
                // bring the loop down.
                warn!(task = %id, output, error = %e, "output propagation failed");
            }
        }
        effects
    }

    /// Flag an instance that reached a terminal state with required outputs
    /// missing, and tell the operator.
    pub(crate) fn check_incomplete(&mut self, id: &TaskId) {
        let Some(required) = self.workflow.graph.required_outputs.get(&id.name) else {
            return;
        };
        let Some(instance) = self.pool.get(id) else {
            return;
        };
        if instance.state == TaskState::Expired {
            return;
        }
        let missing: Vec<String> = required
            .iter()
            .filter(|out| !instance.output_completed(out))
            .cloned()
            .collect();
        if !missing.is_empty() {
            warn!(
                task = %id,
                state = %instance.state,
                ?missing,
                "incomplete task: required outputs not completed"
            );
            if let Some(instance) = self.pool.get_mut(id) {
                instance.incomplete = true;
            }
        }
    }

    /// Auto-spawn parentless tasks up to the runahead bound.
    ///
    /// "Parentless" at a given point means no upstream output can ever
    /// spawn the instance: the entry has no prerequisites at all, or every
    /// prerequisite at that point reaches back before the initial cycle
    /// point (e.g. the first instance of `a[-P1] => a`).
    ///
    /// The base is re-read after each spawn: the first instance spawned
    /// into an empty pool becomes the earliest incomplete point, which is
    /// what bounds everything after it.
    fn spawn_parentless(&mut self) -> bool {
        if self.stop_requested {
            return false;
        }
        let flows = spawnable_flows(self.flows.active());
        if flows.is_empty() {
            return false;
        }

        let pairs: Vec<(String, usize)> = self
            .workflow
            .graph
            .entries
            .iter()
            .flat_map(|(name, entries)| entries.iter().map(|e| (name.clone(), e.seq)))
            .collect();

        let mut progressed = false;

        for (task, seq_idx) in pairs {
            let recurrence = self.workflow.recurrence(seq_idx).to_string();
            let key = (task.clone(), recurrence);
            let seq = self.workflow.graph.sequence(seq_idx).clone();
            let entry = self
                .workflow
                .graph
                .entry(&task, seq_idx)
                .expect("pairs come from the graph")
                .clone();

            let result: Result<()> = (|| {
                let mut next = match self.parentless_cursor.get(&key) {
                    Some(last) => seq.next_after(last)?,
                    None => {
                        // A task appearing mid-run (reload) starts at the
                        // current base, not back at the initial point.
                        let mut first = seq.first_point()?;
                        if let Some(base) = self.pool.runahead_base() {
                            while let Some(p) = first {
                                if p.try_cmp(&base)? != std::cmp::Ordering::Less {
                                    break;
                                }
                                first = seq.next_after(&p)?;
                            }
                        }
                        first
                    }
                };

                while let Some(point) = next {
                    if !auto_spawnable(&entry, &point, &self.workflow.initial)? {
                        break;
                    }
                    let base = self.pool.runahead_base().unwrap_or(point);
                    let bound = self
                        .workflow
                        .runahead
                        .bound(&base, &self.workflow.graph.sequences)?;
                    if point.try_cmp(&bound)? == std::cmp::Ordering::Greater {
                        break;
                    }

                    let id = TaskId::new(task.clone(), point);
                    if !self.pool.contains(&id) {
                        let def = self
                            .workflow
                            .defs
                            .get(&task)
                            .expect("graph tasks always have definitions");
                        let mut instance = TaskInstance::spawn(
                            id,
                            &entry,
                            def,
                            flows.clone(),
                            entry.is_parentless(),
                            &self.workflow.initial,
                        )?;
                        backfill_satisfied(&self.pool, &mut instance);
                        self.pool.insert(instance);
                        progressed = true;
                    }
                    self.parentless_cursor.insert(key.clone(), point);
                    next = seq.next_after(&point)?;
                }
                Ok(())
            })();

            if let Err(e) = result {
                warn!(task = %task, error = %e, "parentless spawn failed");
            }
        }
        progressed
    }

    /// Clear elapsed retry timers so instances become releasable again.
    fn release_retries(&mut self, now: DateTime<Utc>) -> bool {
        let mut progressed = false;
        for id in self.pool.ids_in_state(TaskState::Waiting) {
            let Some(instance) = self.pool.get_mut(&id) else {
                continue;
            };
            if let Some(retry_at) = instance.retry_at {
                if retry_at <= now {
                    instance.retry_at = None;
                    info!(task = %id, "retry delay elapsed");
                    progressed = true;
                }
            }
        }
        progressed
    }

    /// Expire waiting instances whose clock deadline has passed.
    fn expire_due_instances(&mut self, now: DateTime<Utc>) -> bool {
        if self.workflow.mode != CyclingMode::Datetime {
            return false;
        }
        let mut progressed = false;
        for id in self.pool.ids_in_state(TaskState::Waiting) {
            let Some(offset) = self
                .workflow
                .defs
                .get(&id.name)
                .and_then(|def| def.expire_offset)
            else {
                continue;
            };
            let deadline = match id.point.add(&offset) {
                Ok(CyclePoint::DateTime(t)) => t,
                _ => continue,
            };
            if now >= deadline {
                warn!(task = %id, deadline = %deadline, "instance expired");
                let _ = self.pool.set_state(&id, TaskState::Expired);
                progressed = true;
            }
        }
        progressed
    }

    /// Transition ready waiting instances to `queued`.
    fn queue_ready_instances(&mut self) -> bool {
        if self.stop_requested {
            // Already-queued instances drain; nothing new starts.
            return false;
        }
        let Some(base) = self.pool.runahead_base() else {
            return false;
        };
        let bound = match self
            .workflow
            .runahead
            .bound(&base, &self.workflow.graph.sequences)
        {
            Ok(bound) => bound,
            Err(e) => {
                warn!(error = %e, "runahead bound computation failed");
                return false;
            }
        };

        let mut progressed = false;
        for id in self.pool.ids_in_state(TaskState::Waiting) {
            let Some(instance) = self.pool.get(&id) else {
                continue;
            };
            if instance.is_held || instance.retry_at.is_some() {
                continue;
            }
            let ready = instance.force_ready
                || (instance.releasable() && instance.prereqs_satisfied());
            if !ready {
                continue;
            }
            if !instance.force_ready {
                let beyond = id
                    .point
                    .try_cmp(&bound)
                    .map(|o| o == std::cmp::Ordering::Greater)
                    .unwrap_or(true);
                if beyond {
                    debug!(task = %id, bound = %bound, "ready but held back by runahead limit");
                    continue;
                }
            }
            let _ = self.pool.set_state(&id, TaskState::Queued);
            progressed = true;
        }
        progressed
    }

    /// Release queued instances into submission, respecting queue limits.
    ///
    /// Candidates are taken in ascending (cycle point, task name) order —
    /// the pool's natural order — so release is deterministic.
    fn dispatch_from_queues(&mut self) -> Vec<JobRequest> {
        let mut counts = self.pool.active_per_queue(&self.workflow.queues);
        let mut submissions = Vec::new();

        for id in self.pool.ids_in_state(TaskState::Queued) {
            let Some(instance) = self.pool.get(&id) else {
                continue;
            };
            if instance.is_held {
                continue;
            }
            let queue = self.workflow.queues.queue_of(&id.name).to_string();
            let active = counts.get(&queue).copied().unwrap_or(0);
            if !self.workflow.queues.has_capacity(&queue, active) {
                continue;
            }

            let request = self.effective_request(&id);
            let Some(request) = request else {
                continue;
            };
            if let Some(instance) = self.pool.get_mut(&id) {
                instance.submit_num = request.submit_num;
            }
            let _ = self.pool.set_state(&id, TaskState::Submitted);
            *counts.entry(queue).or_insert(0) += 1;
            info!(task = %id, submit_num = request.submit_num, "job submitted");
            submissions.push(request);
        }
        submissions
    }

    /// Compute an instance's effective runtime configuration at submission
    /// time: the resolved definition plus current broadcast overrides.
    fn effective_request(&self, id: &TaskId) -> Option<JobRequest> {
        let instance = self.pool.get(id)?;
        let Some(def) = self.workflow.defs.get(&id.name) else {
            warn!(task = %id, "no definition for queued instance; skipping submission");
            return None;
        };

        let mut script = def.script.clone();
        let mut env = def.env.clone();
        for (key, value) in self.broadcasts.get_overrides(&def.ancestry, &id.point) {
            if key == "script" {
                script = value;
            } else if let Some(name) = key.strip_prefix("env.") {
                env.insert(name.to_string(), value);
            } else {
                warn!(task = %id, key = %key, "unrecognized broadcast key; ignoring");
            }
        }

        let submit_num = instance.submit_num + 1;
        env.insert("CYCLEFLOW_TASK".to_string(), id.name.clone());
        env.insert("CYCLEFLOW_CYCLE_POINT".to_string(), id.point.to_string());
        env.insert("CYCLEFLOW_TRY".to_string(), instance.try_num.to_string());
        env.insert("CYCLEFLOW_SUBMIT_NUM".to_string(), submit_num.to_string());

        let messages = def
            .outputs
            .iter()
            .map(|(name, out)| (name.clone(), out.message.clone()))
            .collect();

        Some(JobRequest {
            id: id.clone(),
            submit_num,
            script,
            env,
            messages,
        })
    }

    /// Whether the scheduler is done: an empty pool means nothing further
    /// can spawn (the release phase just ran); after a stop request, active
    /// instances draining is enough.
    fn exit_reason(&self) -> Option<String> {
        if self.pool.is_empty() {
            return Some(if self.stop_requested {
                "stop requested".to_string()
            } else {
                "workflow complete".to_string()
            });
        }
        if self.stop_requested {
            let active = self.pool.count_in_state(TaskState::Queued)
                + self.pool.count_in_state(TaskState::Submitted)
                + self.pool.count_in_state(TaskState::Running);
            if active == 0 {
                return Some("stop requested: active instances finished".to_string());
            }
        }
        None
    }

    /// A stall: instances exist, none are active, and nothing will change
    /// without external intervention.
    fn stall_reason(&self) -> Option<String> {
        if self.pool.is_empty() {
            return None;
        }
        let active = self.pool.count_in_state(TaskState::Queued)
            + self.pool.count_in_state(TaskState::Submitted)
            + self.pool.count_in_state(TaskState::Running);
        if active > 0 {
            return None;
        }
        let retry_pending = self
            .pool
            .iter()
            .any(|t| t.state == TaskState::Waiting && t.retry_at.is_some());
        if retry_pending {
            return None;
        }

        let mut reasons = Vec::new();
        for instance in self.pool.iter().take(5) {
            if instance.is_held {
                reasons.push(format!("{} held", instance.id));
            } else if instance.incomplete {
                reasons.push(format!(
                    "{} finished {} with incomplete required outputs",
                    instance.id, instance.state
                ));
            } else if instance.state == TaskState::Waiting {
                let unsatisfied = instance.unsatisfied_conditions();
                reasons.push(format!(
                    "{} waiting on [{}]",
                    instance.id,
                    unsatisfied.join(", ")
                ));
            }
        }
        if reasons.is_empty() {
            reasons.push("pool contains unrunnable instances".to_string());
        }
        Some(format!("workflow stalled: {}", reasons.join("; ")))
    }

    /// Read-only view of the pool, for status queries. Taken between steps.
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            tasks: self
                .pool
                .iter()
                .map(|t| TaskSummary {
                    id: t.id.clone(),
                    state: t.state,
                    flows: t.flows.iter().copied().collect(),
                    is_held: t.is_held,
                    submit_num: t.submit_num,
                    completed_outputs: t.completed_outputs(),
                    unsatisfied: t.unsatisfied_conditions(),
                    incomplete: t.incomplete,
                    retry_at: t.retry_at,
                })
                .collect(),
        }
    }

    /// Snapshot for the checkpoint contract. Called between steps only.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            flow_counter: self.flows.counter(),
            active_flows: self.flows.active().iter().copied().collect(),
            stop_requested: self.stop_requested,
            parentless_cursor: self
                .parentless_cursor
                .iter()
                .map(|((task, recurrence), point)| (task.clone(), recurrence.clone(), *point))
                .collect(),
            broadcasts: self.broadcasts.entries(),
            tasks: self.pool.iter().cloned().collect(),
        }
    }

    /// Expose pool emptiness (for tests).
    pub fn pool_is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

/// Whether the instance at `point` must come from the auto-spawn loop:
/// no prerequisites at all, or only prerequisites reaching back before the
/// initial cycle point. Suicide-only entries are never auto-spawned.
fn auto_spawnable(
    entry: &crate::graph::TaskGraphEntry,
    point: &CyclePoint,
    initial: &CyclePoint,
) -> Result<bool> {
    if entry.is_parentless() {
        return Ok(true);
    }
    if entry.prereqs.is_empty() {
        return Ok(false);
    }
    for expr in &entry.prereqs {
        for cond in expr.conditions() {
            let upstream = match &cond.offset {
                Some(offset) => point.add(offset)?,
                None => *point,
            };
            if upstream.try_cmp(initial)? != std::cmp::Ordering::Less {
                return Ok(false);
            }
        }
    }
    Ok(true)
}
