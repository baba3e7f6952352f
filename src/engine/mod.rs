// src/engine/mod.rs

//! The scheduler control loop.
//!
//! This module ties together:
//! - the task pool, matcher, flow manager, and broadcast store
//! - the event types flowing in from the job backend and operator commands
//! - the main runtime event loop reacting to:
//!   - asynchronous job status callbacks
//!   - operator commands (hold, kill, trigger, broadcast, reload, stop)
//!   - timer ticks (retries, expiry, stall and inactivity timers)
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::path::PathBuf;

use regex::Regex;
use tracing::warn;

use crate::broadcast::BroadcastTarget;
use crate::cycling::CyclePoint;
use crate::flow::FlowSpec;
use crate::job::JobRequest;
use crate::pool::TaskId;
use crate::types::TimeoutAction;
use crate::workflow::CompiledWorkflow;

/// Canonical task name type used throughout the engine.
pub type TaskName = String;

/// Terminal and intermediate job states reported by the job backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// The job started executing.
    Started,
    /// The job reported a custom output message.
    Message(String),
    Succeeded,
    Failed(i32),
}

/// How a stop request treats active instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Suppress further spawning; let active instances finish.
    Request,
    /// Also kill active instances.
    Now,
}

/// Selects pool instances by name pattern and optional cycle point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMatcher {
    /// Anchored regular expression over task names (`a`, `model_.*`).
    pub name: String,
    /// Restrict to one cycle point; `None` matches every point.
    pub point: Option<CyclePoint>,
}

impl TaskMatcher {
    pub fn new(name: impl Into<String>, point: Option<CyclePoint>) -> Self {
        Self {
            name: name.into(),
            point,
        }
    }

    pub fn matches(&self, id: &TaskId) -> bool {
        if let Some(point) = &self.point {
            if *point != id.point {
                return false;
            }
        }
        match Regex::new(&format!("^(?:{})$", self.name)) {
            Ok(re) => re.is_match(&id.name),
            Err(_) => {
                warn!(pattern = %self.name, "invalid task name pattern; matching nothing");
                false
            }
        }
    }
}

/// Operator command surface.
#[derive(Debug, Clone)]
pub enum OperatorCommand {
    Hold(TaskMatcher),
    Release(TaskMatcher),
    Kill(TaskMatcher),
    /// Ask the job backend for a fresh status report on active instances.
    Poll(TaskMatcher),
    Remove(TaskMatcher),
    Trigger {
        name: TaskName,
        point: CyclePoint,
        flow: FlowSpec,
        /// Don't spawn successors until an existing flow catches up here.
        wait: bool,
    },
    BroadcastSet {
        target: BroadcastTarget,
        namespace: String,
        settings: Vec<(String, String)>,
        expiry: Option<CyclePoint>,
    },
    BroadcastCancel {
        target: BroadcastTarget,
        namespace: String,
        keys: Vec<String>,
    },
    BroadcastExpire {
        point: CyclePoint,
    },
    /// Recompile graph and task definitions without losing live instances.
    Reload(Box<CompiledWorkflow>),
    Stop(StopMode),
}

/// Events flowing into the runtime from the job backend, operators, and
/// timers. Applied strictly in arrival order.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// Asynchronous job status callback.
    Job {
        task: TaskId,
        submit_num: u32,
        status: JobStatus,
    },
    Command(Box<OperatorCommand>),
    /// Periodic tick: drives retry release, expiry, and timer evaluation.
    Tick,
    /// Graceful shutdown requested (e.g. Ctrl-C).
    Shutdown,
}

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Submit these jobs to the job backend.
    SubmitJobs(Vec<JobRequest>),
    /// Ask the job backend to kill these instances' jobs.
    KillJobs(Vec<TaskId>),
    /// Ask the job backend to re-poll these instances' jobs.
    PollJobs(Vec<TaskId>),
    /// Request that the process exits with the given reason.
    RequestExit { reason: String },
}

/// Decision returned by the core after handling a single [`SchedulerEvent`].
#[derive(Debug, Clone, Default)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
    /// Whether this step made forward progress (spawn, state change,
    /// output completion). Resets the stall and inactivity timers.
    pub progressed: bool,
    /// Set when the pool can make no further progress without external
    /// intervention; the reason names the blocked tasks.
    pub stall: Option<String>,
}

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    pub stall_timeout_secs: Option<u64>,
    pub stall_action: TimeoutAction,
    pub inactivity_timeout_secs: Option<u64>,
    pub inactivity_action: TimeoutAction,
    /// Checkpoint snapshots are written here between steps when set.
    pub checkpoint_path: Option<PathBuf>,
}

pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use self::core::CoreScheduler;
pub use runtime::Runtime;
