//! Synchronous simulation harness for the pure core scheduler.
//!
//! Drives `CoreScheduler::step` directly with a controllable clock and
//! captures the commands the core emits, so tests can assert on submission
//! order, kills, stalls, and exit reasons without any Tokio machinery.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, TimeZone, Utc};

use cycleflow::engine::{
    CoreCommand, CoreScheduler, CoreStep, JobStatus, OperatorCommand, SchedulerEvent,
};
use cycleflow::job::JobRequest;
use cycleflow::pool::TaskId;
use cycleflow::query::PoolSnapshot;
use cycleflow::workflow::CompiledWorkflow;

pub struct Sim {
    pub core: CoreScheduler,
    pub now: DateTime<Utc>,
    /// Every submission the core ever issued, in order.
    pub submitted: Vec<JobRequest>,
    /// Submissions not yet completed by the test ("currently executing").
    pub pending: VecDeque<JobRequest>,
    /// Every kill request the core ever issued.
    pub kills: Vec<TaskId>,
    pub exited: Option<String>,
    pub last_stall: Option<String>,
}

impl Sim {
    pub fn new(workflow: CompiledWorkflow) -> Self {
        Self {
            core: CoreScheduler::new(workflow),
            now: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            submitted: Vec::new(),
            pending: VecDeque::new(),
            kills: Vec::new(),
            exited: None,
            last_stall: None,
        }
    }

    pub fn from_core(core: CoreScheduler) -> Self {
        Self {
            core,
            now: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            submitted: Vec::new(),
            pending: VecDeque::new(),
            kills: Vec::new(),
            exited: None,
            last_stall: None,
        }
    }

    /// Feed one event through the core, absorbing the resulting commands.
    pub fn step(&mut self, event: SchedulerEvent) -> CoreStep {
        let step = self.core.step(event, self.now);
        for command in &step.commands {
            match command {
                CoreCommand::SubmitJobs(jobs) => {
                    for job in jobs {
                        self.submitted.push(job.clone());
                        self.pending.push_back(job.clone());
                    }
                }
                CoreCommand::KillJobs(tasks) => {
                    self.kills.extend(tasks.iter().cloned());
                    // A killed job never reports back; forget it.
                    self.pending.retain(|j| !tasks.contains(&j.id));
                }
                CoreCommand::PollJobs(_) => {}
                CoreCommand::RequestExit { reason } => {
                    self.exited = Some(reason.clone());
                }
            }
        }
        self.last_stall = step.stall.clone();
        step
    }

    pub fn tick(&mut self) -> CoreStep {
        self.step(SchedulerEvent::Tick)
    }

    /// Move the clock forward and tick.
    pub fn advance_secs(&mut self, secs: i64) -> CoreStep {
        self.now += Duration::seconds(secs);
        self.tick()
    }

    pub fn command(&mut self, command: OperatorCommand) -> CoreStep {
        self.step(SchedulerEvent::Command(Box::new(command)))
    }

    fn take_pending(&mut self, name: &str) -> JobRequest {
        let idx = self
            .pending
            .iter()
            .position(|j| j.id.name == name)
            .unwrap_or_else(|| panic!("no pending job for task '{name}'"));
        self.pending.remove(idx).expect("index just found")
    }

    /// Report Started then Succeeded for the oldest pending job of `name`.
    pub fn succeed(&mut self, name: &str) -> CoreStep {
        let job = self.take_pending(name);
        self.job_status(&job, JobStatus::Started);
        self.job_status(&job, JobStatus::Succeeded)
    }

    /// Report Started then Failed for the oldest pending job of `name`.
    pub fn fail(&mut self, name: &str, exit_code: i32) -> CoreStep {
        let job = self.take_pending(name);
        self.job_status(&job, JobStatus::Started);
        self.job_status(&job, JobStatus::Failed(exit_code))
    }

    /// Report a custom output message for a pending job of `name`, without
    /// completing it.
    pub fn message(&mut self, name: &str, message: &str) -> CoreStep {
        let job = self
            .pending
            .iter()
            .find(|j| j.id.name == name)
            .unwrap_or_else(|| panic!("no pending job for task '{name}'"))
            .clone();
        self.job_status(&job, JobStatus::Message(message.to_string()))
    }

    fn job_status(&mut self, job: &JobRequest, status: JobStatus) -> CoreStep {
        self.step(SchedulerEvent::Job {
            task: job.id.clone(),
            submit_num: job.submit_num,
            status,
        })
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        self.core.snapshot()
    }

    /// Names of all submissions so far, as "name.point" strings.
    pub fn submitted_ids(&self) -> Vec<String> {
        self.submitted.iter().map(|j| j.id.to_string()).collect()
    }

    /// Jobs currently "executing" (submitted but not yet completed by the
    /// test). Sample this as you go to assert concurrency bounds.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
