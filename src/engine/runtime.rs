// src/engine/runtime.rs

use std::fmt;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::checkpoint;
use crate::errors::Result;
use crate::job::JobBackend;
use crate::types::TimeoutAction;

use super::core::CoreScheduler;
use super::{CoreCommand, RuntimeOptions, SchedulerEvent};

/// Drives the core scheduler in response to `SchedulerEvent`s, and
/// delegates job submission/kill to a `JobBackend`.
///
/// This is a pure IO shell around `CoreScheduler`, which contains all the
/// scheduling semantics. This struct handles async IO: reading events from
/// channels, dispatching jobs, timers, and checkpointing between steps.
pub struct Runtime<J: JobBackend> {
    core: CoreScheduler,
    event_rx: mpsc::Receiver<SchedulerEvent>,
    backend: J,
    options: RuntimeOptions,
}

impl<J: JobBackend> fmt::Debug for Runtime<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<J: JobBackend> Runtime<J> {
    pub fn new(
        core: CoreScheduler,
        event_rx: mpsc::Receiver<SchedulerEvent>,
        backend: J,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            core,
            event_rx,
            backend,
            options,
        }
    }

    /// Main event loop.
    ///
    /// - Consumes `SchedulerEvent`s from `event_rx` (plus a periodic tick).
    /// - Feeds them into the core scheduler.
    /// - Executes commands returned by the core (submit, kill, exit).
    /// - Evaluates stall and inactivity timers between steps.
    pub async fn run(mut self) -> Result<()> {
        info!("cycleflow runtime started");

        let mut tick = tokio::time::interval(Duration::from_secs(1));
        let mut last_activity = Instant::now();
        let mut stalled_since: Option<(Instant, String)> = None;

        loop {
            let event = tokio::select! {
                event = self.event_rx.recv() => match event {
                    Some(event) => event,
                    None => {
                        info!("runtime event channel closed; exiting");
                        break;
                    }
                },
                _ = tick.tick() => SchedulerEvent::Tick,
            };

            debug!(?event, "runtime received event");

            // Feed the event into the pure core and get commands back.
            let step = self.core.step(event, Utc::now());

            for command in step.commands {
                self.execute_command(command).await?;
            }

            if step.progressed {
                last_activity = Instant::now();
                stalled_since = None;
            }

            match step.stall {
                Some(reason) => {
                    if stalled_since.is_none() {
                        warn!(reason = %reason, "workflow stalled");
                        stalled_since = Some((Instant::now(), reason));
                    }
                }
                None => stalled_since = None,
            }

            if let Some(reason) = self.timer_abort(&stalled_since, &last_activity) {
                self.save_checkpoint();
                error!(reason = %reason, "aborting");
                return Err(anyhow::anyhow!(reason).into());
            }

            if step.progressed {
                self.save_checkpoint();
            }

            if !step.keep_running {
                info!("core requested exit; stopping runtime");
                break;
            }
        }

        self.save_checkpoint();
        info!("runtime exiting");
        Ok(())
    }

    /// Evaluate the stall and inactivity timers; returns an abort reason
    /// when one has elapsed with `abort` configured.
    fn timer_abort(
        &mut self,
        stalled_since: &Option<(Instant, String)>,
        last_activity: &Instant,
    ) -> Option<String> {
        if let Some((since, reason)) = stalled_since {
            if let Some(timeout) = self.options.stall_timeout_secs {
                if since.elapsed() >= Duration::from_secs(timeout) {
                    match self.options.stall_action {
                        TimeoutAction::Abort => {
                            return Some(format!("stall timeout after {timeout}s: {reason}"));
                        }
                        TimeoutAction::Warn => {
                            warn!(timeout, reason = %reason, "stall timeout elapsed");
                        }
                    }
                }
            }
        }

        if let Some(timeout) = self.options.inactivity_timeout_secs {
            if last_activity.elapsed() >= Duration::from_secs(timeout) {
                match self.options.inactivity_action {
                    TimeoutAction::Abort => {
                        return Some(format!("no activity for {timeout}s"));
                    }
                    TimeoutAction::Warn => {
                        warn!(timeout, "inactivity timeout elapsed");
                    }
                }
            }
        }
        None
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::SubmitJobs(jobs) => {
                if jobs.is_empty() {
                    return Ok(());
                }
                let ids: Vec<_> = jobs.iter().map(|j| j.id.to_string()).collect();
                debug!(?ids, "submitting jobs");
                self.backend.submit(jobs).await?;
            }
            CoreCommand::KillJobs(tasks) => {
                if tasks.is_empty() {
                    return Ok(());
                }
                let ids: Vec<_> = tasks.iter().map(ToString::to_string).collect();
                debug!(?ids, "killing jobs");
                self.backend.kill(tasks).await?;
            }
            CoreCommand::PollJobs(tasks) => {
                if tasks.is_empty() {
                    return Ok(());
                }
                self.backend.poll(tasks).await?;
            }
            CoreCommand::RequestExit { reason } => {
                info!(reason = %reason, "core issued exit request");
            }
        }
        Ok(())
    }

    /// Checkpoints are written between steps only, never mid-step.
    fn save_checkpoint(&self) {
        let Some(path) = &self.options.checkpoint_path else {
            return;
        };
        if let Err(e) = checkpoint::save(path, &self.core.checkpoint()) {
            warn!(path = %path.display(), error = %e, "checkpoint save failed");
        }
    }

    /// Read-only pool view for status queries, taken between steps.
    pub fn snapshot(&self) -> crate::query::PoolSnapshot {
        self.core.snapshot()
    }
}
