// src/job/local.rs

//! Local process job backend.
//!
//! Each submitted job runs its script through `sh -c` in its own Tokio
//! task, so jobs execute in parallel. Stdout lines matching a declared
//! output message are reported as custom-output callbacks; process exit
//! becomes a succeeded/failed callback.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::engine::{JobStatus, SchedulerEvent};
use crate::errors::Result;
use crate::job::{JobBackend, JobRequest};
use crate::pool::TaskId;

/// Kill-signal senders for currently running jobs.
type KillRegistry = Arc<Mutex<HashMap<TaskId, mpsc::Sender<()>>>>;

/// Job backend running scripts as local child processes.
pub struct LocalJobBackend {
    tx: mpsc::Sender<JobRequest>,
    kills: KillRegistry,
}

impl LocalJobBackend {
    /// Create the backend and spawn its background submission loop,
    /// wired to the given runtime event sender.
    pub fn new(event_tx: mpsc::Sender<SchedulerEvent>) -> Self {
        let (tx, mut rx) = mpsc::channel::<JobRequest>(32);
        let kills: KillRegistry = Arc::new(Mutex::new(HashMap::new()));

        let registry = Arc::clone(&kills);
        tokio::spawn(async move {
            info!("local job backend loop started");
            while let Some(job) = rx.recv().await {
                let event_tx = event_tx.clone();
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    run_job(job, event_tx, registry).await;
                });
            }
            info!("local job backend loop finished (channel closed)");
        });

        Self { tx, kills }
    }
}

impl JobBackend for LocalJobBackend {
    fn submit(
        &mut self,
        jobs: Vec<JobRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();
        Box::pin(async move {
            for job in jobs {
                tx.send(job).await.map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }

    fn kill(
        &mut self,
        tasks: Vec<TaskId>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let kills = Arc::clone(&self.kills);
        Box::pin(async move {
            for id in tasks {
                let sender = kills.lock().expect("kill registry lock").get(&id).cloned();
                match sender {
                    Some(tx) => {
                        let _ = tx.send(()).await;
                        info!(task = %id, "kill requested");
                    }
                    None => warn!(task = %id, "kill requested for unknown job; ignoring"),
                }
            }
            Ok(())
        })
    }

    fn poll(
        &mut self,
        tasks: Vec<TaskId>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let kills = Arc::clone(&self.kills);
        Box::pin(async move {
            // Local jobs report status directly; a poll just logs liveness.
            for id in tasks {
                let alive = kills.lock().expect("kill registry lock").contains_key(&id);
                debug!(task = %id, alive, "poll");
            }
            Ok(())
        })
    }
}

/// Run a single job process, emitting status callbacks.
///
/// All spawn errors are converted into a failed callback with exit code -1.
async fn run_job(job: JobRequest, event_tx: mpsc::Sender<SchedulerEvent>, kills: KillRegistry) {
    let id = job.id.clone();
    let submit_num = job.submit_num;
    if let Err(err) = run_job_inner(job, &event_tx, &kills).await {
        error!(task = %id, error = %err, "job execution error");
        kills.lock().expect("kill registry lock").remove(&id);
        let _ = event_tx
            .send(SchedulerEvent::Job {
                task: id,
                submit_num,
                status: JobStatus::Failed(-1),
            })
            .await;
    }
}

async fn run_job_inner(
    job: JobRequest,
    event_tx: &mpsc::Sender<SchedulerEvent>,
    kills: &KillRegistry,
) -> anyhow::Result<()> {
    info!(task = %job.id, submit_num = job.submit_num, "starting job process");

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&job.script)
        .envs(&job.env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for job '{}'", job.id))?;

    let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
    kills
        .lock()
        .expect("kill registry lock")
        .insert(job.id.clone(), kill_tx);

    let _ = event_tx
        .send(SchedulerEvent::Job {
            task: job.id.clone(),
            submit_num: job.submit_num,
            status: JobStatus::Started,
        })
        .await;

    // Forward stdout lines that complete declared outputs.
    if let Some(stdout) = child.stdout.take() {
        let id = job.id.clone();
        let submit_num = job.submit_num;
        let messages = job.messages.clone();
        let tx = event_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim().to_string();
                let matched = messages
                    .iter()
                    .any(|(name, message)| line == *name || line == *message);
                if matched {
                    let _ = tx
                        .send(SchedulerEvent::Job {
                            task: id.clone(),
                            submit_num,
                            status: JobStatus::Message(line),
                        })
                        .await;
                }
            }
        });
    }

    // Drain stderr so buffers don't fill; log at debug.
    if let Some(stderr) = child.stderr.take() {
        let id = job.id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %id, line = %line, "job stderr");
            }
        });
    }

    let status = tokio::select! {
        exit = child.wait() => {
            let exit = exit.context("waiting for job process")?;
            if exit.success() {
                JobStatus::Succeeded
            } else {
                JobStatus::Failed(exit.code().unwrap_or(-1))
            }
        }
        _ = kill_rx.recv() => {
            child.start_kill().context("killing job process")?;
            let _ = child.wait().await;
            JobStatus::Failed(-9)
        }
    };

    kills.lock().expect("kill registry lock").remove(&job.id);

    debug!(task = %job.id, ?status, "job finished");
    let _ = event_tx
        .send(SchedulerEvent::Job {
            task: job.id,
            submit_num: job.submit_num,
            status,
        })
        .await;

    Ok(())
}
