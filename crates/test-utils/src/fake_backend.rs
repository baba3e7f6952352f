use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use cycleflow::engine::{JobStatus, SchedulerEvent};
use cycleflow::errors::Result;
use cycleflow::job::{JobBackend, JobRequest};
use cycleflow::pool::TaskId;

/// What the fake backend reports for one submission of a task.
#[derive(Debug, Clone)]
pub enum FakeOutcome {
    Succeed,
    /// Report the given custom output messages, then succeed.
    SucceedWith(Vec<String>),
    Fail(i32),
}

/// A fake job backend that:
/// - records the full `JobRequest`s it was given (in order)
/// - immediately reports Started plus a scripted outcome for each job.
///
/// Outcomes are looked up by task name; repeated submissions of the same
/// name consume scripted outcomes in order, defaulting to `Succeed`.
pub struct FakeJobBackend {
    event_tx: mpsc::Sender<SchedulerEvent>,
    submitted: Arc<Mutex<Vec<JobRequest>>>,
    outcomes: Arc<Mutex<HashMap<String, Vec<FakeOutcome>>>>,
    last_submit: Arc<Mutex<HashMap<TaskId, u32>>>,
}

impl FakeJobBackend {
    pub fn new(
        event_tx: mpsc::Sender<SchedulerEvent>,
        submitted: Arc<Mutex<Vec<JobRequest>>>,
    ) -> Self {
        Self {
            event_tx,
            submitted,
            outcomes: Arc::new(Mutex::new(HashMap::new())),
            last_submit: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Script outcomes for a task name, consumed one per submission.
    pub fn with_outcomes(self, task: &str, outcomes: Vec<FakeOutcome>) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .insert(task.to_string(), outcomes);
        self
    }
}

impl JobBackend for FakeJobBackend {
    fn submit(
        &mut self,
        jobs: Vec<JobRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.event_tx.clone();
        let submitted = Arc::clone(&self.submitted);
        let outcomes = Arc::clone(&self.outcomes);
        let last_submit = Arc::clone(&self.last_submit);

        Box::pin(async move {
            for job in jobs {
                {
                    let mut guard = submitted.lock().unwrap();
                    guard.push(job.clone());
                }
                {
                    let mut guard = last_submit.lock().unwrap();
                    guard.insert(job.id.clone(), job.submit_num);
                }

                let outcome = {
                    let mut guard = outcomes.lock().unwrap();
                    match guard.get_mut(&job.id.name) {
                        Some(queue) if !queue.is_empty() => queue.remove(0),
                        _ => FakeOutcome::Succeed,
                    }
                };

                tx.send(SchedulerEvent::Job {
                    task: job.id.clone(),
                    submit_num: job.submit_num,
                    status: JobStatus::Started,
                })
                .await
                .map_err(anyhow::Error::from)?;

                let final_status = match outcome {
                    FakeOutcome::Succeed => JobStatus::Succeeded,
                    FakeOutcome::SucceedWith(messages) => {
                        for message in messages {
                            tx.send(SchedulerEvent::Job {
                                task: job.id.clone(),
                                submit_num: job.submit_num,
                                status: JobStatus::Message(message),
                            })
                            .await
                            .map_err(anyhow::Error::from)?;
                        }
                        JobStatus::Succeeded
                    }
                    FakeOutcome::Fail(code) => JobStatus::Failed(code),
                };

                tx.send(SchedulerEvent::Job {
                    task: job.id.clone(),
                    submit_num: job.submit_num,
                    status: final_status,
                })
                .await
                .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }

    fn kill(
        &mut self,
        tasks: Vec<TaskId>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.event_tx.clone();
        let last_submit = Arc::clone(&self.last_submit);
        Box::pin(async move {
            // A killed job reports back as failed, like the real backend.
            for id in tasks {
                let submit_num = {
                    let guard = last_submit.lock().unwrap();
                    guard.get(&id).copied().unwrap_or(1)
                };
                tx.send(SchedulerEvent::Job {
                    task: id,
                    submit_num,
                    status: JobStatus::Failed(-9),
                })
                .await
                .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }

    fn poll(
        &mut self,
        _tasks: Vec<TaskId>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move { Ok(()) })
    }
}
