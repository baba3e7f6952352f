// src/job/backend.rs

//! Pluggable job backend abstraction.
//!
//! The runtime talks to a `JobBackend` instead of a raw mpsc sender. This
//! makes it easy to swap in a fake backend in tests while keeping the
//! production local-process implementation in [`local`](super::local).
//!
//! - `LocalJobBackend` is the default implementation: it runs job scripts
//!   as local processes and feeds status callbacks into the runtime.
//! - Tests can provide their own `JobBackend` that records submissions and
//!   directly emits `SchedulerEvent::Job` callbacks.

use std::future::Future;
use std::pin::Pin;

use crate::errors::Result;
use crate::job::JobRequest;
use crate::pool::TaskId;

/// Trait abstracting how submitted jobs are executed.
///
/// All operations are fire-and-forget: completions arrive back as discrete
/// `SchedulerEvent::Job` callbacks, never synchronously.
pub trait JobBackend: Send {
    /// Dispatch the given jobs for execution.
    fn submit(
        &mut self,
        jobs: Vec<JobRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Request that the jobs of these instances be killed. A killed job
    /// reports back as a failed status callback.
    fn kill(
        &mut self,
        tasks: Vec<TaskId>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Request a fresh status report for these instances.
    fn poll(
        &mut self,
        tasks: Vec<TaskId>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
