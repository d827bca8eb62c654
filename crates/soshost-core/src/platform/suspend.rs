//! # Thread Suspension
//!
//! Stops every thread of a live process for the lifetime of a
//! [`ThreadSuspender`] and resumes them on drop.
//!
//! Threads can start while others are being suspended, so suspension runs
//! to a fixed point: enumerate, suspend every thread not yet suspended, and
//! repeat until a pass suspends nothing new or [`MAX_SUSPEND_PASSES`] is
//! reached. A thread that cannot be suspended (it may have exited in
//! between) is logged, retried on the next pass and otherwise skipped; only
//! a process where no thread could be suspended at all fails the attach.
//!
//! ```rust,ignore
//! let suspender = ThreadSuspender::new(WindowsThreadControl::new(pid))?;
//! // ... read the process ...
//! drop(suspender); // resumes exactly the threads it stopped
//! ```

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::{HostError, Result};
use crate::types::ThreadId;

/// Upper bound on enumerate-and-suspend passes
pub const MAX_SUSPEND_PASSES: usize = 100;

/// Per-thread suspend and resume for one process
pub trait ThreadControl: Send + Sync
{
    /// Threads currently alive in the process
    ///
    /// ## Errors
    ///
    /// Any error makes the suspension attempt fail.
    fn thread_ids(&self) -> Result<Vec<ThreadId>>;

    /// Stop one thread
    fn suspend(&self, thread_id: ThreadId) -> Result<()>;

    /// Undo one successful [`ThreadControl::suspend`]
    fn resume(&self, thread_id: ThreadId) -> Result<()>;
}

/// Keeps every thread of a process suspended until dropped
pub struct ThreadSuspender<C: ThreadControl>
{
    control: C,
    suspended: Vec<ThreadId>,
    failed: Vec<ThreadId>,
}

impl<C: ThreadControl> ThreadSuspender<C>
{
    /// Suspend all threads reachable through `control`
    ///
    /// Threads suspended before an error are resumed again before the
    /// error is returned.
    ///
    /// ## Errors
    ///
    /// - `PermissionDenied`: threads exist but none could be suspended
    /// - anything [`ThreadControl::thread_ids`] returns
    pub fn new(control: C) -> Result<Self>
    {
        let mut suspender = Self {
            control,
            suspended: Vec::new(),
            failed: Vec::new(),
        };
        suspender.suspend_all()?;
        Ok(suspender)
    }

    fn suspend_all(&mut self) -> Result<()>
    {
        let mut suspended = HashSet::new();
        let mut failed = HashSet::new();
        let mut passes = 0usize;
        let mut settled = false;
        while !settled && passes < MAX_SUSPEND_PASSES {
            passes += 1;
            let mut progress = false;
            for thread_id in self.control.thread_ids()? {
                if suspended.contains(&thread_id) {
                    continue;
                }
                match self.control.suspend(thread_id) {
                    Ok(()) => {
                        suspended.insert(thread_id);
                        self.suspended.push(thread_id);
                        progress = true;
                    }
                    Err(err) => {
                        if failed.insert(thread_id) {
                            warn!(thread = %thread_id, error = %err, "could not suspend thread");
                            self.failed.push(thread_id);
                        }
                    }
                }
            }
            settled = !progress;
        }
        if !settled {
            warn!(passes, "threads kept appearing; giving up on a fixed point");
        }
        // A thread that failed once may have been suspended on a later pass.
        self.failed.retain(|thread_id| !suspended.contains(thread_id));
        debug!(
            passes,
            suspended = self.suspended.len(),
            failed = self.failed.len(),
            "thread suspension finished"
        );

        if self.suspended.is_empty() && !self.failed.is_empty() {
            return Err(HostError::PermissionDenied(format!(
                "unable to suspend any of the {} threads of the target process",
                self.failed.len()
            )));
        }
        Ok(())
    }

    /// Threads this suspender stopped, in suspension order
    pub fn suspended(&self) -> &[ThreadId]
    {
        &self.suspended
    }

    /// Threads whose suspension failed
    pub fn failed(&self) -> &[ThreadId]
    {
        &self.failed
    }

    pub fn control(&self) -> &C
    {
        &self.control
    }

    /// Resume every thread stopped so far
    ///
    /// A resume failure is logged and the remaining threads are still
    /// resumed.
    pub fn resume_all(&mut self)
    {
        for thread_id in self.suspended.drain(..) {
            if let Err(err) = self.control.resume(thread_id) {
                warn!(thread = %thread_id, error = %err, "could not resume thread");
            }
        }
    }
}

impl<C: ThreadControl> Drop for ThreadSuspender<C>
{
    fn drop(&mut self)
    {
        self.resume_all();
    }
}

impl<C: ThreadControl> std::fmt::Debug for ThreadSuspender<C>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("ThreadSuspender")
            .field("suspended", &self.suspended.len())
            .field("failed", &self.failed.len())
            .finish()
    }
}
