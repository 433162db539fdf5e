//! Places to run producers and delayed continuations.

use std::{thread, time::Duration};

use tracing::trace;

/// Something that runs jobs, now or later, on some thread.
///
/// A [`Deferred`](crate::Deferred) never owns threads itself: producers and
/// delayed completions are handed to an `Executor`.
pub trait Executor: Send + Sync {
    /// Run `job` at some point. It may run before this returns.
    fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static;

    /// Run `job` no sooner than `delay` from now.
    ///
    /// The default submits a job that sleeps first, which ties up whatever
    /// runs it for the whole delay.
    fn execute_after<F>(&self, delay: Duration, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.execute(move || {
            thread::sleep(delay);
            job()
        })
    }
}

impl<X: Executor> Executor for &X {
    fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        (**self).execute(job)
    }

    fn execute_after<F>(&self, delay: Duration, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        (**self).execute_after(delay, job)
    }
}

/// Runs every job on the calling thread before returning.
///
/// `execute_after` blocks the caller for the delay.
#[derive(Debug, Default, Clone, Copy)]
pub struct Inline;

impl Executor for Inline {
    fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        job()
    }
}

/// Spawns a fresh OS thread for every job.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner;

impl Executor for ThreadSpawner {
    fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::spawn(job);
        trace!(target: "ThreadSpawner", thread = ?handle.thread().id(), "spawned job thread");
    }
}
