//! Fixed-size worker pool used to run producers off the calling thread.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{mpsc, Arc, Mutex, OnceLock, PoisonError},
    thread::{self, JoinHandle},
};

use tracing::{debug, error, info, warn};

use crate::{config::PoolConfig, error::PoolError, executor::Executor};

type Job = Box<dyn FnOnce() + Send + 'static>;

static GLOBAL: OnceLock<ThreadPool> = OnceLock::new();

/// The process-wide pool behind [`Deferred::new`](crate::Deferred::new).
///
/// Built on first use from [`PoolConfig::from_env`]; an invalid environment
/// is logged and replaced by the defaults. The pool lives until the process
/// exits.
///
/// # Panics
///
/// Panics on first use if no worker thread can be spawned.
pub fn global() -> &'static ThreadPool {
    GLOBAL.get_or_init(|| {
        let config = PoolConfig::from_env().unwrap_or_else(|err| {
            warn!(target: "ThreadPool", %err, "using the default pool configuration");
            PoolConfig::default()
        });
        ThreadPool::new(config)
            .unwrap_or_else(|err| panic!("could not start the global thread pool: {err}"))
    })
}

/// Worker threads pulling jobs off one shared queue.
///
/// Delayed jobs use the sleeping default of
/// [`Executor::execute_after`], so each one holds a worker for its delay.
/// Dropping the pool runs every job already submitted, then joins all
/// threads.
pub struct ThreadPool {
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<Worker>,
}

impl ThreadPool {
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(config.size.get());
        for id in 0..config.size.get() {
            workers.push(Worker::new(id, &config.thread_name, receiver.clone())?);
        }
        info!(target: "ThreadPool", size = workers.len(), name = %config.thread_name, "started");
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue `job`, or fail if the pool has been shut down.
    pub fn try_execute<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .as_ref()
            .ok_or(PoolError::ShutDown)?
            .send(Box::new(job))
            .map_err(|_| PoolError::ShutDown)
    }

    /// Run every queued job, then stop and join all threads. Later
    /// submissions fail with [`PoolError::ShutDown`].
    pub fn shutdown(&mut self) {
        drop(self.sender.take());
        for worker in self.workers.iter_mut() {
            if let Some(thread) = worker.thread.take() {
                info!(target: "ThreadPool", "Shutting down worker {}", worker.id);
                if thread.join().is_err() {
                    error!(target: "ThreadPool", "Worker {} panicked", worker.id);
                }
            }
        }
    }
}

impl Executor for ThreadPool {
    fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(err) = self.try_execute(job) {
            error!(target: "ThreadPool", %err, "dropping job");
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One worker in a threadpool
struct Worker {
    id: usize,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// spawns a new worker that listens to a receiver for jobs
    fn new(
        id: usize,
        name: &str,
        receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    ) -> Result<Self, PoolError> {
        let thread = thread::Builder::new()
            .name(format!("{name}-{id}"))
            .spawn(move || loop {
                let message = receiver
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .recv();
                match message {
                    Ok(job) => {
                        debug!(target: "ThreadPool", "Worker {id} got a job; executing");
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!(target: "ThreadPool", "Worker {id} caught a panicking job");
                        }
                    }
                    Err(_) => {
                        debug!(target: "ThreadPool", "Worker {id} disconnected; shutting down");
                        break;
                    }
                }
            })
            .map_err(PoolError::Spawn)?;
        Ok(Worker {
            id,
            thread: Some(thread),
        })
    }
}
