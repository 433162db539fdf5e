use std::io;

use thiserror::Error;

/// Invalid worker pool configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {var} value {value:?}: expected a positive integer")]
    InvalidPoolSize { var: &'static str, value: String },
    #[error("{var} must not be empty")]
    EmptyThreadName { var: &'static str },
}

/// Failure to start a [`ThreadPool`](crate::ThreadPool) or hand it a job.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("the thread pool has shut down")]
    ShutDown,
    #[error("failed to spawn a pool thread")]
    Spawn(#[source] io::Error),
}
