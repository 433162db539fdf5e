use std::{
    num::NonZeroUsize,
    thread::available_parallelism,
};

use crate::error::ConfigError;

/// Environment variable overriding the worker count of the global pool.
pub const POOL_SIZE_VAR: &str = "DEFERRED_POOL_SIZE";
/// Environment variable overriding the worker thread name prefix.
pub const POOL_NAME_VAR: &str = "DEFERRED_POOL_NAME";

const DEFAULT_THREAD_NAME: &str = "deferred-worker";
const FALLBACK_SIZE: NonZeroUsize = match NonZeroUsize::new(4) {
    Some(size) => size,
    None => unreachable!(),
};

/// Sizing and naming of a [`ThreadPool`](crate::ThreadPool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub size: NonZeroUsize,
    /// Prefix of worker thread names; workers are named `{prefix}-{index}`.
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: available_parallelism().unwrap_or(FALLBACK_SIZE),
            thread_name: DEFAULT_THREAD_NAME.into(),
        }
    }
}

impl PoolConfig {
    /// Defaults, overridden by [`POOL_SIZE_VAR`] and [`POOL_NAME_VAR`] where
    /// they are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = lookup(POOL_SIZE_VAR) {
            config.size = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPoolSize {
                    var: POOL_SIZE_VAR,
                    value,
                })?;
        }
        if let Some(name) = lookup(POOL_NAME_VAR) {
            if name.trim().is_empty() {
                return Err(ConfigError::EmptyThreadName { var: POOL_NAME_VAR });
            }
            config.thread_name = name;
        }
        Ok(config)
    }

    pub fn with_size(mut self, size: NonZeroUsize) -> Self {
        self.size = size;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}
