//! Settle-once deferred values with chained continuations.
//!
//! A [`Deferred<T, E>`] stands for the eventual outcome of some asynchronous
//! work: a value of type `T` or a failure of type `E`. It starts out pending
//! and is settled exactly once through its [`Resolver`]. Continuations may be
//! attached before or after settlement; each one runs exactly once, in the
//! order they were attached.
//!
//! # Examples
//!
//! ```
//! use deferred::{Deferred, Inline};
//!
//! let result = Deferred::<i32, String>::new_on(&Inline, |resolver| {
//!     resolver.resolve(123);
//! })
//! .map(|v| v + 1)
//! .map(|v| format!("Result: {v}"));
//!
//! assert_eq!(result.wait(), Ok("Result: 124".to_string()));
//! ```
//!
//! Failures skip every success continuation and flow to the end of the chain
//! unchanged:
//!
//! ```
//! use deferred::Deferred;
//! use std::sync::{Arc, Mutex};
//!
//! let observed = Arc::new(Mutex::new(None));
//! let slot = observed.clone();
//! Deferred::<i32, &str>::rejected("boom")
//!     .map(|v| v * 2)
//!     .catch(move |e| *slot.lock().unwrap() = Some(*e));
//! assert_eq!(*observed.lock().unwrap(), Some("boom"));
//! ```
//!
//! A chain that never reaches a failure observer ([`Deferred::catch`], one of
//! the `*_or` combinators, [`Deferred::wait`] or `.await`) drops its failure
//! silently. This is not an error, but it is easy to miss.

mod chain;
mod config;
mod deferred;
mod error;
mod executor;
mod pool;
mod state;

pub use config::{PoolConfig, POOL_NAME_VAR, POOL_SIZE_VAR};
pub use deferred::{Deferred, Resolver};
pub use error::{ConfigError, PoolError};
pub use executor::{Executor, Inline, ThreadSpawner};
pub use pool::{global, ThreadPool};

/// A write-once settlement handle paired with the value it settles.
///
/// `resolve` and `reject` return nothing here; a settlement that loses to an
/// earlier one is silently ignored. [`Resolver`]'s inherent methods of the
/// same names return `bool` for callers that need to know whether they won.
pub trait Promise {
    type Output;
    type Error;
    type Waiter;
    /// Settle the paired waiter with a value.
    fn resolve(self, value: Self::Output);
    /// Settle the paired waiter with a failure.
    fn reject(self, err: Self::Error);
    /// Create a fresh, unsettled pair.
    fn new() -> (Self, Self::Waiter)
    where
        Self: Sized;
}
