//! Combinators that derive a new [`Deferred`] from the settlement of another.
//!
//! Every combinator subscribes to its parent and returns a child that starts
//! pending. A parent failure skips the success continuation and rejects the
//! child with the same failure, so failures travel down a chain untouched
//! until somebody observes them. Failure observers get `&E`: they can look,
//! but they cannot replace or recover the failure.

use crate::deferred::{Deferred, Resolver};

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn chain<U, S, F>(&self, on_success: S, on_failure: F) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        S: FnOnce(T, Resolver<U, E>) -> Result<(), E> + Send + 'static,
        F: FnOnce(&E) + Send + 'static,
    {
        let (resolver, child) = Deferred::pending();
        let on_error = resolver.clone();
        let forward = resolver.clone();
        self.on_settle(
            move |value| {
                if let Err(failure) = on_success(value, resolver) {
                    on_error.reject(failure);
                }
            },
            move |failure| {
                on_failure(&failure);
                forward.reject(failure);
            },
        );
        child
    }

    /// Transform the value with a continuation that may fail.
    ///
    /// `Ok` fulfills the returned value; `Err` rejects it.
    ///
    /// ```
    /// use deferred::Deferred;
    ///
    /// let parsed = Deferred::<&str, String>::fulfilled("12")
    ///     .then(|s| s.parse::<i32>().map_err(|e| e.to_string()));
    /// assert_eq!(parsed.peek(), Some(Ok(12)));
    /// ```
    pub fn then<U, S>(&self, on_success: S) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        S: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        self.then_or(on_success, |_| {})
    }

    /// [`Deferred::then`] that also hands a parent failure to `on_failure`.
    pub fn then_or<U, S, F>(&self, on_success: S, on_failure: F) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        S: FnOnce(T) -> Result<U, E> + Send + 'static,
        F: FnOnce(&E) + Send + 'static,
    {
        self.chain(
            move |value, resolver| {
                resolver.resolve(on_success(value)?);
                Ok(())
            },
            on_failure,
        )
    }

    /// Transform the value with a continuation that cannot fail.
    pub fn map<U, S>(&self, on_success: S) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        S: FnOnce(T) -> U + Send + 'static,
    {
        self.then(move |value| Ok(on_success(value)))
    }

    /// Look at the value without changing it; the returned value carries the
    /// same outcome as this one.
    pub fn inspect<S>(&self, on_success: S) -> Deferred<T, E>
    where
        S: FnOnce(&T) + Send + 'static,
    {
        self.inspect_or(on_success, |_| {})
    }

    /// [`Deferred::inspect`] that also hands a failure to `on_failure`.
    pub fn inspect_or<S, F>(&self, on_success: S, on_failure: F) -> Deferred<T, E>
    where
        S: FnOnce(&T) + Send + 'static,
        F: FnOnce(&E) + Send + 'static,
    {
        self.chain(
            move |value, resolver| {
                on_success(&value);
                resolver.resolve(value);
                Ok(())
            },
            on_failure,
        )
    }

    /// Continue with work that settles the returned value on its own terms.
    ///
    /// The continuation receives the value and a [`Resolver`] for the
    /// result. It may settle right away, or hand the resolver to another
    /// thread or to [`Executor::execute_after`](crate::Executor::execute_after)
    /// and settle later. Returning `Err` before the resolver has been used
    /// rejects the result. A resolver that is dropped unused leaves the
    /// result pending forever.
    ///
    /// ```
    /// use deferred::{Deferred, Executor, ThreadSpawner};
    /// use std::time::Duration;
    ///
    /// let later = Deferred::<i32, ()>::fulfilled(1).then_async(|v, resolver| {
    ///     ThreadSpawner.execute_after(Duration::from_millis(10), move || {
    ///         resolver.resolve(format!("Result: {v}"));
    ///     });
    ///     Ok(())
    /// });
    /// assert_eq!(
    ///     later.wait_timeout(Duration::from_secs(5)),
    ///     Some(Ok("Result: 1".to_string()))
    /// );
    /// ```
    pub fn then_async<U, S>(&self, on_success: S) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        S: FnOnce(T, Resolver<U, E>) -> Result<(), E> + Send + 'static,
    {
        self.chain(on_success, |_| {})
    }

    /// [`Deferred::then_async`] that also hands a parent failure to
    /// `on_failure`.
    pub fn then_async_or<U, S, F>(&self, on_success: S, on_failure: F) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        S: FnOnce(T, Resolver<U, E>) -> Result<(), E> + Send + 'static,
        F: FnOnce(&E) + Send + 'static,
    {
        self.chain(on_success, on_failure)
    }

    /// Observe a failure. A value passes through unchanged; a failure is
    /// handed to `on_failure` and then carried on as it was.
    pub fn catch<F>(&self, on_failure: F) -> Deferred<T, E>
    where
        F: FnOnce(&E) + Send + 'static,
    {
        self.chain(
            |value, resolver| {
                resolver.resolve(value);
                Ok(())
            },
            on_failure,
        )
    }
}
