//! The deferred value itself and the handle that settles it.
//!
//! A [`Deferred`] and all of its clones share one mutex-guarded [`State`].
//! Every transition happens under that lock, so of any number of racing
//! settlements exactly one wins. Callbacks never run while the lock is held.
//! Instead the winning settlement moves the value into a notifying phase and
//! then pops subscribers off its queue one at a time; anything subscribing
//! meanwhile, from a continuation or from another thread, joins the back of
//! that queue. Only once the queue is empty is the outcome published to late
//! subscribers, so notification order always matches registration order.
//!
//! A panicking continuation is caught and logged. It does not keep later
//! subscribers from being notified, and the panic does not propagate to
//! whoever settled or subscribed.

use std::{
    any::Any,
    fmt,
    future::Future,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
    time::Duration,
};

use tracing::{debug, error, trace};

use crate::{
    executor::Executor,
    pool,
    state::{State, Step, Subscriber},
    Promise,
};

type Slot<T, E> = Arc<(Mutex<Option<Result<T, E>>>, Condvar)>;

/// A value of type `T` or a failure of type `E` that may not be known yet.
///
/// Cloning a `Deferred` is cheap and yields another handle to the same
/// outcome. Settled outcomes are cloned out to every subscriber, so both `T`
/// and `E` must be `Clone`.
///
/// A failure that reaches the end of a chain without meeting an observer is
/// dropped without a trace. Terminate chains with [`Deferred::catch`], an
/// `*_or` combinator, [`Deferred::wait`] or `.await` when failures matter.
pub struct Deferred<T, E> {
    inner: Arc<Mutex<State<T, E>>>,
    // Index of this handle's waker while it is being awaited.
    waker_slot: Option<usize>,
}

/// Settles the [`Deferred`] it was created with.
///
/// Clones settle the same value; only the first settlement across all of
/// them takes effect. The inherent [`resolve`](Resolver::resolve) and
/// [`reject`](Resolver::reject) report whether the call was that first one;
/// the [`Promise`] trait versions discard the answer.
pub struct Resolver<T, E> {
    deferred: Deferred<T, E>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            waker_slot: None,
        }
    }
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            deferred: self.deferred.clone(),
        }
    }
}

// User code never runs under this lock, so a poisoned mutex still holds a
// consistent state.
fn lock<T, E>(inner: &Mutex<State<T, E>>) -> MutexGuard<'_, State<T, E>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T, E> Deferred<T, E> {
    fn with_state(state: State<T, E>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
            waker_slot: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T, E>> {
        lock(&self.inner)
    }

    /// Create an unsettled value along with the handle that settles it.
    pub fn pending() -> (Resolver<T, E>, Self) {
        let deferred = Self::with_state(State::pending());
        (
            Resolver {
                deferred: deferred.clone(),
            },
            deferred,
        )
    }

    /// Create a value that is already fulfilled.
    pub fn fulfilled(value: T) -> Self {
        Self::with_state(State::Fulfilled(value))
    }

    /// Create a value that is already rejected.
    pub fn rejected(failure: E) -> Self {
        Self::with_state(State::Rejected(failure))
    }

    /// Whether the outcome has been decided. Subscribers may still be in the
    /// middle of being notified.
    pub fn is_settled(&self) -> bool {
        self.lock().is_settled()
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Run `producer` on the process-wide [`ThreadPool`](crate::ThreadPool)
    /// and return a value it will settle through the given [`Resolver`].
    pub fn new<P>(producer: P) -> Self
    where
        P: FnOnce(Resolver<T, E>) + Send + 'static,
    {
        Self::new_on(pool::global(), producer)
    }

    /// Like [`Deferred::new`], but runs `producer` on `executor`.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred::{Deferred, ThreadSpawner};
    /// use std::time::Duration;
    ///
    /// let greeting = Deferred::<String, ()>::new_on(&ThreadSpawner, |resolver| {
    ///     resolver.resolve("hi".into());
    /// });
    /// assert_eq!(greeting.wait_timeout(Duration::from_secs(5)), Some(Ok("hi".to_string())));
    /// ```
    pub fn new_on<X, P>(executor: &X, producer: P) -> Self
    where
        X: Executor,
        P: FnOnce(Resolver<T, E>) + Send + 'static,
    {
        let (resolver, deferred) = Self::pending();
        executor.execute(move || producer(resolver));
        deferred
    }

    /// A clone of the outcome once decided, or `None` while pending.
    pub fn peek(&self) -> Option<Result<T, E>> {
        self.lock().outcome()
    }

    /// Block the calling thread until the value settles.
    ///
    /// The wait is itself a subscriber, so it only returns once every
    /// subscriber registered before it has been notified. Never call it from
    /// a continuation of the same value, nor from a job on an executor the
    /// chain still needs, or it can never return.
    pub fn wait(&self) -> Result<T, E> {
        let slot = self.slot();
        let (outcome, settled) = &*slot;
        let mut outcome = outcome.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(outcome) = outcome.take() {
                return outcome;
            }
            outcome = settled
                .wait(outcome)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// [`Deferred::wait`] giving up after `timeout`; `None` if the value did
    /// not settle in time.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, E>> {
        let slot = self.slot();
        let (outcome, settled) = &*slot;
        let outcome = outcome.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut outcome, _) = settled
            .wait_timeout_while(outcome, timeout, |outcome| outcome.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        outcome.take()
    }

    fn slot(&self) -> Slot<T, E> {
        let slot: Slot<T, E> = Arc::new((Mutex::new(None), Condvar::new()));
        let on_value = slot.clone();
        let on_failure = slot.clone();
        self.on_settle(
            move |value| fill(&on_value, Ok(value)),
            move |failure| fill(&on_failure, Err(failure)),
        );
        slot
    }

    /// Register a subscriber pair. Until the outcome is published the pair is
    /// queued behind every earlier one; afterwards the matching callback runs
    /// right away on the calling thread.
    pub(crate) fn on_settle<S, F>(&self, on_success: S, on_failure: F)
    where
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(E) + Send + 'static,
    {
        let (subscriber, outcome) = {
            let mut state = self.lock();
            match state.subscribe(Subscriber::new(on_success, on_failure)) {
                None => {
                    trace!(target: "deferred", queued = state.queued(), "subscriber queued");
                    return;
                }
                Some(subscriber) => (subscriber, state.published()),
            }
        };
        if let Some(outcome) = outcome {
            trace!(target: "deferred", fulfilled = outcome.is_ok(), "late subscriber notified");
            notify(subscriber, outcome);
        }
    }

    fn settle(&self, outcome: Result<T, E>) -> bool {
        let fulfilled = outcome.is_ok();
        {
            let mut state = self.lock();
            if !state.begin_settle(outcome) {
                debug!(target: "deferred", "already settled; ignoring settlement");
                return false;
            }
            debug!(target: "deferred", fulfilled, subscribers = state.queued(), "settled");
        }
        loop {
            let step = self.lock().next_step();
            match step {
                Some(Step::Notify(subscriber, outcome)) => notify(subscriber, outcome),
                Some(Step::Published(wakers)) => {
                    for waker in wakers {
                        waker.wake();
                    }
                    break;
                }
                None => break,
            }
        }
        true
    }
}

fn notify<T, E>(subscriber: Subscriber<T, E>, outcome: Result<T, E>) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| subscriber.notify(outcome))) {
        error!(
            target: "deferred",
            panic = panic_message(&*payload),
            "continuation panicked; notifying the rest"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

fn fill<T>(slot: &(Mutex<Option<T>>, Condvar), value: T) {
    let (outcome, settled) = slot;
    *outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    settled.notify_all();
}

impl<T, E> Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Fulfill with `value`. Returns `false` if the value was already
    /// settled, in which case nothing changes.
    pub fn resolve(self, value: T) -> bool {
        self.deferred.settle(Ok(value))
    }

    /// Reject with `failure`. Returns `false` if the value was already
    /// settled, in which case nothing changes.
    pub fn reject(self, failure: E) -> bool {
        self.deferred.settle(Err(failure))
    }

    /// Settle with either outcome.
    pub fn settle(self, outcome: Result<T, E>) -> bool {
        self.deferred.settle(outcome)
    }
}

impl<T, E> Promise for Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = T;
    type Error = E;
    type Waiter = Deferred<T, E>;

    fn resolve(self, value: T) {
        self.deferred.settle(Ok(value));
    }

    fn reject(self, err: E) {
        self.deferred.settle(Err(err));
    }

    fn new() -> (Self, Self::Waiter) {
        Deferred::pending()
    }
}

impl<T, E> From<Result<T, E>> for Deferred<T, E> {
    fn from(outcome: Result<T, E>) -> Self {
        match outcome {
            Ok(value) => Self::fulfilled(value),
            Err(failure) => Self::rejected(failure),
        }
    }
}

impl<T: Clone, E: Clone> Future for Deferred<T, E> {
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let mut state = lock(&this.inner);
        if let Some(outcome) = state.published() {
            return Poll::Ready(outcome);
        }
        if let Some(wakers) = state.wakers_mut() {
            match this.waker_slot {
                Some(slot) if slot < wakers.len() => {
                    if !wakers[slot].will_wake(cx.waker()) {
                        wakers[slot] = cx.waker().clone();
                    }
                }
                _ => {
                    this.waker_slot = Some(wakers.len());
                    wakers.push(cx.waker().clone());
                }
            }
        }
        Poll::Pending
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Deferred({:?})", *self.lock())
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resolver({:?})", *self.deferred.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::Deferred;
    use crate::Promise;
    use futures::{executor::block_on, task::ArcWake};
    use std::{
        future::Future,
        pin::Pin,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc, Barrier, Mutex,
        },
        task::{Context, Poll},
        thread,
        time::Duration,
    };

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        (count.clone(), count)
    }

    #[test]
    fn test_second_settlement_is_ignored() {
        let (resolver, deferred) = Deferred::<i32, String>::pending();
        let (calls, c_calls) = counter();
        deferred.on_settle(
            move |v| {
                assert_eq!(v, 1);
                c_calls.fetch_add(1, Ordering::SeqCst);
            },
            |_| panic!("rejected"),
        );
        assert!(resolver.clone().resolve(1));
        assert!(!resolver.clone().resolve(2));
        assert!(!resolver.reject("late".into()));
        assert_eq!(deferred.peek(), Some(Ok(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribers_before_and_after_settlement() {
        let (resolver, deferred) = Deferred::<(), &str>::pending();
        let (failures, c_failures) = counter();
        let subscribe = |n: usize| {
            for _ in 0..n {
                let c_failures = c_failures.clone();
                deferred.on_settle(
                    |_| panic!("fulfilled"),
                    move |e| {
                        assert_eq!(e, "boom");
                        c_failures.fetch_add(1, Ordering::SeqCst);
                    },
                );
            }
        };
        subscribe(4);
        assert_eq!(failures.load(Ordering::SeqCst), 0);
        resolver.reject("boom");
        assert_eq!(failures.load(Ordering::SeqCst), 4);
        subscribe(3);
        assert_eq!(failures.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_notification_order() {
        let (resolver, deferred) = Deferred::<&str, ()>::pending();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in ["s1", "s2", "s3"] {
            let seen = seen.clone();
            deferred.on_settle(move |v| seen.lock().unwrap().push((name, v)), |_| {});
        }
        resolver.resolve("go");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("s1", "go"), ("s2", "go"), ("s3", "go")]
        );
    }

    #[test]
    fn test_subscriber_added_during_notification_runs_last() {
        let (resolver, deferred) = Deferred::<i32, ()>::pending();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = |name: &'static str| {
            let seen = seen.clone();
            move |_: i32| seen.lock().unwrap().push(name)
        };
        let again = deferred.clone();
        let s1 = record("s1");
        let s3 = record("s3");
        deferred.on_settle(
            move |v| {
                s1(v);
                again.on_settle(s3, |_| {});
            },
            |_| {},
        );
        deferred.on_settle(record("s2"), |_| {});
        resolver.resolve(1);
        assert_eq!(*seen.lock().unwrap(), vec!["s1", "s2", "s3"]);
    }

    #[test]
    fn test_panicking_subscriber_does_not_stop_the_rest() {
        let (resolver, deferred) = Deferred::<i32, ()>::pending();
        let (calls, c_calls) = counter();
        deferred.on_settle(|_| panic!("first subscriber blew up"), |_| {});
        let c_before = c_calls.clone();
        deferred.on_settle(
            move |_| {
                c_before.fetch_add(1, Ordering::SeqCst);
            },
            |_| {},
        );
        assert!(resolver.resolve(3));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(deferred.peek(), Some(Ok(3)));

        deferred.on_settle(
            |_| std::panic::panic_any(String::from("late subscriber blew up")),
            |_| {},
        );
        deferred.on_settle(
            move |_| {
                c_calls.fetch_add(1, Ordering::SeqCst);
            },
            |_| {},
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callback_may_resubscribe_without_deadlock() {
        let (resolver, deferred) = Deferred::<i32, ()>::pending();
        let (calls, c_calls) = counter();
        let again = deferred.clone();
        deferred.on_settle(
            move |v| {
                let c_calls = c_calls.clone();
                again.on_settle(
                    move |w| {
                        assert_eq!(v, w);
                        c_calls.fetch_add(1, Ordering::SeqCst);
                    },
                    |_| {},
                );
            },
            |_| {},
        );
        resolver.resolve(5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_racing_settlements_have_one_winner() {
        const RACERS: usize = 16;
        let (resolver, deferred) = Deferred::<usize, usize>::pending();
        let barrier = Arc::new(Barrier::new(RACERS));
        let (notified, c_notified) = counter();
        let c_fail = c_notified.clone();
        deferred.on_settle(
            move |_| {
                c_notified.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                c_fail.fetch_add(1, Ordering::SeqCst);
            },
        );
        let racers: Vec<_> = (0..RACERS)
            .map(|id| {
                let resolver = resolver.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    if id % 2 == 0 {
                        resolver.resolve(id)
                    } else {
                        resolver.reject(id)
                    }
                })
            })
            .collect();
        let winners = racers
            .into_iter()
            .map(|racer| racer.join().expect("The racer thread has panicked"))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert!(deferred.is_settled());
    }

    #[test]
    fn test_wait_across_threads() {
        let (resolver, deferred) = Deferred::<String, ()>::pending();
        let task = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(20));
            resolver.resolve(String::from("🍓"));
        });
        assert_eq!(
            deferred.wait_timeout(Duration::from_secs(5)),
            Some(Ok(String::from("🍓")))
        );
        task.join().expect("The task thread has panicked");
    }

    #[test]
    fn test_wait_timeout_gives_up_while_pending() {
        let (resolver, deferred) = Deferred::<u8, ()>::pending();
        assert_eq!(deferred.wait_timeout(Duration::from_millis(20)), None);
        resolver.resolve(1);
        assert_eq!(deferred.wait_timeout(Duration::from_millis(20)), Some(Ok(1)));
    }

    struct Flag(AtomicBool);

    impl ArcWake for Flag {
        fn wake_by_ref(arc_self: &Arc<Self>) {
            arc_self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_repolling_replaces_the_stale_waker() {
        let (resolver, mut deferred) = Deferred::<i32, ()>::pending();
        let flags: Vec<_> = (0..3).map(|_| Arc::new(Flag(AtomicBool::new(false)))).collect();
        let poll_with = |deferred: &mut Deferred<i32, ()>, flag: &Arc<Flag>| {
            let waker = futures::task::waker(flag.clone());
            Pin::new(deferred).poll(&mut Context::from_waker(&waker))
        };
        let waker_count = |deferred: &Deferred<i32, ()>| deferred.lock().wakers_mut().map(|w| w.len());

        assert_eq!(poll_with(&mut deferred, &flags[0]), Poll::Pending);
        assert_eq!(poll_with(&mut deferred, &flags[1]), Poll::Pending);
        assert_eq!(poll_with(&mut deferred, &flags[1]), Poll::Pending);
        assert_eq!(waker_count(&deferred), Some(1));

        let mut other = deferred.clone();
        assert_eq!(poll_with(&mut other, &flags[2]), Poll::Pending);
        assert_eq!(waker_count(&deferred), Some(2));

        resolver.resolve(9);
        let woken: Vec<_> = flags.iter().map(|flag| flag.0.load(Ordering::SeqCst)).collect();
        assert_eq!(woken, vec![false, true, true]);
        assert_eq!(poll_with(&mut deferred, &flags[0]), Poll::Ready(Ok(9)));
    }

    #[test]
    fn test_await_deferred() {
        let (promise, waiter) = <super::Resolver<String, String> as Promise>::new();
        let waiter2 = waiter.clone();
        let task1 = thread::spawn(move || block_on(waiter));
        let task2 = thread::spawn(move || block_on(waiter2));
        Promise::reject(promise, String::from("reject!!"));
        assert_eq!(task1.join().expect("The task1 thread has panicked"), Err("reject!!".into()));
        assert_eq!(task2.join().expect("The task2 thread has panicked"), Err("reject!!".into()));
    }

    #[test]
    fn test_from_result() {
        let deferred: Deferred<i32, &str> = Err("nope").into();
        assert_eq!(deferred.peek(), Some(Err("nope")));
        assert_eq!(format!("{deferred:?}"), "Deferred(Rejected(\"nope\"))");
    }
}
