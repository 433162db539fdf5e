use std::{collections::VecDeque, fmt, mem, task::Waker};

pub(crate) type OnSuccess<T> = Box<dyn FnOnce(T) + Send>;
pub(crate) type OnFailure<E> = Box<dyn FnOnce(E) + Send>;

/// One registered (on-success, on-failure) pair. Exactly one half is ever
/// called.
pub(crate) struct Subscriber<T, E> {
    on_success: OnSuccess<T>,
    on_failure: OnFailure<E>,
}

impl<T, E> Subscriber<T, E> {
    pub(crate) fn new<S, F>(on_success: S, on_failure: F) -> Self
    where
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(E) + Send + 'static,
    {
        Self {
            on_success: Box::new(on_success),
            on_failure: Box::new(on_failure),
        }
    }

    pub(crate) fn notify(self, outcome: Result<T, E>) {
        match outcome {
            Ok(value) => (self.on_success)(value),
            Err(failure) => (self.on_failure)(failure),
        }
    }
}

/// Settlement state of a deferred value.
///
/// `Pending -> Notifying -> Fulfilled | Rejected`, each step taken at most
/// once. While `Notifying` the outcome is decided but subscribers are still
/// being called one at a time; new subscribers join the back of the queue,
/// so everyone is notified in registration order.
pub(crate) enum State<T, E> {
    Pending {
        subscribers: Vec<Subscriber<T, E>>,
        wakers: Vec<Waker>,
    },
    Notifying {
        outcome: Result<T, E>,
        queue: VecDeque<Subscriber<T, E>>,
        wakers: Vec<Waker>,
    },
    Fulfilled(T),
    Rejected(E),
}

/// Next thing the settling thread has to do.
pub(crate) enum Step<T, E> {
    Notify(Subscriber<T, E>, Result<T, E>),
    Published(Vec<Waker>),
}

impl<T, E> State<T, E> {
    pub(crate) fn pending() -> Self {
        State::Pending {
            subscribers: Vec::new(),
            wakers: Vec::new(),
        }
    }

    /// Whether the outcome has been decided.
    pub(crate) fn is_settled(&self) -> bool {
        !matches!(self, State::Pending { .. })
    }

    /// Decide the outcome. Returns `false` and leaves the state alone if it
    /// was already decided.
    pub(crate) fn begin_settle(&mut self, outcome: Result<T, E>) -> bool {
        let State::Pending {
            subscribers,
            wakers,
        } = self
        else {
            return false;
        };
        let queue = mem::take(subscribers).into();
        let wakers = mem::take(wakers);
        *self = State::Notifying {
            outcome,
            queue,
            wakers,
        };
        true
    }

    /// Queue `subscriber` if its turn has not come yet, otherwise give it
    /// back for immediate notification.
    pub(crate) fn subscribe(&mut self, subscriber: Subscriber<T, E>) -> Option<Subscriber<T, E>> {
        match self {
            State::Pending { subscribers, .. } => subscribers.push(subscriber),
            State::Notifying { queue, .. } => queue.push_back(subscriber),
            State::Fulfilled(_) | State::Rejected(_) => return Some(subscriber),
        }
        None
    }

    /// Wakers of `.await`ing tasks, while the outcome is not published yet.
    pub(crate) fn wakers_mut(&mut self) -> Option<&mut Vec<Waker>> {
        match self {
            State::Pending { wakers, .. } | State::Notifying { wakers, .. } => Some(wakers),
            State::Fulfilled(_) | State::Rejected(_) => None,
        }
    }

    pub(crate) fn queued(&self) -> usize {
        match self {
            State::Pending { subscribers, .. } => subscribers.len(),
            State::Notifying { queue, .. } => queue.len(),
            State::Fulfilled(_) | State::Rejected(_) => 0,
        }
    }
}

impl<T: Clone, E: Clone> State<T, E> {
    /// Hand out the next queued subscriber, or publish the terminal state
    /// once the queue is empty. `None` outside the notifying phase.
    pub(crate) fn next_step(&mut self) -> Option<Step<T, E>> {
        match self {
            State::Notifying { outcome, queue, .. } => {
                if let Some(subscriber) = queue.pop_front() {
                    return Some(Step::Notify(subscriber, outcome.clone()));
                }
            }
            _ => return None,
        }
        match mem::replace(self, State::pending()) {
            State::Notifying {
                outcome, wakers, ..
            } => {
                *self = match outcome {
                    Ok(value) => State::Fulfilled(value),
                    Err(failure) => State::Rejected(failure),
                };
                Some(Step::Published(wakers))
            }
            other => {
                *self = other;
                None
            }
        }
    }

    /// The decided outcome, including one still being delivered.
    pub(crate) fn outcome(&self) -> Option<Result<T, E>> {
        match self {
            State::Pending { .. } => None,
            State::Notifying { outcome, .. } => Some(outcome.clone()),
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(failure) => Some(Err(failure.clone())),
        }
    }

    /// The outcome, only once every queued subscriber has been notified.
    pub(crate) fn published(&self) -> Option<Result<T, E>> {
        match self {
            State::Pending { .. } | State::Notifying { .. } => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(failure) => Some(Err(failure.clone())),
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for State<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Pending { subscribers, .. } => {
                write!(f, "Pending({} subscribers)", subscribers.len())
            }
            State::Notifying { outcome, queue, .. } => {
                write!(f, "Notifying({outcome:?}, {} queued)", queue.len())
            }
            State::Fulfilled(value) => write!(f, "Fulfilled({value:?})"),
            State::Rejected(failure) => write!(f, "Rejected({failure:?})"),
        }
    }
}
