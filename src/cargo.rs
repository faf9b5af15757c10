//! Batching queue.
//!
//! A [`Cargo`] hands pending payloads to its worker in batches of up to `payload`
//! items (or everything pending when no payload limit is set). Only one batch is in
//! flight at a time. The worker's result is broadcast to the callback of every task
//! in the batch.

use std::{cell::RefCell, collections::VecDeque, fmt, num::NonZeroUsize, rc::Rc};

use tracing::{debug, trace};

use crate::{
    error::QueueError,
    guard::{Done, OnlyOnce},
    queue::{Callback, Event, Hooks, Job},
    tick::Tick,
};

type Worker<T, R, E> = Box<dyn FnMut(Vec<T>, Done<R, E>)>;

struct State<T, R, E> {
    pending: VecDeque<Job<T, R, E>>,
    working: bool,
    drained: bool,
}

struct Inner<T, R, E> {
    tick: Tick,
    payload: Option<NonZeroUsize>,
    worker: RefCell<Worker<T, R, E>>,
    state: RefCell<State<T, R, E>>,
    hooks: Hooks,
}

impl<T, R, E> Inner<T, R, E>
where
    T: 'static,
    R: Clone + 'static,
    E: Clone + 'static,
{
    fn insert(self: &Rc<Self>, jobs: Vec<Job<T, R, E>>) {
        for job in jobs {
            let saturated = {
                let mut state = self.state.borrow_mut();
                state.pending.push_back(job);
                state.drained = false;
                self.payload
                    .is_some_and(|payload| state.pending.len() == payload.get())
            };
            if saturated {
                self.hooks.fire(Event::Saturated);
            }
        }
        self.schedule();
    }

    fn schedule(self: &Rc<Self>) {
        let inner = Rc::clone(self);
        self.tick.defer(move || inner.process());
    }

    fn process(self: &Rc<Self>) {
        let (jobs, emptied) = {
            let mut state = self.state.borrow_mut();
            if state.working {
                return;
            }
            if state.pending.is_empty() {
                let fire = !state.drained;
                state.drained = true;
                drop(state);
                if fire {
                    debug!("Cargo::process: drained");
                    self.hooks.fire(Event::Drain);
                }
                return;
            }
            let take = self
                .payload
                .map_or(state.pending.len(), |payload| payload.get())
                .min(state.pending.len());
            let jobs: Vec<_> = state.pending.drain(..take).collect();
            state.working = true;
            (jobs, state.pending.is_empty())
        };
        trace!(batch = jobs.len(), "Cargo::process: dispatching");
        if emptied {
            self.hooks.fire(Event::Empty);
        }

        let (payloads, callbacks): (Vec<T>, Vec<Option<Callback<R, E>>>) = jobs
            .into_iter()
            .map(|job| (job.payload, job.callback))
            .unzip();
        let inner = Rc::clone(self);
        let done = OnlyOnce::new(move |result: Result<R, E>| {
            inner.state.borrow_mut().working = false;
            for callback in callbacks.into_iter().flatten() {
                callback(result.clone());
            }
            inner.schedule();
        });
        (self.worker.borrow_mut())(payloads, done);
    }
}

/// A queue that delivers pending payloads to its worker in batches.
///
/// Every task of a batch receives a clone of the batch result, so `R` and `E` must
/// be `Clone`.
///
/// # Example
/// ```
/// # use std::{cell::RefCell, rc::Rc};
/// # use futures::executor::LocalPool;
/// # use cadence::{Cargo, Done, Tick};
/// let mut pool = LocalPool::new();
/// let tick = Tick::from(pool.spawner());
/// let batches = Rc::new(RefCell::new(Vec::new()));
/// let batches_cl = Rc::clone(&batches);
///
/// let cargo = Cargo::with_payload(
///     &tick,
///     move |items: Vec<u32>, done: Done<(), ()>| {
///         batches_cl.borrow_mut().push(items);
///         done.ok(());
///     },
///     2,
/// )
/// .unwrap();
/// cargo.push_all([1, 2, 3]);
///
/// pool.run_until_stalled();
/// assert_eq!(*batches.borrow(), vec![vec![1, 2], vec![3]]);
/// ```
pub struct Cargo<T, R = (), E = ()> {
    inner: Rc<Inner<T, R, E>>,
}

impl<T, R, E> Cargo<T, R, E>
where
    T: 'static,
    R: Clone + 'static,
    E: Clone + 'static,
{
    /// Creates a cargo that takes everything pending as one batch.
    pub fn new(tick: &Tick, worker: impl FnMut(Vec<T>, Done<R, E>) + 'static) -> Self {
        Self::build(tick, worker, None)
    }

    /// Creates a cargo whose batches hold at most `payload` tasks.
    ///
    /// # Errors
    ///
    /// `QueueError::InvalidPayload` if `payload` is zero.
    pub fn with_payload(
        tick: &Tick,
        worker: impl FnMut(Vec<T>, Done<R, E>) + 'static,
        payload: usize,
    ) -> Result<Self, QueueError> {
        let payload = NonZeroUsize::new(payload).ok_or(QueueError::InvalidPayload)?;
        Ok(Self::build(tick, worker, Some(payload)))
    }

    fn build(
        tick: &Tick,
        worker: impl FnMut(Vec<T>, Done<R, E>) + 'static,
        payload: Option<NonZeroUsize>,
    ) -> Self {
        debug!(?payload, "Cargo::new");
        Self {
            inner: Rc::new(Inner {
                tick: tick.clone(),
                payload,
                worker: RefCell::new(Box::new(worker)),
                state: RefCell::new(State {
                    pending: VecDeque::new(),
                    working: false,
                    drained: true,
                }),
                hooks: Hooks::default(),
            }),
        }
    }

    /// Appends a task without a completion callback.
    pub fn push(&self, payload: T) {
        self.inner.insert(vec![Job::new(payload, None)]);
    }

    /// Appends a task; `callback` receives the result of the batch it ends up in.
    pub fn push_with(&self, payload: T, callback: impl FnOnce(Result<R, E>) + 'static) {
        self.inner
            .insert(vec![Job::new(payload, Some(Box::new(callback)))]);
    }

    /// Appends several tasks.
    pub fn push_all(&self, payloads: impl IntoIterator<Item = T>) {
        self.inner.insert(Job::batch(payloads, None));
    }

    /// Appends several tasks; `callback` runs once for every one of them.
    pub fn push_all_with(
        &self,
        payloads: impl IntoIterator<Item = T>,
        callback: impl Fn(Result<R, E>) + 'static,
    ) {
        let callback: Rc<dyn Fn(Result<R, E>)> = Rc::new(callback);
        self.inner.insert(Job::batch(payloads, Some(callback)));
    }

    /// Number of tasks waiting for a batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.borrow().pending.len()
    }

    /// Returns `true` if no task is waiting for a batch.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.borrow().pending.is_empty()
    }

    /// Returns `true` while a batch is in flight.
    #[must_use]
    pub fn running(&self) -> bool {
        self.inner.state.borrow().working
    }

    /// Returns `true` once the drain notification for the current work was issued.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.inner.state.borrow().drained
    }

    /// Maximum batch size, or `None` when batches take everything pending.
    #[must_use]
    pub fn payload(&self) -> Option<usize> {
        self.inner.payload.map(NonZeroUsize::get)
    }

    /// Sets the hook fired when the pending count reaches the payload size.
    pub fn on_saturated(&self, hook: impl Fn() + 'static) {
        self.inner.hooks.set(Event::Saturated, hook);
    }

    /// Sets the hook fired when a batch takes the last pending task.
    pub fn on_empty(&self, hook: impl Fn() + 'static) {
        self.inner.hooks.set(Event::Empty, hook);
    }

    /// Sets the hook fired once nothing is pending and no batch is in flight.
    pub fn on_drain(&self, hook: impl Fn() + 'static) {
        self.inner.hooks.set(Event::Drain, hook);
    }
}

impl<T, R, E> Clone for Cargo<T, R, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, R, E> fmt::Debug for Cargo<T, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Cargo")
            .field("pending", &state.pending.len())
            .field("working", &state.working)
            .field("payload", &self.inner.payload)
            .finish()
    }
}
