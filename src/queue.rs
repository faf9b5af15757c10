//! Concurrency-bounded task queues.
//!
//! A [`Queue`] owns a worker function and a list of pending tasks. Pushing a task
//! schedules a dispatch turn on the [`Tick`]; each turn hands pending tasks to the
//! worker until `concurrency` workers are in flight. When a worker calls its
//! [`Done`] callback, the task's own callback receives the result and the next
//! dispatch turn is scheduled.
//!
//! [`PriorityQueue`] shares the same engine but keeps pending tasks sorted by
//! [`Priority`], breaking ties by insertion order.
//!
//! Both queues expose three lifecycle hooks:
//! - `saturated` fires when an insertion makes the pending count equal to the
//!   concurrency limit.
//! - `empty` fires when a dispatch takes the last pending task, before that task's
//!   worker runs.
//! - `drain` fires when the last in-flight worker completes and nothing is pending.

use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt,
    num::NonZeroUsize,
    rc::Rc,
};

use tracing::{debug, trace};

use crate::{
    Priority,
    error::QueueError,
    guard::{Done, OnlyOnce},
    tick::Tick,
};

pub(crate) type Callback<R, E> = Box<dyn FnOnce(Result<R, E>)>;
type Worker<T, R, E> = Box<dyn FnMut(T, Done<R, E>)>;
type Hook = Rc<dyn Fn()>;

/// One payload plus the callback registered for it.
pub(crate) struct Job<T, R, E> {
    pub(crate) payload: T,
    pub(crate) callback: Option<Callback<R, E>>,
}

impl<T, R: 'static, E: 'static> Job<T, R, E> {
    pub(crate) fn new(payload: T, callback: Option<Callback<R, E>>) -> Self {
        Self { payload, callback }
    }

    // Every job of an array insertion gets its own call of the shared callback.
    pub(crate) fn batch(
        payloads: impl IntoIterator<Item = T>,
        callback: Option<Rc<dyn Fn(Result<R, E>)>>,
    ) -> Vec<Self> {
        payloads
            .into_iter()
            .map(|payload| {
                let callback = callback.as_ref().map(|cb| {
                    let cb = Rc::clone(cb);
                    Box::new(move |result| cb(result)) as Callback<R, E>
                });
                Self::new(payload, callback)
            })
            .collect()
    }
}

/// Lifecycle notifications a queue emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Event {
    Saturated,
    Empty,
    Drain,
}

#[derive(Default)]
pub(crate) struct Hooks {
    saturated: RefCell<Option<Hook>>,
    empty: RefCell<Option<Hook>>,
    drain: RefCell<Option<Hook>>,
}

impl Hooks {
    fn slot(&self, event: Event) -> &RefCell<Option<Hook>> {
        match event {
            Event::Saturated => &self.saturated,
            Event::Empty => &self.empty,
            Event::Drain => &self.drain,
        }
    }

    pub(crate) fn set(&self, event: Event, hook: impl Fn() + 'static) {
        *self.slot(event).borrow_mut() = Some(Rc::new(hook));
    }

    pub(crate) fn clear(&self, event: Event) {
        self.slot(event).borrow_mut().take();
    }

    // The hook is cloned out first so it may replace itself while running.
    pub(crate) fn fire(&self, event: Event) {
        let hook = self.slot(event).borrow().clone();
        if let Some(hook) = hook {
            trace!(?event, "Hooks::fire");
            hook();
        }
    }
}

/// Ordering policy for the pending list.
pub(crate) trait Pending<T, R, E> {
    fn len(&self) -> usize;
    fn next(&mut self) -> Option<Job<T, R, E>>;
    fn clear(&mut self);
}

/// First in, first out, with front insertion for `unshift`.
pub(crate) struct Fifo<T, R, E>(VecDeque<Job<T, R, E>>);

impl<T, R, E> Default for Fifo<T, R, E> {
    fn default() -> Self {
        Self(VecDeque::new())
    }
}

impl<T, R, E> Pending<T, R, E> for Fifo<T, R, E> {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn next(&mut self) -> Option<Job<T, R, E>> {
        self.0.pop_front()
    }

    fn clear(&mut self) {
        self.0.clear();
    }
}

/// Ascending by priority; equal priorities keep insertion order.
pub(crate) struct ByPriority<T, R, E>(VecDeque<(Priority, Job<T, R, E>)>);

impl<T, R, E> Default for ByPriority<T, R, E> {
    fn default() -> Self {
        Self(VecDeque::new())
    }
}

impl<T, R, E> ByPriority<T, R, E> {
    // Binary search for the slot right after the last entry with priority <= `priority`.
    fn insert(&mut self, priority: Priority, job: Job<T, R, E>) {
        let at = self.0.partition_point(|(p, _)| *p <= priority);
        self.0.insert(at, (priority, job));
    }
}

impl<T, R, E> Pending<T, R, E> for ByPriority<T, R, E> {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn next(&mut self) -> Option<Job<T, R, E>> {
        self.0.pop_front().map(|(_, job)| job)
    }

    fn clear(&mut self) {
        self.0.clear();
    }
}

struct State<P> {
    pending: P,
    concurrency: usize,
    running: usize,
    paused: bool,
    started: bool,
}

fn checked(concurrency: usize) -> Result<NonZeroUsize, QueueError> {
    NonZeroUsize::new(concurrency).ok_or(QueueError::InvalidConcurrency(concurrency))
}

/// The scheduling engine shared by [`Queue`] and [`PriorityQueue`].
pub(crate) struct Core<T, R, E, P> {
    tick: Tick,
    worker: RefCell<Worker<T, R, E>>,
    state: RefCell<State<P>>,
    hooks: Hooks,
}

impl<T, R, E, P> Core<T, R, E, P>
where
    T: 'static,
    R: 'static,
    E: 'static,
    P: Pending<T, R, E> + Default + 'static,
{
    fn new(
        tick: &Tick,
        worker: impl FnMut(T, Done<R, E>) + 'static,
        concurrency: NonZeroUsize,
    ) -> Rc<Self> {
        let concurrency = concurrency.get();
        debug!(concurrency, "Queue::new");
        Rc::new(Self {
            tick: tick.clone(),
            worker: RefCell::new(Box::new(worker)),
            state: RefCell::new(State {
                pending: P::default(),
                concurrency,
                running: 0,
                paused: false,
                started: false,
            }),
            hooks: Hooks::default(),
        })
    }

    fn insert<X>(self: &Rc<Self>, items: Vec<X>, place: impl Fn(&mut P, X)) {
        self.state.borrow_mut().started = true;

        if items.is_empty() {
            // A no-op insertion into an idle queue still completes with a drain.
            if self.is_idle() {
                let core = Rc::clone(self);
                self.tick.defer(move || {
                    if core.is_idle() {
                        core.hooks.fire(Event::Drain);
                    }
                });
            }
            return;
        }

        for item in items {
            let saturated = {
                let mut state = self.state.borrow_mut();
                place(&mut state.pending, item);
                state.pending.len() == state.concurrency
            };
            if saturated {
                self.hooks.fire(Event::Saturated);
            }
            self.schedule();
        }
    }

    fn schedule(self: &Rc<Self>) {
        let core = Rc::clone(self);
        self.tick.defer(move || core.process());
    }

    fn process(self: &Rc<Self>) {
        loop {
            let (job, emptied) = {
                let mut state = self.state.borrow_mut();
                if state.paused || state.running >= state.concurrency {
                    return;
                }
                let Some(job) = state.pending.next() else {
                    return;
                };
                state.running += 1;
                trace!(
                    running = state.running,
                    pending = state.pending.len(),
                    "Queue::process: dispatching"
                );
                (job, state.pending.len() == 0)
            };
            if emptied {
                self.hooks.fire(Event::Empty);
            }

            let Job { payload, callback } = job;
            let core = Rc::clone(self);
            let done = OnlyOnce::new(move |result| core.complete(callback, result));
            (self.worker.borrow_mut())(payload, done);
        }
    }

    fn complete(self: &Rc<Self>, callback: Option<Callback<R, E>>, result: Result<R, E>) {
        self.state.borrow_mut().running -= 1;
        if let Some(callback) = callback {
            callback(result);
        }
        if self.is_idle() {
            debug!("Queue::complete: drained");
            self.hooks.fire(Event::Drain);
        }
        self.schedule();
    }

    fn len(&self) -> usize {
        self.state.borrow().pending.len()
    }

    fn running(&self) -> usize {
        self.state.borrow().running
    }

    fn is_idle(&self) -> bool {
        let state = self.state.borrow();
        state.pending.len() + state.running == 0
    }

    fn is_paused(&self) -> bool {
        self.state.borrow().paused
    }

    fn is_started(&self) -> bool {
        self.state.borrow().started
    }

    fn concurrency(&self) -> usize {
        self.state.borrow().concurrency
    }

    fn set_concurrency(&self, concurrency: usize) -> Result<(), QueueError> {
        let concurrency = checked(concurrency)?;
        self.state.borrow_mut().concurrency = concurrency.get();
        Ok(())
    }

    fn pause(&self) {
        let mut state = self.state.borrow_mut();
        if !state.paused {
            debug!(pending = state.pending.len(), "Queue::pause");
            state.paused = true;
        }
    }

    fn resume(self: &Rc<Self>) {
        let slots = {
            let mut state = self.state.borrow_mut();
            if !state.paused {
                return;
            }
            state.paused = false;
            state.concurrency.min(state.pending.len())
        };
        debug!(slots, "Queue::resume");
        // One turn per slot that can proceed, so the pause does not serialize dispatch.
        for _ in 0..slots {
            self.schedule();
        }
    }

    fn kill(&self) {
        let dropped = {
            let mut state = self.state.borrow_mut();
            let dropped = state.pending.len();
            state.pending.clear();
            dropped
        };
        debug!(dropped, "Queue::kill");
        self.hooks.clear(Event::Drain);
    }
}

// Introspection, hooks and flow control shared by both queue flavours.
macro_rules! queue_controls {
    ($queue:ident) => {
        impl<T: 'static, R: 'static, E: 'static> $queue<T, R, E> {
            /// Number of tasks waiting to be dispatched.
            #[must_use]
            pub fn len(&self) -> usize {
                self.core.len()
            }

            /// Returns `true` if no task is waiting to be dispatched.
            ///
            /// Workers may still be in flight; see [`is_idle`](Self::is_idle).
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.core.len() == 0
            }

            /// Number of workers currently in flight.
            #[must_use]
            pub fn running(&self) -> usize {
                self.core.running()
            }

            /// Returns `true` if nothing is pending and no worker is in flight.
            #[must_use]
            pub fn is_idle(&self) -> bool {
                self.core.is_idle()
            }

            /// Returns `true` while the queue is paused.
            #[must_use]
            pub fn is_paused(&self) -> bool {
                self.core.is_paused()
            }

            /// Returns `true` once anything, even an empty batch, has been inserted.
            #[must_use]
            pub fn is_started(&self) -> bool {
                self.core.is_started()
            }

            /// Maximum number of workers in flight.
            #[must_use]
            pub fn concurrency(&self) -> usize {
                self.core.concurrency()
            }

            /// Changes the concurrency limit.
            ///
            /// Takes effect on the next dispatch turn; workers already in flight are
            /// not affected.
            ///
            /// # Errors
            ///
            /// `QueueError::InvalidConcurrency` if `concurrency` is zero.
            pub fn set_concurrency(&self, concurrency: usize) -> Result<(), QueueError> {
                self.core.set_concurrency(concurrency)
            }

            /// Stops dispatching new tasks. Workers in flight run to completion.
            pub fn pause(&self) {
                self.core.pause();
            }

            /// Resumes dispatching with full concurrency.
            pub fn resume(&self) {
                self.core.resume();
            }

            /// Drops every pending task and disables the `drain` hook.
            ///
            /// Workers in flight are not interrupted; their callbacks still run.
            pub fn kill(&self) {
                self.core.kill();
            }

            /// Sets the hook fired when the pending count reaches the concurrency limit.
            pub fn on_saturated(&self, hook: impl Fn() + 'static) {
                self.core.hooks.set(Event::Saturated, hook);
            }

            /// Sets the hook fired when the last pending task is handed to a worker.
            pub fn on_empty(&self, hook: impl Fn() + 'static) {
                self.core.hooks.set(Event::Empty, hook);
            }

            /// Sets the hook fired when the last in-flight worker completes.
            pub fn on_drain(&self, hook: impl Fn() + 'static) {
                self.core.hooks.set(Event::Drain, hook);
            }
        }

        impl<T, R, E> Clone for $queue<T, R, E> {
            fn clone(&self) -> Self {
                Self {
                    core: Rc::clone(&self.core),
                }
            }
        }

        impl<T, R, E> fmt::Debug for $queue<T, R, E> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let state = self.core.state.borrow();
                f.debug_struct(stringify!($queue))
                    .field("pending", &state.pending.len())
                    .field("running", &state.running)
                    .field("concurrency", &state.concurrency)
                    .field("paused", &state.paused)
                    .finish()
            }
        }
    };
}

/// A worker pool that processes pushed payloads with bounded concurrency.
///
/// The queue is a cheap handle; clones refer to the same pending list and workers.
///
/// # Example
/// ```
/// # use std::{cell::RefCell, rc::Rc};
/// # use futures::executor::LocalPool;
/// # use cadence::{Queue, Tick};
/// let mut pool = LocalPool::new();
/// let tick = Tick::from(pool.spawner());
/// let seen = Rc::new(RefCell::new(Vec::new()));
///
/// let queue = Queue::with_concurrency(&tick, |n: u32, done| done.ok(n * 2), 2).unwrap();
/// for n in 1..=3 {
///     let seen = Rc::clone(&seen);
///     queue.push_with(n, move |result: Result<u32, ()>| seen.borrow_mut().push(result));
/// }
///
/// pool.run_until_stalled();
/// assert_eq!(*seen.borrow(), vec![Ok(2), Ok(4), Ok(6)]);
/// assert!(queue.is_idle());
/// ```
pub struct Queue<T, R = (), E = ()> {
    core: Rc<Core<T, R, E, Fifo<T, R, E>>>,
}

impl<T: 'static, R: 'static, E: 'static> Queue<T, R, E> {
    /// Creates a queue that runs one worker at a time.
    pub fn new(tick: &Tick, worker: impl FnMut(T, Done<R, E>) + 'static) -> Self {
        Self {
            core: Core::new(tick, worker, NonZeroUsize::MIN),
        }
    }

    /// Creates a queue that keeps up to `concurrency` workers in flight.
    ///
    /// # Errors
    ///
    /// `QueueError::InvalidConcurrency` if `concurrency` is zero.
    pub fn with_concurrency(
        tick: &Tick,
        worker: impl FnMut(T, Done<R, E>) + 'static,
        concurrency: usize,
    ) -> Result<Self, QueueError> {
        Ok(Self {
            core: Core::new(tick, worker, checked(concurrency)?),
        })
    }

    /// Appends a task without a completion callback.
    pub fn push(&self, payload: T) {
        self.core.insert(vec![Job::new(payload, None)], push_back);
    }

    /// Appends a task whose result is passed to `callback`.
    pub fn push_with(&self, payload: T, callback: impl FnOnce(Result<R, E>) + 'static) {
        self.core
            .insert(vec![Job::new(payload, Some(Box::new(callback)))], push_back);
    }

    /// Appends several tasks.
    ///
    /// Pushing an empty batch onto an idle queue fires `drain` on the next turn.
    pub fn push_all(&self, payloads: impl IntoIterator<Item = T>) {
        self.core.insert(Job::batch(payloads, None), push_back);
    }

    /// Appends several tasks; `callback` runs once for every one of them.
    pub fn push_all_with(
        &self,
        payloads: impl IntoIterator<Item = T>,
        callback: impl Fn(Result<R, E>) + 'static,
    ) {
        let callback: Rc<dyn Fn(Result<R, E>)> = Rc::new(callback);
        self.core.insert(Job::batch(payloads, Some(callback)), push_back);
    }

    /// Inserts a task at the front of the pending list.
    pub fn unshift(&self, payload: T) {
        self.core.insert(vec![Job::new(payload, None)], push_front);
    }

    /// Inserts a task at the front of the pending list with a completion callback.
    pub fn unshift_with(&self, payload: T, callback: impl FnOnce(Result<R, E>) + 'static) {
        self.core
            .insert(vec![Job::new(payload, Some(Box::new(callback)))], push_front);
    }

    /// Inserts several tasks at the front, each in front of the previous one.
    pub fn unshift_all(&self, payloads: impl IntoIterator<Item = T>) {
        self.core.insert(Job::batch(payloads, None), push_front);
    }

    /// Like [`unshift_all`](Self::unshift_all) with a callback for every task.
    pub fn unshift_all_with(
        &self,
        payloads: impl IntoIterator<Item = T>,
        callback: impl Fn(Result<R, E>) + 'static,
    ) {
        let callback: Rc<dyn Fn(Result<R, E>)> = Rc::new(callback);
        self.core.insert(Job::batch(payloads, Some(callback)), push_front);
    }
}

fn push_back<T, R, E>(pending: &mut Fifo<T, R, E>, job: Job<T, R, E>) {
    pending.0.push_back(job);
}

fn push_front<T, R, E>(pending: &mut Fifo<T, R, E>, job: Job<T, R, E>) {
    pending.0.push_front(job);
}

queue_controls!(Queue);

/// A [`Queue`] whose pending tasks are served in ascending [`Priority`] order.
///
/// Tasks pushed with equal priority are served in push order. There is no
/// `unshift`: front insertion has no meaning once tasks are ordered by priority.
pub struct PriorityQueue<T, R = (), E = ()> {
    core: Rc<Core<T, R, E, ByPriority<T, R, E>>>,
}

impl<T: 'static, R: 'static, E: 'static> PriorityQueue<T, R, E> {
    /// Creates a priority queue that runs one worker at a time.
    pub fn new(tick: &Tick, worker: impl FnMut(T, Done<R, E>) + 'static) -> Self {
        Self {
            core: Core::new(tick, worker, NonZeroUsize::MIN),
        }
    }

    /// Creates a priority queue that keeps up to `concurrency` workers in flight.
    ///
    /// # Errors
    ///
    /// `QueueError::InvalidConcurrency` if `concurrency` is zero.
    pub fn with_concurrency(
        tick: &Tick,
        worker: impl FnMut(T, Done<R, E>) + 'static,
        concurrency: usize,
    ) -> Result<Self, QueueError> {
        Ok(Self {
            core: Core::new(tick, worker, checked(concurrency)?),
        })
    }

    /// Inserts a task at its priority position.
    pub fn push(&self, payload: T, priority: impl Into<Priority>) {
        let priority = priority.into();
        self.core
            .insert(vec![Job::new(payload, None)], by_priority(priority));
    }

    /// Inserts a task at its priority position with a completion callback.
    pub fn push_with(
        &self,
        payload: T,
        priority: impl Into<Priority>,
        callback: impl FnOnce(Result<R, E>) + 'static,
    ) {
        let priority = priority.into();
        self.core.insert(
            vec![Job::new(payload, Some(Box::new(callback)))],
            by_priority(priority),
        );
    }

    /// Inserts several tasks sharing one priority; they keep their relative order.
    pub fn push_all(&self, payloads: impl IntoIterator<Item = T>, priority: impl Into<Priority>) {
        let priority = priority.into();
        self.core
            .insert(Job::batch(payloads, None), by_priority(priority));
    }

    /// Like [`push_all`](Self::push_all) with a callback for every task.
    pub fn push_all_with(
        &self,
        payloads: impl IntoIterator<Item = T>,
        priority: impl Into<Priority>,
        callback: impl Fn(Result<R, E>) + 'static,
    ) {
        let callback: Rc<dyn Fn(Result<R, E>)> = Rc::new(callback);
        self.core
            .insert(Job::batch(payloads, Some(callback)), by_priority(priority.into()));
    }
}

fn by_priority<T, R, E>(priority: Priority) -> impl Fn(&mut ByPriority<T, R, E>, Job<T, R, E>) {
    move |pending, job| pending.insert(priority, job)
}

queue_controls!(PriorityQueue);
