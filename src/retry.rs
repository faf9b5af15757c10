//! Repeats a fallible task until it succeeds or runs out of attempts.
//!
//! Attempts (and the pauses between them) are laid out as a fixed list of steps and
//! run through [`each_series`]. The series stops at the first attempt that succeeds
//! or at the last configured attempt, whichever comes first, and the callback
//! receives exactly that attempt's outcome: its value, or its error together with
//! whatever value it reported alongside.

use std::{
    any::Any,
    cell::RefCell,
    fmt,
    rc::Rc,
    time::Duration,
};

use tracing::{debug, trace};

use crate::{
    auto::{Id, Results, TaskDone},
    each::each_series,
    guard::{Done, OnlyOnce},
    tick::Tick,
    timing::Delay,
};

const DEFAULT_TIMES: usize = 5;

/// How often to attempt a task and how long to wait between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryOptions {
    /// Number of attempts. Zero selects the default of 5.
    pub times: usize,
    /// Pause between consecutive attempts. No pause follows the last attempt.
    pub interval: Duration,
}

impl RetryOptions {
    /// `times` attempts without a pause in between.
    #[must_use]
    pub fn new(times: usize) -> Self {
        Self {
            times,
            interval: Duration::ZERO,
        }
    }

    /// Sets the pause between attempts.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn attempts(&self) -> usize {
        if self.times == 0 {
            DEFAULT_TIMES
        } else {
            self.times
        }
    }

    fn steps(&self) -> Vec<Step> {
        let attempts = self.attempts();
        let mut steps = Vec::with_capacity(attempts * 2);
        for number in 1..=attempts {
            let last = number == attempts;
            steps.push(Step::Attempt { number, last });
            if !last && !self.interval.is_zero() {
                steps.push(Step::Pause(self.interval));
            }
        }
        steps
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self::new(DEFAULT_TIMES)
    }
}

impl From<usize> for RetryOptions {
    fn from(times: usize) -> Self {
        Self::new(times)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Attempt { number: usize, last: bool },
    Pause(Duration),
}

// Ends the step series early; the outcome itself travels separately.
struct Halt;

enum Attempted<R, E> {
    Ok(R),
    Err(E, Option<R>),
}

impl<R, E> From<Attempted<R, E>> for Result<R, RetryFailure<R, E>> {
    fn from(attempted: Attempted<R, E>) -> Self {
        match attempted {
            Attempted::Ok(value) => Ok(value),
            Attempted::Err(error, result) => Err(RetryFailure { error, result }),
        }
    }
}

/// Completion callback handed to every retry attempt.
///
/// Like [`Done`](crate::Done) it may be cloned freely but completed only once; a
/// second completion panics.
pub struct AttemptDone<R, E> {
    inner: OnlyOnce<Attempted<R, E>>,
}

impl<R: 'static, E: 'static> AttemptDone<R, E> {
    /// The attempt succeeded with `value`.
    pub fn ok(&self, value: R) {
        self.inner.call(Attempted::Ok(value));
    }

    /// The attempt failed without a result.
    pub fn err(&self, error: E) {
        self.inner.call(Attempted::Err(error, None));
    }

    /// The attempt failed but still produced `result`.
    ///
    /// If this is the terminal attempt, both reach the callback.
    pub fn err_with(&self, error: E, result: R) {
        self.inner.call(Attempted::Err(error, Some(result)));
    }

    /// Returns `true` once the attempt has completed.
    #[must_use]
    pub fn is_called(&self) -> bool {
        self.inner.is_called()
    }
}

impl<R, E> Clone for AttemptDone<R, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R, E> fmt::Debug for AttemptDone<R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttemptDone")
            .field("called", &self.inner.is_called())
            .finish()
    }
}

/// The error of a retry whose terminal attempt failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryFailure<R, E> {
    /// The error of the terminal attempt.
    pub error: E,
    /// The result it reported alongside, if any.
    pub result: Option<R>,
}

type Attempt<C, R, E> = Box<dyn FnMut(AttemptDone<R, E>, C)>;

/// A retrying task that receives a shared context on every attempt.
///
/// The context is cloned into each attempt. Inside an [`Auto`](crate::Auto) graph it
/// is the graph's [`Results`] handle; see [`into_task`](Retry::into_task).
pub struct Retry<C, R, E> {
    options: RetryOptions,
    task: Attempt<C, R, E>,
}

impl<C, R, E> Retry<C, R, E>
where
    C: Clone + 'static,
    R: 'static,
    E: 'static,
{
    /// Wraps `task`, which must complete its `AttemptDone` once per attempt.
    pub fn new(
        options: impl Into<RetryOptions>,
        task: impl FnMut(AttemptDone<R, E>, C) + 'static,
    ) -> Self {
        Self {
            options: options.into(),
            task: Box::new(task),
        }
    }

    /// The configured attempts and interval.
    #[must_use]
    pub fn options(&self) -> RetryOptions {
        self.options
    }

    /// Runs the attempts and reports the terminal attempt's outcome to `callback`.
    ///
    /// Pauses between attempts are spawned on `tick`.
    pub fn run(
        self,
        tick: &Tick,
        context: C,
        callback: impl FnOnce(Result<R, RetryFailure<R, E>>) + 'static,
    ) {
        let Retry { options, mut task } = self;
        debug!(times = options.attempts(), interval = ?options.interval, "Retry::run");

        let outcome: Rc<RefCell<Option<Attempted<R, E>>>> = Rc::new(RefCell::new(None));
        let outcome_cl = Rc::clone(&outcome);
        let tick = tick.clone();

        each_series(
            options.steps(),
            move |step, next: Done<(), Halt>| match step {
                Step::Attempt { number, last } => {
                    trace!(attempt = number, last, "Retry::run: attempt");
                    let outcome = Rc::clone(&outcome_cl);
                    let attempt = OnlyOnce::new(move |attempted: Attempted<R, E>| {
                        let stop = matches!(attempted, Attempted::Ok(_)) || last;
                        *outcome.borrow_mut() = Some(attempted);
                        if stop {
                            next.err(Halt);
                        } else {
                            next.ok(());
                        }
                    });
                    task(AttemptDone { inner: attempt }, context.clone());
                }
                Step::Pause(interval) => {
                    trace!(?interval, "Retry::run: waiting");
                    tick.spawn(Delay::new(async move { next.ok(()) }, interval));
                }
            },
            move |_| {
                let attempted = outcome.borrow_mut().take();
                if let Some(attempted) = attempted {
                    callback(attempted.into());
                }
            },
        );
    }
}

impl<I, R, E> Retry<Results<I>, R, E>
where
    I: Id,
    R: Any,
    E: 'static,
{
    /// Turns the retry into an [`Auto`](crate::Auto) work function.
    ///
    /// The graph's results handle is forwarded unchanged to every attempt, and the
    /// terminal attempt's outcome completes the graph task. A failed attempt's
    /// result lands in the failure snapshot.
    pub fn into_task(self, tick: &Tick) -> impl FnOnce(TaskDone<E>, Results<I>) + use<I, R, E> {
        let tick = tick.clone();
        move |done: TaskDone<E>, results: Results<I>| {
            self.run(&tick, results, move |outcome| match outcome {
                Ok(value) => done.ok(value),
                Err(RetryFailure {
                    error,
                    result: Some(result),
                }) => done.err_with(error, result),
                Err(RetryFailure { error, result: None }) => done.err(error),
            });
        }
    }
}

impl<C, R, E> fmt::Debug for Retry<C, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Runs `task` up to `options.times` times and passes the terminal attempt's outcome
/// to `callback`.
///
/// `options` may be a plain attempt count. An attempt that succeeds ends the run; if
/// every attempt fails, the error of the last one is reported, together with the
/// result it passed to [`AttemptDone::err_with`].
///
/// # Example
/// ```
/// # use std::{cell::{Cell, RefCell}, rc::Rc};
/// # use futures::executor::LocalPool;
/// # use cadence::{AttemptDone, RetryOptions, Tick, retry};
/// let mut pool = LocalPool::new();
/// let tick = Tick::from(pool.spawner());
/// let calls = Rc::new(Cell::new(0));
/// let calls_cl = Rc::clone(&calls);
/// let outcome = Rc::new(RefCell::new(None));
/// let outcome_cl = Rc::clone(&outcome);
///
/// retry(
///     &tick,
///     RetryOptions::new(3),
///     move |done: AttemptDone<u32, &str>| {
///         calls_cl.set(calls_cl.get() + 1);
///         if calls_cl.get() < 2 { done.err("flaky") } else { done.ok(7) }
///     },
///     move |result| *outcome_cl.borrow_mut() = Some(result),
/// );
///
/// pool.run_until_stalled();
/// assert_eq!(calls.get(), 2);
/// assert_eq!(*outcome.borrow(), Some(Ok(7)));
/// ```
pub fn retry<R, E>(
    tick: &Tick,
    options: impl Into<RetryOptions>,
    mut task: impl FnMut(AttemptDone<R, E>) + 'static,
    callback: impl FnOnce(Result<R, RetryFailure<R, E>>) + 'static,
) where
    R: 'static,
    E: 'static,
{
    Retry::new(options, move |done, ()| task(done)).run(tick, (), callback);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_times_falls_back_to_default() {
        assert_eq!(RetryOptions::from(0).attempts(), 5);
        assert_eq!(RetryOptions::default().attempts(), 5);
        assert_eq!(RetryOptions::from(2).attempts(), 2);
    }

    #[test]
    fn pauses_sit_between_attempts() {
        let interval = Duration::from_millis(10);
        let steps = RetryOptions::new(3).interval(interval).steps();
        assert_eq!(
            steps,
            vec![
                Step::Attempt {
                    number: 1,
                    last: false
                },
                Step::Pause(interval),
                Step::Attempt {
                    number: 2,
                    last: false
                },
                Step::Pause(interval),
                Step::Attempt {
                    number: 3,
                    last: true
                },
            ]
        );
    }

    #[test]
    fn no_pauses_without_interval() {
        let steps = RetryOptions::new(2).steps();
        assert!(steps.iter().all(|step| matches!(step, Step::Attempt { .. })));
        assert_eq!(steps.len(), 2);
    }
}
