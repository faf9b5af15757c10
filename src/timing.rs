//! Timing utilities for deferred work.
//!
//! Provides the `Delay` wrapper used to space out retry attempts. Wakeups are
//! produced by a small thread pool that sleeps on behalf of the host, so a `Delay`
//! works on any executor that honours wakers.

use std::{
    pin::Pin,
    sync::OnceLock,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use futures::executor::{ThreadPool, ThreadPoolBuilder};
use pin_project_lite::pin_project;
use tracing::trace;

static THREAD_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

fn thread_pool() -> Option<&'static ThreadPool> {
    THREAD_POOL
        .get_or_init(|| ThreadPoolBuilder::new().pool_size(4).create().ok())
        .as_ref()
}

pin_project! {
    /// A future that begins polling its inner future only after a specified delay.
    ///
    /// The delay is counted from the first poll of the `Delay`, not from its
    /// construction. Once the delay has passed, every poll is delegated to the
    /// inner future until it completes.
    #[must_use = "futures do nothing unless polled or .awaited"]
    pub struct Delay<F> {
        #[pin]
        future: F,
        delay: Duration,
        due: Option<Instant>,
        armed: bool,
    }
}

impl<F> Delay<F> {
    /// Creates a new `Delay` that defers the given future by `delay`.
    ///
    /// A more convenient way to construct this is via the [`delay()`](DelayExt::delay)
    /// operator.
    pub fn new(future: F, delay: Duration) -> Self {
        Delay {
            future,
            delay,
            due: None,
            armed: false,
        }
    }

    /// Consumes the `Delay` and returns the inner future.
    pub fn inner(self) -> F {
        self.future
    }

    // Returns `true` while the deadline is still ahead.
    fn handle_delay(self: Pin<&mut Self>, cx: &mut Context<'_>) -> bool {
        let proj = self.project();
        let due = *proj.due.get_or_insert_with(|| Instant::now() + *proj.delay);
        let now = Instant::now();
        if now >= due {
            return false;
        }
        if *proj.armed {
            return true;
        }

        let waker = cx.waker().clone();
        let remaining = due.saturating_duration_since(now);
        trace!(?remaining, "Delay: arming wakeup");
        match thread_pool() {
            Some(pool) => {
                pool.spawn_ok(async move {
                    std::thread::sleep(remaining);
                    waker.wake();
                });
                *proj.armed = true;
            }
            // Without helper threads the delay degrades to a busy wait.
            None => waker.wake(),
        }
        true
    }
}

impl<F> Future for Delay<F>
where
    F: Future,
{
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.as_mut().handle_delay(cx) {
            return Poll::Pending;
        }
        self.project().future.poll(cx)
    }
}

/// Extend `Future` with time-based operations.
pub trait DelayExt: Future {
    /// Defers the start of this future by `delay`.
    fn delay(self, delay: Duration) -> Delay<Self>
    where
        Self: Sized,
    {
        Delay::new(self, delay)
    }
}

impl<T> DelayExt for T where T: Future {}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;

    #[test]
    fn delay_waits_before_polling_inner() {
        let start = Instant::now();
        let value = block_on(async { 7 }.delay(Duration::from_millis(30)));
        assert_eq!(value, 7);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn zero_delay_completes_immediately() {
        assert_eq!(block_on(Delay::new(async { "now" }, Duration::ZERO)), "now");
    }
}
