//! The cooperative turn every combinator defers its scheduling to.
//!
//! `Tick` wraps any [`LocalSpawn`] implementation, so the crate stays independent of
//! a particular executor. Work handed to [`Tick::defer`] never runs inline: it is
//! spawned onto the host and executes on a later turn, after the current push or
//! callback has returned.

use std::rc::Rc;

use futures::{
    executor::LocalSpawner,
    task::{LocalSpawn, LocalSpawnExt},
};
use tracing::warn;

/// A clonable handle to the single-threaded host that drives deferred work.
#[derive(Clone)]
pub struct Tick {
    spawner: Rc<dyn LocalSpawn>,
}

impl Tick {
    /// Creates a new `Tick` on top of the given spawner.
    ///
    /// Any executor that can run `!Send` futures on the current thread can back a
    /// `Tick`; `futures::executor::LocalSpawner` implements [`LocalSpawn`] directly.
    pub fn new(spawner: impl LocalSpawn + 'static) -> Self {
        Self {
            spawner: Rc::new(spawner),
        }
    }

    /// Runs `f` on a later turn of the host.
    pub fn defer(&self, f: impl FnOnce() + 'static) {
        self.spawn(async move { f() });
    }

    /// Spawns a future onto the host.
    ///
    /// If the host has shut down the future is dropped.
    pub fn spawn(&self, future: impl Future<Output = ()> + 'static) {
        if let Err(err) = self.spawner.spawn_local(future) {
            warn!(%err, "Tick::spawn: host refused deferred work");
        }
    }
}

impl From<LocalSpawner> for Tick {
    fn from(spawner: LocalSpawner) -> Self {
        Self::new(spawner)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use futures::executor::LocalPool;

    use super::*;

    #[test]
    fn defer_runs_on_a_later_turn_in_order() {
        let mut pool = LocalPool::new();
        let tick = Tick::from(pool.spawner());
        let order = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let order = Rc::clone(&order);
            tick.defer(move || order.borrow_mut().push(i));
        }
        assert!(order.borrow().is_empty(), "Deferred work must not run inline");

        pool.run_until_stalled();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn defer_after_host_dropped_is_ignored() {
        let pool = LocalPool::new();
        let tick = Tick::from(pool.spawner());
        drop(pool);
        tick.defer(|| panic!("must not run"));
    }
}
