#![allow(dead_code)]

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use cadence::{Done, Tick};
use futures::executor::LocalPool;
use tracing_subscriber::EnvFilter;

/// Installs a test-friendly subscriber once per test binary. `RUST_LOG` overrides
/// the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cadence=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// A fresh single-threaded host and the `Tick` that feeds it.
pub fn host() -> (LocalPool, Tick) {
    init_tracing();
    let pool = LocalPool::new();
    let tick = Tick::from(pool.spawner());
    (pool, tick)
}

pub type Log<T> = Rc<RefCell<Vec<T>>>;

pub fn log<T>() -> Log<T> {
    Rc::new(RefCell::new(Vec::new()))
}

pub fn record<T: 'static>(log: &Log<T>) -> impl Fn(T) + use<T> {
    let log = Rc::clone(log);
    move |entry| log.borrow_mut().push(entry)
}

/// Worker invocations whose completion is left to the test.
pub struct Parked<T, R, E> {
    inner: Rc<RefCell<VecDeque<(T, Done<R, E>)>>>,
}

impl<T: 'static, R: 'static, E: 'static> Parked<T, R, E> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    /// A worker that parks every payload together with its `Done`.
    pub fn worker(&self) -> impl FnMut(T, Done<R, E>) + use<T, R, E> {
        let inner = Rc::clone(&self.inner);
        move |payload, done| inner.borrow_mut().push_back((payload, done))
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    /// Removes the oldest parked invocation.
    pub fn pop(&self) -> Option<(T, Done<R, E>)> {
        self.inner.borrow_mut().pop_front()
    }

    pub fn payloads(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.inner.borrow().iter().map(|(payload, _)| payload.clone()).collect()
    }

    /// Completes the oldest parked invocation with `result`.
    pub fn complete(&self, result: Result<R, E>) -> Option<T> {
        let (payload, done) = self.pop()?;
        done.call(result);
        Some(payload)
    }
}
