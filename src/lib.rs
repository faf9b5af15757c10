//! Callback-based control flow for single-threaded asynchronous code.
//!
//! `cadence` coordinates units of work that report completion through a callback
//! instead of returning a value. It includes concurrency-bounded queues, a
//! dependency-graph runner and a retry combinator, all built on a small set of
//! shared primitives.
//!
//! The crate is designed to work independently of any specific async runtime: every
//! deferred step goes through a [`Tick`], which wraps any executor able to run
//! `!Send` futures on the current thread.
//!
//! Features include:
//! - [`Queue`] and [`PriorityQueue`] for running pushed payloads through a worker
//!   with bounded concurrency, with `saturated`, `empty` and `drain` hooks
//! - [`Cargo`] for handing pending payloads to a worker in batches
//! - [`Auto`] for running named tasks as soon as their dependencies completed
//! - [`retry`] and [`Retry`] for repeating a fallible task, optionally with a pause
//!   between attempts
//! - [`each_limit`] and [`each_series`] for bounded and sequential iteration
//!
//! Completion callbacks are guarded by [`OnlyOnce`]: completing the same unit of work
//! twice is a programming error and panics.

pub mod auto;
pub mod cargo;
pub mod each;
pub mod error;
pub mod guard;
pub mod priority;
pub mod queue;
pub mod retry;
pub mod tick;
pub mod timing;

pub use auto::{Auto, AutoFailure, AutoTask, Id, Results, TaskDone};
pub use cargo::Cargo;
pub use each::{each_limit, each_series};
pub use error::{AutoError, CallbackError, QueueError, ResultError};
pub use guard::{Done, OnlyOnce, noop};
pub use priority::Priority;
pub use queue::{PriorityQueue, Queue};
pub use retry::{AttemptDone, Retry, RetryFailure, RetryOptions, retry};
pub use tick::Tick;
pub use timing::{Delay, DelayExt};
