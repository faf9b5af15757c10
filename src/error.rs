//! Error types shared across the crate.
//!
//! Errors produced by workers and tasks are never wrapped: they are generic values
//! forwarded verbatim to the callbacks that registered for them. The types here
//! cover misuse of the combinators themselves and invalid graph configuration.

use thiserror::Error;

/// Raised when a completion callback is invoked a second time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum CallbackError {
    /// The guarded callback already ran.
    #[error("callback was already called")]
    AlreadyCalled,
}

/// Invalid construction or reconfiguration of a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Concurrency must allow at least one worker in flight.
    #[error("concurrency must be at least 1, got {0}")]
    InvalidConcurrency(usize),

    /// A cargo batch must hold at least one task.
    #[error("cargo payload must be at least 1")]
    InvalidPayload,
}

/// Configuration errors detected by [`Auto::run`](crate::auto::Auto::run) before any
/// task executes.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AutoError<I> {
    /// A task lists a dependency that was never added to the graph.
    #[error("task {task:?} depends on unknown task {dependency:?}")]
    MissingDependency { task: I, dependency: I },

    /// Two tasks list each other as dependencies (or a task lists itself).
    #[error("task {task:?} and task {dependency:?} depend on each other")]
    CyclicDependency { task: I, dependency: I },
}

/// Represents errors that can occur when taking a stored result out of
/// [`Results`](crate::auto::Results).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ResultError {
    /// No result was found for the requested task.
    #[error("no result found for the given task id")]
    NoResult,

    /// The stored result could not be downcast to the expected type.
    #[error("failed to downcast result to the expected type")]
    TypeMismatch,
}
