//! Dependency-graph task runner.
//!
//! An [`Auto`] holds named tasks, each with the ids of the tasks it depends on. Running
//! the graph dispatches every task whose dependencies are complete; each successful
//! completion stores the task's value in the shared [`Results`] and, on a later turn,
//! lets the tasks still waiting re-check their dependencies, the most recently added
//! first. The final callback gets
//! the full results once every task completed, or the first error together with a
//! snapshot of what had completed so far.
//!
//! Only one-hop cycles (`a` depends on `b` and `b` on `a`, or a task on itself) are
//! rejected before running. A longer cycle never becomes ready, so such a graph
//! never reports.

use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    fmt::{self, Debug},
    hash::Hash,
    rc::Rc,
};

use tracing::{debug, trace};

use crate::{
    error::{AutoError, ResultError},
    guard::{OnlyOnce, noop},
    tick::Tick,
};

/// A trait for types that can be used as task identifiers in an [`Auto`] graph.
///
/// Implementations must support equality comparison, hashing, and cloning so that
/// results and dependencies can be keyed by them; `Debug` is used in error messages.
///
/// It is implemented for common identifier types such as `char`, `String`,
/// `&'static str`, and all primitive integer types.
pub trait Id: Eq + Hash + Clone + Debug + 'static {}

impl Id for char {}
impl Id for &'static str {}
impl Id for String {}
impl Id for i8 {}
impl Id for u8 {}
impl Id for i16 {}
impl Id for u16 {}
impl Id for i32 {}
impl Id for u32 {}
impl Id for i64 {}
impl Id for u64 {}
impl Id for i128 {}
impl Id for u128 {}
impl Id for isize {}
impl Id for usize {}

/// Shared, type-erased task results keyed by task id.
///
/// `Results` is a cheap handle: every clone sees the same map. Tasks receive it at
/// dispatch time and may read what their dependencies produced. Values are stored as
/// `Rc<dyn Any>` and recovered with the typed getters.
pub struct Results<I> {
    map: Rc<RefCell<HashMap<I, Rc<dyn Any>>>>,
}

impl<I: Id> Results<I> {
    /// Creates an empty result map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    /// Returns the value stored under `id` if it exists and is a `T`.
    #[must_use]
    pub fn get<T: Any>(&self, id: &I) -> Option<Rc<T>> {
        let value = self.map.borrow().get(id).cloned()?;
        value.downcast::<T>().ok()
    }

    /// Removes and returns the value stored under `id`.
    ///
    /// On a type mismatch the value is left in place.
    ///
    /// # Errors
    ///
    /// - `ResultError::NoResult`: nothing is stored under `id`.
    /// - `ResultError::TypeMismatch`: the stored value is not a `T`.
    pub fn take<T: Any>(&self, id: &I) -> Result<Rc<T>, ResultError> {
        let mut map = self.map.borrow_mut();
        let value = map.remove(id).ok_or(ResultError::NoResult)?;
        value.downcast::<T>().map_err(|value| {
            map.insert(id.clone(), value);
            ResultError::TypeMismatch
        })
    }

    /// Stores `value` under `id`, replacing any previous value.
    ///
    /// This only touches the map: it never marks a task as complete.
    pub fn insert<T: Any>(&self, id: I, value: T) {
        self.store(id, Rc::new(value));
    }

    /// Returns `true` if a value is stored under `id`.
    #[must_use]
    pub fn contains(&self, id: &I) -> bool {
        self.map.borrow().contains_key(id)
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.borrow().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.borrow().is_empty()
    }

    /// Ids that currently have a value, in no particular order.
    #[must_use]
    pub fn ids(&self) -> Vec<I> {
        self.map.borrow().keys().cloned().collect()
    }

    /// Returns a detached copy; later changes to either map do not affect the other.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        Self {
            map: Rc::new(RefCell::new(self.map.borrow().clone())),
        }
    }

    fn store(&self, id: I, value: Rc<dyn Any>) {
        self.map.borrow_mut().insert(id, value);
    }
}

impl<I: Id> Default for Results<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I> Clone for Results<I> {
    fn clone(&self) -> Self {
        Self {
            map: Rc::clone(&self.map),
        }
    }
}

impl<I: Debug> Debug for Results<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.map.borrow().keys()).finish()
    }
}

/// Applies the multi-value convention: nothing becomes `()`, a single value is
/// stored as itself and anything longer is stored as the whole `Vec`.
pub(crate) fn collapse<T: Any>(mut values: Vec<T>) -> Rc<dyn Any> {
    match values.len() {
        0 => Rc::new(()),
        1 => match values.pop() {
            Some(value) => Rc::new(value),
            None => Rc::new(()),
        },
        _ => Rc::new(values),
    }
}

enum Outcome<E> {
    Ok(Rc<dyn Any>),
    Err(E, Rc<dyn Any>),
}

/// Completion callback handed to an [`Auto`] task.
///
/// Like [`Done`](crate::Done) it may be cloned freely but completed only once; a
/// second completion panics.
pub struct TaskDone<E> {
    inner: OnlyOnce<Outcome<E>>,
}

impl<E: 'static> TaskDone<E> {
    /// Completes the task with `value` as its result.
    pub fn ok<T: Any>(&self, value: T) {
        self.inner.call(Outcome::Ok(Rc::new(value)));
    }

    /// Completes the task with several values.
    ///
    /// An empty list stores `()`, a single value is stored as itself and a longer
    /// list is stored as the `Vec<T>`.
    pub fn ok_values<T: Any>(&self, values: Vec<T>) {
        self.inner.call(Outcome::Ok(collapse(values)));
    }

    /// Fails the task. The failure snapshot records `()` under this task's id.
    pub fn err(&self, error: E) {
        self.inner.call(Outcome::Err(error, Rc::new(())));
    }

    /// Fails the task, recording `partial` under its id in the failure snapshot.
    pub fn err_with<T: Any>(&self, error: E, partial: T) {
        self.inner.call(Outcome::Err(error, Rc::new(partial)));
    }

    /// Returns `true` once the task has completed.
    #[must_use]
    pub fn is_called(&self) -> bool {
        self.inner.is_called()
    }
}

impl<E> Clone for TaskDone<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E> Debug for TaskDone<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDone")
            .field("called", &self.inner.is_called())
            .finish()
    }
}

/// The error reported when a task of a running graph fails.
#[derive(Debug)]
pub struct AutoFailure<I, E> {
    /// Id of the failing task.
    pub task: I,
    /// The error it reported.
    pub error: E,
    /// Results of the tasks that had completed, plus the failing task's partial value.
    pub results: Results<I>,
}

type Work<I, E> = Box<dyn FnOnce(TaskDone<E>, Results<I>)>;
type Report<I, E> = Box<dyn FnOnce(Result<Results<I>, AutoFailure<I, E>>)>;

/// A task descriptor: its dependencies and the work to run once they completed.
pub struct AutoTask<I, E> {
    dependencies: Vec<I>,
    work: Work<I, E>,
}

impl<I: Id, E> AutoTask<I, E> {
    /// Adds a dependency on the task named `id`.
    pub fn depends_on(&mut self, id: I) -> &mut Self {
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
        self
    }

    /// Adds a dependency on each task in `ids`.
    pub fn depends_on_all(&mut self, ids: impl IntoIterator<Item = I>) -> &mut Self {
        for id in ids {
            self.depends_on(id);
        }
        self
    }

    /// The ids this task waits for.
    #[must_use]
    pub fn dependencies(&self) -> &[I] {
        &self.dependencies
    }
}

/// A graph of named tasks that run as soon as their dependencies completed.
///
/// # Example
/// ```
/// # use std::{cell::RefCell, rc::Rc};
/// # use futures::executor::LocalPool;
/// # use cadence::{Auto, Tick};
/// let mut pool = LocalPool::new();
/// let tick = Tick::from(pool.spawner());
/// let total = Rc::new(RefCell::new(None));
/// let total_cl = Rc::clone(&total);
///
/// let mut auto = Auto::<&str, ()>::new(&tick);
/// auto.task("a", |done, _| done.ok(2u32));
/// auto.task("b", |done, _| done.ok(3u32));
/// auto.task("sum", |done, results| {
///     let a = results.get::<u32>(&"a").unwrap();
///     let b = results.get::<u32>(&"b").unwrap();
///     done.ok(*a + *b);
/// })
/// .depends_on_all(["a", "b"]);
///
/// auto.run(move |outcome| {
///     let results = outcome.unwrap();
///     *total_cl.borrow_mut() = results.get::<u32>(&"sum").map(|sum| *sum);
/// })
/// .unwrap();
///
/// pool.run_until_stalled();
/// assert_eq!(*total.borrow(), Some(5));
/// ```
pub struct Auto<I, E> {
    tick: Tick,
    tasks: Vec<(I, AutoTask<I, E>)>,
}

impl<I: Id, E: 'static> Auto<I, E> {
    /// Creates an empty graph that defers its scheduling to `tick`.
    #[must_use]
    pub fn new(tick: &Tick) -> Self {
        Self {
            tick: tick.clone(),
            tasks: Vec::new(),
        }
    }

    /// Adds the task `id`, replacing a previous task with the same id.
    ///
    /// Returns the descriptor so dependencies can be declared in place.
    pub fn task(
        &mut self,
        id: I,
        work: impl FnOnce(TaskDone<E>, Results<I>) + 'static,
    ) -> &mut AutoTask<I, E> {
        let task = AutoTask {
            dependencies: Vec::new(),
            work: Box::new(work),
        };
        let index = match self.tasks.iter().position(|(existing, _)| *existing == id) {
            Some(index) => {
                self.tasks[index].1 = task;
                index
            }
            None => {
                self.tasks.push((id, task));
                self.tasks.len() - 1
            }
        };
        &mut self.tasks[index].1
    }

    /// Number of tasks in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if the graph has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn validate(&self) -> Result<(), AutoError<I>> {
        let lookup: HashMap<&I, &AutoTask<I, E>> =
            self.tasks.iter().map(|(id, task)| (id, task)).collect();
        for (id, task) in &self.tasks {
            for dependency in &task.dependencies {
                let Some(upstream) = lookup.get(dependency) else {
                    return Err(AutoError::MissingDependency {
                        task: id.clone(),
                        dependency: dependency.clone(),
                    });
                };
                if upstream.dependencies.contains(id) {
                    return Err(AutoError::CyclicDependency {
                        task: id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Validates the graph and starts every task whose dependencies are satisfied.
    ///
    /// `callback` runs once: with the shared results after the last task completed,
    /// or with the first failure. After a failure no further tasks are started; tasks
    /// already running finish but are not reported. An empty graph reports
    /// immediately.
    ///
    /// # Errors
    ///
    /// - `AutoError::MissingDependency`: a task depends on an id that is not in the
    ///   graph.
    /// - `AutoError::CyclicDependency`: two tasks depend on each other, or a task
    ///   depends on itself.
    ///
    /// Nothing runs when an error is returned.
    pub fn run(
        self,
        callback: impl FnOnce(Result<Results<I>, AutoFailure<I, E>>) + 'static,
    ) -> Result<(), AutoError<I>> {
        self.validate()?;
        let Auto { tick, tasks } = self;
        debug!(tasks = tasks.len(), "Auto::run");
        if tasks.is_empty() {
            callback(Ok(Results::new()));
            return Ok(());
        }

        let graph = Rc::new(Graph {
            tick,
            results: Results::new(),
            completed: RefCell::new(HashSet::new()),
            remaining: Cell::new(tasks.len()),
            waiting: RefCell::new(Vec::new()),
            report: RefCell::new(Some(Box::new(callback))),
            halted: Cell::new(false),
        });
        for (id, task) in tasks {
            if graph.halted.get() {
                break;
            }
            if graph.is_ready(&id, &task.dependencies) {
                graph.dispatch(id, task.work);
            } else {
                graph.waiting.borrow_mut().push(Waiting {
                    id,
                    dependencies: task.dependencies,
                    work: task.work,
                });
            }
        }
        Ok(())
    }

    /// Like [`run`](Self::run) with nobody listening for the outcome.
    ///
    /// # Errors
    ///
    /// The same validation errors as [`run`](Self::run).
    pub fn run_detached(self) -> Result<(), AutoError<I>> {
        self.run(noop())
    }
}

impl<I: Debug, E> Debug for Auto<I, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.tasks.iter().map(|(id, task)| (id, &task.dependencies)))
            .finish()
    }
}

struct Waiting<I, E> {
    id: I,
    dependencies: Vec<I>,
    work: Work<I, E>,
}

struct Graph<I, E> {
    tick: Tick,
    results: Results<I>,
    // Fed only by task completions, so writes through `Results` never unblock a task.
    completed: RefCell<HashSet<I>>,
    remaining: Cell<usize>,
    waiting: RefCell<Vec<Waiting<I, E>>>,
    report: RefCell<Option<Report<I, E>>>,
    halted: Cell<bool>,
}

impl<I: Id, E: 'static> Graph<I, E> {
    fn is_ready(&self, id: &I, dependencies: &[I]) -> bool {
        let completed = self.completed.borrow();
        !completed.contains(id) && dependencies.iter().all(|dep| completed.contains(dep))
    }

    fn dispatch(self: &Rc<Self>, id: I, work: Work<I, E>) {
        trace!(task = ?id, "Auto::dispatch");
        let graph = Rc::clone(self);
        let task = id.clone();
        let done = TaskDone {
            inner: OnlyOnce::new(move |outcome| graph.settle(task, outcome)),
        };
        work(done, self.results.clone());
    }

    fn settle(self: &Rc<Self>, id: I, outcome: Outcome<E>) {
        match outcome {
            Outcome::Ok(value) => {
                self.results.store(id.clone(), value);
                self.completed.borrow_mut().insert(id);
                self.remaining.set(self.remaining.get() - 1);
                if self.halted.get() {
                    return;
                }
                let graph = Rc::clone(self);
                self.tick.defer(move || graph.notify());
            }
            Outcome::Err(error, partial) => {
                let results = self.results.snapshot();
                results.store(id.clone(), partial);
                self.halted.set(true);
                self.waiting.borrow_mut().clear();
                let report = self.report.borrow_mut().take();
                match report {
                    Some(report) => {
                        debug!(task = ?id, "Auto::settle: task failed");
                        report(Err(AutoFailure {
                            task: id,
                            error,
                            results,
                        }));
                    }
                    None => trace!(task = ?id, "Auto::settle: late failure ignored"),
                }
            }
        }
    }

    // Most recently added tasks go first. Works on a snapshot of the waiting ids:
    // dispatching may complete tasks synchronously and change the waiting list.
    fn notify(self: &Rc<Self>) {
        let ids: Vec<I> = self.waiting.borrow().iter().map(|w| w.id.clone()).collect();
        for id in ids.into_iter().rev() {
            if self.halted.get() {
                return;
            }
            let ready = {
                let waiting = self.waiting.borrow();
                waiting
                    .iter()
                    .position(|w| w.id == id && self.is_ready(&w.id, &w.dependencies))
            };
            if let Some(index) = ready {
                let task = self.waiting.borrow_mut().remove(index);
                self.dispatch(task.id, task.work);
            }
        }
        if self.remaining.get() == 0 && !self.halted.get() {
            let report = self.report.borrow_mut().take();
            if let Some(report) = report {
                debug!("Auto::notify: all tasks completed");
                report(Ok(self.results.clone()));
            }
        }
    }
}
