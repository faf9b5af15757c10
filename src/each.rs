//! Bounded and sequential iteration over callback-based operations.
//!
//! [`each_limit`] keeps at most `limit` operations in flight and reports once all of
//! them completed or the first one failed. [`each_series`] is the same primitive
//! with a limit of one and is the sequential runner retry is built on.
//!
//! Iteration state is an explicit cursor over the remaining items. Operations that
//! complete synchronously do not recurse: the completion marks the cursor for
//! another round and the loop already on the stack picks it up.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
};

use crate::guard::{Done, OnlyOnce};

type Visit<S, E> = Box<dyn FnMut(S, Done<(), E>)>;
type Finish<E> = Box<dyn FnOnce(Result<(), E>)>;

struct Cursor<S, E> {
    items: RefCell<VecDeque<S>>,
    total: usize,
    limit: usize,
    running: Cell<usize>,
    completed: Cell<usize>,
    failed: Cell<bool>,
    iterator: RefCell<Visit<S, E>>,
    callback: RefCell<Option<Finish<E>>>,
    // Set while `replenish` is on the stack.
    replenishing: Cell<bool>,
    // A completion arrived while replenishing; run another round.
    again: Cell<bool>,
}

impl<S: 'static, E: 'static> Cursor<S, E> {
    fn replenish(self: &Rc<Self>) {
        if self.replenishing.get() {
            self.again.set(true);
            return;
        }
        self.replenishing.set(true);
        loop {
            self.again.set(false);
            while !self.failed.get() && self.running.get() < self.limit {
                let next = self.items.borrow_mut().pop_front();
                let Some(item) = next else {
                    break;
                };
                self.running.set(self.running.get() + 1);
                let cursor = Rc::clone(self);
                let done = OnlyOnce::new(move |result| cursor.settle(result));
                (self.iterator.borrow_mut())(item, done);
            }
            if !self.again.get() {
                break;
            }
        }
        self.replenishing.set(false);
    }

    fn settle(self: &Rc<Self>, result: Result<(), E>) {
        self.running.set(self.running.get() - 1);
        match result {
            Err(err) => {
                self.failed.set(true);
                self.finish(Err(err));
            }
            Ok(()) => {
                self.completed.set(self.completed.get() + 1);
                if self.completed.get() >= self.total {
                    self.finish(Ok(()));
                } else {
                    self.replenish();
                }
            }
        }
    }

    fn finish(&self, result: Result<(), E>) {
        let callback = self.callback.borrow_mut().take();
        if let Some(callback) = callback {
            callback(result);
        }
    }
}

/// Runs `iterator` over `items` with at most `limit` invocations in flight.
///
/// `callback` receives `Ok(())` once every item completed successfully, or the first
/// error. After an error no further items are started and later errors are ignored.
/// Empty input, or a `limit` of zero, completes immediately.
pub fn each_limit<S, E>(
    items: impl IntoIterator<Item = S>,
    limit: usize,
    iterator: impl FnMut(S, Done<(), E>) + 'static,
    callback: impl FnOnce(Result<(), E>) + 'static,
) where
    S: 'static,
    E: 'static,
{
    let items: VecDeque<S> = items.into_iter().collect();
    if items.is_empty() || limit == 0 {
        callback(Ok(()));
        return;
    }

    let cursor = Rc::new(Cursor {
        total: items.len(),
        items: RefCell::new(items),
        limit,
        running: Cell::new(0),
        completed: Cell::new(0),
        failed: Cell::new(false),
        iterator: RefCell::new(Box::new(iterator)),
        callback: RefCell::new(Some(Box::new(callback))),
        replenishing: Cell::new(false),
        again: Cell::new(false),
    });
    cursor.replenish();
}

/// Runs `iterator` over `items` one at a time, in order.
///
/// Stops at the first error, which is passed to `callback`.
pub fn each_series<S, E>(
    items: impl IntoIterator<Item = S>,
    iterator: impl FnMut(S, Done<(), E>) + 'static,
    callback: impl FnOnce(Result<(), E>) + 'static,
) where
    S: 'static,
    E: 'static,
{
    each_limit(items, 1, iterator, callback);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> (Rc<RefCell<Vec<String>>>, Rc<RefCell<Vec<String>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        (Rc::clone(&log), log)
    }

    #[test]
    fn series_runs_in_order_without_recursion() {
        let (log, log_cl) = record();
        let seen = Rc::new(Cell::new(0usize));
        let seen_cl = Rc::clone(&seen);
        each_series(
            0..10_000usize,
            move |n, done: Done<(), ()>| {
                seen_cl.set(seen_cl.get() + n);
                done.ok(());
            },
            move |result| log_cl.borrow_mut().push(format!("{result:?}")),
        );
        assert_eq!(seen.get(), (0..10_000).sum::<usize>());
        assert_eq!(*log.borrow(), vec!["Ok(())"]);
    }

    #[test]
    fn limit_bounds_in_flight_operations() {
        let parked: Rc<RefCell<Vec<Done<(), &str>>>> = Rc::new(RefCell::new(Vec::new()));
        let parked_cl = Rc::clone(&parked);
        let (log, log_cl) = record();

        each_limit(
            [1, 2, 3, 4, 5],
            2,
            move |_, done| parked_cl.borrow_mut().push(done),
            move |result| log_cl.borrow_mut().push(format!("{result:?}")),
        );

        assert_eq!(parked.borrow().len(), 2);
        let first = parked.borrow_mut().remove(0);
        first.ok(());
        assert_eq!(parked.borrow().len(), 2, "A freed slot starts the next item");

        loop {
            let next = parked.borrow_mut().pop();
            let Some(done) = next else {
                break;
            };
            done.ok(());
        }
        assert_eq!(*log.borrow(), vec!["Ok(())"]);
    }

    #[test]
    fn first_error_stops_new_work() {
        let started = Rc::new(Cell::new(0));
        let started_cl = Rc::clone(&started);
        let (log, log_cl) = record();

        each_series(
            ["a", "b", "c"],
            move |item, done| {
                started_cl.set(started_cl.get() + 1);
                if item == "b" {
                    done.err("boom");
                } else {
                    done.ok(());
                }
            },
            move |result| log_cl.borrow_mut().push(format!("{result:?}")),
        );

        assert_eq!(started.get(), 2);
        assert_eq!(*log.borrow(), vec![r#"Err("boom")"#]);
    }

    #[test]
    fn empty_input_completes_immediately() {
        let (log, log_cl) = record();
        each_limit(
            Vec::<u8>::new(),
            3,
            |_, _: Done<(), ()>| unreachable!(),
            move |result| log_cl.borrow_mut().push(format!("{result:?}")),
        );
        assert_eq!(*log.borrow(), vec!["Ok(())"]);
    }
}
