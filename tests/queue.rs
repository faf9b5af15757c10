mod common;

use std::{cell::Cell, rc::Rc};

use cadence::{Done, Queue, QueueError};
use common::{Parked, host, log, record};

#[test]
fn concurrency_bound_is_never_exceeded() {
    let (mut pool, tick) = host();
    let parked = Parked::<u32, (), ()>::new();
    let queue = Queue::with_concurrency(&tick, parked.worker(), 2).unwrap();

    queue.push_all(1..=5);
    let mut order = Vec::new();
    loop {
        pool.run_until_stalled();
        assert!(parked.len() <= 2, "At most two workers may be in flight");
        assert_eq!(queue.running(), parked.len());
        let Some(n) = parked.complete(Ok(())) else {
            break;
        };
        order.push(n);
    }

    assert_eq!(order, vec![1, 2, 3, 4, 5]);
    assert!(queue.is_idle());
}

#[test]
fn tasks_dispatch_in_push_order() {
    let (mut pool, tick) = host();
    let seen = log();
    let on_work = record(&seen);
    let queue = Queue::new(&tick, move |n: u32, done: Done<(), ()>| {
        on_work(n);
        done.ok(());
    });

    queue.push_all([1, 2, 3, 4]);
    assert!(seen.borrow().is_empty(), "Dispatch is deferred to the next turn");
    pool.run_until_stalled();

    assert_eq!(*seen.borrow(), vec![1, 2, 3, 4]);
}

#[test]
fn task_callbacks_receive_worker_results() {
    let (mut pool, tick) = host();
    let results = log();
    let queue = Queue::with_concurrency(
        &tick,
        |n: u32, done: Done<u32, String>| {
            if n % 2 == 0 {
                done.err(format!("{n} is even"));
            } else {
                done.ok(n * 10);
            }
        },
        3,
    )
    .unwrap();

    queue.push_all_with(1..=4, record(&results));
    pool.run_until_stalled();

    assert_eq!(
        *results.borrow(),
        vec![
            Ok(10),
            Err("2 is even".to_string()),
            Ok(30),
            Err("4 is even".to_string())
        ],
        "An error is delivered to its own task and does not stop the queue"
    );
}

#[test]
fn hooks_follow_saturated_empty_drain_sequence() {
    let (mut pool, tick) = host();
    let events = log();
    let parked = Parked::<u32, (), ()>::new();
    let queue = Queue::with_concurrency(&tick, parked.worker(), 2).unwrap();

    let on_saturated = record(&events);
    queue.on_saturated(move || on_saturated("saturated".to_string()));
    let on_empty = record(&events);
    queue.on_empty(move || on_empty("empty".to_string()));
    let on_drain = record(&events);
    queue.on_drain(move || on_drain("drain".to_string()));

    let on_done = record(&events);
    queue.push_all_with([1, 2], move |_| on_done("done".to_string()));
    assert_eq!(
        *events.borrow(),
        vec!["saturated"],
        "Saturated fires before any dispatch"
    );

    pool.run_until_stalled();
    assert_eq!(parked.payloads(), vec![1, 2]);
    assert_eq!(*events.borrow(), vec!["saturated", "empty"]);

    parked.complete(Ok(()));
    assert_eq!(*events.borrow(), vec!["saturated", "empty", "done"]);
    parked.complete(Ok(()));
    pool.run_until_stalled();
    assert_eq!(
        *events.borrow(),
        vec!["saturated", "empty", "done", "done", "drain"],
        "Drain fires once, after the last worker completed"
    );
}

#[test]
fn empty_fires_before_the_last_worker_runs() {
    let (mut pool, tick) = host();
    let events = log();
    let on_work = record(&events);
    let queue = Queue::new(&tick, move |n: u32, done: Done<(), ()>| {
        on_work(format!("work {n}"));
        done.ok(());
    });
    let on_empty = record(&events);
    queue.on_empty(move || on_empty("empty".to_string()));

    queue.push_all([1, 2]);
    pool.run_until_stalled();

    assert_eq!(*events.borrow(), vec!["work 1", "empty", "work 2"]);
}

#[test]
fn drain_does_not_repeat_without_new_work() {
    let (mut pool, tick) = host();
    let drains = Rc::new(Cell::new(0));
    let drains_cl = Rc::clone(&drains);
    let queue = Queue::new(&tick, |_: u32, done: Done<(), ()>| done.ok(()));
    queue.on_drain(move || drains_cl.set(drains_cl.get() + 1));

    queue.push_all([1, 2, 3]);
    pool.run_until_stalled();
    pool.run_until_stalled();
    assert_eq!(drains.get(), 1);

    queue.push(4);
    pool.run_until_stalled();
    assert_eq!(drains.get(), 2, "New work leads to a new drain");
}

#[test]
fn pause_holds_dispatch_and_resume_restores_concurrency() {
    let (mut pool, tick) = host();
    let parked = Parked::<u32, (), ()>::new();
    let queue = Queue::with_concurrency(&tick, parked.worker(), 3).unwrap();

    queue.pause();
    queue.push_all(1..=5);
    pool.run_until_stalled();
    assert!(queue.is_paused());
    assert_eq!(parked.len(), 0, "A paused queue dispatches nothing");

    queue.resume();
    pool.run_until_stalled();
    assert_eq!(parked.payloads(), vec![1, 2, 3]);

    queue.pause();
    parked.complete(Ok(()));
    pool.run_until_stalled();
    assert_eq!(parked.len(), 2, "Completions do not dispatch while paused");

    queue.resume();
    pool.run_until_stalled();
    assert_eq!(parked.payloads(), vec![2, 3, 4]);
    assert_eq!(queue.running(), 3);
    assert_eq!(queue.len(), 1);
}

#[test]
fn kill_drops_pending_tasks_and_the_drain_hook() {
    let (mut pool, tick) = host();
    let parked = Parked::<u32, (), ()>::new();
    let queue = Queue::new(&tick, parked.worker());
    let drains = Rc::new(Cell::new(0));
    let drains_cl = Rc::clone(&drains);
    queue.on_drain(move || drains_cl.set(drains_cl.get() + 1));
    let results = log();

    queue.push_all_with([1, 2, 3], record(&results));
    pool.run_until_stalled();
    assert_eq!(parked.len(), 1);

    queue.kill();
    assert_eq!(queue.len(), 0);
    assert_eq!(parked.complete(Ok(())), Some(1));
    pool.run_until_stalled();

    assert_eq!(*results.borrow(), vec![Ok(())], "The in-flight task still reports");
    assert_eq!(parked.len(), 0);
    assert_eq!(drains.get(), 0, "Kill disables the drain hook");
    assert!(queue.is_idle());
}

#[test]
fn unshift_jumps_the_line() {
    let (mut pool, tick) = host();
    let parked = Parked::<u32, (), ()>::new();
    let queue = Queue::new(&tick, parked.worker());

    queue.push(1);
    queue.push(2);
    pool.run_until_stalled();
    queue.unshift(3);
    queue.unshift_all([4, 5]);

    let mut order = Vec::new();
    loop {
        pool.run_until_stalled();
        let Some(n) = parked.complete(Ok(())) else {
            break;
        };
        order.push(n);
    }
    assert_eq!(order, vec![1, 5, 4, 3, 2]);
}

#[test]
fn empty_push_on_idle_queue_drains() {
    let (mut pool, tick) = host();
    let drains = Rc::new(Cell::new(0));
    let drains_cl = Rc::clone(&drains);
    let queue = Queue::new(&tick, |_: u32, done: Done<(), ()>| done.ok(()));
    queue.on_drain(move || drains_cl.set(drains_cl.get() + 1));

    assert!(!queue.is_started());
    queue.push_all(Vec::new());
    assert!(queue.is_started());
    assert_eq!(drains.get(), 0, "The drain is deferred");
    pool.run_until_stalled();
    assert_eq!(drains.get(), 1);
}

#[test]
fn empty_push_on_busy_queue_waits_for_real_drain() {
    let (mut pool, tick) = host();
    let parked = Parked::<u32, (), ()>::new();
    let queue = Queue::new(&tick, parked.worker());
    let drains = Rc::new(Cell::new(0));
    let drains_cl = Rc::clone(&drains);
    queue.on_drain(move || drains_cl.set(drains_cl.get() + 1));

    queue.push(1);
    pool.run_until_stalled();
    queue.push_all(Vec::new());
    pool.run_until_stalled();
    assert_eq!(drains.get(), 0);

    parked.complete(Ok(()));
    pool.run_until_stalled();
    assert_eq!(drains.get(), 1);
}

#[test]
fn raising_concurrency_applies_on_next_dispatch() {
    let (mut pool, tick) = host();
    let parked = Parked::<u32, (), ()>::new();
    let queue = Queue::new(&tick, parked.worker());

    queue.push_all(1..=4);
    pool.run_until_stalled();
    assert_eq!(parked.len(), 1);

    assert_eq!(queue.set_concurrency(0), Err(QueueError::InvalidConcurrency(0)));
    queue.set_concurrency(3).unwrap();
    assert_eq!(queue.concurrency(), 3);

    parked.complete(Ok(()));
    pool.run_until_stalled();
    assert_eq!(parked.payloads(), vec![2, 3, 4]);
}

#[test]
fn zero_concurrency_is_rejected() {
    let (_pool, tick) = host();
    let queue = Queue::<u8>::with_concurrency(&tick, |_, done| done.ok(()), 0);
    assert_eq!(queue.err(), Some(QueueError::InvalidConcurrency(0)));
}

#[test]
#[should_panic(expected = "callback was already called")]
fn completing_twice_panics() {
    let (mut pool, tick) = host();
    let queue = Queue::new(&tick, |_: u8, done: Done<(), ()>| {
        done.ok(());
        done.ok(());
    });
    queue.push(1);
    pool.run_until_stalled();
}

#[test]
fn clones_share_one_queue() {
    let (mut pool, tick) = host();
    let parked = Parked::<u32, (), ()>::new();
    let queue = Queue::new(&tick, parked.worker());
    let other = queue.clone();

    other.push_all([1, 2]);
    pool.run_until_stalled();
    assert_eq!(queue.running(), 1);
    assert_eq!(queue.len(), 1);
    assert!(!queue.is_idle());
}
