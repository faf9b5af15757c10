use std::{cell::RefCell, rc::Rc};

use cadence::{Done, PriorityQueue, Queue, Tick};
use futures::executor::LocalPool;

fn main() {
    let mut pool = LocalPool::new();
    let tick = Tick::from(pool.spawner());

    // Workers park their `Done` handles so completion order can be chosen below.
    let in_flight: Rc<RefCell<Vec<(String, Done<usize, String>)>>> =
        Rc::new(RefCell::new(Vec::new()));
    let in_flight_cl = Rc::clone(&in_flight);

    let queue = Queue::with_concurrency(
        &tick,
        move |url: String, done| {
            println!("fetching {url}");
            in_flight_cl.borrow_mut().push((url, done));
        },
        2,
    )
    .unwrap();

    queue.on_saturated(|| println!("queue saturated"));
    queue.on_empty(|| println!("last pending task handed to a worker"));
    queue.on_drain(|| println!("all work done"));

    for url in ["/a", "/b", "/c"] {
        queue.push_with(url.to_string(), move |result| match result {
            Ok(bytes) => println!("{url}: {bytes} bytes"),
            Err(err) => println!("{url}: {err}"),
        });
    }

    pool.run_until_stalled();
    while !queue.is_idle() {
        let next = in_flight.borrow_mut().pop();
        let Some((url, done)) = next else {
            break;
        };
        if url == "/b" {
            done.err("connection reset".to_string());
        } else {
            done.ok(url.len() * 100);
        }
        pool.run_until_stalled();
    }

    // Same engine, pending tasks ordered by priority.
    let urgent = PriorityQueue::new(&tick, |job, done: Done<(), ()>| {
        println!("running {job}");
        done.ok(());
    });
    urgent.push("cleanup", 10);
    urgent.push("page on-call", 0.5);
    urgent.push("rotate logs", 10);
    pool.run_until_stalled();
}
