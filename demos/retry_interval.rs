use std::{cell::Cell, rc::Rc, time::Duration};

use cadence::{AttemptDone, RetryOptions, Tick, retry};
use futures::{
    future::LocalFutureObj,
    task::{LocalSpawn, SpawnError},
};

// Runs deferred work on the surrounding tokio `LocalSet`.
struct TokioLocal;

impl LocalSpawn for TokioLocal {
    fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        tokio::task::spawn_local(future);
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let tick = Tick::new(TokioLocal);
            let (tx, rx) = futures::channel::oneshot::channel();
            let attempt = Rc::new(Cell::new(0));

            retry(
                &tick,
                RetryOptions::new(4).interval(Duration::from_millis(250)),
                move |done: AttemptDone<&str, String>| {
                    attempt.set(attempt.get() + 1);
                    println!("attempt {}", attempt.get());
                    if attempt.get() < 3 {
                        done.err(format!("service unavailable (attempt {})", attempt.get()));
                    } else {
                        done.ok("connected");
                    }
                },
                move |result| {
                    let _ = tx.send(result);
                },
            );

            match rx.await {
                Ok(Ok(status)) => println!("{status}"),
                Ok(Err(failure)) => println!("gave up: {}", failure.error),
                Err(_) => println!("retry was dropped"),
            }
        })
        .await;
}
