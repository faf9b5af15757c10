use std::collections::HashMap;

use cadence::{Auto, Tick};
use futures::executor::LocalPool;

fn main() {
    let mut pool = LocalPool::new();
    let tick = Tick::from(pool.spawner());

    let mut auto = Auto::<&str, String>::new(&tick);

    auto.task("get_data", |done, _| {
        println!("in get_data");
        done.ok_values(vec!["data", "converted to array"]);
    });

    auto.task("make_folder", |done, _| {
        println!("in make_folder");
        done.ok("folder");
    });

    auto.task("write_file", |done, results| {
        let folder = results.get::<&str>(&"make_folder").unwrap();
        println!("in write_file, folder is {folder}");
        done.ok("filename");
    })
    .depends_on_all(["get_data", "make_folder"]);

    auto.task("email_link", |done, results| {
        let file = results.get::<&str>(&"write_file").unwrap();
        let mut email = HashMap::new();
        email.insert("file", *file);
        email.insert("email", "user@example.com");
        println!("in email_link, sending {email:?}");
        done.ok(email);
    })
    .depends_on("write_file");

    auto.run(|outcome| match outcome {
        Ok(results) => {
            let data = results.get::<Vec<&str>>(&"get_data").unwrap();
            println!("finished with {} results, data = {data:?}", results.len());
        }
        Err(failure) => println!("task {} failed: {}", failure.task, failure.error),
    })
    .unwrap();

    pool.run_until_stalled();
}
