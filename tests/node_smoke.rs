//! Whole node smoke test: bring the threads up against raw file
//! audio, let them idle, and shut down cleanly.

use std::io::Write;
use std::sync::atomic::Ordering;
use std::time::Duration;

use ilnode::config::Config;
use ilnode::node::Node;

#[test]
fn starts_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    let in_path = dir.path().join("rx.raw");
    let out_path = dir.path().join("tx.raw");

    // Half a second of silence on the receive side.
    let mut f = std::fs::File::create(&in_path).unwrap();
    f.write_all(&vec![0u8; 9600]).unwrap();
    drop(f);

    let config = Config::parse(&format!(
        "ADEVICE raw:{}:{}\nMYCALL N0CALL\n",
        in_path.display(),
        out_path.display()
    ));
    let (source, sink) = ilnode::audio::open(&config.adevice).unwrap();

    let node = Node::new(config);
    let shutdown = node.shutdown_flag();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(700));
        shutdown.store(true, Ordering::Relaxed);
    });

    node.run(source, sink).unwrap();
    stopper.join().unwrap();
}
