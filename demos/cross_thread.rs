//! Cross-thread delivery example.
//!
//! A worker thread raises progress messages; the "ui" listener only runs when
//! the ui thread drains its queue.

use std::sync::Arc;
use std::time::Duration;

use tag_bus::{ListenOptions, Lifetime, MessageBus, TagRegistry, ThreadTag};

fn main() {
    let registry = Arc::new(TagRegistry::new());
    let progress = registry.intern("Jobs.Progress").expect("valid path");
    let bus = Arc::new(MessageBus::with_registry(registry));

    println!("=== Cross-Thread Example ===\n");

    // The current thread plays the ui thread.
    let _ui = ThreadTag::scoped(ThreadTag::named("ui"));
    let screen = Lifetime::new();

    bus.listen(
        progress,
        ListenOptions::new().on_thread("ui").owned_by(&screen),
        |pct: &u8| println!("  [{}] progress {pct}%", ThreadTag::current()),
    )
    .unwrap();

    let worker_bus = bus.clone();
    let worker = std::thread::spawn(move || {
        for pct in [0u8, 25, 50, 75, 100] {
            worker_bus.raise(progress, pct);
            std::thread::sleep(Duration::from_millis(5));
        }
    });
    worker.join().expect("worker finished");

    println!("queued for ui: {}", bus.marshaler().pending(&ThreadTag::named("ui")));
    let report = bus.marshaler().drain_current_thread();
    println!("drained {} call(s)\n", report.executed);

    // Closing the screen cancels its listeners, including queued calls.
    let worker_bus = bus.clone();
    std::thread::spawn(move || worker_bus.raise(progress, 0u8))
        .join()
        .expect("worker finished");
    drop(screen);
    let report = bus.marshaler().drain_current_thread();
    println!("after the screen closed: ran {} stale call(s) as no-ops", report.executed);
    println!("purged {} dead listener(s)", bus.table().purge_dead());

    println!("\n=== Example Complete ===");
}
