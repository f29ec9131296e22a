//! Dispatch behaviour under concurrent raisers and listeners.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tag_bus::*;

fn bus_with(paths: &[&str]) -> MessageBus {
    let registry = Arc::new(TagRegistry::new());
    for path in paths {
        registry.intern(path).unwrap();
    }
    MessageBus::with_registry(registry)
}

fn topic(bus: &MessageBus, path: &str) -> Tag {
    bus.registry().resolve(path).unwrap()
}

#[test]
fn one_shot_fires_once_under_concurrent_raisers() {
    let bus = bus_with(&["Combat.Damage.Fire"]);
    let fire = topic(&bus, "Combat.Damage.Fire");
    let combat = topic(&bus, "Combat");

    let once = Arc::new(AtomicUsize::new(0));
    let thrice = Arc::new(AtomicUsize::new(0));
    let o = once.clone();
    let t = thrice.clone();
    bus.listen(combat, ListenOptions::new().once(), move |_: &u32| {
        o.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    bus.listen(fire, ListenOptions::new().times(3), move |_: &u32| {
        t.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for i in 0..100u32 {
                    bus.raise(fire, i);
                }
            });
        }
    });

    assert_eq!(once.load(Ordering::SeqCst), 1);
    assert_eq!(thrice.load(Ordering::SeqCst), 3);
    assert!(bus.table().is_empty());
}

#[test]
fn concurrent_listen_unlisten_raise_stays_consistent() {
    let bus = bus_with(&["A.B.C", "A.B.D", "A.E"]);
    let topics = [
        topic(&bus, "A"),
        topic(&bus, "A.B"),
        topic(&bus, "A.B.C"),
        topic(&bus, "A.B.D"),
        topic(&bus, "A.E"),
    ];
    let deadline = Instant::now() + Duration::from_millis(200);
    let seen_handles = Mutex::new(Vec::new());

    std::thread::scope(|s| {
        for worker in 0..6usize {
            let bus = &bus;
            let seen_handles = &seen_handles;
            s.spawn(move || {
                let mut i = worker;
                while Instant::now() < deadline {
                    let t = topics[i % topics.len()];
                    let handle = bus
                        .listen(t, ListenOptions::new(), |_: &usize| {})
                        .unwrap();
                    seen_handles.lock().push(handle);
                    bus.raise(topics[(i + 1) % topics.len()], i);
                    assert!(bus.unlisten(handle));
                    assert!(!bus.unlisten(handle));
                    i += 1;
                }
            });
        }
    });

    assert!(bus.table().is_empty());
    for t in topics {
        assert_eq!(bus.table().listener_count(t), 0);
    }

    let mut handles = seen_handles.into_inner();
    let total = handles.len();
    handles.sort();
    handles.dedup();
    assert_eq!(handles.len(), total, "a handle was issued twice");
}

#[test]
fn unrelated_topic_is_not_delivered() {
    let bus = bus_with(&["Combat.Damage.Fire", "Movement"]);
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    bus.listen(topic(&bus, "Combat"), ListenOptions::new(), move |_: &u8| {
        h.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    bus.raise(topic(&bus, "Movement"), 1u8);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    bus.raise(topic(&bus, "Combat.Damage.Fire"), 1u8);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn cross_thread_delivery_is_fifo_per_raiser() {
    let bus = Arc::new(bus_with(&["Ui.Log"]));
    let log = topic(&bus, "Ui.Log");
    let received = Arc::new(Mutex::new(Vec::new()));
    let r = received.clone();
    bus.listen(log, ListenOptions::new().on_thread("ui"), move |n: &u32| {
        assert_eq!(ThreadTag::current(), ThreadTag::named("ui"));
        r.lock().push(*n);
    })
    .unwrap();

    let worker = bus.clone();
    std::thread::spawn(move || {
        for n in 0..50u32 {
            assert_eq!(worker.raise(log, n).queued, 1);
        }
    })
    .join()
    .unwrap();

    assert!(received.lock().is_empty());
    let ui = ThreadTag::named("ui");
    assert_eq!(bus.marshaler().pending(&ui), 50);

    let drained = bus.clone();
    std::thread::spawn(move || {
        let _bound = ThreadTag::scoped(ThreadTag::named("ui"));
        assert_eq!(drained.marshaler().drain_current_thread().executed, 50);
    })
    .join()
    .unwrap();

    assert_eq!(*received.lock(), (0..50).collect::<Vec<_>>());
}

#[test]
fn owning_thread_affinity_queues_for_registrar() {
    let bus = Arc::new(bus_with(&["Jobs.Done"]));
    let done = topic(&bus, "Jobs.Done");
    let hits = Arc::new(AtomicUsize::new(0));

    let _bound = ThreadTag::scoped(ThreadTag::named("owner"));
    let h = hits.clone();
    bus.listen(done, ListenOptions::new().on_owning_thread(), move |_: &()| {
        h.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    let worker = bus.clone();
    std::thread::spawn(move || assert_eq!(worker.raise(done, ()).queued, 1))
        .join()
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    // Raising on the owning thread runs inline.
    assert_eq!(bus.raise(done, ()).delivered_inline, 1);
    assert_eq!(bus.marshaler().drain_current_thread().executed, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn owner_drop_cancels_everything() {
    let bus = bus_with(&["A"]);
    let a = topic(&bus, "A");
    let owner = Lifetime::new();
    let hits = Arc::new(AtomicUsize::new(0));

    for options in [
        ListenOptions::new().owned_by(&owner),
        ListenOptions::new().owned_by(&owner).on_thread("ui"),
    ] {
        let h = hits.clone();
        bus.listen(a, options, move |_: &u8| {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    let first = bus.raise(a, 1u8);
    assert_eq!((first.delivered_inline, first.queued), (1, 1));

    drop(owner);
    assert_eq!(bus.raise(a, 2u8).delivered(), 0);
    bus.marshaler().drain_thread(&ThreadTag::named("ui"));

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(bus.table().is_empty());
}

#[test]
fn unlisten_owner_removes_its_listeners() {
    let bus = bus_with(&["A", "B"]);
    let owner = Lifetime::new();
    for path in ["A", "B"] {
        bus.listen(topic(&bus, path), ListenOptions::new().owned_by(&owner), |_: &u8| {})
            .unwrap();
    }
    let other = bus
        .listen(topic(&bus, "A"), ListenOptions::new(), |_: &u8| {})
        .unwrap();

    assert_eq!(bus.unlisten_owner(&owner), 2);
    assert!(bus.is_listening(other));
    assert_eq!(bus.table().len(), 1);
}

#[test]
fn redirected_path_raises_on_target() {
    let bus = bus_with(&["Combat.Damage.Fire"]);
    bus.registry()
        .add_redirect("Combat.Burn", "Combat.Damage.Fire")
        .unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    bus.listen_path("Combat.Burn", ListenOptions::new(), move |_: &u8| {
        h.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    bus.raise_path("Combat.Damage.Fire", 1u8).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
