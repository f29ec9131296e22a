//! Bevy integration example.
//!
//! This example shows how to:
//! - Set up `MessageBusPlugin` with tag definitions
//! - Raise messages from a worker thread and receive them on the frame thread
//! - Use `TagContainer` as an entity component

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bevy::prelude::*;
use tag_bus::bevy::{Bus, MessageBusPlugin};
use tag_bus::{message_tags, ListenOptions, TagContainer};

message_tags! {
    pub mod Tags {
        Combat {
            Damage { Fire; Ice; }
        }
        Status {
            Burning;
            Frozen;
        }
    }
}

#[derive(Component)]
struct Name(&'static str);

#[derive(Resource, Clone, Default)]
struct DamageTaken(Arc<AtomicU32>);

fn main() {
    App::new()
        .add_plugins(MinimalPlugins)
        .add_plugins(MessageBusPlugin::new().with_definitions(Tags::DEFINITIONS))
        .init_resource::<DamageTaken>()
        .add_systems(Startup, (spawn_entities, subscribe, start_worker).chain())
        .add_systems(Update, report)
        .run();
}

fn spawn_entities(mut commands: Commands) {
    commands.spawn((
        Name("Goblin"),
        TagContainer::single(Tags::Status::Burning::TAG),
    ));
    commands.spawn((
        Name("Skeleton"),
        TagContainer::new()
            .with(Tags::Status::Frozen::TAG)
            .with(Tags::Combat::Damage::Ice::TAG),
    ));
}

/// Damage listeners run on the frame thread, drained in `First` every frame.
fn subscribe(bus: Res<Bus>, taken: Res<DamageTaken>) {
    let taken = taken.0.clone();
    bus.listen(
        Tags::Combat::Damage::TAG,
        ListenOptions::new().on_thread("main"),
        move |amount: &u32| {
            taken.fetch_add(*amount, Ordering::SeqCst);
        },
    )
    .unwrap();
}

/// Simulates a network or physics thread raising messages outside the ECS.
fn start_worker(bus: Res<Bus>) {
    let bus = bus.clone();
    std::thread::spawn(move || {
        for amount in [5u32, 10, 20] {
            let result = bus.raise(Tags::Combat::Damage::Fire::TAG, amount);
            println!("worker raised {amount}: queued for {} listener(s)", result.queued);
        }
    });
}

fn report(
    taken: Res<DamageTaken>,
    query: Query<(&Name, &TagContainer)>,
    mut frames: Local<u32>,
) {
    *frames += 1;
    if *frames < 10 {
        return;
    }

    println!("--- After {} frames ---", *frames);
    println!("  damage received on frame thread: {}", taken.0.load(Ordering::SeqCst));
    for (name, container) in query.iter() {
        let has_status = container.matches(Tags::Status::TAG, true);
        println!("  {} has a status effect: {}", name.0, has_status);
    }
    std::process::exit(0);
}
