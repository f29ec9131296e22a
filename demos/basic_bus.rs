//! Basic bus example.
//!
//! Declares tags at compile time, subscribes to a parent tag and raises on
//! children, showing ancestor matching, one-shot listeners, type checks and a
//! request answered by a listener.

use std::sync::Arc;

use tag_bus::{message_tags, DeliveryError, ListenOptions, MessageBus, TagRegistry};

message_tags! {
    pub mod Tags {
        Combat {
            Damage { Fire; Ice; }
            Heal;
        }
        Movement { Jump; }
        Query { Health; }
    }
}

#[derive(Debug)]
struct Hit {
    amount: u32,
}

fn main() {
    let registry = Arc::new(TagRegistry::new());
    registry
        .register_native(Tags::DEFINITIONS)
        .expect("definitions are valid");
    let bus = MessageBus::with_registry(registry);

    println!("=== Basic Bus Example ===\n");

    bus.listen(Tags::Combat::TAG, ListenOptions::new(), |hit: &Hit| {
        println!("  [combat] something took {} damage", hit.amount);
    })
    .unwrap();

    bus.listen(Tags::Combat::Damage::Fire::TAG, ListenOptions::new().once(), |hit: &Hit| {
        println!("  [fire, once] first burn for {}", hit.amount);
    })
    .unwrap();

    for amount in [10, 20] {
        println!("raise Combat.Damage.Fire ({amount})");
        let result = bus.raise(Tags::Combat::Damage::Fire::TAG, Hit { amount });
        println!("  -> delivered to {} listener(s)\n", result.delivered_inline);
    }

    println!("raise Movement.Jump");
    let result = bus.raise(Tags::Movement::Jump::TAG, Hit { amount: 1 });
    println!("  -> delivered to {} listener(s)\n", result.delivered_inline);

    println!("raise Combat.Heal with the wrong payload type");
    let result = bus.raise(Tags::Combat::Heal::TAG, "not a Hit");
    for failure in &result.failures {
        if let DeliveryError::PayloadTypeMismatch { expected, found } = &failure.error {
            println!("  -> listener {} expected {expected}, got {found}", failure.handle);
        }
    }

    println!("\nrequest Query.Health");
    bus.listen_request(Tags::Query::Health::TAG, ListenOptions::new(), |who: &String, responder| {
        println!("  [health] asked about {who}");
        responder.respond(75u32).unwrap();
    })
    .unwrap();
    let request = bus.request(Tags::Query::Health::TAG, String::from("player"), |hp: &u32| {
        println!("  -> answer: {hp} hp");
    });
    println!("  -> still waiting: {}", bus.is_response_pending(request.sequence));

    println!("\n=== Example Complete ===");
}
