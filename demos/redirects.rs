//! Redirect example.
//!
//! Retired tag paths keep working by resolving to their replacement, both
//! from `message_tags!` and from a config file.

use std::sync::Arc;

use tag_bus::{message_tags, BusConfig, ListenOptions, MessageBus, TagRegistry};

message_tags! {
    pub mod Tags {
        Combat {
            Damage { Fire; }
        }
        #[redirect = "Combat.Damage.Fire"]
        Burn;
    }
}

const CONFIG: &str = r#"
[tags]
paths = ["Combat.Damage.Ice"]

[[tags.redirects]]
from = "Freeze"
to = "Combat.Damage.Ice"
"#;

fn main() {
    println!("=== Redirect Example ===\n");

    let config: BusConfig = CONFIG.parse().expect("valid config");
    let registry = Arc::new(TagRegistry::new());
    registry
        .register_native(Tags::DEFINITIONS)
        .expect("valid definitions");
    registry
        .register_redirects(Tags::REDIRECTS)
        .expect("valid redirects");
    let bus = MessageBus::from_config(registry, &config).expect("config applies");

    #[allow(deprecated)]
    let burn = Tags::Burn::TAG;
    println!("Burn::TAG == Combat.Damage.Fire::TAG: {}", burn == Tags::Combat::Damage::Fire::TAG);

    for path in ["Burn", "Freeze"] {
        let target = bus.registry().redirect_target(path).expect("redirect exists");
        println!(
            "{path} -> {}",
            bus.registry().path_of(target).as_deref().unwrap_or("?")
        );
    }

    bus.listen_path("Freeze", ListenOptions::new(), |v: &i32| {
        println!("  ice listener got {v}");
    })
    .unwrap();
    bus.raise_path("Combat.Damage.Ice", 3).unwrap();

    println!("\n=== Example Complete ===");
}
