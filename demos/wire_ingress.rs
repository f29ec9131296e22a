//! Wire ingress example.
//!
//! Messages arrive as bytes (an HTTP callback, a socket) and are delivered to
//! typed listeners; outbound messages are encoded for the other side.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tag_bus::{ErasedPayload, ListenOptions, MessageBus, TagRegistry};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatLine {
    from: String,
    text: String,
}

fn main() {
    println!("=== Wire Ingress Example ===\n");

    let registry = Arc::new(TagRegistry::new());
    registry.intern("Net.Chat.Line").expect("valid path");
    let bus = MessageBus::with_registry(registry);
    bus.codecs().register_json::<ChatLine>("chat.line");
    bus.codecs().register_packed::<ChatLine>("chat.line.bin");

    bus.listen_path("Net.Chat", ListenOptions::new(), |line: &ChatLine| {
        println!("  <{}> {}", line.from, line.text);
    })
    .unwrap();

    let chat = bus.registry().resolve("Net").expect("interned");
    bus.forward_encoded(chat, ListenOptions::new(), |msg| {
        println!(
            "  outbound #{} {} [{}] {} bytes",
            msg.sequence,
            msg.path,
            msg.schema,
            msg.bytes.len()
        );
    })
    .unwrap();

    println!("JSON ingress:");
    let json = br#"{"schema":"chat.line","payload":{"from":"ana","text":"hello"}}"#;
    bus.ingress("Net.Chat.Line", "chat.line", json).unwrap();

    println!("\nPacked ingress:");
    let line = ChatLine {
        from: "bo".into(),
        text: "hi there".into(),
    };
    let frame = bus
        .codecs()
        .encode_as("chat.line.bin", &ErasedPayload::new(line))
        .unwrap();
    bus.ingress("Net.Chat.Line", "chat.line.bin", &frame).unwrap();

    println!("\nCorrupt frame:");
    match bus.ingress("Net.Chat.Line", "chat.line.bin", &frame[..6]) {
        Ok(_) => println!("  unexpectedly accepted"),
        Err(e) => println!("  rejected: {e}"),
    }

    println!("\n=== Example Complete ===");
}
