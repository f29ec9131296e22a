//! # Tag-addressed message bus (tag-bus)
//!
//! In-process publish/subscribe keyed by hierarchical tags such as
//! `Combat.Damage.Fire`. Listeners subscribe to a tag and receive messages
//! raised on it or, with ancestor matching, on any tag below it.
//!
//! ## Pieces
//!
//! - [`Tag`] / [`TagRegistry`]: interned dotted paths with O(1) subtree checks
//! - [`TagContainer`]: a set of tags with hierarchical matching
//! - [`MessageBus`]: registration and dispatch of type-erased payloads
//! - [`ThreadMarshaler`]: per-thread queues for listeners bound to a thread
//! - [`PayloadCodecs`]: JSON and packed binary adapters for wire ingress
//! - [`Responder`]: answers to [`MessageBus::request`]
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use tag_bus::{message_tags, ListenOptions, MessageBus, TagRegistry};
//!
//! message_tags! {
//!     pub mod Tags {
//!         Combat {
//!             Damage { Fire; Ice; }
//!         }
//!     }
//! }
//!
//! let registry = Arc::new(TagRegistry::new());
//! registry.register_native(Tags::DEFINITIONS).unwrap();
//! let bus = MessageBus::with_registry(registry);
//!
//! bus.listen(Tags::Combat::TAG, ListenOptions::new(), |amount: &u32| {
//!     println!("took {amount} damage");
//! })
//! .unwrap();
//!
//! let result = bus.raise(Tags::Combat::Damage::Fire::TAG, 12u32);
//! assert_eq!(result.delivered_inline, 1);
//! ```
//!
//! ## Threads
//!
//! Listeners registered with [`ListenOptions::on_thread`] never run on the
//! raising thread. Their calls wait in the marshaler until that thread calls
//! [`ThreadMarshaler::drain_current_thread`], or until the Bevy plugin pumps
//! the frame thread at the start of each frame.

extern crate self as tag_bus;

pub mod adapter;
pub mod bridge;
pub mod bus;
pub mod container;
pub mod error;
pub mod lifetime;
pub mod marshal;
pub mod payload;
pub mod registry;
pub mod request;
pub mod table;
pub mod tag;
pub mod tag_id;

#[cfg(feature = "bevy")]
pub mod bevy;

pub use adapter::{FrameHeader, JsonAdapter, PackedAdapter, PayloadAdapter, PayloadCodecs};
pub use bridge::EncodedMessage;
pub use bus::{BusSettings, DispatchResult, MessageBus};
pub use container::TagContainer;
pub use error::{DeliveryError, DeliveryFailure, Error, Result};
pub use lifetime::{Lifetime, OwnerWatch};
pub use marshal::{BoundThread, DrainReport, PendingCall, ThreadMarshaler, ThreadTag};
pub use payload::{ErasedPayload, Message, TypeKey};
pub use registry::{Inclusivity, RedirectDef, TagDef, TagNode, TagRegistry};
pub use request::{Request, Responder};
pub use table::{
    HandlerTable, Invoker, ListenMode, ListenOptions, ListenerHandle, Registration, ThreadAffinity,
};
pub use tag::Tag;
pub use tag_id::{TagId, MAX_DEPTH};

pub use tag_bus_config::{BusConfig, BusSection, ConfigError};
pub use tag_bus_macro::message_tags;
