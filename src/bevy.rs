//! Bevy integration.
//!
//! Provides:
//! - `MessageBusPlugin`: builder-pattern plugin that creates the bus as a resource
//! - `Bus`: the resource, a shared handle to a [`MessageBus`]
//! - a `First`-schedule system that runs the frame thread's queued calls
//!
//! [`TagContainer`](crate::TagContainer) is a `Component` when this feature is on.
//!
//! # Example
//!
//! ```ignore
//! use bevy::prelude::*;
//! use tag_bus::bevy::{Bus, MessageBusPlugin};
//! use tag_bus::{message_tags, ListenOptions};
//!
//! message_tags! {
//!     pub mod Tags {
//!         Combat { Damage; }
//!     }
//! }
//!
//! fn main() {
//!     App::new()
//!         .add_plugins(MinimalPlugins)
//!         .add_plugins(MessageBusPlugin::new().with_definitions(Tags::DEFINITIONS))
//!         .add_systems(Startup, subscribe)
//!         .run();
//! }
//!
//! fn subscribe(bus: Res<Bus>) {
//!     bus.listen(Tags::Combat::TAG, ListenOptions::new().on_thread("main"), |dmg: &u32| {
//!         info!("took {dmg} damage");
//!     })
//!     .unwrap();
//! }
//! ```

use std::ops::Deref;
use std::sync::Arc;

use bevy::prelude::*;
use tag_bus_config::BusConfig;

use crate::bus::{BusSettings, MessageBus};
use crate::marshal::ThreadTag;
use crate::registry::{RedirectDef, TagDef, TagRegistry};

// =============================================================================
// Plugin
// =============================================================================

/// Bevy plugin for the message bus.
///
/// ```ignore
/// App::new().add_plugins(
///     MessageBusPlugin::from_config(BusConfig::from_file("bus.toml")?)
///         .with_definitions(Tags::DEFINITIONS)
///         .with_redirects(Tags::REDIRECTS)
///         .frame_thread("main"),
/// )
/// ```
#[derive(Default)]
pub struct MessageBusPlugin {
    registry: Option<Arc<TagRegistry>>,
    config: Option<BusConfig>,
    definitions: Option<&'static [TagDef]>,
    redirects: Option<&'static [RedirectDef]>,
    frame_thread: Option<String>,
}

impl MessageBusPlugin {
    /// Plugin over the process-wide registry with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a parsed `bus.toml`: its tags, redirects and `[bus]` settings.
    ///
    /// The plugin panics while building the app if the tags cannot be
    /// registered, as it does for bad definitions or redirects.
    pub fn from_config(config: BusConfig) -> Self {
        Self {
            config: Some(config),
            ..Self::default()
        }
    }

    /// Use `registry` instead of [`TagRegistry::global`].
    pub fn with_registry(mut self, registry: Arc<TagRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Register tags declared with `message_tags!`.
    pub fn with_definitions(mut self, definitions: &'static [TagDef]) -> Self {
        self.definitions = Some(definitions);
        self
    }

    pub fn with_redirects(mut self, redirects: &'static [RedirectDef]) -> Self {
        self.redirects = Some(redirects);
        self
    }

    /// Thread whose queue is drained at the start of every frame.
    ///
    /// Overrides the config file. Default: `"main"`.
    pub fn frame_thread(mut self, name: impl Into<String>) -> Self {
        self.frame_thread = Some(name.into());
        self
    }

    fn build_bus(&self) -> MessageBus {
        let registry = self.registry.clone().unwrap_or_else(TagRegistry::global);

        if let Some(config) = &self.config {
            registry
                .load_config(config)
                .unwrap_or_else(|e| panic!("Failed to load bus config into TagRegistry: {e}"));
        }
        if let Some(defs) = self.definitions {
            registry
                .register_native(defs)
                .unwrap_or_else(|e| panic!("Failed to register tag definitions: {e}"));
        }
        if let Some(redirects) = self.redirects {
            registry
                .register_redirects(redirects)
                .unwrap_or_else(|e| panic!("Failed to register tag redirects: {e}"));
        }

        let mut settings = self
            .config
            .as_ref()
            .map(|c| BusSettings::from(c.settings()))
            .unwrap_or_default();
        if let Some(name) = &self.frame_thread {
            settings.frame_thread = ThreadTag::named(name.as_str());
        }

        MessageBus::with_settings(registry, settings)
    }
}

impl Plugin for MessageBusPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(Bus(Arc::new(self.build_bus())))
            .add_systems(First, pump_frame_queue);
    }
}

// =============================================================================
// Resource
// =============================================================================

/// Shared handle to the app's [`MessageBus`].
///
/// Clone it into worker threads to raise from outside the ECS.
#[derive(Resource, Clone, Debug)]
pub struct Bus(pub Arc<MessageBus>);

impl Deref for Bus {
    type Target = MessageBus;

    fn deref(&self) -> &MessageBus {
        &self.0
    }
}

fn pump_frame_queue(bus: Res<Bus>) {
    bus.pump_frame();
}

// =============================================================================
// Tests
// =============================================================================
