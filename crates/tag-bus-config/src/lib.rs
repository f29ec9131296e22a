//! Configuration loading for tag-bus.
//!
//! A `bus.toml` file carries dispatcher settings, the tag paths to declare up
//! front, and redirects from retired paths to their replacements:
//!
//! ```toml
//! [bus]
//! ancestor_matching = true   # deliver to listeners on ancestor topics
//! frame_thread = "main"      # thread tag pumped by the host every frame
//!
//! [tags]
//! paths = ["Combat.Damage.Fire", "Movement.Jump"]
//!
//! [[tags.redirects]]
//! from = "Combat.Fire"
//! to = "Combat.Damage.Fire"
//! ```
//!
//! Every table is optional. Paths are expanded so that each ancestor gets its
//! own entry.
//!
//! ```ignore
//! let config = tag_bus_config::BusConfig::from_file("bus.toml")?;
//! for entry in config.entries() {
//!     println!("{} (depth {})", entry.path, entry.depth);
//! }
//! ```

mod toml_parser;

pub use toml_parser::{
    validate_path, BusConfig, BusSection, ConfigError, RedirectEntry, TagEntry, MAX_SEGMENTS,
};
