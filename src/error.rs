use thiserror::Error;

use crate::tag::Tag;
use crate::tag_id::{TagId, MAX_DEPTH};
use crate::table::ListenerHandle;

/// Errors returned by tag-bus operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid tag path '{path}': {reason}")]
    InvalidTagPath { path: String, reason: String },

    #[error("tag path '{path}' has {depth} segments, at most {max} are allowed", max = MAX_DEPTH)]
    TagTooDeep { path: String, depth: usize },

    #[error("tag '{path}' collides with '{existing}' (id {id:#034x})")]
    TagCollision {
        path: String,
        existing: String,
        id: TagId,
    },

    #[error("invalid redirect '{from}' -> '{to}': {reason}")]
    InvalidRedirect {
        from: String,
        to: String,
        reason: String,
    },

    #[error("invalid tag definitions: {0}")]
    Definition(String),

    #[error("topic '{0}' is not a registered tag")]
    UnknownTopic(String),

    #[error("payload type mismatch: expected {expected}, found {found}")]
    PayloadTypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("schema mismatch: expected '{expected}', found '{found}'")]
    SchemaMismatch { expected: String, found: String },

    #[error("malformed payload buffer: {0}")]
    MalformedBuffer(String),

    #[error("no payload codec registered for '{0}'")]
    UnknownSchema(String),

    #[error("failed to encode payload: {0}")]
    Encode(String),

    #[error(transparent)]
    Config(#[from] tag_bus_config::ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a single listener did not receive a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("listener expects {expected}, message carries {found}")]
    PayloadTypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("listener panicked: {0}")]
    ListenerPanicked(String),
}

/// A per-listener failure collected while raising a message.
///
/// Failures never stop delivery to the remaining listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub handle: ListenerHandle,
    pub topic: Tag,
    pub error: DeliveryError,
}
