//! Wire ingress and egress on a [`MessageBus`].

use std::sync::Arc;

use tracing::{trace, warn};

use crate::bus::{DispatchResult, MessageBus};
use crate::error::{Error, Result};
use crate::table::{ListenOptions, ListenerHandle};
use crate::tag::Tag;

/// A message encoded for delivery outside the process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedMessage {
    pub topic: Tag,
    /// Dotted path of `topic`, for the remote side.
    pub path: Arc<str>,
    pub schema: Arc<str>,
    pub bytes: Vec<u8>,
    pub sequence: u64,
}

impl MessageBus {
    /// Decode an external buffer and raise it.
    ///
    /// The topic must resolve and the schema must be registered with
    /// [`codecs`](Self::codecs). Decode failures come back to the caller and
    /// nothing is raised.
    pub fn ingress(&self, topic_path: &str, schema: &str, bytes: &[u8]) -> Result<DispatchResult> {
        let topic = self
            .registry()
            .resolve(topic_path)
            .ok_or_else(|| Error::UnknownTopic(topic_path.to_string()))?;

        let payload = self.codecs().decode(schema, bytes).inspect_err(|e| {
            warn!(topic = topic_path, schema, error = %e, "rejected inbound payload");
        })?;

        trace!(topic = topic_path, schema, len = bytes.len(), "ingress");
        Ok(self.raise_erased(topic, payload))
    }

    /// Encode every message on `topic` (and its descendants) and pass it to `sink`.
    ///
    /// Messages whose payload type has no registered codec are skipped with a
    /// warning.
    pub fn forward_encoded<F>(&self, topic: Tag, options: ListenOptions, sink: F) -> Result<ListenerHandle>
    where
        F: Fn(EncodedMessage) + Send + Sync + 'static,
    {
        let codecs = self.codecs().clone();
        let registry = self.registry().clone();

        self.listen_message(topic, options, move |message| {
            let (schema, bytes) = match codecs.encode(&message.payload) {
                Ok(encoded) => encoded,
                Err(e) => {
                    warn!(sequence = message.sequence, error = %e, "failed to encode outbound message");
                    return;
                }
            };
            let path = registry
                .path_of(message.topic)
                .unwrap_or_else(|| Arc::from(format!("{:x}", message.topic)));
            sink(EncodedMessage {
                topic: message.topic,
                path,
                schema,
                bytes,
                sequence: message.sequence,
            });
        })
    }
}
