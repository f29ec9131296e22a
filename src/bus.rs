//! Message dispatch.
//!
//! [`MessageBus`] ties the registry, the handler table and the marshaler
//! together. A raise resolves the matching registrations, checks each one's
//! payload type, and either invokes it inline or queues it for its thread.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tag_bus_config::{BusConfig, BusSection};
use tracing::{debug, trace, warn};

use crate::adapter::PayloadCodecs;
use crate::error::{DeliveryError, DeliveryFailure, Error, Result};
use crate::lifetime::Lifetime;
use crate::marshal::{panic_message, ThreadMarshaler, ThreadTag};
use crate::payload::{ErasedPayload, Message, TypeKey};
use crate::registry::TagRegistry;
use crate::request::ResponseTable;
use crate::table::{Claim, HandlerTable, ListenOptions, ListenerHandle, Registration};
use crate::tag::Tag;

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_sequence() -> u64 {
    NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Runtime switches for a [`MessageBus`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusSettings {
    /// Deliver to listeners on ancestor topics too.
    pub ancestor_matching: bool,
    /// Thread whose queue the host drains once per frame.
    pub frame_thread: ThreadTag,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            ancestor_matching: true,
            frame_thread: ThreadTag::named("main"),
        }
    }
}

impl From<&BusSection> for BusSettings {
    fn from(section: &BusSection) -> Self {
        Self {
            ancestor_matching: section.ancestor_matching,
            frame_thread: ThreadTag::named(section.frame_thread.as_str()),
        }
    }
}

/// Outcome of one raise.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchResult {
    /// Listeners that ran on the raising thread.
    pub delivered_inline: usize,
    /// Calls posted to another thread's queue.
    pub queued: usize,
    pub failures: Vec<DeliveryFailure>,
}

impl DispatchResult {
    /// No listener failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Inline plus queued.
    pub fn delivered(&self) -> usize {
        self.delivered_inline + self.queued
    }
}

/// Tag-addressed publish/subscribe bus.
///
/// Cheap to share behind an `Arc`; every method takes `&self`. No internal lock
/// is held while listener code runs, so listeners may listen, unlisten and
/// raise again from inside a callback.
///
/// ```
/// use tag_bus::{ListenOptions, MessageBus, TagRegistry};
/// use std::sync::Arc;
///
/// let bus = MessageBus::with_registry(Arc::new(TagRegistry::new()));
/// let fire = bus.registry().intern("Combat.Damage.Fire").unwrap();
/// let combat = bus.registry().resolve("Combat").unwrap();
///
/// bus.listen(combat, ListenOptions::new(), |dmg: &u32| assert_eq!(*dmg, 12))
///     .unwrap();
///
/// let result = bus.raise(fire, 12u32);
/// assert_eq!(result.delivered_inline, 1);
/// ```
pub struct MessageBus {
    registry: Arc<TagRegistry>,
    table: HandlerTable,
    marshaler: Arc<ThreadMarshaler>,
    codecs: Arc<PayloadCodecs>,
    responses: Arc<ResponseTable>,
    settings: BusSettings,
}

impl MessageBus {
    /// Bus over the process-wide registry.
    pub fn new() -> Self {
        Self::with_registry(TagRegistry::global())
    }

    pub fn with_registry(registry: Arc<TagRegistry>) -> Self {
        Self::with_settings(registry, BusSettings::default())
    }

    pub fn with_settings(registry: Arc<TagRegistry>, settings: BusSettings) -> Self {
        Self {
            table: HandlerTable::new(registry.clone()),
            registry,
            marshaler: Arc::new(ThreadMarshaler::new()),
            codecs: Arc::new(PayloadCodecs::new()),
            responses: Arc::new(ResponseTable::default()),
            settings,
        }
    }

    /// Load the config's tags and redirects into `registry` and apply its `[bus]` section.
    pub fn from_config(registry: Arc<TagRegistry>, config: &BusConfig) -> Result<Self> {
        registry.load_config(config)?;
        Ok(Self::with_settings(registry, config.settings().into()))
    }

    pub fn registry(&self) -> &Arc<TagRegistry> {
        &self.registry
    }

    pub fn marshaler(&self) -> &Arc<ThreadMarshaler> {
        &self.marshaler
    }

    pub fn codecs(&self) -> &Arc<PayloadCodecs> {
        &self.codecs
    }

    pub fn settings(&self) -> &BusSettings {
        &self.settings
    }

    pub fn table(&self) -> &HandlerTable {
        &self.table
    }

    pub(crate) fn responses(&self) -> &Arc<ResponseTable> {
        &self.responses
    }

    /// Listen for payloads of type `T` on `topic` and its descendants.
    ///
    /// Raises carrying another payload type are reported as
    /// [`DeliveryError::PayloadTypeMismatch`] and skip this listener.
    pub fn listen<T, F>(&self, topic: Tag, options: ListenOptions, listener: F) -> Result<ListenerHandle>
    where
        T: Any + Send + Sync,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let invoker = Arc::new(move |message: &Message| {
            if let Some(payload) = message.payload::<T>() {
                listener(payload);
            }
        });
        self.table
            .register(topic, Some(TypeKey::of::<T>()), invoker, options)
    }

    /// [`listen`](Self::listen) by path. The path must already be interned.
    pub fn listen_path<T, F>(&self, path: &str, options: ListenOptions, listener: F) -> Result<ListenerHandle>
    where
        T: Any + Send + Sync,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let topic = self
            .registry
            .resolve(path)
            .ok_or_else(|| Error::UnknownTopic(path.to_string()))?;
        self.listen(topic, options, listener)
    }

    /// Listen for every message on `topic`, whatever its payload type.
    pub fn listen_message<F>(&self, topic: Tag, options: ListenOptions, listener: F) -> Result<ListenerHandle>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.table.register(topic, None, Arc::new(listener), options)
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn unlisten(&self, handle: ListenerHandle) -> bool {
        self.table.unregister(handle)
    }

    /// Remove every listener owned by `owner`.
    pub fn unlisten_owner(&self, owner: &Lifetime) -> usize {
        self.table.unregister_owner(owner)
    }

    pub fn is_listening(&self, handle: ListenerHandle) -> bool {
        self.table.is_registered(handle)
    }

    /// Raise `payload` on `topic`.
    pub fn raise<T: Any + Send + Sync>(&self, topic: Tag, payload: T) -> DispatchResult {
        self.raise_erased(topic, ErasedPayload::new(payload))
    }

    /// Raise on a path. Unknown paths are an error, not an empty dispatch.
    pub fn raise_path<T: Any + Send + Sync>(&self, path: &str, payload: T) -> Result<DispatchResult> {
        let topic = self
            .registry
            .resolve(path)
            .ok_or_else(|| Error::UnknownTopic(path.to_string()))?;
        Ok(self.raise(topic, payload))
    }

    /// Raise an already erased payload.
    pub fn raise_erased(&self, topic: Tag, payload: ErasedPayload) -> DispatchResult {
        self.raise_sequenced(topic, payload, next_sequence())
    }

    pub(crate) fn raise_sequenced(&self, topic: Tag, payload: ErasedPayload, sequence: u64) -> DispatchResult {
        let message = Message {
            topic,
            payload,
            raised_on: ThreadTag::current(),
            sequence,
        };

        let matching = self
            .table
            .find_matching(topic, self.settings.ancestor_matching);
        trace!(
            sequence = message.sequence,
            topic = ?topic,
            listeners = matching.len(),
            "raising message"
        );

        let mut result = DispatchResult::default();
        for registration in matching {
            self.deliver(&registration, &message, &mut result);
        }
        result
    }

    fn deliver(&self, registration: &Arc<Registration>, message: &Message, result: &mut DispatchResult) {
        let handle = registration.handle();
        let found = message.payload.type_key();

        if !registration.is_alive() {
            trace!(%handle, "skipping listener of dropped owner");
            self.table.unregister(handle);
            return;
        }

        if let Some(expected) = registration.payload_key()
            && expected != found
        {
            warn!(
                %handle,
                expected = expected.name(),
                found = found.name(),
                "payload type mismatch"
            );
            result.failures.push(DeliveryFailure {
                handle,
                topic: registration.topic(),
                error: DeliveryError::PayloadTypeMismatch {
                    expected: expected.name(),
                    found: found.name(),
                },
            });
            return;
        }

        match registration.claim() {
            Claim::Exhausted => return,
            Claim::Last => {
                self.table.unregister(handle);
            }
            Claim::Fire => {}
        }

        match registration.target_thread() {
            Some(target) if !target.is_current() => {
                let registration = registration.clone();
                let message = message.clone();
                self.marshaler.post_to_thread(target.clone(), move || {
                    if registration.is_alive() {
                        registration.invoke(&message);
                    } else {
                        trace!(handle = %registration.handle(), "dropping queued call of dropped owner");
                    }
                });
                result.queued += 1;
            }
            _ => match catch_unwind(AssertUnwindSafe(|| registration.invoke(message))) {
                Ok(()) => {
                    trace!(%handle, sequence = message.sequence, "delivered inline");
                    result.delivered_inline += 1;
                }
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    warn!(%handle, %reason, "listener panicked");
                    result.failures.push(DeliveryFailure {
                        handle,
                        topic: registration.topic(),
                        error: DeliveryError::ListenerPanicked(reason),
                    });
                }
            },
        }
    }

    /// Run the calls queued for the configured frame thread.
    pub fn pump_frame(&self) -> crate::marshal::DrainReport {
        let report = self.marshaler.drain_thread(&self.settings.frame_thread);
        if report.executed + report.panicked > 0 {
            debug!(
                thread = %self.settings.frame_thread,
                executed = report.executed,
                panicked = report.panicked,
                "pumped frame queue"
            );
        }
        report
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("settings", &self.settings)
            .field("listeners", &self.table.len())
            .field("pending", &self.marshaler.pending_total())
            .field("awaiting_response", &self.responses.len())
            .finish_non_exhaustive()
    }
}
