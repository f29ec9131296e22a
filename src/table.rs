//! Handler registration table.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::lifetime::{Lifetime, OwnerWatch};
use crate::marshal::ThreadTag;
use crate::payload::{Message, TypeKey};
use crate::registry::TagRegistry;
use crate::tag::Tag;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Opaque id of one registration. Process-unique, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(NonZeroU64);

impl ListenerHandle {
    fn next() -> Self {
        let raw = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Erased listener entry point.
pub type Invoker = Arc<dyn Fn(&Message) + Send + Sync>;

/// Where a listener must run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ThreadAffinity {
    /// Inline on whichever thread raises.
    #[default]
    AnyThread,
    /// On the thread that registered the listener.
    OwningThread,
    /// On the named logical thread.
    Named(ThreadTag),
}

/// How many times a registration may fire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ListenMode {
    #[default]
    Persistent,
    OneShot,
    /// Fire at most `n` times. `Times(0)` behaves like `OneShot`.
    Times(u32),
}

impl ListenMode {
    fn limit(self) -> Option<u32> {
        match self {
            Self::Persistent => None,
            Self::OneShot => Some(1),
            Self::Times(n) => Some(n.max(1)),
        }
    }
}

/// Options for a new registration.
///
/// ```ignore
/// let opts = ListenOptions::new()
///     .on_thread("ui")
///     .times(3)
///     .owned_by(&lifetime);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ListenOptions {
    pub affinity: ThreadAffinity,
    pub mode: ListenMode,
    pub owner: Option<OwnerWatch>,
}

impl ListenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn affinity(mut self, affinity: ThreadAffinity) -> Self {
        self.affinity = affinity;
        self
    }

    /// Shortcut for `affinity(ThreadAffinity::Named(..))`.
    pub fn on_thread(self, thread: impl Into<ThreadTag>) -> Self {
        self.affinity(ThreadAffinity::Named(thread.into()))
    }

    pub fn on_owning_thread(self) -> Self {
        self.affinity(ThreadAffinity::OwningThread)
    }

    pub fn mode(mut self, mode: ListenMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn once(self) -> Self {
        self.mode(ListenMode::OneShot)
    }

    pub fn times(self, n: u32) -> Self {
        self.mode(ListenMode::Times(n))
    }

    /// Tie the registration to `owner`.
    pub fn owned_by(mut self, owner: &Lifetime) -> Self {
        self.owner = Some(owner.watch());
        self
    }
}

/// Result of claiming one firing of a registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Claim {
    /// May fire; more firings remain.
    Fire,
    /// May fire; this is the final one.
    Last,
    /// Already used up.
    Exhausted,
}

/// One subscription record.
pub struct Registration {
    handle: ListenerHandle,
    topic: Tag,
    invoker: Invoker,
    payload_key: Option<TypeKey>,
    affinity: ThreadAffinity,
    owning_thread: ThreadTag,
    mode: ListenMode,
    owner: Option<OwnerWatch>,
    fired: AtomicU32,
}

impl Registration {
    #[inline]
    pub fn handle(&self) -> ListenerHandle {
        self.handle
    }

    #[inline]
    pub fn topic(&self) -> Tag {
        self.topic
    }

    /// Expected payload type; `None` accepts every payload.
    #[inline]
    pub fn payload_key(&self) -> Option<TypeKey> {
        self.payload_key
    }

    pub fn affinity(&self) -> &ThreadAffinity {
        &self.affinity
    }

    pub fn mode(&self) -> ListenMode {
        self.mode
    }

    /// `false` once the owner's [`Lifetime`] is gone.
    pub fn is_alive(&self) -> bool {
        self.owner.as_ref().is_none_or(OwnerWatch::is_alive)
    }

    /// Thread this registration must run on, or `None` for any thread.
    pub fn target_thread(&self) -> Option<&ThreadTag> {
        match &self.affinity {
            ThreadAffinity::AnyThread => None,
            ThreadAffinity::OwningThread => Some(&self.owning_thread),
            ThreadAffinity::Named(tag) => Some(tag),
        }
    }

    pub(crate) fn claim(&self) -> Claim {
        let Some(limit) = self.mode.limit() else {
            return Claim::Fire;
        };
        match self
            .fired
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            }) {
            Ok(prev) if prev + 1 == limit => Claim::Last,
            Ok(_) => Claim::Fire,
            Err(_) => Claim::Exhausted,
        }
    }

    pub(crate) fn invoke(&self, message: &Message) {
        (self.invoker)(message)
    }

    fn owned_by(&self, owner: &Lifetime) -> bool {
        self.owner.as_ref().is_some_and(|w| w.belongs_to(owner))
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("handle", &self.handle)
            .field("topic", &self.topic)
            .field("payload_key", &self.payload_key)
            .field("affinity", &self.affinity)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct TableState {
    buckets: HashMap<Tag, Vec<Arc<Registration>>>,
    index: HashMap<ListenerHandle, Tag>,
}

impl TableState {
    fn remove(&mut self, handle: ListenerHandle) -> bool {
        let Some(topic) = self.index.remove(&handle) else {
            return false;
        };
        if let Some(bucket) = self.buckets.get_mut(&topic) {
            bucket.retain(|r| r.handle != handle);
            if bucket.is_empty() {
                self.buckets.remove(&topic);
            }
        }
        true
    }

    /// Drop dead-owner entries from one bucket.
    fn evict_dead(&mut self, topic: Tag) {
        let Some(bucket) = self.buckets.get_mut(&topic) else {
            return;
        };
        let mut evicted = Vec::new();
        bucket.retain(|r| {
            let alive = r.is_alive();
            if !alive {
                evicted.push(r.handle);
            }
            alive
        });
        if bucket.is_empty() {
            self.buckets.remove(&topic);
        }
        for handle in evicted {
            trace!(%handle, "evicted registration of dropped owner");
            self.index.remove(&handle);
        }
    }
}

/// Topic → registrations, in registration order per topic.
///
/// One lock guards the whole table, so register, unregister and lookup are
/// linearizable. Listener code never runs under it.
pub struct HandlerTable {
    registry: Arc<TagRegistry>,
    state: Mutex<TableState>,
}

impl HandlerTable {
    pub fn new(registry: Arc<TagRegistry>) -> Self {
        Self {
            registry,
            state: Mutex::new(TableState::default()),
        }
    }

    /// Add a registration for `topic`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownTopic`] if `topic` is not interned in this table's registry.
    pub fn register(
        &self,
        topic: Tag,
        payload_key: Option<TypeKey>,
        invoker: Invoker,
        options: ListenOptions,
    ) -> Result<ListenerHandle> {
        if !self.registry.contains(topic) {
            return Err(Error::UnknownTopic(format!("{:?}", topic)));
        }

        let handle = ListenerHandle::next();
        let registration = Arc::new(Registration {
            handle,
            topic,
            invoker,
            payload_key,
            affinity: options.affinity,
            owning_thread: ThreadTag::current(),
            mode: options.mode,
            owner: options.owner,
            fired: AtomicU32::new(0),
        });

        let path = self.registry.path_of(topic);
        debug!(
            %handle,
            topic = path.as_deref().unwrap_or("?"),
            payload = ?payload_key,
            "registered listener"
        );

        let mut state = self.state.lock();
        state.buckets.entry(topic).or_default().push(registration);
        state.index.insert(handle, topic);
        Ok(handle)
    }

    /// Remove a registration. Unknown or already removed handles are a no-op.
    pub fn unregister(&self, handle: ListenerHandle) -> bool {
        let removed = self.state.lock().remove(handle);
        if removed {
            debug!(%handle, "unregistered listener");
        }
        removed
    }

    /// Remove every registration tied to `owner`. Returns how many were removed.
    pub fn unregister_owner(&self, owner: &Lifetime) -> usize {
        let mut state = self.state.lock();
        let handles: Vec<ListenerHandle> = state
            .buckets
            .values()
            .flatten()
            .filter(|r| r.owned_by(owner))
            .map(|r| r.handle)
            .collect();
        for &handle in &handles {
            state.remove(handle);
        }
        if !handles.is_empty() {
            debug!(owner = owner.id(), count = handles.len(), "unregistered owner");
        }
        handles.len()
    }

    pub fn is_registered(&self, handle: ListenerHandle) -> bool {
        self.state.lock().index.contains_key(&handle)
    }

    /// Total number of registrations.
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registrations directly on `topic`.
    pub fn listener_count(&self, topic: Tag) -> usize {
        self.state.lock().buckets.get(&topic).map_or(0, Vec::len)
    }

    /// Registrations that should see a message raised on `topic`.
    ///
    /// Exact-topic registrations come first in registration order, followed by
    /// those on ancestor topics from nearest to farthest. Dead-owner entries in
    /// the visited buckets are evicted along the way.
    pub fn find_matching(
        &self,
        topic: Tag,
        include_ancestor_topics: bool,
    ) -> Vec<Arc<Registration>> {
        let chain: Arc<[Tag]> = match include_ancestor_topics {
            true => self
                .registry
                .ancestors(topic)
                .unwrap_or_else(|| Arc::from([topic])),
            false => Arc::from([topic]),
        };

        let mut state = self.state.lock();
        let mut out = Vec::new();
        for &t in chain.iter().rev() {
            state.evict_dead(t);
            if let Some(bucket) = state.buckets.get(&t) {
                out.extend(bucket.iter().cloned());
            }
        }
        out
    }

    /// Evict dead-owner entries from every bucket.
    pub fn purge_dead(&self) -> usize {
        let mut state = self.state.lock();
        let before = state.index.len();
        let topics: Vec<Tag> = state.buckets.keys().copied().collect();
        for topic in topics {
            state.evict_dead(topic);
        }
        before - state.index.len()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("registrations", &self.len())
            .finish_non_exhaustive()
    }
}
