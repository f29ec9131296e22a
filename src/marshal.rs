//! Cross-thread delivery.
//!
//! Listeners bound to a thread never run on the raiser's thread. The bus posts
//! a closure to that thread's queue, and the thread itself runs the queue by
//! calling [`ThreadMarshaler::drain_current_thread`] (typically once per frame).

use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;
use tracing::{trace, warn};

thread_local! {
    static CURRENT: RefCell<Option<ThreadTag>> = const { RefCell::new(None) };
}

/// Logical thread identity used for listener affinity.
///
/// A thread is `Named` while it has a name bound with
/// [`ThreadTag::bind_current`], and `Native` otherwise.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum ThreadTag {
    Named(Arc<str>),
    Native(ThreadId),
}

impl ThreadTag {
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self::Named(name.into())
    }

    /// Tag of the calling thread.
    pub fn current() -> Self {
        CURRENT
            .with(|cur| cur.borrow().clone())
            .unwrap_or_else(|| Self::Native(std::thread::current().id()))
    }

    /// `true` if `self` names the calling thread, by its bound name or its native id.
    pub fn is_current(&self) -> bool {
        match self {
            Self::Native(id) => *id == std::thread::current().id(),
            named => *named == Self::current(),
        }
    }

    /// Bind `tag` to the calling thread. Returns the previous binding.
    pub fn bind_current(tag: ThreadTag) -> Option<ThreadTag> {
        CURRENT.with(|cur| cur.borrow_mut().replace(tag))
    }

    /// Remove the calling thread's binding.
    pub fn unbind_current() -> Option<ThreadTag> {
        CURRENT.with(|cur| cur.borrow_mut().take())
    }

    /// Bind `tag` until the guard drops, then restore the previous binding.
    pub fn scoped(tag: ThreadTag) -> BoundThread {
        BoundThread {
            previous: Self::bind_current(tag),
        }
    }
}

impl fmt::Debug for ThreadTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "ThreadTag({name})"),
            Self::Native(id) => write!(f, "ThreadTag({id:?})"),
        }
    }
}

impl fmt::Display for ThreadTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::Native(id) => write!(f, "{id:?}"),
        }
    }
}

impl From<&str> for ThreadTag {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

/// Guard returned by [`ThreadTag::scoped`].
#[must_use = "the binding is undone when the guard drops"]
pub struct BoundThread {
    previous: Option<ThreadTag>,
}

impl Drop for BoundThread {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|cur| *cur.borrow_mut() = previous);
    }
}

/// A closure waiting in a thread's queue.
pub struct PendingCall {
    invoke: Box<dyn FnOnce() + Send + 'static>,
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall").finish_non_exhaustive()
    }
}

/// Outcome of one drain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub executed: usize,
    pub panicked: usize,
}

impl std::ops::AddAssign for DrainReport {
    fn add_assign(&mut self, other: Self) {
        self.executed += other.executed;
        self.panicked += other.panicked;
    }
}

/// Per-thread FIFO queues of pending calls.
#[derive(Default)]
pub struct ThreadMarshaler {
    queues: Mutex<HashMap<ThreadTag, VecDeque<PendingCall>>>,
}

impl ThreadMarshaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `call` for `target`. Never runs it inline.
    pub fn post_to_thread(&self, target: ThreadTag, call: impl FnOnce() + Send + 'static) {
        trace!(target_thread = %target, "queued cross-thread call");
        self.queues
            .lock()
            .entry(target)
            .or_default()
            .push_back(PendingCall {
                invoke: Box::new(call),
            });
    }

    /// Run every call queued for the calling thread.
    ///
    /// Covers the queue of its bound name and the queue of its native id,
    /// which holds calls for listeners registered before a name was bound.
    pub fn drain_current_thread(&self) -> DrainReport {
        let current = ThreadTag::current();
        let mut report = self.drain_queue(&current);
        if matches!(current, ThreadTag::Named(_)) {
            report += self.drain_queue(&ThreadTag::Native(std::thread::current().id()));
        }
        report
    }

    /// Run the queue of `tag`, with the calling thread bound to `tag` meanwhile.
    ///
    /// The calling thread's native-id queue is drained too.
    pub fn drain_thread(&self, tag: &ThreadTag) -> DrainReport {
        let _bound = ThreadTag::scoped(tag.clone());
        self.drain_current_thread()
    }

    /// Calls waiting for `tag`.
    pub fn pending(&self, tag: &ThreadTag) -> usize {
        self.queues.lock().get(tag).map_or(0, VecDeque::len)
    }

    pub fn pending_total(&self) -> usize {
        self.queues.lock().values().map(VecDeque::len).sum()
    }

    /// Calls posted while draining wait for the next drain.
    fn drain_queue(&self, tag: &ThreadTag) -> DrainReport {
        let batch = match self.queues.lock().get_mut(tag) {
            Some(queue) => std::mem::take(queue),
            None => return DrainReport::default(),
        };

        let mut report = DrainReport::default();
        for call in batch {
            match catch_unwind(AssertUnwindSafe(call.invoke)) {
                Ok(()) => report.executed += 1,
                Err(panic) => {
                    report.panicked += 1;
                    warn!(
                        thread = %tag,
                        reason = %panic_message(panic.as_ref()),
                        "queued call panicked"
                    );
                }
            }
        }
        report
    }
}

impl fmt::Debug for ThreadMarshaler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadMarshaler")
            .field("pending", &self.pending_total())
            .finish()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
