//! Owner lifetime tokens.
//!
//! A listener owner keeps a [`Lifetime`]; each registration it creates keeps an
//! [`OwnerWatch`]. Once every clone of the `Lifetime` is dropped, the watches
//! report dead and the bus stops invoking, evicts the registrations, and turns
//! already queued cross-thread calls into no-ops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Strong side, held by the owner.
#[derive(Clone, Debug)]
pub struct Lifetime(Arc<u64>);

impl Lifetime {
    pub fn new() -> Self {
        Self(Arc::new(NEXT_OWNER.fetch_add(1, Ordering::Relaxed)))
    }

    /// Owner id, for logs.
    pub fn id(&self) -> u64 {
        *self.0
    }

    pub fn watch(&self) -> OwnerWatch {
        OwnerWatch {
            id: *self.0,
            token: Arc::downgrade(&self.0),
        }
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Self::new()
    }
}

/// Weak side, held by registrations.
#[derive(Clone, Debug)]
pub struct OwnerWatch {
    id: u64,
    token: Weak<u64>,
}

impl OwnerWatch {
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.token.strong_count() > 0
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// `true` if this watch was created from `owner`.
    pub fn belongs_to(&self, owner: &Lifetime) -> bool {
        self.id == owner.id()
    }
}
