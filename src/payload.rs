//! Type-erased message payloads.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::marshal::ThreadTag;
use crate::tag::Tag;

/// Identity of a payload's native type. Compares by [`TypeId`] only.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Human-readable type name, for diagnostics only.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A payload of any `Send + Sync` type, shared by reference count.
///
/// Cloning is cheap. The same value is handed to every listener and to any
/// queued cross-thread call.
#[derive(Clone)]
pub struct ErasedPayload {
    key: TypeKey,
    value: Arc<dyn Any + Send + Sync>,
}

impl ErasedPayload {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            key: TypeKey::of::<T>(),
            value,
        }
    }

    #[inline]
    pub fn type_key(&self) -> TypeKey {
        self.key
    }

    #[inline]
    pub fn is<T: Any>(&self) -> bool {
        self.key == TypeKey::of::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Like [`downcast_ref`](Self::downcast_ref), reporting the mismatch.
    pub fn expect_type<T: Any>(&self) -> Result<&T> {
        self.downcast_ref::<T>().ok_or(Error::PayloadTypeMismatch {
            expected: std::any::type_name::<T>(),
            found: self.key.name,
        })
    }
}

impl fmt::Debug for ErasedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErasedPayload").field(&self.key).finish()
    }
}

/// One raised message as seen by listeners.
#[derive(Clone, Debug)]
pub struct Message {
    pub topic: Tag,
    pub payload: ErasedPayload,
    /// Thread that called `raise`.
    pub raised_on: ThreadTag,
    /// Process-wide, increasing per raise.
    pub sequence: u64,
}

impl Message {
    /// Shortcut for `self.payload.downcast_ref()`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }
}
