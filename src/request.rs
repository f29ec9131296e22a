//! Request/response on top of [`MessageBus`].
//!
//! A request is an ordinary raise whose sequence number keys a one-shot
//! response callback. Listeners registered with
//! [`listen_request`](MessageBus::listen_request) get a [`Responder`] for that
//! sequence; the first matching response runs the callback and clears it.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::bus::{next_sequence, DispatchResult, MessageBus};
use crate::error::{Error, Result};
use crate::marshal::panic_message;
use crate::payload::{ErasedPayload, Message, TypeKey};
use crate::table::{ListenOptions, ListenerHandle};
use crate::tag::Tag;

type ResponseFn = Box<dyn FnOnce(&ErasedPayload) + Send + 'static>;

struct PendingResponse {
    topic: Tag,
    expects: TypeKey,
    callback: ResponseFn,
}

/// Response callbacks waiting for an answer, keyed by request sequence.
#[derive(Default)]
pub(crate) struct ResponseTable {
    pending: Mutex<HashMap<u64, PendingResponse>>,
}

impl ResponseTable {
    fn insert(&self, sequence: u64, pending: PendingResponse) {
        self.pending.lock().insert(sequence, pending);
    }

    fn is_pending(&self, sequence: u64) -> bool {
        self.pending.lock().contains_key(&sequence)
    }

    fn cancel(&self, sequence: u64) -> bool {
        self.pending.lock().remove(&sequence).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Run the callback for `sequence` with `payload`.
    ///
    /// A payload of the wrong type leaves the callback in place.
    fn complete(&self, sequence: u64, payload: ErasedPayload) -> Result<bool> {
        let pending = {
            let mut table = self.pending.lock();
            let Some(entry) = table.get(&sequence) else {
                return Ok(false);
            };
            let found = payload.type_key();
            if entry.expects != found {
                return Err(Error::PayloadTypeMismatch {
                    expected: entry.expects.name(),
                    found: found.name(),
                });
            }
            match table.remove(&sequence) {
                Some(entry) => entry,
                None => return Ok(false),
            }
        };

        let PendingResponse { topic, callback, .. } = pending;
        if let Err(panic) = catch_unwind(AssertUnwindSafe(move || callback(&payload))) {
            warn!(
                sequence,
                topic = ?topic,
                reason = %panic_message(panic.as_ref()),
                "response callback panicked"
            );
        } else {
            trace!(sequence, "response delivered");
        }
        Ok(true)
    }
}

/// Handle given to request listeners for answering one request.
#[derive(Clone)]
pub struct Responder {
    sequence: u64,
    responses: Arc<ResponseTable>,
}

impl Responder {
    /// Sequence number of the request being answered.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Answer the request. See [`MessageBus::respond`].
    pub fn respond<R: Any + Send + Sync>(&self, payload: R) -> Result<bool> {
        self.responses.complete(self.sequence, ErasedPayload::new(payload))
    }

    /// `false` once the request was answered or cancelled.
    pub fn is_open(&self) -> bool {
        self.responses.is_pending(self.sequence)
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// A raised request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    /// Key for [`MessageBus::respond`] and [`MessageBus::cancel_request`].
    pub sequence: u64,
    pub dispatch: DispatchResult,
}

impl MessageBus {
    /// Raise `payload` on `topic` and run `on_response` with the first
    /// response of type `R`.
    ///
    /// When no listener received the request, the callback is dropped
    /// straight away and never runs.
    pub fn request<T, R, F>(&self, topic: Tag, payload: T, on_response: F) -> Request
    where
        T: Any + Send + Sync,
        R: Any + Send + Sync,
        F: FnOnce(&R) + Send + 'static,
    {
        let sequence = next_sequence();
        self.responses().insert(
            sequence,
            PendingResponse {
                topic,
                expects: TypeKey::of::<R>(),
                callback: Box::new(move |payload: &ErasedPayload| {
                    if let Some(response) = payload.downcast_ref::<R>() {
                        on_response(response);
                    }
                }),
            },
        );

        let dispatch = self.raise_sequenced(topic, ErasedPayload::new(payload), sequence);
        if dispatch.delivered() == 0 && self.responses().cancel(sequence) {
            debug!(sequence, topic = ?topic, "request reached no listener");
        }
        Request { sequence, dispatch }
    }

    /// Listen for requests carrying `T` on `topic` and its descendants.
    ///
    /// Plain raises reach these listeners too; their responder is simply
    /// never open.
    pub fn listen_request<T, F>(&self, topic: Tag, options: ListenOptions, listener: F) -> Result<ListenerHandle>
    where
        T: Any + Send + Sync,
        F: Fn(&T, &Responder) + Send + Sync + 'static,
    {
        let responses = self.responses().clone();
        self.table().register(
            topic,
            Some(TypeKey::of::<T>()),
            Arc::new(move |message: &Message| {
                if let Some(payload) = message.payload::<T>() {
                    let responder = Responder {
                        sequence: message.sequence,
                        responses: responses.clone(),
                    };
                    listener(payload, &responder);
                }
            }),
            options,
        )
    }

    /// Answer the request raised with `sequence`.
    ///
    /// Runs the response callback on the calling thread. Returns `Ok(false)`
    /// when the request was already answered, cancelled or never existed.
    ///
    /// # Errors
    ///
    /// [`Error::PayloadTypeMismatch`] when `payload` is not the type the
    /// requester expects. The request stays open.
    pub fn respond<R: Any + Send + Sync>(&self, sequence: u64, payload: R) -> Result<bool> {
        self.responses().complete(sequence, ErasedPayload::new(payload))
    }

    /// `true` while the request is waiting for its response.
    pub fn is_response_pending(&self, sequence: u64) -> bool {
        self.responses().is_pending(sequence)
    }

    /// Drop the response callback of a request. Returns `false` if none was waiting.
    pub fn cancel_request(&self, sequence: u64) -> bool {
        self.responses().cancel(sequence)
    }
}
