//! # Message router
//!
//! Named messages travel in one of two directions, each with its own routing
//! table. An observer of one direction never sees posts made in the other,
//! so a side cannot loop a message back to itself.

use std::sync::Arc;
use std::sync::Weak;

use glueval::CanonicalValue;
use glueval::MarshalError;
use glueval::ValueMarshaler;

use crate::fanout;
use crate::fanout::ListenerId;
use crate::fanout::ListenerResult;
use crate::fanout::ListenerTable;
use crate::host::Side;
use crate::lifecycle::Liveness;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Native → script.
    ToScript,
    /// Script → native.
    ToNative,
}

impl Direction {
    /// The side that observes messages travelling this way.
    pub fn receiver(self) -> Side {
        match self {
            Self::ToScript => Side::Script,
            Self::ToNative => Side::Native,
        }
    }

    pub fn sender(self) -> Side {
        self.receiver().other()
    }
}

/// A posted message. Observers get a shared, read-only view of it.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub name: String,
    pub payload: CanonicalValue,
    pub direction: Direction,
}

impl Message {
    /// The payload in the receiving runtime's own representation.
    pub fn payload_into<M: ValueMarshaler>(&self, marshaler: &M) -> Result<M::Native, MarshalError> {
        marshaler.from_canonical(&self.payload)
    }
}

struct RouterInner {
    to_script: ListenerTable<Message>,
    to_native: ListenerTable<Message>,
    liveness: Liveness,
}

impl RouterInner {
    fn table(&self, direction: Direction) -> &ListenerTable<Message> {
        match direction {
            Direction::ToScript => &self.to_script,
            Direction::ToNative => &self.to_native,
        }
    }
}

/// Handle to one observer. `unsubscribe` is idempotent and may be called from
/// inside the observer itself.
#[derive(Clone)]
pub struct ObserverHandle {
    direction: Direction,
    name: String,
    id: ListenerId,
    router: Weak<RouterInner>,
}

impl ObserverHandle {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn unsubscribe(&self) -> bool {
        self.router
            .upgrade()
            .is_some_and(|router| router.table(self.direction).remove(&self.name, self.id))
    }
}

impl std::fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("direction", &self.direction)
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}

#[derive(Clone)]
pub struct MessageRouter {
    inner: Arc<RouterInner>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RouterInner {
                to_script: ListenerTable::new(),
                to_native: ListenerTable::new(),
                liveness: Liveness::new("MessageRouter"),
            }),
        }
    }

    /// Delivers a message to the observers of `name` in `direction`, on the
    /// caller's context. Returns how many observers were called.
    pub fn post(&self, direction: Direction, name: &str, payload: CanonicalValue) -> fanout::Result<usize> {
        if !self.inner.liveness.check("post") {
            return Err(fanout::Error::Shutdown);
        }
        self.route(Message {
            name: name.to_string(),
            payload,
            direction,
        })
    }

    pub fn observe<F>(&self, direction: Direction, name: &str, observer: F) -> ObserverHandle
    where
        F: Fn(&Message) -> ListenerResult + Send + Sync + 'static,
    {
        if !self.inner.liveness.check("observe") {
            return ObserverHandle {
                direction,
                name: name.to_string(),
                id: ListenerId(0),
                router: Weak::new(),
            };
        }
        let id = self.inner.table(direction).insert(name, Arc::new(observer));
        tracing::debug!(?direction, name, observer = %id, "observing");
        ObserverHandle {
            direction,
            name: name.to_string(),
            id,
            router: Arc::downgrade(&self.inner),
        }
    }

    /// Removes `handle` if it belongs to this router.
    pub fn unobserve(&self, handle: &ObserverHandle) -> bool {
        if !std::ptr::eq(handle.router.as_ptr(), Arc::as_ptr(&self.inner)) {
            return false;
        }
        handle.unsubscribe()
    }

    pub fn observer_count(&self, direction: Direction, name: &str) -> usize {
        self.inner.table(direction).count(name)
    }

    /// Delivery for a message that was queued onto the receiving context.
    /// After teardown it is dropped quietly: the post itself was legal.
    pub(crate) fn deliver_queued(&self, message: Message) -> fanout::Result<usize> {
        if !self.inner.liveness.is_live() {
            tracing::debug!(name = %message.name, direction = ?message.direction, "queued message dropped after teardown");
            return Err(fanout::Error::Shutdown);
        }
        self.route(message)
    }

    /// Drops every observer in both directions. Returns how many there were.
    pub(crate) fn close(&self) -> usize {
        self.inner.liveness.close();
        self.inner.to_script.clear() + self.inner.to_native.clear()
    }

    fn route(&self, message: Message) -> fanout::Result<usize> {
        let delivered = self.inner.table(message.direction).deliver(&message.name, &message)?;
        tracing::trace!(name = %message.name, direction = ?message.direction, delivered, "message routed");
        Ok(delivered)
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}
