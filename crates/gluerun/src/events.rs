//! # Event bus
//!
//! Fire-and-forget notifications with any number of subscribers per name.
//! `publish` runs every subscriber synchronously, in subscription order, on
//! the caller's own context. It has nothing to do with call/response.

use std::sync::Arc;
use std::sync::Weak;

use glueval::CanonicalValue;

use crate::fanout;
use crate::fanout::ListenerId;
use crate::fanout::ListenerResult;
use crate::fanout::ListenerTable;
use crate::lifecycle::Liveness;

struct BusInner {
    table: ListenerTable<CanonicalValue>,
    liveness: Liveness,
}

/// Handle to one subscription.
///
/// Unsubscribing is idempotent and stays safe after the bus is gone.
#[derive(Debug, Clone)]
pub struct Subscription {
    event: String,
    id: ListenerId,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Removes this subscription. Returns false if it was already removed.
    pub fn unsubscribe(&self) -> bool {
        let Some(bus) = self.bus.upgrade() else {
            return false;
        };
        let removed = bus.table.remove(&self.event, self.id);
        if removed {
            tracing::debug!(event = %self.event, listener = %self.id, "unsubscribed");
        }
        removed
    }
}

impl std::fmt::Debug for BusInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("listeners", &self.table.total()).finish()
    }
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                table: ListenerTable::new(),
                liveness: Liveness::new("EventBus"),
            }),
        }
    }

    pub fn subscribe<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&CanonicalValue) -> ListenerResult + Send + Sync + 'static,
    {
        if !self.inner.liveness.check("subscribe") {
            // inert handle
            return Subscription {
                event: event.to_string(),
                id: ListenerId(0),
                bus: Weak::new(),
            };
        }
        let id = self.inner.table.insert(event, Arc::new(callback));
        tracing::debug!(event, listener = %id, "subscribed");
        Subscription {
            event: event.to_string(),
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Removes `subscription` if it belongs to this bus.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        if !std::ptr::eq(subscription.bus.as_ptr(), Arc::as_ptr(&self.inner)) {
            return false;
        }
        subscription.unsubscribe()
    }

    /// Delivers `payload` to every current subscriber of `event`. Returns how
    /// many were called; publishing to a name nobody listens to delivers
    /// nothing and succeeds.
    pub fn publish(&self, event: &str, payload: &CanonicalValue) -> fanout::Result<usize> {
        if !self.inner.liveness.check("publish") {
            return Err(fanout::Error::Shutdown);
        }
        let delivered = self.inner.table.deliver(event, payload)?;
        tracing::trace!(event, delivered, "event published");
        Ok(delivered)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.table.count(event)
    }

    /// Drops every subscription. Returns how many there were.
    pub(crate) fn close(&self) -> usize {
        self.inner.liveness.close();
        self.inner.table.clear()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.inner, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        let payload = CanonicalValue::map([("foo", 123)]);
        assert_eq!(bus.publish("customEvent", &payload).unwrap(), 0);
    }

    #[test]
    fn test_subscribe_publish_unsubscribe() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = bus.subscribe("tick", move |v| {
            sink.lock().unwrap().push(v.clone());
            Ok(())
        });

        bus.publish("tick", &1.into()).unwrap();
        assert!(bus.unsubscribe(&sub));
        assert!(!bus.unsubscribe(&sub));
        bus.publish("tick", &2.into()).unwrap();

        assert_eq!(*seen.lock().unwrap(), [CanonicalValue::from(1)]);
        assert_eq!(bus.listener_count("tick"), 0);
    }

    #[test]
    fn test_foreign_subscription_is_ignored() {
        let a = EventBus::new();
        let b = EventBus::new();
        let sub = a.subscribe("x", |_| Ok(()));
        assert!(!b.unsubscribe(&sub));
        assert_eq!(a.listener_count("x"), 1);
    }

    #[test]
    fn test_unsubscribe_after_close_is_benign() {
        let bus = EventBus::new();
        let sub = bus.subscribe("x", |_| Ok(()));
        assert_eq!(bus.close(), 1);
        assert!(!sub.unsubscribe());
    }
}
