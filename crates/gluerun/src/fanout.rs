//! # Listener fan-out
//!
//! The name-keyed listener table behind both the event bus and the message
//! router. Delivery works on a snapshot taken when it starts, so listeners may
//! subscribe or unsubscribe (themselves included) from inside a callback.
//! One failing or panicking listener never stops delivery to the rest; all
//! failures are reported together once the fan-out is done.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;

use crate::lifecycle::panic_message;

/// Strong type for listener identifiers.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Failure returned by a listener callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerError(pub String);

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ListenerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for ListenerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

pub type ListenerResult = std::result::Result<(), ListenerError>;

/// One listener that failed during a fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFailure {
    pub listener: ListenerId,
    /// Position in delivery order.
    pub position: usize,
    pub message: String,
    pub panicked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("{} of {attempted} listener(s) for `{name}` failed", .failures.len())]
    Listeners {
        name: String,
        attempted: usize,
        failures: Vec<ListenerFailure>,
    },
    #[error("bridge has been torn down")]
    Shutdown,
}

impl Error {
    pub fn failures(&self) -> &[ListenerFailure] {
        match self {
            Self::Listeners { failures, .. } => failures,
            Self::Shutdown => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) type Callback<A> = Arc<dyn Fn(&A) -> ListenerResult + Send + Sync>;

struct Slot<A> {
    id: ListenerId,
    callback: Callback<A>,
}

impl<A> Clone for Slot<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: self.callback.clone(),
        }
    }
}

pub(crate) struct ListenerTable<A> {
    slots: DashMap<String, Vec<Slot<A>>>,
    next_id: AtomicU64,
}

impl<A> ListenerTable<A> {
    pub(crate) fn new() -> Self {
        Self {
            slots: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn insert(&self, name: &str, callback: Callback<A>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots
            .entry(name.to_string())
            .or_default()
            .push(Slot { id, callback });
        id
    }

    /// Removes one listener. Returns false if it was already gone.
    pub(crate) fn remove(&self, name: &str, id: ListenerId) -> bool {
        let removed = match self.slots.get_mut(name) {
            Some(mut slots) => {
                let before = slots.len();
                slots.retain(|slot| slot.id != id);
                slots.len() != before
            }
            None => false,
        };
        if removed {
            self.slots.remove_if(name, |_, slots| slots.is_empty());
        }
        removed
    }

    pub(crate) fn count(&self, name: &str) -> usize {
        self.slots.get(name).map_or(0, |slots| slots.len())
    }

    pub(crate) fn total(&self) -> usize {
        self.slots.iter().map(|entry| entry.value().len()).sum()
    }

    /// Drops every listener. Returns how many there were.
    pub(crate) fn clear(&self) -> usize {
        let total = self.total();
        self.slots.clear();
        total
    }

    fn snapshot(&self, name: &str) -> Vec<Slot<A>> {
        self.slots
            .get(name)
            .map(|slots| slots.value().clone())
            .unwrap_or_default()
    }

    /// Calls every listener registered under `name` when delivery starts, in
    /// registration order. Returns the number of listeners called.
    pub(crate) fn deliver(&self, name: &str, arg: &A) -> Result<usize> {
        let snapshot = self.snapshot(name);
        let attempted = snapshot.len();
        let mut failures = Vec::new();

        for (position, slot) in snapshot.iter().enumerate() {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| (slot.callback)(arg)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => ListenerFailure {
                    listener: slot.id,
                    position,
                    message: e.0,
                    panicked: false,
                },
                Err(panic) => ListenerFailure {
                    listener: slot.id,
                    position,
                    message: panic_message(panic.as_ref()),
                    panicked: true,
                },
            };
            tracing::warn!(name, listener = %failure.listener, panicked = failure.panicked, error = %failure.message, "listener failed");
            failures.push(failure);
        }

        if failures.is_empty() {
            Ok(attempted)
        } else {
            Err(Error::Listeners {
                name: name.to_string(),
                attempted,
                failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<u32>>>, tag: u32) -> Callback<u32> {
        let log = log.clone();
        Arc::new(move |v: &u32| -> ListenerResult {
            log.lock().unwrap().push(tag * 100 + v);
            Ok(())
        })
    }

    #[test]
    fn test_delivery_order() {
        let table = ListenerTable::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        table.insert("n", recorder(&log, 1));
        table.insert("n", recorder(&log, 2));
        table.insert("other", recorder(&log, 3));

        assert_eq!(table.deliver("n", &7).unwrap(), 2);
        assert_eq!(*log.lock().unwrap(), [107, 207]);
        assert_eq!(table.deliver("nobody", &7).unwrap(), 0);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let table: ListenerTable<u32> = ListenerTable::new();
        let id = table.insert("n", Arc::new(|_: &u32| -> ListenerResult { Ok(()) }));
        assert!(table.remove("n", id));
        assert!(!table.remove("n", id));
        assert_eq!(table.count("n"), 0);
        assert_eq!(table.total(), 0);
    }

    #[test]
    fn test_failures_are_collected() {
        let table = ListenerTable::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        table.insert("n", recorder(&log, 1));
        let bad = table.insert("n", Arc::new(|_: &u32| -> ListenerResult { Err("nope".into()) }));
        let boom = table.insert("n", Arc::new(|_: &u32| -> ListenerResult { panic!("listener blew up") }));
        table.insert("n", recorder(&log, 4));

        let err = table.deliver("n", &1).unwrap_err();
        assert_eq!(*log.lock().unwrap(), [101, 401]);
        assert_eq!(err.failures().len(), 2);
        assert_eq!(err.failures()[0].listener, bad);
        assert_eq!(err.failures()[0].message, "nope");
        assert_eq!(err.failures()[1].listener, boom);
        assert_eq!(err.failures()[1].position, 2);
        assert!(err.failures()[1].panicked);
        assert_eq!(err.to_string(), "2 of 4 listener(s) for `n` failed");
    }
}
