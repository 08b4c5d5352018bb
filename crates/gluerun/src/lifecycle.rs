//! Teardown guard and panic reporting shared by the bridge components.

use std::any::Any;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

/// Tracks whether a component has been torn down.
///
/// Using a component after teardown is a programming error: debug builds
/// panic, release builds log and let the caller fail with `Shutdown`.
#[derive(Debug)]
pub(crate) struct Liveness {
    component: &'static str,
    closed: AtomicBool,
}

impl Liveness {
    pub(crate) fn new(component: &'static str) -> Self {
        Self {
            component,
            closed: AtomicBool::new(false),
        }
    }

    /// Marks the component closed. Returns false if it already was.
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_live(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Returns true if `op` may proceed.
    pub(crate) fn check(&self, op: &str) -> bool {
        if self.is_live() {
            return true;
        }
        tracing::error!(component = self.component, op, "called after teardown");
        debug_assert!(false, "{}::{} called after teardown", self.component, op);
        false
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
