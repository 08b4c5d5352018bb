//! # Call dispatch with callId correlation
//!
//! The [`Dispatcher`] resolves a method, checks arity, marshals arguments and
//! runs the invoker. Async calls are tracked in a pending table keyed by
//! [`CallId`]; each one is settled exactly once, by whichever of result,
//! cancellation, timeout or shutdown gets there first.
//!
//! ## Philosophy
//!
//! - **Fail Before Invoking**: Dispatch, arity and marshal errors reject the
//!   call without creating a pending entry or touching the invoker.
//! - **Exactly Once**: A settlement removes the pending entry. Anything that
//!   arrives for the same callId afterwards is logged and discarded.
//! - **Cooperative Cancellation**: Cancelling only forgets the call. Work
//!   already running on the other side is never interrupted; its result is
//!   dropped when it arrives.
//! - **Lazy Deadlines**: A timeout is enforced by the promise being awaited.
//!   Calls nobody awaits are visible through [`Dispatcher::stale_calls`].

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::oneshot;

use glueval::CanonicalValue;
use glueval::MarshalError;
use glueval::ValueMarshaler;

use crate::config::BridgeConfig;
use crate::lifecycle::Liveness;
use crate::lifecycle::panic_message;
use crate::registry::CallMode;
use crate::registry::Invoker;
use crate::registry::MethodDescriptor;
use crate::registry::MethodRegistry;
use crate::registry::Rejection;

/// Correlation token for one invocation.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// Lifecycle of a call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CallState {
    Issued,
    Marshaling,
    Invoking,
    Settled,
    TimedOut,
    Cancelled,
}

/// Flat error discriminant carried by a rejected promise.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    #[serde(rename = "ArityError")]
    Arity,
    #[serde(rename = "MarshalError")]
    Marshal,
    #[serde(rename = "DispatchError")]
    Dispatch,
    #[serde(rename = "InvokeError")]
    Invoke,
    TimedOut,
    Cancelled,
    #[serde(rename = "ShutdownError")]
    Shutdown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Arity => "ArityError",
            Self::Marshal => "MarshalError",
            Self::Dispatch => "DispatchError",
            Self::Invoke => "InvokeError",
            Self::TimedOut => "TimedOut",
            Self::Cancelled => "Cancelled",
            Self::Shutdown => "ShutdownError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("no method registered for `{identifier}`")]
    Dispatch { identifier: String },
    #[error("`{identifier}` takes {expected} argument(s), got {found}")]
    Arity {
        identifier: String,
        expected: usize,
        found: usize,
    },
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    #[error("`{identifier}` rejected: {rejection}")]
    Rejected {
        identifier: String,
        rejection: Rejection,
    },
    #[error("`{identifier}` timed out after {after:?}")]
    TimedOut { identifier: String, after: Duration },
    #[error("call was cancelled")]
    Cancelled,
    #[error("bridge has been torn down")]
    Shutdown,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Dispatch { .. } => ErrorKind::Dispatch,
            Self::Arity { .. } => ErrorKind::Arity,
            Self::Marshal(_) => ErrorKind::Marshal,
            Self::Rejected { .. } => ErrorKind::Invoke,
            Self::TimedOut { .. } => ErrorKind::TimedOut,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Shutdown => ErrorKind::Shutdown,
        }
    }

    /// The `{kind, message}` object a script-side rejection carries.
    pub fn to_canonical(&self) -> CanonicalValue {
        CanonicalValue::map([
            ("kind", CanonicalValue::from(self.kind().as_str())),
            ("message", CanonicalValue::from(self.to_string())),
        ])
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of handing a result to the pending table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Settle {
    /// The call was pending and is now settled.
    Delivered,
    /// The call was cancelled, timed out or shut down; the result was dropped.
    Late,
    /// The call had already been settled; the result was discarded.
    Duplicate,
    /// No record of the call, or it retired longer ago than the late-result window.
    Unknown,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Retirement {
    Settled,
    Cancelled,
    TimedOut,
    Shutdown,
}

struct PendingCall {
    method: Arc<str>,
    tx: oneshot::Sender<Result<CanonicalValue>>,
    created_at: Instant,
}

/// Snapshot of an in-flight call, for leak detection.
#[derive(Clone, Debug)]
pub struct PendingCallInfo {
    pub call_id: CallId,
    pub method: String,
    pub created_at: Instant,
    pub age: Duration,
}

/// Pending calls plus a short memory of retired ones.
struct CallTable {
    pending: DashMap<CallId, PendingCall>,
    retired: DashMap<CallId, (Retirement, Instant)>,
    late_window: Duration,
}

impl CallTable {
    fn new(late_window: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            retired: DashMap::new(),
            late_window,
        }
    }

    fn open(&self, call_id: CallId, method: Arc<str>) -> oneshot::Receiver<Result<CanonicalValue>> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(call_id, PendingCall {
            method,
            tx,
            created_at: Instant::now(),
        });
        rx
    }

    fn settle(&self, call_id: CallId, outcome: std::result::Result<CanonicalValue, Rejection>) -> Settle {
        if let Some((_, call)) = self.pending.remove(&call_id) {
            self.record(call_id, Retirement::Settled);
            let result = outcome.map_err(|rejection| Error::Rejected {
                identifier: call.method.to_string(),
                rejection,
            });
            tracing::debug!(call_id = %call_id, method = %call.method, ok = result.is_ok(), "call settled");
            // the caller may have dropped its promise
            let _ = call.tx.send(result);
            return Settle::Delivered;
        }

        match self.retired.get(&call_id).map(|entry| entry.0) {
            Some(Retirement::Settled) => {
                tracing::error!(call_id = %call_id, "call settled twice; later settlement discarded");
                Settle::Duplicate
            }
            Some(reason) => {
                tracing::debug!(call_id = %call_id, ?reason, "late result dropped");
                Settle::Late
            }
            None => {
                tracing::warn!(call_id = %call_id, "settlement for unknown call dropped");
                Settle::Unknown
            }
        }
    }

    /// Removes a pending call without a result. `error`, if any, is what the
    /// promise observes.
    fn retire(&self, call_id: CallId, reason: Retirement, error: Option<Error>) -> bool {
        let Some((_, call)) = self.pending.remove(&call_id) else {
            return false;
        };
        self.record(call_id, reason);
        tracing::debug!(call_id = %call_id, method = %call.method, ?reason, "call retired");
        if let Some(error) = error {
            let _ = call.tx.send(Err(error));
        }
        true
    }

    fn record(&self, call_id: CallId, reason: Retirement) {
        let window = self.late_window;
        self.retired.retain(|_, (_, at)| at.elapsed() < window);
        self.retired.insert(call_id, (reason, Instant::now()));
    }

    fn state(&self, call_id: CallId) -> Option<CallState> {
        if self.pending.contains_key(&call_id) {
            return Some(CallState::Invoking);
        }
        self.retired.get(&call_id).map(|entry| match entry.0 {
            Retirement::Settled | Retirement::Shutdown => CallState::Settled,
            Retirement::Cancelled => CallState::Cancelled,
            Retirement::TimedOut => CallState::TimedOut,
        })
    }
}

/// Settles one deferred call.
///
/// Consumed by [`resolve`](Self::resolve), [`reject`](Self::reject) or
/// [`settle`](Self::settle). Dropping it unsettled rejects the call.
pub struct Responder {
    call_id: CallId,
    calls: Weak<CallTable>,
    armed: bool,
}

impl Responder {
    fn new(call_id: CallId, calls: Weak<CallTable>) -> Self {
        Self {
            call_id,
            calls,
            armed: true,
        }
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn resolve(self, value: CanonicalValue) {
        self.settle(Ok(value));
    }

    pub fn reject(self, rejection: impl Into<Rejection>) {
        self.settle(Err(rejection.into()));
    }

    pub fn settle(mut self, outcome: std::result::Result<CanonicalValue, Rejection>) {
        self.armed = false;
        self.deliver(outcome);
    }

    /// Gives up the responder for the bare callId, for results that come back
    /// through [`Dispatcher::settle`] instead.
    pub fn into_call_id(mut self) -> CallId {
        self.armed = false;
        self.call_id
    }

    fn deliver(&self, outcome: std::result::Result<CanonicalValue, Rejection>) {
        // a dead table means the dispatcher is gone and the promise already saw Shutdown
        if let Some(calls) = self.calls.upgrade() {
            calls.settle(self.call_id, outcome);
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let message = if std::thread::panicking() {
            "invoker panicked before settling"
        } else {
            "responder dropped without settling"
        };
        self.deliver(Err(Rejection::new(message)));
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder").field("call_id", &self.call_id).finish()
    }
}

/// The script-side promise of an async call.
pub struct CallPromise {
    call_id: CallId,
    method: Arc<str>,
    rx: oneshot::Receiver<Result<CanonicalValue>>,
    deadline: Option<(Duration, tokio::time::Instant)>,
    calls: Weak<CallTable>,
}

impl CallPromise {
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Waits for the call to settle, or for its deadline.
    pub async fn settled(mut self) -> Result<CanonicalValue> {
        let received = match self.deadline {
            None => (&mut self.rx).await,
            Some((after, deadline)) => match tokio::time::timeout_at(deadline, &mut self.rx).await {
                Ok(received) => received,
                Err(_) => {
                    let retired = self
                        .calls
                        .upgrade()
                        .is_some_and(|calls| calls.retire(self.call_id, Retirement::TimedOut, None));
                    if retired {
                        return Err(Error::TimedOut {
                            identifier: self.method.to_string(),
                            after,
                        });
                    }
                    // settled in the same instant the deadline passed
                    match self.rx.try_recv() {
                        Ok(result) => Ok(result),
                        Err(_) => return Err(Error::Shutdown),
                    }
                }
            },
        };
        received.unwrap_or(Err(Error::Shutdown))
    }
}

impl fmt::Debug for CallPromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPromise")
            .field("call_id", &self.call_id)
            .field("method", &self.method)
            .finish()
    }
}

/// What `invoke` hands back: a direct result for sync methods and for calls
/// that failed before reaching the invoker, a promise otherwise.
#[derive(Debug)]
pub enum Invocation {
    Ready {
        call_id: CallId,
        result: Result<CanonicalValue>,
    },
    Pending(CallPromise),
}

impl Invocation {
    fn ready(call_id: CallId, result: Result<CanonicalValue>) -> Self {
        Self::Ready { call_id, result }
    }

    pub fn call_id(&self) -> CallId {
        match self {
            Self::Ready { call_id, .. } => *call_id,
            Self::Pending(promise) => promise.call_id(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub async fn settled(self) -> Result<CanonicalValue> {
        match self {
            Self::Ready { result, .. } => result,
            Self::Pending(promise) => promise.settled().await,
        }
    }

    /// Like [`settled`](Self::settled), converting the result for the caller's runtime.
    pub async fn settled_into<M: ValueMarshaler>(self, marshaler: &M) -> Result<M::Native> {
        let value = self.settled().await?;
        Ok(marshaler.from_canonical(&value)?)
    }
}

/// Resolves, marshals, invokes and settles calls.
pub struct Dispatcher {
    registry: Arc<MethodRegistry>,
    calls: Arc<CallTable>,
    next_id: AtomicU64,
    call_timeout: Option<Duration>,
    liveness: Liveness,
}

impl Dispatcher {
    pub fn new(registry: Arc<MethodRegistry>, config: &BridgeConfig) -> Self {
        Self {
            registry,
            calls: Arc::new(CallTable::new(config.late_result_window())),
            next_id: AtomicU64::new(1),
            call_timeout: config.call_timeout(),
            liveness: Liveness::new("Dispatcher"),
        }
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    /// Invokes `identifier` with already-canonical arguments.
    pub fn invoke(&self, identifier: &str, args: Vec<CanonicalValue>) -> Invocation {
        let count = args.len();
        self.dispatch(identifier, count, move || Ok(args), self.call_timeout)
    }

    /// Same as [`invoke`](Self::invoke) with a deadline for this call only.
    pub fn invoke_with_timeout(&self, identifier: &str, args: Vec<CanonicalValue>, timeout: Duration) -> Invocation {
        let count = args.len();
        self.dispatch(identifier, count, move || Ok(args), Some(timeout))
    }

    /// Invokes with runtime-native arguments, marshaling each at the boundary.
    ///
    /// A marshal failure names the argument position, e.g. `$[1].cb`.
    pub fn invoke_marshaled<M: ValueMarshaler>(&self, marshaler: &M, identifier: &str, args: &[M::Native]) -> Invocation {
        let marshal = || {
            args.iter()
                .enumerate()
                .map(|(i, arg)| marshaler.to_canonical(arg).map_err(|e| e.within_argument(i)))
                .collect::<std::result::Result<Vec<_>, MarshalError>>()
        };
        self.dispatch(identifier, args.len(), marshal, self.call_timeout)
    }

    /// Settles a deferred call by id. Used when the result comes back as a
    /// message rather than through its [`Responder`].
    pub fn settle(&self, call_id: CallId, outcome: std::result::Result<CanonicalValue, Rejection>) -> Settle {
        self.calls.settle(call_id, outcome)
    }

    /// Cancels a pending call. Its promise rejects with `Cancelled` and any
    /// later result is dropped. Returns false if the call was not pending.
    pub fn cancel(&self, call_id: CallId) -> bool {
        self.calls.retire(call_id, Retirement::Cancelled, Some(Error::Cancelled))
    }

    /// State of an async call, while the dispatcher remembers it.
    ///
    /// Sync calls and calls that failed before invoking are never tracked.
    pub fn state(&self, call_id: CallId) -> Option<CallState> {
        self.calls.state(call_id)
    }

    pub fn pending_calls(&self) -> usize {
        self.calls.pending.len()
    }

    /// In-flight calls older than `threshold`, oldest first.
    pub fn stale_calls(&self, threshold: Duration) -> Vec<PendingCallInfo> {
        let now = Instant::now();
        let mut stale: Vec<PendingCallInfo> = self
            .calls
            .pending
            .iter()
            .filter_map(|entry| {
                let age = now.saturating_duration_since(entry.created_at);
                (age >= threshold).then(|| PendingCallInfo {
                    call_id: *entry.key(),
                    method: entry.method.to_string(),
                    created_at: entry.created_at,
                    age,
                })
            })
            .collect();
        stale.sort_by_key(|info| info.call_id);
        stale
    }

    /// Fails every pending call with `Shutdown`. Returns how many there were.
    pub(crate) fn shutdown(&self) -> usize {
        if !self.liveness.close() {
            return 0;
        }
        let ids: Vec<CallId> = self.calls.pending.iter().map(|e| *e.key()).collect();
        ids.into_iter()
            .filter(|id| self.calls.retire(*id, Retirement::Shutdown, Some(Error::Shutdown)))
            .count()
    }

    fn issue(&self) -> CallId {
        CallId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn dispatch(
        &self,
        identifier: &str,
        found: usize,
        marshal: impl FnOnce() -> std::result::Result<Vec<CanonicalValue>, MarshalError>,
        timeout: Option<Duration>,
    ) -> Invocation {
        let call_id = self.issue();
        if !self.liveness.check("invoke") {
            return Invocation::ready(call_id, Err(Error::Shutdown));
        }
        tracing::trace!(call_id = %call_id, method = identifier, state = ?CallState::Issued);

        let Some(descriptor) = self.registry.resolve(identifier) else {
            tracing::debug!(call_id = %call_id, method = identifier, "no such method");
            return Invocation::ready(call_id, Err(Error::Dispatch {
                identifier: identifier.to_string(),
            }));
        };

        if found != descriptor.arity() {
            tracing::debug!(call_id = %call_id, method = identifier, expected = descriptor.arity(), found, "arity mismatch");
            return Invocation::ready(call_id, Err(Error::Arity {
                identifier: identifier.to_string(),
                expected: descriptor.arity(),
                found,
            }));
        }

        tracing::trace!(call_id = %call_id, method = identifier, state = ?CallState::Marshaling);
        let args = match marshal() {
            Ok(args) => args,
            Err(e) => {
                tracing::debug!(call_id = %call_id, method = identifier, error = %e, "argument marshaling failed");
                return Invocation::ready(call_id, Err(e.into()));
            }
        };

        tracing::trace!(call_id = %call_id, method = identifier, state = ?CallState::Invoking);
        match (descriptor.mode(), descriptor.invoker()) {
            (CallMode::Sync, Invoker::Immediate(f)) => {
                let result = run_immediate(call_id, descriptor, f.as_ref(), &args).map_err(|rejection| {
                    Error::Rejected {
                        identifier: identifier.to_string(),
                        rejection,
                    }
                });
                Invocation::ready(call_id, result)
            }
            _ => Invocation::Pending(self.start_async(call_id, descriptor, args, timeout)),
        }
    }

    fn start_async(
        &self,
        call_id: CallId,
        descriptor: &MethodDescriptor,
        args: Vec<CanonicalValue>,
        timeout: Option<Duration>,
    ) -> CallPromise {
        let method = descriptor.shared_identifier();
        let rx = self.calls.open(call_id, method.clone());
        let promise = CallPromise {
            call_id,
            method,
            rx,
            deadline: timeout.map(|after| (after, tokio::time::Instant::now() + after)),
            calls: Arc::downgrade(&self.calls),
        };

        // teardown may have swept the table while arguments were marshaling
        if !self.liveness.is_live() {
            self.calls.retire(call_id, Retirement::Shutdown, Some(Error::Shutdown));
            return promise;
        }

        match descriptor.invoker() {
            Invoker::Immediate(f) => {
                let outcome = run_immediate(call_id, descriptor, f.as_ref(), &args);
                self.calls.settle(call_id, outcome);
            }
            Invoker::Deferred(f) => {
                let responder = Responder::new(call_id, Arc::downgrade(&self.calls));
                let f = f.clone();
                // the responder settles the call while unwinding
                if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(move || f(args, responder))) {
                    tracing::error!(
                        call_id = %call_id,
                        method = descriptor.identifier(),
                        panic = %panic_message(panic.as_ref()),
                        "deferred invoker panicked"
                    );
                }
            }
        }
        promise
    }
}

fn run_immediate(
    call_id: CallId,
    descriptor: &MethodDescriptor,
    f: &crate::registry::ImmediateFn,
    args: &[CanonicalValue],
) -> std::result::Result<CanonicalValue, Rejection> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| f(args))) {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(call_id = %call_id, method = descriptor.identifier(), panic = %message, "invoker panicked");
            Err(Rejection::new(format!("invoker panicked: {}", message)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(args: &[CanonicalValue]) -> std::result::Result<CanonicalValue, Rejection> {
        let a = args[0].as_f64().ok_or("expected a number")?;
        let b = args[1].as_f64().ok_or("expected a number")?;
        Ok(CanonicalValue::Number(a + b))
    }

    fn dispatcher(config: BridgeConfig) -> Dispatcher {
        let mut registry = MethodRegistry::new();
        registry.register(MethodDescriptor::sync("addSync", 2, add)).unwrap();
        registry.register(MethodDescriptor::promise("add", 2, add)).unwrap();
        registry
            .register(MethodDescriptor::deferred("park", 0, |_, responder| {
                // dropped by the test through the raw settle path
                let _ = responder.into_call_id();
            }))
            .unwrap();
        registry
            .register(MethodDescriptor::sync("explode", 0, |_| panic!("kaboom")))
            .unwrap();
        Dispatcher::new(Arc::new(registry), &config)
    }

    #[tokio::test]
    async fn test_sync_returns_ready() {
        let d = dispatcher(BridgeConfig::default());
        let inv = d.invoke("addSync", vec![1.into(), 2.into()]);
        assert!(!inv.is_pending());
        assert_eq!(inv.settled().await.unwrap(), CanonicalValue::Number(3.0));
        assert_eq!(d.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_call_ids_are_unique() {
        let d = dispatcher(BridgeConfig::default());
        let a = d.invoke("add", vec![1.into(), 2.into()]).call_id();
        let b = d.invoke("missing", vec![]).call_id();
        let c = d.invoke("add", vec![1.into()]).call_id();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_arity_and_dispatch_errors() {
        let d = dispatcher(BridgeConfig::default());

        let err = d.invoke("add", vec![1.into()]).settled().await.unwrap_err();
        assert_eq!(err, Error::Arity { identifier: "add".into(), expected: 2, found: 1 });
        assert_eq!(err.kind(), ErrorKind::Arity);

        let err = d.invoke("mult", vec![1.into(), 2.into()]).settled().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Dispatch);
        assert_eq!(d.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_raw_settle_and_duplicate() {
        let d = dispatcher(BridgeConfig::default());
        let Invocation::Pending(promise) = d.invoke("park", vec![]) else {
            panic!("expected a promise");
        };
        let id = promise.call_id();
        assert_eq!(d.state(id), Some(CallState::Invoking));

        assert_eq!(d.settle(id, Ok("done".into())), Settle::Delivered);
        assert_eq!(d.settle(id, Ok("again".into())), Settle::Duplicate);
        assert_eq!(d.settle(CallId(9999), Ok(CanonicalValue::Null)), Settle::Unknown);

        assert_eq!(promise.settled().await.unwrap(), CanonicalValue::from("done"));
        assert_eq!(d.state(id), Some(CallState::Settled));
    }

    #[tokio::test]
    async fn test_cancel_then_late_result() {
        let d = dispatcher(BridgeConfig::default());
        let inv = d.invoke("park", vec![]);
        let id = inv.call_id();

        assert!(d.cancel(id));
        assert!(!d.cancel(id));
        assert_eq!(d.settle(id, Ok(CanonicalValue::Null)), Settle::Late);
        assert_eq!(inv.settled().await.unwrap_err(), Error::Cancelled);
        assert_eq!(d.state(id), Some(CallState::Cancelled));
    }

    #[tokio::test]
    async fn test_panicking_invoker_is_rejected() {
        let d = dispatcher(BridgeConfig::default());
        let err = d.invoke("explode", vec![]).settled().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invoke);
        assert!(err.to_string().contains("kaboom"));
    }

    #[tokio::test]
    async fn test_stale_calls() {
        let d = dispatcher(BridgeConfig::default());
        let first = d.invoke("park", vec![]).call_id();
        let second = d.invoke("park", vec![]).call_id();

        let stale = d.stale_calls(Duration::ZERO);
        let ids: Vec<CallId> = stale.iter().map(|s| s.call_id).collect();
        assert_eq!(ids, [first, second]);
        assert_eq!(stale[0].method, "park");
        assert!(d.stale_calls(Duration::from_secs(3600)).is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending() {
        let d = dispatcher(BridgeConfig::default());
        let inv = d.invoke("park", vec![]);
        assert_eq!(d.shutdown(), 1);
        assert_eq!(d.shutdown(), 0);
        assert_eq!(inv.settled().await.unwrap_err(), Error::Shutdown);
    }

    /// Shuts the dispatcher down while an argument is being marshaled.
    struct ShutdownWhileMarshaling<'a> {
        dispatcher: &'a Dispatcher,
    }

    impl ValueMarshaler for ShutdownWhileMarshaling<'_> {
        type Native = CanonicalValue;

        fn runtime(&self) -> &'static str {
            "script"
        }

        fn to_canonical(&self, value: &CanonicalValue) -> std::result::Result<CanonicalValue, MarshalError> {
            self.dispatcher.shutdown();
            Ok(value.clone())
        }

        fn from_canonical(&self, value: &CanonicalValue) -> std::result::Result<CanonicalValue, MarshalError> {
            Ok(value.clone())
        }
    }

    #[tokio::test]
    async fn test_shutdown_during_marshaling_fails_call() {
        let d = dispatcher(BridgeConfig::default());
        let marshaler = ShutdownWhileMarshaling { dispatcher: &d };
        let inv = d.invoke_marshaled(&marshaler, "add", &[1.into(), 2.into()]);

        assert!(inv.is_pending());
        assert_eq!(d.pending_calls(), 0);
        assert_eq!(d.state(inv.call_id()), Some(CallState::Settled));
        assert_eq!(inv.settled().await.unwrap_err(), Error::Shutdown);
    }

    #[test]
    fn test_error_to_canonical() {
        let value = Error::Dispatch { identifier: "mult".into() }.to_canonical();
        assert_eq!(value.get("kind").and_then(CanonicalValue::as_str), Some("DispatchError"));
        assert!(value.get("message").and_then(CanonicalValue::as_str).unwrap().contains("mult"));
        assert_eq!(serde_json::to_string(&ErrorKind::Shutdown).unwrap(), "\"ShutdownError\"");
    }
}
