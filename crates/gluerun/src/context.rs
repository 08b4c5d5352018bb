//! # Runtime bridge context
//!
//! One `RuntimeBridgeContext` is one bridge between a script runtime and a
//! native runtime. It owns the registry, the dispatcher, the event bus, the
//! message router and the handle table; it only refers to the runtimes
//! weakly and never keeps them alive.
//!
//! ## Philosophy
//!
//! - **Instance Scoped**: All state lives in the context. Two bridges in one
//!   process share nothing.
//! - **Explicit Lifecycle**: `initialize` wires everything up; `teardown`
//!   fails in-flight calls with `Shutdown` and drops every subscription.
//!   Either runtime going away tears the bridge down through `detach`.
//! - **Marshal at the Edge**: The `*_native` entry points convert runtime
//!   values on the way in and out; everything inside sees only
//!   `CanonicalValue`.

use std::sync::Arc;
use std::sync::Weak;

use glueval::CanonicalValue;
use glueval::JsonMarshaler;
use glueval::MarshalError;
use glueval::ScriptMarshaler;
use glueval::ValueMarshaler;

use crate::config;
use crate::config::BridgeConfig;
use crate::dispatch::Dispatcher;
use crate::dispatch::Invocation;
use crate::dispatch::PendingCallInfo;
use crate::events::EventBus;
use crate::fanout;
use crate::handles::HandleTable;
use crate::host::HostError;
use crate::host::HostRuntime;
use crate::host::Side;
use crate::lifecycle::Liveness;
use crate::registry::MethodRegistry;
use crate::router::Direction;
use crate::router::Message;
use crate::router::MessageRouter;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("expected a {expected} runtime, got a {found} runtime")]
    WrongSide { expected: Side, found: Side },
    #[error("{0} runtime is gone")]
    RuntimeGone(Side),
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    #[error(transparent)]
    Fanout(#[from] fanout::Error),
    #[error("bridge has been torn down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, Error>;

/// What `teardown` cleaned up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Pending calls failed with `Shutdown`.
    pub failed_calls: usize,
    pub subscriptions: usize,
    pub observers: usize,
    pub handles: usize,
}

pub struct RuntimeBridgeContext {
    script: Weak<dyn HostRuntime>,
    native: Weak<dyn HostRuntime>,
    config: BridgeConfig,
    dispatcher: Dispatcher,
    events: EventBus,
    router: MessageRouter,
    handles: HandleTable,
    liveness: Liveness,
}

impl RuntimeBridgeContext {
    /// Wires a bridge between `script` and `native`. The registry is frozen
    /// from here on.
    pub fn initialize(
        script: &Arc<dyn HostRuntime>,
        native: &Arc<dyn HostRuntime>,
        registry: MethodRegistry,
        config: BridgeConfig,
    ) -> Result<Self> {
        expect_side(script.as_ref(), Side::Script)?;
        expect_side(native.as_ref(), Side::Native)?;
        config.validate()?;

        let methods = registry.len();
        let dispatcher = Dispatcher::new(Arc::new(registry), &config);
        tracing::debug!(script = script.name(), native = native.name(), methods, "bridge initialized");

        Ok(Self {
            script: Arc::downgrade(script),
            native: Arc::downgrade(native),
            config,
            dispatcher,
            events: EventBus::new(),
            router: MessageRouter::new(),
            handles: HandleTable::new(),
            liveness: Liveness::new("RuntimeBridgeContext"),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &MethodRegistry {
        self.dispatcher.registry()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn is_live(&self) -> bool {
        self.liveness.is_live()
    }

    /// The runtime on `side`, if it is still alive.
    pub fn runtime(&self, side: Side) -> Result<Arc<dyn HostRuntime>> {
        let weak = match side {
            Side::Script => &self.script,
            Side::Native => &self.native,
        };
        weak.upgrade().ok_or(Error::RuntimeGone(side))
    }

    pub fn script_marshaler(&self) -> ScriptMarshaler {
        ScriptMarshaler::with_max_depth(self.config.max_depth)
    }

    pub fn json_marshaler(&self) -> JsonMarshaler {
        JsonMarshaler::with_max_depth(self.config.max_depth)
    }

    pub fn invoke(&self, identifier: &str, args: Vec<CanonicalValue>) -> Invocation {
        self.dispatcher.invoke(identifier, args)
    }

    /// Invokes with runtime-native arguments. Pair with
    /// [`Invocation::settled_into`] to get a runtime-native result.
    pub fn invoke_native<M: ValueMarshaler>(&self, marshaler: &M, identifier: &str, args: &[M::Native]) -> Invocation {
        self.dispatcher.invoke_marshaled(marshaler, identifier, args)
    }

    pub fn emit(&self, event: &str, payload: &CanonicalValue) -> fanout::Result<usize> {
        self.events.publish(event, payload)
    }

    /// Publishes a runtime-native payload.
    pub fn emit_native<M: ValueMarshaler>(&self, marshaler: &M, event: &str, payload: &M::Native) -> Result<usize> {
        let payload = marshaler.to_canonical(payload)?;
        Ok(self.events.publish(event, &payload)?)
    }

    /// Posts a message and delivers it right away on the caller's context.
    pub fn post(&self, direction: Direction, name: &str, payload: CanonicalValue) -> fanout::Result<usize> {
        self.router.post(direction, name, payload)
    }

    /// Posts a runtime-native payload, delivered right away on the caller's
    /// context.
    pub fn post_native<M: ValueMarshaler>(
        &self,
        marshaler: &M,
        direction: Direction,
        name: &str,
        payload: &M::Native,
    ) -> Result<usize> {
        let payload = marshaler.to_canonical(payload)?;
        Ok(self.router.post(direction, name, payload)?)
    }

    /// Posts a message for delivery on the receiving runtime's own context.
    ///
    /// Observer failures surface in the log on that context, since the
    /// poster has already moved on.
    pub fn post_across(&self, direction: Direction, name: &str, payload: CanonicalValue) -> Result<()> {
        if !self.liveness.check("post_across") {
            return Err(Error::Shutdown);
        }
        let receiver = self.runtime(direction.receiver())?;
        let router = self.router.clone();
        let message = Message {
            name: name.to_string(),
            payload,
            direction,
        };
        tracing::trace!(name, from = %direction.sender(), runtime = receiver.name(), "message queued");
        receiver.schedule(Box::new(move || {
            let name = message.name.clone();
            if let Err(e) = router.deliver_queued(message) {
                if !matches!(e, fanout::Error::Shutdown) {
                    tracing::warn!(%name, error = %e, "queued message delivery failed");
                }
            }
        }))?;
        Ok(())
    }

    /// [`post_across`](Self::post_across) with a runtime-native payload.
    pub fn post_across_native<M: ValueMarshaler>(
        &self,
        marshaler: &M,
        direction: Direction,
        name: &str,
        payload: &M::Native,
    ) -> Result<()> {
        let payload = marshaler.to_canonical(payload)?;
        self.post_across(direction, name, payload)
    }

    /// Logs and returns in-flight calls older than the configured threshold.
    pub fn stale_calls(&self) -> Vec<PendingCallInfo> {
        let stale = self.dispatcher.stale_calls(self.config.stale_call_threshold());
        for call in &stale {
            tracing::warn!(call_id = %call.call_id, method = %call.method, age = ?call.age, "call still pending");
        }
        stale
    }

    /// Fails every pending call with `Shutdown` and drops every subscription,
    /// observer and handle. Calling it again does nothing.
    pub fn teardown(&self) -> TeardownReport {
        if !self.liveness.close() {
            return TeardownReport::default();
        }
        let report = TeardownReport {
            failed_calls: self.dispatcher.shutdown(),
            subscriptions: self.events.close(),
            observers: self.router.close(),
            handles: self.handles.clear(),
        };
        tracing::debug!(?report, "bridge torn down");
        report
    }

    /// Called by a host whose runtime is going away.
    pub fn detach(&self, side: Side) -> TeardownReport {
        tracing::debug!(%side, "runtime detached");
        self.teardown()
    }
}

impl Drop for RuntimeBridgeContext {
    fn drop(&mut self) {
        if self.liveness.is_live() {
            self.teardown();
        }
    }
}

fn expect_side(runtime: &dyn HostRuntime, expected: Side) -> Result<()> {
    let found = runtime.side();
    if found != expected {
        return Err(Error::WrongSide { expected, found });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::mock_host::MockRuntime;

    fn runtimes() -> (Arc<dyn HostRuntime>, Arc<dyn HostRuntime>) {
        let script: Arc<dyn HostRuntime> = MockRuntime::script("js");
        let native: Arc<dyn HostRuntime> = MockRuntime::native("ark");
        (script, native)
    }

    #[test]
    fn test_initialize_checks_sides() {
        let (script, native) = runtimes();
        let err = RuntimeBridgeContext::initialize(&native, &script, MethodRegistry::new(), BridgeConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::WrongSide { expected: Side::Script, found: Side::Native }));
    }

    #[test]
    fn test_initialize_rejects_bad_config() {
        let (script, native) = runtimes();
        let config = BridgeConfig::default().with_max_depth(0);
        let result = RuntimeBridgeContext::initialize(&script, &native, MethodRegistry::new(), config);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let (script, native) = runtimes();
        let ctx = RuntimeBridgeContext::initialize(&script, &native, MethodRegistry::new(), BridgeConfig::default())
            .unwrap();
        ctx.events().subscribe("e", |_| Ok(()));
        ctx.handles().insert(5u8);

        let report = ctx.teardown();
        assert_eq!(report.subscriptions, 1);
        assert_eq!(report.handles, 1);
        assert_eq!(ctx.teardown(), TeardownReport::default());
        assert!(!ctx.is_live());
    }

    #[test]
    fn test_runtime_is_weak() {
        let (script, native) = runtimes();
        let ctx = RuntimeBridgeContext::initialize(&script, &native, MethodRegistry::new(), BridgeConfig::default())
            .unwrap();
        drop(native);
        assert!(ctx.runtime(Side::Script).is_ok());
        assert!(matches!(ctx.runtime(Side::Native), Err(Error::RuntimeGone(Side::Native))));
    }
}
