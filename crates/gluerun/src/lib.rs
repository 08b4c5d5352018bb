//! # gluerun
//!
//! A bidirectional broker between a script runtime and a native runtime:
//! method dispatch with promise settlement, a fan-out event bus, and a
//! two-way message router, all scoped to one [`RuntimeBridgeContext`].
//!
//! ## Philosophy
//!
//! - **Canonical Boundary**: Values are marshaled to
//!   [`CanonicalValue`](glueval::CanonicalValue) at the edge and never deep in
//!   dispatch logic.
//! - **Correlated Settlement**: Every async call carries a [`CallId`] and is
//!   settled exactly once.
//! - **Non-Owning**: The bridge holds both runtimes weakly and tears itself
//!   down when either goes away.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod events;
pub mod fanout;
pub mod handles;
pub mod host;
pub mod mock_host;
pub mod registry;
pub mod router;

mod lifecycle;

pub use config::BridgeConfig;
pub use context::RuntimeBridgeContext;
pub use context::TeardownReport;
pub use dispatch::CallId;
pub use dispatch::CallPromise;
pub use dispatch::CallState;
pub use dispatch::Dispatcher;
pub use dispatch::ErrorKind;
pub use dispatch::Invocation;
pub use dispatch::PendingCallInfo;
pub use dispatch::Responder;
pub use dispatch::Settle;
pub use events::EventBus;
pub use events::Subscription;
pub use fanout::ListenerError;
pub use fanout::ListenerFailure;
pub use fanout::ListenerId;
pub use fanout::ListenerResult;
pub use handles::HandleTable;
pub use host::HostRuntime;
pub use host::Side;
pub use registry::CallMode;
pub use registry::MethodDescriptor;
pub use registry::MethodRegistry;
pub use registry::Rejection;
pub use router::Direction;
pub use router::Message;
pub use router::MessageRouter;
pub use router::ObserverHandle;
