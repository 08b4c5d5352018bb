//! # Method registry
//!
//! Maps stable string identifiers to [`MethodDescriptor`]s. The registry is
//! filled while the bridge is being assembled and frozen behind an `Arc` by
//! [`RuntimeBridgeContext::initialize`](crate::context::RuntimeBridgeContext::initialize);
//! after that it is only read.
//!
//! ## Philosophy
//!
//! - **Fixed Surface**: One descriptor per identifier, no overloading. Both
//!   sides are loaded together, so the set never changes at run time.
//! - **Arity Up Front**: The argument count is part of the descriptor and is
//!   checked before anything is marshaled.
//! - **Invoker Agnostic**: Immediate closures, responder-driven callbacks and
//!   futures all reduce to two invoker shapes.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use glueval::CanonicalValue;

use crate::dispatch::Responder;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("method `{0}` is already registered")]
    Duplicate(String),
    #[error("method identifier must not be empty")]
    EmptyIdentifier,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by an invoker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub message: String,
}

impl Rejection {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<&str> for Rejection {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for Rejection {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

pub type ImmediateFn = dyn Fn(&[CanonicalValue]) -> std::result::Result<CanonicalValue, Rejection> + Send + Sync;
pub type DeferredFn = dyn Fn(Vec<CanonicalValue>, Responder) + Send + Sync;

/// Target-side callable.
#[derive(Clone)]
pub enum Invoker {
    /// Produces its result before returning.
    Immediate(Arc<ImmediateFn>),
    /// Settles later through the [`Responder`].
    Deferred(Arc<DeferredFn>),
}

/// Whether the script caller gets a direct result or a promise.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CallMode {
    Sync,
    Async,
}

#[derive(Clone)]
pub struct MethodDescriptor {
    identifier: Arc<str>,
    arity: usize,
    mode: CallMode,
    invoker: Invoker,
}

impl MethodDescriptor {
    /// A method that returns its result directly to the caller.
    pub fn sync<F>(identifier: &str, arity: usize, f: F) -> Self
    where
        F: Fn(&[CanonicalValue]) -> std::result::Result<CanonicalValue, Rejection> + Send + Sync + 'static,
    {
        Self::with_invoker(identifier, arity, CallMode::Sync, Invoker::Immediate(Arc::new(f)))
    }

    /// An async method whose result is ready as soon as the invoker returns.
    pub fn promise<F>(identifier: &str, arity: usize, f: F) -> Self
    where
        F: Fn(&[CanonicalValue]) -> std::result::Result<CanonicalValue, Rejection> + Send + Sync + 'static,
    {
        Self::with_invoker(identifier, arity, CallMode::Async, Invoker::Immediate(Arc::new(f)))
    }

    /// An async method that settles later, from wherever the responder ends up.
    pub fn deferred<F>(identifier: &str, arity: usize, f: F) -> Self
    where
        F: Fn(Vec<CanonicalValue>, Responder) + Send + Sync + 'static,
    {
        Self::with_invoker(identifier, arity, CallMode::Async, Invoker::Deferred(Arc::new(f)))
    }

    /// An async method backed by a future, spawned on the current tokio runtime.
    ///
    /// Without a runtime on the dispatching thread the call is rejected.
    pub fn future<F, Fut>(identifier: &str, arity: usize, f: F) -> Self
    where
        F: Fn(Vec<CanonicalValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<CanonicalValue, Rejection>> + Send + 'static,
    {
        Self::deferred(identifier, arity, move |args, responder| {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let fut = f(args);
                    handle.spawn(async move {
                        responder.settle(fut.await);
                    });
                }
                Err(_) => responder.reject("no async runtime available to run the invoker"),
            }
        })
    }

    fn with_invoker(identifier: &str, arity: usize, mode: CallMode, invoker: Invoker) -> Self {
        Self {
            identifier: Arc::from(identifier),
            arity,
            mode,
            invoker,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn mode(&self) -> CallMode {
        self.mode
    }

    pub fn is_async(&self) -> bool {
        self.mode == CallMode::Async
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    pub(crate) fn shared_identifier(&self) -> Arc<str> {
        self.identifier.clone()
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let invoker = match self.invoker {
            Invoker::Immediate(_) => "immediate",
            Invoker::Deferred(_) => "deferred",
        };
        f.debug_struct("MethodDescriptor")
            .field("identifier", &self.identifier)
            .field("arity", &self.arity)
            .field("mode", &self.mode)
            .field("invoker", &invoker)
            .finish()
    }
}

/// Identifier to descriptor map.
#[derive(Debug, Default)]
pub struct MethodRegistry {
    methods: HashMap<String, MethodDescriptor>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: MethodDescriptor) -> Result<()> {
        let identifier = descriptor.identifier();
        if identifier.is_empty() {
            return Err(Error::EmptyIdentifier);
        }
        if self.methods.contains_key(identifier) {
            return Err(Error::Duplicate(identifier.to_string()));
        }
        tracing::debug!(method = identifier, arity = descriptor.arity(), mode = ?descriptor.mode(), "method registered");
        self.methods.insert(identifier.to_string(), descriptor);
        Ok(())
    }

    /// Chaining form of [`register`](Self::register).
    pub fn with(mut self, descriptor: MethodDescriptor) -> Result<Self> {
        self.register(descriptor)?;
        Ok(self)
    }

    pub fn resolve(&self, identifier: &str) -> Option<&MethodDescriptor> {
        self.methods.get(identifier)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.methods.contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Registered identifiers, sorted.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(args: &[CanonicalValue]) -> std::result::Result<CanonicalValue, Rejection> {
        Ok(args.first().cloned().unwrap_or(CanonicalValue::Null))
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = MethodRegistry::new()
            .with(MethodDescriptor::sync("echo", 1, echo))
            .unwrap()
            .with(MethodDescriptor::promise("later", 0, |_| Ok(CanonicalValue::Null)))
            .unwrap();

        let echo = registry.resolve("echo").unwrap();
        assert_eq!(echo.arity(), 1);
        assert!(!echo.is_async());
        assert!(registry.resolve("later").unwrap().is_async());
        assert!(registry.resolve("missing").is_none());
        assert_eq!(registry.identifiers(), ["echo", "later"]);
    }

    #[test]
    fn test_duplicate_is_rejected() {
        let mut registry = MethodRegistry::new();
        registry.register(MethodDescriptor::sync("echo", 1, echo)).unwrap();
        let err = registry.register(MethodDescriptor::sync("echo", 2, echo)).unwrap_err();
        assert_eq!(err, Error::Duplicate("echo".into()));
        // the first registration wins
        assert_eq!(registry.resolve("echo").unwrap().arity(), 1);
    }

    #[test]
    fn test_empty_identifier() {
        let mut registry = MethodRegistry::new();
        let err = registry.register(MethodDescriptor::sync("", 0, echo)).unwrap_err();
        assert_eq!(err, Error::EmptyIdentifier);
    }

    #[test]
    fn test_debug_hides_closure() {
        let desc = MethodDescriptor::deferred("slow", 2, |_, r| r.resolve(CanonicalValue::Null));
        let debug = format!("{:?}", desc);
        assert!(debug.contains("slow"));
        assert!(debug.contains("deferred"));
    }
}
