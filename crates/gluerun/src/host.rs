//! # Host runtimes
//!
//! The bridge never owns either runtime. Each side is represented by a
//! [`HostRuntime`], which the context holds weakly. The one capability the
//! bridge needs from a host is scheduling work onto its own execution context.

use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Script,
    Native,
}

impl Side {
    pub fn other(self) -> Self {
        match self {
            Self::Script => Self::Native,
            Self::Native => Self::Script,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script => write!(f, "script"),
            Self::Native => write!(f, "native"),
        }
    }
}

/// Work to run on a host's execution context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostError {
    #[error("host runtime {0} is no longer accepting work")]
    Stopped(String),
}

/// A runtime on one side of the bridge.
pub trait HostRuntime: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn side(&self) -> Side;

    /// Queues `task` to run on this runtime's own context.
    fn schedule(&self, task: Task) -> Result<(), HostError>;
}
