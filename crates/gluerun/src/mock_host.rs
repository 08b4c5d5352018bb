//! Mock host runtimes for tests and the demo driver.
//!
//! A [`MockRuntime`] queues scheduled tasks on a tokio mpsc channel and runs
//! them only when [`MockRuntime::run_pending`] is called, which stands in for
//! one turn of the host's event loop.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;

use crate::host::HostError;
use crate::host::HostRuntime;
use crate::host::Side;
use crate::host::Task;

pub struct MockRuntime {
    name: String,
    side: Side,
    tx: mpsc::UnboundedSender<Task>,
    rx: Mutex<mpsc::UnboundedReceiver<Task>>,
    stopped: AtomicBool,
}

impl MockRuntime {
    pub fn new(name: impl Into<String>, side: Side) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            name: name.into(),
            side,
            tx,
            rx: Mutex::new(rx),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn script(name: impl Into<String>) -> Arc<Self> {
        Self::new(name, Side::Script)
    }

    pub fn native(name: impl Into<String>) -> Arc<Self> {
        Self::new(name, Side::Native)
    }

    /// Runs queued tasks, including any they queue in turn, until the queue is
    /// empty. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let batch: Vec<Task> = {
                let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
                std::iter::from_fn(|| rx.try_recv().ok()).collect()
            };
            if batch.is_empty() {
                return ran;
            }
            for task in batch {
                task();
                ran += 1;
            }
        }
    }

    /// Refuses all further work.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

impl HostRuntime for MockRuntime {
    fn name(&self) -> &str {
        &self.name
    }

    fn side(&self) -> Side {
        self.side
    }

    fn schedule(&self, task: Task) -> Result<(), HostError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(HostError::Stopped(self.name.clone()));
        }
        self.tx
            .send(task)
            .map_err(|_| HostError::Stopped(self.name.clone()))
    }
}
