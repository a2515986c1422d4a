//! Control-context dispatch queue
//!
//! Workers never call listeners directly. They post closures to a [`ControlHandle`];
//! whoever owns the matching [`ControlQueue`] runs them one at a time in FIFO order,
//! which keeps every engine's callbacks ordered and never concurrent.

use tokio::sync::mpsc;
use tracing::debug;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Sending side, cloned into every engine
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<Task>,
}

/// Single consumer bound to the caller's execution context
pub struct ControlQueue {
    rx: mpsc::UnboundedReceiver<Task>,
}

/// Create a connected handle/queue pair
pub fn control_queue() -> (ControlHandle, ControlQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ControlHandle { tx }, ControlQueue { rx })
}

impl ControlHandle {
    /// Queue `task`; returns false when the queue has been dropped
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Box::new(task)).is_err() {
            debug!("Control queue closed, dropping callback");
            return false;
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl ControlQueue {
    /// Wait for the next task and run it. Returns false once every handle is gone.
    pub async fn next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run everything already queued without waiting; returns how many tasks ran
    pub fn drain(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Run tasks until every handle has been dropped
    pub async fn run(mut self) {
        while self.next().await {}
    }
}
