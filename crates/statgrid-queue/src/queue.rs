//! In-process job queues.
//!
//! Queues carry job ids only; the job record in the store is the source of
//! truth. An id may be popped more than once (recovery, follow-up runs) and
//! the worker's claim step discards stale entries.

use std::sync::Arc;

use statgrid_core::{JobId, QueueName};
use tokio::sync::{Mutex, mpsc};
use tracing::trace;

/// One named FIFO of job ids, shareable across workers.
#[derive(Clone)]
pub struct JobQueue {
    name: QueueName,
    tx: mpsc::UnboundedSender<JobId>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<JobId>>>,
}

impl JobQueue {
    pub fn new(name: QueueName) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name,
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    pub fn name(&self) -> QueueName {
        self.name
    }

    pub fn push(&self, id: JobId) {
        trace!(queue = %self.name, %id, "job id pushed");
        // The receiver lives as long as any clone of this queue.
        let _ = self.tx.send(id);
    }

    /// Wait for the next id.
    pub async fn pop(&self) -> Option<JobId> {
        self.rx.lock().await.recv().await
    }

    /// Next id if one is ready and no worker is currently waiting.
    pub fn try_pop(&self) -> Option<JobId> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}

/// The `calc` and `save` queues.
#[derive(Clone)]
pub struct JobQueues {
    calc: JobQueue,
    save: JobQueue,
}

impl Default for JobQueues {
    fn default() -> Self {
        Self {
            calc: JobQueue::new(QueueName::Calc),
            save: JobQueue::new(QueueName::Save),
        }
    }
}

impl JobQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: QueueName) -> &JobQueue {
        match name {
            QueueName::Calc => &self.calc,
            QueueName::Save => &self.save,
        }
    }

    pub fn push(&self, name: QueueName, id: JobId) {
        self.get(name).push(id);
    }
}
