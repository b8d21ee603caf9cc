//! Worker-side observers of connection manager events

use parking_lot::Mutex;
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

use crate::connection::{ConnectionManager, ConnectionManagerCallback, ManagerStats};

/// Latest manager stats of every worker, readable from any thread
#[derive(Clone)]
pub struct WorkerBoard {
    slots: Arc<Mutex<Vec<Option<ManagerStats>>>>,
}

impl WorkerBoard {
    pub fn new(workers: usize) -> Self {
        Self {
            slots: Arc::new(Mutex::new(vec![None; workers])),
        }
    }

    /// Record the stats of worker `index`
    pub fn publish(&self, index: usize, stats: ManagerStats) {
        let mut slots = self.slots.lock();
        if index >= slots.len() {
            slots.resize(index + 1, None);
        }
        slots[index] = Some(stats);
    }

    /// Stats of all workers that have published so far
    pub fn snapshot(&self) -> Vec<ManagerStats> {
        self.slots.lock().iter().flatten().cloned().collect()
    }
}

/// Publishes membership changes and signals when a draining manager empties
pub struct WorkerObserver {
    worker: usize,
    board: WorkerBoard,
    drained: Rc<Notify>,
}

impl WorkerObserver {
    pub fn new(worker: usize, board: WorkerBoard, drained: Rc<Notify>) -> Self {
        Self {
            worker,
            board,
            drained,
        }
    }
}

impl ConnectionManagerCallback for WorkerObserver {
    fn on_connection_added(&self, manager: &ConnectionManager) {
        self.board.publish(self.worker, manager.stats());
    }

    fn on_connection_removed(&self, manager: &ConnectionManager) {
        self.board.publish(self.worker, manager.stats());
    }

    fn on_empty(&self, manager: &ConnectionManager) {
        self.board.publish(self.worker, manager.stats());
        if manager.is_draining() {
            debug!(worker = self.worker, manager = %manager.id(), "All connections drained");
            self.drained.notify_one();
        }
    }
}
