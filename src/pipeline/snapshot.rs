/// Single-writer, many-reader snapshot publication
use std::sync::Arc;
use tokio::sync::watch;

use crate::models::Snapshot;

/// Holds the latest complete `Snapshot`
///
/// Each publish swaps in a new `Arc`; readers keep whatever `Arc` they got,
/// so a reader never sees fields from two different cycles.
#[derive(Debug, Clone)]
pub struct SnapshotPublisher {
    tx: Arc<watch::Sender<Arc<Snapshot>>>,
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotPublisher {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Snapshot::default()));
        Self { tx: Arc::new(tx) }
    }

    pub fn publish(&self, snapshot: Snapshot) {
        self.tx.send_replace(Arc::new(snapshot));
    }

    /// Latest published snapshot; never waits on an in-progress poll cycle
    pub fn current(&self) -> Arc<Snapshot> {
        self.tx.borrow().clone()
    }
}
