use crate::state::HealthSnapshot;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Holds the current snapshot and fans it out to subscribers.
///
/// Backed by a `watch` channel: `publish` never waits on readers, and slow
/// subscribers skip straight to the latest snapshot.
#[derive(Clone)]
pub struct SnapshotStore {
    tx: Arc<watch::Sender<Arc<HealthSnapshot>>>,
}

impl SnapshotStore {
    pub fn new(initial: HealthSnapshot) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Arc<HealthSnapshot> {
        self.tx.borrow().clone()
    }

    pub fn publish(&self, snapshot: Arc<HealthSnapshot>) {
        self.tx.send_replace(snapshot);
    }

    /// Yields the current snapshot immediately, then every later publish.
    pub fn subscribe(&self) -> WatchStream<Arc<HealthSnapshot>> {
        WatchStream::new(self.tx.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
