//! Shared helpers for tests and benches. Not compiled out of the crate so
//! integration tests and the dispatch bench can reuse them.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use relay_shared::{ProgressSink, ProgressUpdate};

/// Records every update it receives, in emission order.
pub struct CollectingSink {
    updates: Arc<Mutex<Vec<ProgressUpdate>>>,
}

impl CollectingSink {
    #[must_use]
    pub fn new() -> (Arc<Self>, Arc<Mutex<Vec<ProgressUpdate>>>) {
        let updates = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                updates: updates.clone(),
            }),
            updates,
        )
    }
}

#[async_trait]
impl ProgressSink for CollectingSink {
    async fn emit(&self, update: ProgressUpdate) -> anyhow::Result<()> {
        self.updates.lock().await.push(update);
        Ok(())
    }
}

/// Fails on every emission; used to prove subscriber errors never leak into
/// the action outcome.
pub struct FailingSink {
    pub calls: Arc<AtomicU64>,
}

impl FailingSink {
    #[must_use]
    pub fn new() -> (Arc<Self>, Arc<AtomicU64>) {
        let calls = Arc::new(AtomicU64::new(0));
        (
            Arc::new(Self {
                calls: calls.clone(),
            }),
            calls,
        )
    }
}

#[async_trait]
impl ProgressSink for FailingSink {
    async fn emit(&self, _update: ProgressUpdate) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("subscriber exploded")
    }
}
