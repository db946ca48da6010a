use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use relay_shared::{ProgressSink, ProgressUpdate};

/// Adapts a tokio mpsc channel to the uniform sink interface. The default
/// variant awaits channel capacity so delivered updates stay ordered and
/// lossless; `lossy()` drops updates on a full buffer instead of pacing the
/// action.
pub struct ChannelSink {
    tx: mpsc::Sender<ProgressUpdate>,
    lossy: bool,
}

impl ChannelSink {
    #[must_use]
    pub fn new(tx: mpsc::Sender<ProgressUpdate>) -> Self {
        Self { tx, lossy: false }
    }

    #[must_use]
    pub fn lossy(tx: mpsc::Sender<ProgressUpdate>) -> Self {
        Self { tx, lossy: true }
    }
}

#[async_trait]
impl ProgressSink for ChannelSink {
    async fn emit(&self, update: ProgressUpdate) -> anyhow::Result<()> {
        if self.lossy {
            match self.tx.try_send(update) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("progress channel full; dropping update");
                    Ok(())
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    anyhow::bail!("progress subscriber closed")
                }
            }
        } else {
            self.tx
                .send(update)
                .await
                .map_err(|_| anyhow::anyhow!("progress subscriber closed"))
        }
    }
}

/// Adapts a synchronous subscriber callback to the uniform sink interface.
/// The callback runs on the emitting task; keep it cheap.
pub struct CallbackSink<F>
where
    F: Fn(ProgressUpdate) -> anyhow::Result<()> + Send + Sync,
{
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: Fn(ProgressUpdate) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> ProgressSink for CallbackSink<F>
where
    F: Fn(ProgressUpdate) -> anyhow::Result<()> + Send + Sync,
{
    async fn emit(&self, update: ProgressUpdate) -> anyhow::Result<()> {
        (self.callback)(update)
    }
}

/// Convenience: a sink plus the receiving stream for the subscriber side.
#[must_use]
pub fn progress_channel(
    capacity: usize,
) -> (Arc<dyn ProgressSink>, ReceiverStream<ProgressUpdate>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Arc::new(ChannelSink::new(tx)), ReceiverStream::new(rx))
}
