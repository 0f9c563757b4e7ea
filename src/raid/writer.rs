//! Deferred stripe writes
//!
//! Writes on the hot path are queued to a per-stripe background task and
//! acknowledged immediately; failures accumulate in a per-range error map
//! that the caller collects at the next flush. This gives every stripe
//! the reset / wait-ok / errors-map contract the coordinator relies on.

use crate::error::Result;
use crate::raid::stripe_io::StripeIo;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

enum WriteOp {
    Write { offset: u64, data: Bytes },
    Flush(oneshot::Sender<()>),
}

/// Queue of in-flight writes for one stripe
pub struct StripeWriter {
    tx: mpsc::UnboundedSender<WriteOp>,
    errors: Arc<Mutex<BTreeMap<u64, u64>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StripeWriter {
    /// Spawn the writer task for `io`
    pub fn new(io: Arc<dyn StripeIo>, timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteOp>();
        let errors: Arc<Mutex<BTreeMap<u64, u64>>> = Arc::new(Mutex::new(BTreeMap::new()));

        let task_errors = Arc::clone(&errors);
        let task = tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                match op {
                    WriteOp::Write { offset, data } => {
                        let wanted = data.len();
                        match io.write_at(offset, &data, timeout).await {
                            Ok(n) if n == wanted => {}
                            Ok(n) => {
                                warn!(offset, wanted, written = n, "short stripe write");
                                task_errors.lock().insert(offset, wanted as u64);
                            }
                            Err(e) => {
                                warn!(offset, wanted, error = %e, "stripe write failed");
                                task_errors.lock().insert(offset, wanted as u64);
                            }
                        }
                    }
                    WriteOp::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self {
            tx,
            errors,
            task: Mutex::new(Some(task)),
        }
    }

    /// Queue a write; completion and errors are observed at the next
    /// [`StripeWriter::wait_ok`]
    pub fn enqueue(&self, offset: u64, data: Bytes) {
        let wanted = data.len() as u64;
        if self.tx.send(WriteOp::Write { offset, data }).is_err() {
            // Writer task is gone: surface the failure through the map
            self.errors.lock().insert(offset, wanted);
        }
    }

    /// Wait until every queued write has been attempted; returns true if
    /// none of them failed since the last reset
    pub async fn wait_ok(&self) -> bool {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriteOp::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        self.errors.lock().is_empty()
    }

    /// Return the per-range error map accumulated since the last reset,
    /// keyed by stripe-local offset
    pub fn errors_map(&self) -> BTreeMap<u64, u64> {
        self.errors.lock().clone()
    }

    /// Clear the error map
    pub fn reset(&self) {
        self.errors.lock().clear();
    }

    /// Flush outstanding writes and stop the writer task
    pub async fn shutdown(&self) -> bool {
        let ok = self.wait_ok().await;
        // The queue is drained past the flush marker, so the task is idle
        // on its channel and can be stopped outright
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        ok
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;
    use crate::raid::stripe_io::StripeStat;

    /// Stripe that fails every write beyond a size limit
    struct LimitedStripe {
        limit: u64,
        written: Mutex<BTreeMap<u64, usize>>,
    }

    #[async_trait]
    impl StripeIo for LimitedStripe {
        async fn read_at(&self, _: u64, _: &mut [u8], _: Duration) -> Result<usize> {
            Ok(0)
        }

        async fn write_at(&self, offset: u64, data: &[u8], _: Duration) -> Result<usize> {
            if offset >= self.limit {
                return Err(Error::Internal("disk full".to_string()));
            }
            self.written.lock().insert(offset, data.len());
            Ok(data.len())
        }

        async fn truncate(&self, _: u64, _: Duration) -> Result<()> {
            Ok(())
        }

        async fn sync(&self, _: Duration) -> Result<()> {
            Ok(())
        }

        async fn stat(&self, _: Duration) -> Result<StripeStat> {
            Ok(StripeStat::default())
        }

        async fn remove(&self, _: Duration) -> Result<()> {
            Ok(())
        }

        async fn close(&self, _: Duration) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_successful_writes_leave_no_errors() {
        let stripe = Arc::new(LimitedStripe {
            limit: u64::MAX,
            written: Mutex::new(BTreeMap::new()),
        });
        let writer = StripeWriter::new(stripe.clone(), Duration::from_secs(5));

        writer.enqueue(0, Bytes::from_static(b"abcd"));
        writer.enqueue(4, Bytes::from_static(b"efgh"));
        assert!(writer.wait_ok().await);
        assert!(writer.errors_map().is_empty());
        assert_eq!(stripe.written.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_writes_accumulate_and_reset_clears() {
        let stripe = Arc::new(LimitedStripe {
            limit: 100,
            written: Mutex::new(BTreeMap::new()),
        });
        let writer = StripeWriter::new(stripe, Duration::from_secs(5));

        writer.enqueue(0, Bytes::from_static(b"ok"));
        writer.enqueue(200, Bytes::from_static(b"fails"));
        writer.enqueue(300, Bytes::from_static(b"fails too"));

        assert!(!writer.wait_ok().await);
        let errors = writer.errors_map();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.get(&200), Some(&5));
        assert_eq!(errors.get(&300), Some(&9));

        writer.reset();
        assert!(writer.wait_ok().await);
    }
}
