//! Fault-injecting stripe I/O for tests
//!
//! Wraps another factory and makes selected stripes unreadable, either
//! wholesale or for chosen byte ranges. An injected fault models a
//! *known* erasure (a medium error or an unreachable peer); this is the
//! input the recovery path is specified against.

use crate::error::{Error, Result};
use crate::raid::opaque::OpenOpaque;
use crate::raid::stripe_io::{OpenFlags, StripeIo, StripeIoFactory, StripeStat};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default, Clone)]
struct Faults {
    fail_all_reads: bool,
    fail_read_ranges: Vec<(u64, u64)>,
}

type FaultTable = Arc<Mutex<HashMap<String, Faults>>>;

fn read_faulted(table: &FaultTable, url: &str, offset: u64, len: u64) -> bool {
    let table = table.lock();
    table.iter().any(|(part, faults)| {
        url.contains(part.as_str())
            && (faults.fail_all_reads
                || faults
                    .fail_read_ranges
                    .iter()
                    .any(|&(o, l)| offset < o + l && o < offset + len))
    })
}

/// Factory decorator that injects read faults per stripe URL.
///
/// Faults are matched by URL substring and consulted on every read, so
/// faults injected after the stripe was opened still apply.
pub struct FaultyStripeFactory {
    inner: Arc<dyn StripeIoFactory>,
    faults: FaultTable,
}

impl FaultyStripeFactory {
    pub fn new(inner: Arc<dyn StripeIoFactory>) -> Self {
        Self {
            inner,
            faults: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Make every read fail on stripes whose URL contains `url_part`
    pub fn fail_reads_on(&self, url_part: &str) {
        self.faults
            .lock()
            .entry(url_part.to_string())
            .or_default()
            .fail_all_reads = true;
    }

    /// Make reads overlapping the stripe-local range fail on stripes
    /// whose URL contains `url_part`
    pub fn fail_read_range(&self, url_part: &str, offset: u64, len: u64) {
        self.faults
            .lock()
            .entry(url_part.to_string())
            .or_default()
            .fail_read_ranges
            .push((offset, len));
    }

    /// Clear all injected faults
    pub fn heal(&self) {
        self.faults.lock().clear();
    }
}

#[async_trait]
impl StripeIoFactory for FaultyStripeFactory {
    async fn open(
        &self,
        url: &str,
        flags: OpenFlags,
        opaque: &OpenOpaque,
        timeout: Duration,
    ) -> Result<Arc<dyn StripeIo>> {
        let io = self.inner.open(url, flags, opaque, timeout).await?;
        Ok(Arc::new(FaultyStripeIo {
            inner: io,
            url: url.to_string(),
            faults: Arc::clone(&self.faults),
        }))
    }
}

struct FaultyStripeIo {
    inner: Arc<dyn StripeIo>,
    url: String,
    faults: FaultTable,
}

#[async_trait]
impl StripeIo for FaultyStripeIo {
    async fn read_at(&self, offset: u64, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if read_faulted(&self.faults, &self.url, offset, buf.len() as u64) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "injected read fault",
            )));
        }
        self.inner.read_at(offset, buf, timeout).await
    }

    async fn write_at(&self, offset: u64, data: &[u8], timeout: Duration) -> Result<usize> {
        self.inner.write_at(offset, data, timeout).await
    }

    async fn truncate(&self, size: u64, timeout: Duration) -> Result<()> {
        self.inner.truncate(size, timeout).await
    }

    async fn sync(&self, timeout: Duration) -> Result<()> {
        self.inner.sync(timeout).await
    }

    async fn stat(&self, timeout: Duration) -> Result<StripeStat> {
        self.inner.stat(timeout).await
    }

    async fn remove(&self, timeout: Duration) -> Result<()> {
        self.inner.remove(timeout).await
    }

    async fn close(&self, timeout: Duration) -> Result<()> {
        self.inner.close(timeout).await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raid::stripe_io::FileStripeFactory;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_injected_range_fault_only_hits_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s0");
        std::fs::write(&path, vec![9u8; 256]).unwrap();

        let factory = FaultyStripeFactory::new(Arc::new(FileStripeFactory));
        factory.fail_read_range("s0", 100, 50);

        let io = factory
            .open(
                path.to_str().unwrap(),
                OpenFlags::read_only(),
                &OpenOpaque::default(),
                TIMEOUT,
            )
            .await
            .unwrap();

        let mut buf = [0u8; 50];
        assert!(io.read_at(0, &mut buf, TIMEOUT).await.is_ok());
        assert!(io.read_at(120, &mut buf, TIMEOUT).await.is_err());
        assert!(io.read_at(150, &mut buf, TIMEOUT).await.is_ok());
    }

    #[tokio::test]
    async fn test_faults_injected_after_open_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s1");
        std::fs::write(&path, vec![1u8; 64]).unwrap();

        let factory = FaultyStripeFactory::new(Arc::new(FileStripeFactory));
        let io = factory
            .open(
                path.to_str().unwrap(),
                OpenFlags::read_only(),
                &OpenOpaque::default(),
                TIMEOUT,
            )
            .await
            .unwrap();

        let mut buf = [0u8; 8];
        assert!(io.read_at(0, &mut buf, TIMEOUT).await.is_ok());
        factory.fail_reads_on("s1");
        assert!(io.read_at(0, &mut buf, TIMEOUT).await.is_err());
        factory.heal();
        assert!(io.read_at(0, &mut buf, TIMEOUT).await.is_ok());
    }
}
