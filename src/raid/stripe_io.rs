//! Stripe I/O port
//!
//! One [`StripeIo`] per stripe file, opened through an injected
//! [`StripeIoFactory`]. The wire protocol behind a remote stripe is out
//! of scope here; the file-backed implementation below covers local
//! stripes and doubles as the backend for tests.

use crate::error::{Error, Result};
use crate::raid::opaque::OpenOpaque;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Open disposition of a stripe file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Open for reading and writing
    pub read_write: bool,
    /// Create the file if it does not exist
    pub create: bool,
    /// Truncate the file on open
    pub truncate: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self::default()
    }

    pub fn read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            truncate: false,
        }
    }

    pub fn read_write_truncate() -> Self {
        Self {
            read_write: true,
            create: true,
            truncate: true,
        }
    }
}

/// Stat information of a stripe file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StripeStat {
    /// Size of the stripe file in bytes
    pub size: u64,
}

/// Byte-addressable I/O on one stripe file.
///
/// `read_at` may return fewer bytes than requested when the range extends
/// past the end of the file; the caller decides whether a short read is an
/// error. Every call carries a timeout; expiry surfaces as
/// [`Error::Timeout`].
#[async_trait]
pub trait StripeIo: Send + Sync {
    /// Read up to `buf.len()` bytes at `offset`, returning the number of
    /// bytes read
    async fn read_at(&self, offset: u64, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Write `data` at `offset`, returning the number of bytes written
    async fn write_at(&self, offset: u64, data: &[u8], timeout: Duration) -> Result<usize>;

    /// Truncate the stripe file to `size` bytes
    async fn truncate(&self, size: u64, timeout: Duration) -> Result<()>;

    /// Flush the stripe file to stable storage
    async fn sync(&self, timeout: Duration) -> Result<()>;

    /// Stat the stripe file
    async fn stat(&self, timeout: Duration) -> Result<StripeStat>;

    /// Remove the stripe file
    async fn remove(&self, timeout: Duration) -> Result<()>;

    /// Close the stripe file
    async fn close(&self, timeout: Duration) -> Result<()>;
}

/// Factory opening stripes by URL.
///
/// The coordinator never opens files itself; injecting the factory keeps
/// the remote-access flavor (and fault injection in tests) out of the
/// layout logic.
#[async_trait]
pub trait StripeIoFactory: Send + Sync {
    async fn open(
        &self,
        url: &str,
        flags: OpenFlags,
        opaque: &OpenOpaque,
        timeout: Duration,
    ) -> Result<Arc<dyn StripeIo>>;
}

// =============================================================================
// File-backed implementation
// =============================================================================

/// Stripe stored in a plain local file
pub struct FileStripeIo {
    file: Arc<std::fs::File>,
    path: PathBuf,
}

impl FileStripeIo {
    /// Open (and possibly create) the file at `path`
    pub fn open(path: &Path, flags: OpenFlags) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(flags.read_write)
            .create(flags.read_write && flags.create)
            .truncate(flags.read_write && flags.truncate)
            .open(path)
            .map_err(|e| Error::StripeOpenFailed {
                url: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    async fn run_blocking<T, F>(&self, what: &'static str, timeout: Duration, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&std::fs::File) -> std::io::Result<T> + Send + 'static,
    {
        let file = Arc::clone(&self.file);
        let task = tokio::task::spawn_blocking(move || f(&file));
        match tokio::time::timeout(timeout, task).await {
            Err(_) => Err(Error::Timeout(what)),
            Ok(Err(join_err)) => Err(Error::Internal(join_err.to_string())),
            Ok(Ok(io_result)) => io_result.map_err(Error::from),
        }
    }
}

#[async_trait]
impl StripeIo for FileStripeIo {
    async fn read_at(&self, offset: u64, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        use std::os::unix::fs::FileExt;

        let len = buf.len();
        let data = self
            .run_blocking("read", timeout, move |file| {
                let mut data = vec![0u8; len];
                let mut nread = 0;
                // Keep reading until EOF or the buffer is full
                while nread < len {
                    match file.read_at(&mut data[nread..], offset + nread as u64) {
                        Ok(0) => break,
                        Ok(n) => nread += n,
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }
                data.truncate(nread);
                Ok(data)
            })
            .await?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    async fn write_at(&self, offset: u64, data: &[u8], timeout: Duration) -> Result<usize> {
        use std::os::unix::fs::FileExt;

        let owned = data.to_vec();
        self.run_blocking("write", timeout, move |file| {
            file.write_all_at(&owned, offset)?;
            Ok(owned.len())
        })
        .await
    }

    async fn truncate(&self, size: u64, timeout: Duration) -> Result<()> {
        self.run_blocking("truncate", timeout, move |file| file.set_len(size))
            .await
    }

    async fn sync(&self, timeout: Duration) -> Result<()> {
        self.run_blocking("sync", timeout, |file| file.sync_all())
            .await
    }

    async fn stat(&self, timeout: Duration) -> Result<StripeStat> {
        self.run_blocking("stat", timeout, |file| {
            file.metadata().map(|m| StripeStat { size: m.len() })
        })
        .await
    }

    async fn remove(&self, timeout: Duration) -> Result<()> {
        let path = self.path.clone();
        self.run_blocking("remove", timeout, move |_file| std::fs::remove_file(path))
            .await
    }

    async fn close(&self, timeout: Duration) -> Result<()> {
        // The descriptor itself is closed when the last Arc drops; closing
        // a writable stripe means making its contents durable.
        self.sync(timeout).await
    }
}

/// Factory opening file-backed stripes.
///
/// URLs are local filesystem paths, optionally prefixed with `file://`.
pub struct FileStripeFactory;

#[async_trait]
impl StripeIoFactory for FileStripeFactory {
    async fn open(
        &self,
        url: &str,
        flags: OpenFlags,
        _opaque: &OpenOpaque,
        _timeout: Duration,
    ) -> Result<Arc<dyn StripeIo>> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        let path = match path.split_once('?') {
            Some((p, _query)) => p,
            None => path,
        };
        Ok(Arc::new(FileStripeIo::open(Path::new(path), flags)?))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_file_stripe_read_write_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stripe.0");
        let io = FileStripeIo::open(&path, OpenFlags::read_write()).unwrap();

        assert_eq!(io.write_at(100, b"hello", TIMEOUT).await.unwrap(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(io.read_at(100, &mut buf, TIMEOUT).await.unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_read_past_eof_is_short() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stripe.0");
        let io = FileStripeIo::open(&path, OpenFlags::read_write()).unwrap();
        io.write_at(0, b"abc", TIMEOUT).await.unwrap();

        let mut buf = [0xffu8; 8];
        assert_eq!(io.read_at(0, &mut buf, TIMEOUT).await.unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
    }

    #[tokio::test]
    async fn test_truncate_and_stat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stripe.0");
        let io = FileStripeIo::open(&path, OpenFlags::read_write()).unwrap();
        io.write_at(0, &[7u8; 1000], TIMEOUT).await.unwrap();
        io.truncate(10, TIMEOUT).await.unwrap();
        assert_eq!(io.stat(TIMEOUT).await.unwrap().size, 10);
    }

    #[tokio::test]
    async fn test_open_missing_read_only_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope");
        assert!(FileStripeIo::open(&path, OpenFlags::read_only()).is_err());
    }

    #[tokio::test]
    async fn test_factory_strips_scheme_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s0");
        std::fs::write(&path, b"x").unwrap();

        let url = format!("file://{}?mgm.replicaindex=0", path.display());
        let io = FileStripeFactory
            .open(&url, OpenFlags::read_only(), &OpenOpaque::default(), TIMEOUT)
            .await
            .unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(io.read_at(0, &mut buf, TIMEOUT).await.unwrap(), 1);
    }
}
