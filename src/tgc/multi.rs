//! Process-level coordinator of the per-space garbage collectors

use super::cached_value::CachedValue;
use super::clock::Clock;
use super::constants::{DEFAULT_CONFIG_CACHE_AGE_SECS, STATUS_REPLY_BUF_SIZE};
use super::mgm::Mgm;
use super::registry::SpaceToTapeGcMap;
use super::stats::TapeGcStats;
use crate::error::Error;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Error returned by the status endpoint, carrying the errno the embedding
/// server should report to the client
#[derive(Debug)]
pub struct StatusError {
    /// errno-style code: EACCES, ENOTSUP, ERANGE or ECANCELED
    pub errno: i32,
    /// Human readable reason
    pub message: String,
}

impl StatusError {
    fn new(errno: i32, message: impl Into<String>) -> Self {
        Self {
            errno,
            message: message.into(),
        }
    }
}

/// Coordinator owning one tape-aware garbage collector per managed space.
///
/// Once enabled, a one-shot population task walks the namespace to seed
/// every LRU with the files that already have disk replicas; only then do
/// the per-space workers start and `file_opened` events get recorded.
///
/// No public entry point panics or propagates an internal error.
pub struct MultiSpaceTapeGc {
    mgm: Arc<dyn Mgm>,
    tape_enabled: AtomicBool,
    populated: AtomicBool,
    enable_called: AtomicBool,
    gcs: SpaceToTapeGcMap,
    fs_to_space: CachedValue<HashMap<u32, String>>,
    nb_files_scanned: AtomicU64,
    stop: CancellationToken,
    populator: Mutex<Option<JoinHandle<()>>>,
}

impl MultiSpaceTapeGc {
    pub fn new(mgm: Arc<dyn Mgm>, clock: Arc<dyn Clock>) -> Self {
        Self {
            mgm: mgm.clone(),
            tape_enabled: AtomicBool::new(false),
            populated: AtomicBool::new(false),
            enable_called: AtomicBool::new(false),
            gcs: SpaceToTapeGcMap::new(mgm, clock.clone()),
            fs_to_space: CachedValue::new(DEFAULT_CONFIG_CACHE_AGE_SECS, clock),
            nb_files_scanned: AtomicU64::new(0),
            stop: CancellationToken::new(),
            populator: Mutex::new(None),
        }
    }

    /// Enable tape support and start garbage collection for the specified
    /// spaces.
    ///
    /// Spawns the population task; the per-space workers start once
    /// population has finished.
    pub fn enable(self: &Arc<Self>, spaces: BTreeSet<String>) -> crate::Result<()> {
        // Enabling garbage collection implies that tape support is enabled
        self.tape_enabled.store(true, Ordering::SeqCst);

        if self.enable_called.swap(true, Ordering::SeqCst) {
            return Err(Error::GcAlreadyStarted);
        }

        for space in &spaces {
            self.gcs.create_gc(space)?;
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.populate_and_start().await;
        });
        *self.populator.lock() = Some(handle);
        Ok(())
    }

    /// True once the population task has seeded all LRU queues
    pub fn is_populated(&self) -> bool {
        self.populated.load(Ordering::SeqCst)
    }

    /// Number of namespace files scanned by the population task so far
    pub fn nb_files_scanned(&self) -> u64 {
        self.nb_files_scanned.load(Ordering::SeqCst)
    }

    #[instrument(skip(self))]
    async fn populate_and_start(self: Arc<Self>) {
        info!("starting to populate the meta-data of the tape-aware garbage collectors");

        let spaces = self.gcs.spaces();
        match self
            .mgm
            .space_to_disk_replicas(&spaces, &self.stop, &self.nb_files_scanned)
            .await
        {
            Ok(space_to_files) => {
                for (space, mut files) in space_to_files {
                    let Ok(gc) = self.gcs.gc(&space) else { continue };
                    // Oldest replicas are touched first so they end up at
                    // the eviction end of the queue
                    files.sort_by_key(|replica| replica.ctime);
                    for replica in files {
                        if self.stop.is_cancelled() {
                            info!("requested to stop populating the tape-aware garbage collectors");
                            return;
                        }
                        gc.file_opened(replica.fid);
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "population of the tape-aware garbage collectors failed");
                return;
            }
        }

        self.gcs.start_all_workers();
        self.populated.store(true, Ordering::SeqCst);
        info!(
            nb_files_scanned = self.nb_files_scanned(),
            "finished populating the meta-data of the tape-aware garbage collectors"
        );
    }

    /// Notify the coordinator the specified file has been opened.
    ///
    /// Events for unknown spaces are silently ignored; events arriving
    /// before population has finished are dropped (population only seeds,
    /// never evicts, so the ordering is irrelevant).
    pub fn file_opened(&self, space: &str, fid: u64) {
        if !self.tape_enabled.load(Ordering::SeqCst) || !self.is_populated() {
            return;
        }

        match self.gcs.gc(space) {
            Ok(gc) => gc.file_opened(fid),
            Err(Error::UnknownSpace(_)) => {
                // Spaces without a tape-aware GC are none of our business
            }
            Err(e) => {
                error!(space, fxid = %format_args!("{fid:08x}"), error = %e,
                    "error handling 'file opened' event");
            }
        }
    }

    /// Notify the coordinator the specified file has been opened on a
    /// filesystem, resolving the owning space through the facade
    pub async fn file_opened_on_fs(&self, fsid: u32, fid: u64) {
        if !self.tape_enabled.load(Ordering::SeqCst) || !self.is_populated() {
            return;
        }

        let fs_map = self.fs_to_space.get(|| self.mgm.fs_id_to_space()).await;
        if let Some(space) = fs_map.get(&fsid) {
            self.file_opened(space, fid);
        }
    }

    /// Notify the coordinator the specified file has been deleted from the
    /// namespace
    pub fn file_deleted(&self, space: &str, fid: u64) {
        if !self.tape_enabled.load(Ordering::SeqCst) {
            return;
        }
        if let Ok(gc) = self.gcs.gc(space) {
            gc.file_deleted(fid);
        }
    }

    /// Return the statistics of every garbage collector, keyed by space
    pub async fn get_stats(&self) -> HashMap<String, TapeGcStats> {
        if !self.tape_enabled.load(Ordering::SeqCst) {
            return HashMap::new();
        }
        self.gcs.get_stats().await
    }

    /// Handle a status request from the embedding server.
    ///
    /// Only localhost clients may query the status. The JSON reply is
    /// bounded by a 1 MiB buffer; exceeding it is reported as `ERANGE` so
    /// the caller can retry with a larger buffer.
    pub fn handle_status_request(&self, client_host: &str) -> Result<String, StatusError> {
        if !is_localhost(client_host) {
            return Err(StatusError::new(
                libc::EACCES,
                "system access restricted - unauthorized identity used",
            ));
        }

        if !self.tape_enabled.load(Ordering::SeqCst) {
            return Err(StatusError::new(
                libc::ENOTSUP,
                "support for tape is not enabled",
            ));
        }

        let mut json = String::new();
        match self.gcs.to_json(&mut json, STATUS_REPLY_BUF_SIZE - 1) {
            Ok(()) => Ok(json),
            Err(e @ Error::MaxLenExceeded(_)) => {
                Err(StatusError::new(libc::ERANGE, e.to_string()))
            }
            Err(e) => Err(StatusError::new(libc::ECANCELED, e.to_string())),
        }
    }

    /// Stop the population task and every per-space worker
    pub async fn stop(&self) {
        self.stop.cancel();
        let handle = self.populator.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "population task failed");
            }
        }
        self.gcs.stop_all_workers().await;
    }
}

impl Drop for MultiSpaceTapeGc {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

fn is_localhost(host: &str) -> bool {
    matches!(
        host,
        "localhost" | "localhost.localdomain" | "127.0.0.1" | "::1"
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tgc::clock::FakeClock;
    use crate::tgc::mock::MockMgm;

    fn multi() -> (Arc<MultiSpaceTapeGc>, Arc<MockMgm>) {
        let mgm = Arc::new(MockMgm::new());
        let clock = Arc::new(FakeClock::new(10_000));
        (Arc::new(MultiSpaceTapeGc::new(mgm.clone(), clock)), mgm)
    }

    #[tokio::test]
    async fn test_status_requires_localhost() {
        let (gc, _mgm) = multi();
        let err = gc.handle_status_request("evil.example.com").unwrap_err();
        assert_eq!(err.errno, libc::EACCES);
    }

    #[tokio::test]
    async fn test_status_requires_tape_enabled() {
        let (gc, _mgm) = multi();
        let err = gc.handle_status_request("localhost").unwrap_err();
        assert_eq!(err.errno, libc::ENOTSUP);
    }

    #[tokio::test]
    async fn test_enable_twice_fails() {
        let (gc, _mgm) = multi();
        gc.enable(BTreeSet::from(["default".to_string()])).unwrap();
        assert!(matches!(
            gc.enable(BTreeSet::from(["other".to_string()])),
            Err(Error::GcAlreadyStarted)
        ));
        gc.stop().await;
    }

    #[tokio::test]
    async fn test_stats_empty_when_disabled() {
        let (gc, _mgm) = multi();
        assert!(gc.get_stats().await.is_empty());
    }

    #[tokio::test]
    async fn test_file_opened_before_population_is_dropped() {
        let (gc, _mgm) = multi();
        // Not enabled at all: event must be dropped without panicking
        gc.file_opened("default", 1);
        assert!(gc.get_stats().await.is_empty());
    }
}
