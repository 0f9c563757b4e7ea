//! Per-space tape-aware garbage collector

use super::cached_value::CachedValue;
use super::clock::Clock;
use super::config::SpaceConfig;
use super::constants::{DEFAULT_CONFIG_CACHE_AGE_SECS, DEFAULT_HISTOGRAM_BIN_WIDTH_SECS,
    DEFAULT_HISTOGRAM_NB_BINS, DEFAULT_MAX_QUEUE_SIZE};
use super::histogram::FreedBytesHistogram;
use super::lru::Lru;
use super::mgm::Mgm;
use super::space_stats::SmartSpaceStats;
use super::stats::TapeGcStats;
use crate::error::Result;
use crate::metrics::GcMetrics;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// A tape-aware garbage collector for a single space.
///
/// Keeps an LRU queue of the files with disk replicas in its space and,
/// whenever the space falls below its configured availability target,
/// drops disk replicas of files that also live on tape, least recently
/// used first.
///
/// Every public entry point logs and swallows internal failures; none of
/// them panics or propagates an error to the caller.
pub struct TapeGc {
    mgm: Arc<dyn Mgm>,
    space_name: String,
    config_cache: CachedValue<SpaceConfig>,
    space_stats: SmartSpaceStats,
    lru: Mutex<Lru>,
    histogram: FreedBytesHistogram,
    metrics: GcMetrics,
    enabled: AtomicBool,
    worker_started: AtomicBool,
    stop: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TapeGc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapeGc")
            .field("space_name", &self.space_name)
            .field("lru", &self.lru)
            .field("histogram", &self.histogram)
            .field("enabled", &self.enabled)
            .field("worker_started", &self.worker_started)
            .finish()
    }
}

impl TapeGc {
    /// Create a collector for `space_name` with default tuning
    pub fn new(mgm: Arc<dyn Mgm>, space_name: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_tuning(
            mgm,
            space_name,
            clock,
            DEFAULT_CONFIG_CACHE_AGE_SECS,
            DEFAULT_MAX_QUEUE_SIZE,
        )
    }

    /// Create a collector with an explicit configuration cache age and
    /// LRU bound
    pub fn with_tuning(
        mgm: Arc<dyn Mgm>,
        space_name: &str,
        clock: Arc<dyn Clock>,
        max_config_cache_age_secs: i64,
        max_queue_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            mgm: mgm.clone(),
            space_name: space_name.to_string(),
            config_cache: CachedValue::new(max_config_cache_age_secs, clock.clone()),
            space_stats: SmartSpaceStats::new(space_name.to_string(), mgm, clock.clone()),
            lru: Mutex::new(Lru::new(max_queue_size)?),
            histogram: FreedBytesHistogram::new(
                DEFAULT_HISTOGRAM_NB_BINS,
                DEFAULT_HISTOGRAM_BIN_WIDTH_SECS,
                clock,
            )?,
            metrics: GcMetrics::default(),
            enabled: AtomicBool::new(false),
            worker_started: AtomicBool::new(false),
            stop: CancellationToken::new(),
            worker: Mutex::new(None),
        })
    }

    /// Name of the space this collector manages
    pub fn space_name(&self) -> &str {
        &self.space_name
    }

    /// Idempotent method to start the worker task of the collector
    pub fn start_worker(self: &Arc<Self>) {
        // Only the first caller spawns the worker
        if self.worker_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.enabled.store(true, Ordering::SeqCst);

        let gc = Arc::clone(self);
        let handle = tokio::spawn(async move { gc.worker_loop().await });
        *self.worker.lock() = Some(handle);
    }

    /// Stop the worker task and wait for it to finish
    pub async fn stop(&self) {
        self.stop.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(space = %self.space_name, error = %e, "GC worker task failed");
            }
        }
    }

    async fn worker_loop(self: Arc<Self>) {
        info!(space = %self.space_name, "tape-aware GC worker started");
        loop {
            while !self.stop.is_cancelled() && self.try_evict_one().await {}

            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
        }
        info!(space = %self.space_name, "tape-aware GC worker stopped");
    }

    /// Notify the collector the specified file has been opened
    pub fn file_opened(&self, fid: u64) {
        let mut lru = self.lru.lock();
        let exceeded_before = lru.exceeded();
        lru.touch(fid);
        self.metrics.queue_size.set(lru.size() as u64);

        // Only log crossing the max queue size threshold, not each access
        if !exceeded_before && lru.exceeded() {
            warn!(
                space = %self.space_name,
                fxid = %format_args!("{fid:08x}"),
                "max queue size of tape-aware GC has been passed - new files will be ignored"
            );
        }
    }

    /// Notify the collector the specified file has been deleted from the
    /// namespace
    pub fn file_deleted(&self, fid: u64) {
        let mut lru = self.lru.lock();
        lru.forget(fid);
        self.metrics.queue_size.set(lru.size() as u64);
    }

    /// Try to garbage collect a single file if necessary and possible.
    ///
    /// Returns true if a file was collected (or is gone and therefore
    /// counts as collected), false if there was nothing to do.
    #[instrument(skip(self), fields(space = %self.space_name))]
    pub async fn try_evict_one(&self) -> bool {
        let config = self
            .config_cache
            .get(|| self.mgm.space_config(&self.space_name))
            .await;

        let space_stats = self.space_stats.get(&config).await;

        // Nothing to do while there is still enough available space, or
        // while the total is below the configured minimum (a low total
        // means disk systems are offline, not that the disks are full)
        if space_stats.avail_bytes >= config.avail_bytes
            || space_stats.total_bytes < config.total_bytes
        {
            return false;
        }

        let fid = {
            let mut lru = self.lru.lock();
            let Ok(fid) = lru.pop_least() else {
                return false;
            };
            self.metrics.queue_size.set(lru.size() as u64);
            fid
        };

        let file_size_bytes = match self.mgm.file_size_bytes(fid).await {
            Ok(size) => size,
            Err(e) => {
                // A file whose size cannot be determined is gone from the
                // namespace: treat it as successfully collected
                info!(
                    fxid = %format_args!("{fid:08x}"),
                    error = %e,
                    "unable to garbage collect disk replica"
                );
                return true;
            }
        };

        if file_size_bytes == 0 {
            info!(
                fxid = %format_args!("{fid:08x}"),
                "garbage collector ignoring zero length file"
            );
            return true;
        }

        if let Err(e) = self.mgm.stagerrm_as_root(fid).await {
            info!(
                fxid = %format_args!("{fid:08x}"),
                error = %e,
                "putting file back in GC queue after failing to garbage collect its disk replica"
            );
            let mut lru = self.lru.lock();
            lru.touch(fid);
            self.metrics.queue_size.set(lru.size() as u64);
            return false;
        }

        self.metrics.nb_stagerrms.inc();
        self.metrics.bytes_freed.add(file_size_bytes);
        self.histogram.bytes_freed(file_size_bytes);
        self.space_stats.file_queued_for_deletion(file_size_bytes);
        info!(
            fxid = %format_args!("{fid:08x}"),
            size = file_size_bytes,
            "garbage collected disk replica using stagerrm"
        );
        true
    }

    /// Return statistics about this collector
    pub async fn get_stats(&self) -> TapeGcStats {
        let config = self
            .config_cache
            .get(|| self.mgm.space_config(&self.space_name))
            .await;
        TapeGcStats {
            nb_stagerrms: self.metrics.nb_stagerrms.get(),
            lru_queue_size: self.lru_queue_size(),
            total_bytes_freed: self.histogram.total_bytes_freed(),
            space_stats: self.space_stats.get(&config).await,
            query_timestamp: self.space_stats.query_timestamp(),
        }
    }

    /// Return the size of the LRU queue
    pub fn lru_queue_size(&self) -> u64 {
        self.lru.lock().size() as u64
    }

    /// Append the JSON representation of this collector to `out`.
    ///
    /// `max_len` bounds the length of `out`; 0 means unbounded. The method
    /// may overrun the bound but reports it with
    /// [`crate::Error::MaxLenExceeded`].
    pub fn to_json(&self, out: &mut String, max_len: u64) -> Result<()> {
        let lru = self.lru.lock();
        write!(
            out,
            "{{\"spaceName\":\"{}\",\"enabled\":\"{}\",\"lruQueue\":",
            self.space_name,
            self.enabled.load(Ordering::SeqCst)
        )
        .map_err(|e| crate::Error::Internal(e.to_string()))?;
        lru.to_json(out, max_len)?;
        out.push('}');

        if max_len != 0 && (out.len() as u64) > max_len {
            return Err(crate::Error::MaxLenExceeded(max_len));
        }
        Ok(())
    }
}

impl Drop for TapeGc {
    fn drop(&mut self) {
        // The worker task holds an Arc to this object, so by the time Drop
        // runs the task is already gone; cancelling is still the right
        // thing for anything waiting on the token.
        self.stop.cancel();
    }
}

// =============================================================================
// Tests
// =============================================================================
