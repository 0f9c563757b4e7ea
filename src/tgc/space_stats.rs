//! Throttled space occupancy statistics

use super::clock::Clock;
use super::config::SpaceConfig;
use super::mgm::Mgm;
use super::stats::SpaceStats;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

struct Inner {
    stats: SpaceStats,
    query_timestamp: i64,
}

/// Space statistics throttled by the space's `query_period_secs`.
///
/// Querying the occupancy of a space is expensive (it walks every
/// filesystem of the space), so the result is cached between refreshes.
/// [`SmartSpaceStats::file_queued_for_deletion`] keeps the cached value
/// honest while evictions are still settling.
pub struct SmartSpaceStats {
    space_name: String,
    mgm: Arc<dyn Mgm>,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl SmartSpaceStats {
    pub fn new(space_name: String, mgm: Arc<dyn Mgm>, clock: Arc<dyn Clock>) -> Self {
        Self {
            space_name,
            mgm,
            clock,
            inner: Mutex::new(Inner {
                stats: SpaceStats::default(),
                query_timestamp: 0,
            }),
        }
    }

    /// Return the statistics of the managed space, refreshing them if the
    /// last query is older than `config.query_period_secs`.
    ///
    /// A failed refresh yields empty statistics rather than an error: the
    /// caller then simply sees nothing to collect.
    pub async fn get(&self, config: &SpaceConfig) -> SpaceStats {
        let now = self.clock.now_secs();

        {
            let inner = self.inner.lock();
            let secs_since_last_query = now - inner.query_timestamp;
            if (secs_since_last_query as u64) < config.query_period_secs {
                return inner.stats;
            }
        }

        let stats = match self.mgm.space_stats(&self.space_name).await {
            Ok(stats) => stats,
            Err(e) => {
                debug!(space = %self.space_name, error = %e, "space stats query failed");
                SpaceStats::default()
            }
        };

        let mut inner = self.inner.lock();
        inner.stats = stats;
        inner.query_timestamp = now;
        inner.stats
    }

    /// Return the timestamp of the last query
    pub fn query_timestamp(&self) -> i64 {
        self.inner.lock().query_timestamp
    }

    /// Notify this object that a file has been queued for deletion.
    ///
    /// Optimistically bumps the cached available bytes so the collector
    /// does not keep evicting while previous evictions are settling.
    pub fn file_queued_for_deletion(&self, deleted_file_size_bytes: u64) {
        let mut inner = self.inner.lock();
        inner.stats.avail_bytes += deleted_file_size_bytes;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tgc::clock::FakeClock;
    use crate::tgc::mock::MockMgm;

    fn fixture() -> (SmartSpaceStats, Arc<MockMgm>, Arc<FakeClock>) {
        let mgm = Arc::new(MockMgm::new());
        let clock = Arc::new(FakeClock::new(10_000));
        let stats = SmartSpaceStats::new("default".to_string(), mgm.clone(), clock.clone());
        (stats, mgm, clock)
    }

    #[tokio::test]
    async fn test_queries_are_throttled() {
        let (stats, mgm, clock) = fixture();
        mgm.set_space_stats(
            "default",
            SpaceStats {
                total_bytes: 1000,
                avail_bytes: 200,
            },
        );
        let config = SpaceConfig {
            query_period_secs: 310,
            ..Default::default()
        };

        let s = stats.get(&config).await;
        assert_eq!(s.total_bytes, 1000);
        assert_eq!(mgm.nb_calls_to_space_stats(), 1);

        // Within the query period the cached value is returned
        clock.advance(309);
        mgm.set_space_stats(
            "default",
            SpaceStats {
                total_bytes: 2000,
                avail_bytes: 400,
            },
        );
        let s = stats.get(&config).await;
        assert_eq!(s.total_bytes, 1000);
        assert_eq!(mgm.nb_calls_to_space_stats(), 1);

        // Once the period has elapsed the value is refreshed
        clock.advance(1);
        let s = stats.get(&config).await;
        assert_eq!(s.total_bytes, 2000);
        assert_eq!(mgm.nb_calls_to_space_stats(), 2);
        assert_eq!(stats.query_timestamp(), 10_000 + 310);
    }

    #[tokio::test]
    async fn test_failed_query_yields_empty_stats() {
        let (stats, _mgm, _clock) = fixture();
        // No stats scripted: the facade reports SpaceNotFound
        let s = stats.get(&SpaceConfig::default()).await;
        assert_eq!(s, SpaceStats::default());
    }

    #[tokio::test]
    async fn test_file_queued_for_deletion_bumps_avail() {
        let (stats, mgm, _clock) = fixture();
        mgm.set_space_stats(
            "default",
            SpaceStats {
                total_bytes: 1000,
                avail_bytes: 50,
            },
        );
        let config = SpaceConfig::default();
        stats.get(&config).await;

        stats.file_queued_for_deletion(25);
        let s = stats.get(&config).await;
        assert_eq!(s.avail_bytes, 75);
    }
}
