//! Space occupancy and garbage collector statistics

use serde::{Deserialize, Serialize};

/// Occupancy statistics of one space
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceStats {
    /// Total capacity of the space in bytes
    pub total_bytes: u64,
    /// Available capacity of the space in bytes
    pub avail_bytes: u64,
}

/// Statistics of one per-space tape-aware garbage collector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapeGcStats {
    /// Number of disk replicas dropped through stagerrm
    pub nb_stagerrms: u64,
    /// Current size of the LRU queue
    pub lru_queue_size: u64,
    /// Total number of bytes freed within the histogram horizon
    pub total_bytes_freed: u64,
    /// Last known occupancy of the managed space
    pub space_stats: SpaceStats,
    /// Time at which the occupancy was last queried
    pub query_timestamp: i64,
}
