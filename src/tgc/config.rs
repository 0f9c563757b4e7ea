//! Per-space garbage collector configuration

use super::constants::{
    DEFAULT_AVAIL_BYTES, DEFAULT_QRY_PERIOD_SECS, DEFAULT_TOTAL_BYTES, NAME_AVAIL_BYTES,
    NAME_QRY_PERIOD_SECS, NAME_TOTAL_BYTES,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The configuration of a tape-aware garbage collector for a specific space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceConfig {
    /// Delay in seconds between space occupancy queries
    pub query_period_secs: u64,
    /// Number of available bytes the collector is targeting
    pub avail_bytes: u64,
    /// Total number of bytes the space must have before collection can begin
    pub total_bytes: u64,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            query_period_secs: DEFAULT_QRY_PERIOD_SECS,
            avail_bytes: DEFAULT_AVAIL_BYTES,
            total_bytes: DEFAULT_TOTAL_BYTES,
        }
    }
}

impl SpaceConfig {
    /// Build a configuration from the raw key/value members of a space.
    ///
    /// Unknown members are ignored. A missing or unparseable recognized
    /// member falls back to its default value.
    pub fn from_members(members: &HashMap<String, String>) -> Self {
        Self {
            query_period_secs: member_u64(members, NAME_QRY_PERIOD_SECS, DEFAULT_QRY_PERIOD_SECS),
            avail_bytes: member_u64(members, NAME_AVAIL_BYTES, DEFAULT_AVAIL_BYTES),
            total_bytes: member_u64(members, NAME_TOTAL_BYTES, DEFAULT_TOTAL_BYTES),
        }
    }
}

fn member_u64(members: &HashMap<String, String>, name: &str, default: u64) -> u64 {
    members
        .get(name)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SpaceConfig::default();
        assert_eq!(config.query_period_secs, 310);
        assert_eq!(config.avail_bytes, 0);
        assert_eq!(config.total_bytes, 1_000_000_000_000_000_000);
    }

    #[test]
    fn test_from_members_recognized_keys() {
        let mut members = HashMap::new();
        members.insert("tgc.qryperiodsecs".to_string(), "20".to_string());
        members.insert("tgc.availbytes".to_string(), "100".to_string());
        members.insert("tgc.totalbytes".to_string(), "1000".to_string());
        members.insert("tgc.bogus".to_string(), "7".to_string());

        let config = SpaceConfig::from_members(&members);
        assert_eq!(config.query_period_secs, 20);
        assert_eq!(config.avail_bytes, 100);
        assert_eq!(config.total_bytes, 1000);
    }

    #[test]
    fn test_from_members_unparseable_falls_back() {
        let mut members = HashMap::new();
        members.insert("tgc.availbytes".to_string(), "not-a-number".to_string());

        let config = SpaceConfig::from_members(&members);
        assert_eq!(config.avail_bytes, DEFAULT_AVAIL_BYTES);
    }
}
