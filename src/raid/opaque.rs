//! Open-opaque parsing
//!
//! The entry server receives an `a=b&c=d` opaque string naming this
//! stripe's physical index, the index of the entry server, the stripe
//! URLs and the namespace path. Before forwarding an open to a stripe
//! peer the opaque is augmented with read-ahead and block-size hints.

use crate::error::{Error, Result};
use crate::raid::layout_id::MAX_TOTAL_STRIPES;
use std::collections::BTreeMap;

/// Opaque key carrying this stripe's physical index
pub const KEY_REPLICA_INDEX: &str = "mgm.replicaindex";

/// Opaque key carrying the physical index of the entry server
pub const KEY_REPLICA_HEAD: &str = "mgm.replicahead";

/// Opaque key prefix of the per-stripe URLs
pub const KEY_URL_PREFIX: &str = "mgm.url";

/// Opaque key carrying the namespace path
pub const KEY_PATH: &str = "mgm.path";

/// Parsed open-opaque key/value pairs
#[derive(Debug, Clone, Default)]
pub struct OpenOpaque {
    pairs: BTreeMap<String, String>,
}

impl OpenOpaque {
    /// Parse an `a=b&c=d` opaque string. Values are percent-decoded;
    /// pairs without an `=` are kept with an empty value.
    pub fn parse(opaque: &str) -> Result<Self> {
        let mut pairs = BTreeMap::new();
        for item in opaque.split('&').filter(|s| !s.is_empty()) {
            let (key, value) = match item.split_once('=') {
                Some((k, v)) => (k, v),
                None => (item, ""),
            };
            let value = urlencoding::decode(value)
                .map_err(|_| Error::InvalidOpaque {
                    key: key.to_string(),
                    value: value.to_string(),
                })?
                .into_owned();
            pairs.insert(key.to_string(), value);
        }
        Ok(Self { pairs })
    }

    /// Raw value lookup
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.get(key).map(String::as_str)
    }

    /// Set a key, replacing any previous value
    pub fn set(&mut self, key: &str, value: &str) {
        self.pairs.insert(key.to_string(), value.to_string());
    }

    /// Physical index of this stripe
    pub fn replica_index(&self) -> Result<u32> {
        self.index_value(KEY_REPLICA_INDEX)
    }

    /// Physical index of the entry server
    pub fn replica_head(&self) -> Result<u32> {
        self.index_value(KEY_REPLICA_HEAD)
    }

    /// Namespace path of the logical file
    pub fn path(&self) -> Result<&str> {
        self.get(KEY_PATH).ok_or(Error::OpaqueMissingKey(KEY_PATH))
    }

    /// Base URL of stripe `i`
    pub fn stripe_url(&self, i: u32) -> Option<&str> {
        self.get(&format!("{KEY_URL_PREFIX}{i}"))
    }

    /// Add the read-ahead and block-size hints forwarded to the stripes
    pub fn augment(&mut self, stripe_width: u64) {
        self.set("fst.readahead", "true");
        self.set("fst.blocksize", &stripe_width.to_string());
    }

    /// Build the full URL used to open stripe `i` on its peer: the
    /// stripe's base URL, the namespace path, and this opaque rewritten
    /// to carry `i` as the replica index.
    pub fn remote_url(&self, i: u32) -> Result<String> {
        let base = self.stripe_url(i).ok_or(Error::InvalidOpaque {
            key: format!("{KEY_URL_PREFIX}{i}"),
            value: "<missing>".to_string(),
        })?;
        let path = self.path()?;

        let mut remote = self.clone();
        remote.set(KEY_REPLICA_INDEX, &i.to_string());
        Ok(format!("{}{}?{}", base, path, remote.to_query()))
    }

    /// Serialize back to an `a=b&c=d` string with percent-encoded values
    pub fn to_query(&self) -> String {
        let mut query = String::new();
        for (key, value) in &self.pairs {
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(key);
            query.push('=');
            query.push_str(&urlencoding::encode(value));
        }
        query
    }

    fn index_value(&self, key: &'static str) -> Result<u32> {
        let value = self.get(key).ok_or(Error::OpaqueMissingKey(key))?;
        let index: u32 = value.parse().map_err(|_| Error::InvalidOpaque {
            key: key.to_string(),
            value: value.to_string(),
        })?;
        if index >= MAX_TOTAL_STRIPES {
            return Err(Error::IllegalStripeIndex {
                index,
                max: MAX_TOTAL_STRIPES - 1,
            });
        }
        Ok(index)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const OPAQUE: &str = "mgm.replicaindex=0&mgm.replicahead=0&mgm.path=/data/file\
        &mgm.url0=root://fst1//data0&mgm.url1=root://fst2//data1";

    #[test]
    fn test_parse_and_lookup() {
        let opaque = OpenOpaque::parse(OPAQUE).unwrap();
        assert_eq!(opaque.replica_index().unwrap(), 0);
        assert_eq!(opaque.replica_head().unwrap(), 0);
        assert_eq!(opaque.path().unwrap(), "/data/file");
        assert_eq!(opaque.stripe_url(1).unwrap(), "root://fst2//data1");
        assert_eq!(opaque.stripe_url(7), None);
    }

    #[test]
    fn test_missing_head_is_an_error() {
        let opaque = OpenOpaque::parse("mgm.replicaindex=0").unwrap();
        assert_matches!(
            opaque.replica_head(),
            Err(Error::OpaqueMissingKey(KEY_REPLICA_HEAD))
        );
    }

    #[test]
    fn test_illegal_index_is_rejected() {
        let opaque = OpenOpaque::parse("mgm.replicaindex=16").unwrap();
        assert_matches!(
            opaque.replica_index(),
            Err(Error::IllegalStripeIndex { index: 16, max: 15 })
        );

        let opaque = OpenOpaque::parse("mgm.replicaindex=banana").unwrap();
        assert_matches!(opaque.replica_index(), Err(Error::InvalidOpaque { .. }));
    }

    #[test]
    fn test_augment_adds_forwarding_hints() {
        let mut opaque = OpenOpaque::parse(OPAQUE).unwrap();
        opaque.augment(4096);
        assert_eq!(opaque.get("fst.readahead"), Some("true"));
        assert_eq!(opaque.get("fst.blocksize"), Some("4096"));
    }

    #[test]
    fn test_remote_url_rewrites_replica_index() {
        let mut opaque = OpenOpaque::parse(OPAQUE).unwrap();
        opaque.augment(128);
        let url = opaque.remote_url(1).unwrap();
        assert!(url.starts_with("root://fst2//data1/data/file?"));
        let query = url.split_once('?').unwrap().1;
        let reparsed = OpenOpaque::parse(query).unwrap();
        assert_eq!(reparsed.replica_index().unwrap(), 1);
        assert_eq!(reparsed.get("fst.blocksize"), Some("128"));
    }

    #[test]
    fn test_query_round_trip_encodes_values() {
        let mut opaque = OpenOpaque::default();
        opaque.set("mgm.path", "/dir with space/file");
        let query = opaque.to_query();
        let reparsed = OpenOpaque::parse(&query).unwrap();
        assert_eq!(reparsed.path().unwrap(), "/dir with space/file");
    }
}
