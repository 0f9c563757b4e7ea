//! Thread-safe registry of per-space garbage collectors

use super::clock::Clock;
use super::mgm::Mgm;
use super::stats::TapeGcStats;
use super::tape_gc::TapeGc;
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Map from space name to its tape-aware garbage collector.
///
/// The registry exclusively owns the collectors; callers get `Arc` handles
/// so a collector can be used without holding the registry open.
pub struct SpaceToTapeGcMap {
    mgm: Arc<dyn Mgm>,
    clock: Arc<dyn Clock>,
    gcs: DashMap<String, Arc<TapeGc>>,
}

impl SpaceToTapeGcMap {
    pub fn new(mgm: Arc<dyn Mgm>, clock: Arc<dyn Clock>) -> Self {
        Self {
            mgm,
            clock,
            gcs: DashMap::new(),
        }
    }

    /// Create a garbage collector for the specified space
    pub fn create_gc(&self, space: &str) -> Result<Arc<TapeGc>> {
        if space.is_empty() {
            return Err(Error::EmptySpaceName);
        }
        if self.gcs.contains_key(space) {
            return Err(Error::GcAlreadyExists(space.to_string()));
        }

        let gc = Arc::new(TapeGc::new(
            self.mgm.clone(),
            space,
            self.clock.clone(),
        )?);
        self.gcs.insert(space.to_string(), gc.clone());
        Ok(gc)
    }

    /// Return the garbage collector of the specified space
    pub fn gc(&self, space: &str) -> Result<Arc<TapeGc>> {
        if space.is_empty() {
            return Err(Error::EmptySpaceName);
        }
        self.gcs
            .get(space)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::UnknownSpace(space.to_string()))
    }

    /// Return the names of the spaces being garbage collected
    pub fn spaces(&self) -> BTreeSet<String> {
        self.gcs.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Start the worker task of every registered collector
    pub fn start_all_workers(&self) {
        for entry in self.gcs.iter() {
            entry.value().start_worker();
        }
    }

    /// Stop the worker task of every registered collector
    pub async fn stop_all_workers(&self) {
        let gcs: Vec<Arc<TapeGc>> = self.gcs.iter().map(|e| e.value().clone()).collect();
        for gc in gcs {
            gc.stop().await;
        }
    }

    /// Return the statistics of every registered collector
    pub async fn get_stats(&self) -> HashMap<String, TapeGcStats> {
        let gcs: Vec<Arc<TapeGc>> = self.gcs.iter().map(|e| e.value().clone()).collect();
        let mut stats = HashMap::new();
        for gc in gcs {
            stats.insert(gc.space_name().to_string(), gc.get_stats().await);
        }
        stats
    }

    /// Append the JSON representation of this registry to `out`.
    ///
    /// Spaces appear in lexical order. `max_len` bounds the length of
    /// `out`; 0 means unbounded.
    pub fn to_json(&self, out: &mut String, max_len: u64) -> Result<()> {
        out.push('{');
        let mut is_first = true;
        for space in self.spaces() {
            let Ok(gc) = self.gc(&space) else { continue };
            if is_first {
                is_first = false;
            } else {
                out.push(',');
            }
            out.push('"');
            out.push_str(&space);
            out.push_str("\":");
            gc.to_json(out, max_len)?;
        }
        out.push('}');

        if max_len != 0 && (out.len() as u64) > max_len {
            return Err(Error::MaxLenExceeded(max_len));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
