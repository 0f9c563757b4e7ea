//! Scriptable MGM test double
//!
//! Used by the unit and integration tests to script space statistics,
//! file sizes and stagerrm outcomes, and to observe the calls the
//! garbage collector makes.

use super::config::SpaceConfig;
use super::mgm::{DiskReplica, Mgm};
use super::stats::SpaceStats;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct State {
    configs: HashMap<String, SpaceConfig>,
    stats: HashMap<String, SpaceStats>,
    file_sizes: HashMap<u64, u64>,
    replicas: HashMap<String, Vec<DiskReplica>>,
    fs_to_space: HashMap<u32, String>,
    stagerrm_fails: bool,
    stagerrm_fids: Vec<u64>,
}

/// In-memory [`Mgm`] implementation with programmable behavior
#[derive(Default)]
pub struct MockMgm {
    state: Mutex<State>,
    nb_calls_space_config: AtomicU64,
    nb_calls_space_stats: AtomicU64,
    nb_calls_file_size: AtomicU64,
    nb_calls_file_in_namespace: AtomicU64,
    nb_calls_stagerrm: AtomicU64,
}

impl MockMgm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the configuration of a space
    pub fn set_space_config(&self, space: &str, config: SpaceConfig) {
        self.state.lock().configs.insert(space.to_string(), config);
    }

    /// Script the occupancy of a space
    pub fn set_space_stats(&self, space: &str, stats: SpaceStats) {
        self.state.lock().stats.insert(space.to_string(), stats);
    }

    /// Script the size of a file
    pub fn set_file_size(&self, fid: u64, size: u64) {
        self.state.lock().file_sizes.insert(fid, size);
    }

    /// Script the disk replicas returned by the namespace walk
    pub fn set_disk_replicas(&self, space: &str, replicas: Vec<DiskReplica>) {
        self.state.lock().replicas.insert(space.to_string(), replicas);
    }

    /// Script the filesystem-to-space map
    pub fn set_fs_space(&self, fsid: u32, space: &str) {
        self.state.lock().fs_to_space.insert(fsid, space.to_string());
    }

    /// Make every subsequent stagerrm call fail
    pub fn fail_stagerrm(&self, fails: bool) {
        self.state.lock().stagerrm_fails = fails;
    }

    /// File identifiers passed to successful stagerrm calls, in order
    pub fn stagerrm_fids(&self) -> Vec<u64> {
        self.state.lock().stagerrm_fids.clone()
    }

    pub fn nb_calls_to_space_config(&self) -> u64 {
        self.nb_calls_space_config.load(Ordering::SeqCst)
    }

    pub fn nb_calls_to_space_stats(&self) -> u64 {
        self.nb_calls_space_stats.load(Ordering::SeqCst)
    }

    pub fn nb_calls_to_file_size(&self) -> u64 {
        self.nb_calls_file_size.load(Ordering::SeqCst)
    }

    pub fn nb_calls_to_file_in_namespace(&self) -> u64 {
        self.nb_calls_file_in_namespace.load(Ordering::SeqCst)
    }

    pub fn nb_calls_to_stagerrm(&self) -> u64 {
        self.nb_calls_stagerrm.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mgm for MockMgm {
    async fn space_config(&self, space: &str) -> SpaceConfig {
        self.nb_calls_space_config.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .configs
            .get(space)
            .cloned()
            .unwrap_or_default()
    }

    async fn space_stats(&self, space: &str) -> Result<SpaceStats> {
        self.nb_calls_space_stats.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .stats
            .get(space)
            .copied()
            .ok_or_else(|| Error::SpaceNotFound(space.to_string()))
    }

    async fn file_size_bytes(&self, fid: u64) -> Result<u64> {
        self.nb_calls_file_size.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .file_sizes
            .get(&fid)
            .copied()
            .ok_or_else(|| Error::FailedToGetFileSize {
                fid,
                reason: "no such file".to_string(),
            })
    }

    async fn file_in_namespace(&self, fid: u64) -> Result<bool> {
        self.nb_calls_file_in_namespace.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().file_sizes.contains_key(&fid))
    }

    async fn stagerrm_as_root(&self, fid: u64) -> Result<()> {
        self.nb_calls_stagerrm.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if state.stagerrm_fails {
            return Err(Error::StagerrmFailed {
                fid,
                reason: "scripted failure".to_string(),
            });
        }
        state.stagerrm_fids.push(fid);
        Ok(())
    }

    async fn fs_id_to_space(&self) -> HashMap<u32, String> {
        self.state.lock().fs_to_space.clone()
    }

    async fn space_to_disk_replicas(
        &self,
        spaces: &BTreeSet<String>,
        stop: &CancellationToken,
        nb_scanned: &AtomicU64,
    ) -> Result<HashMap<String, Vec<DiskReplica>>> {
        let state = self.state.lock();
        let mut map = HashMap::new();
        for space in spaces {
            if stop.is_cancelled() {
                break;
            }
            let replicas = state.replicas.get(space).cloned().unwrap_or_default();
            nb_scanned.fetch_add(replicas.len() as u64, Ordering::SeqCst);
            map.insert(space.clone(), replicas);
        }
        Ok(map)
    }
}
