//! Port to the metadata manager (MGM)
//!
//! The garbage collector never talks to the namespace, the FsView or the
//! tape system directly; everything goes through this injected facade.
//! Implementations must be thread-safe.

use super::config::SpaceConfig;
use super::stats::SpaceStats;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::AtomicU64;
use tokio_util::sync::CancellationToken;

/// A disk replica discovered while walking the namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskReplica {
    /// File identifier
    pub fid: u64,
    /// Creation time in seconds since the UNIX epoch
    pub ctime: i64,
}

/// Port to the metadata manager.
///
/// # Example
///
/// ```ignore
/// struct RealMgm { /* ... */ }
///
/// #[async_trait]
/// impl Mgm for RealMgm {
///     async fn space_stats(&self, space: &str) -> Result<SpaceStats> {
///         // Sum statfs numbers over the online filesystems of the space
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait Mgm: Send + Sync {
    /// Return the garbage collector configuration of a space.
    ///
    /// Never fails: missing or unparseable members fall back to defaults.
    async fn space_config(&self, space: &str) -> SpaceConfig;

    /// Return the occupancy statistics of a space.
    ///
    /// Fails with [`crate::Error::SpaceNotFound`] for an unknown space.
    async fn space_stats(&self, space: &str) -> Result<SpaceStats>;

    /// Return the size in bytes of a file.
    ///
    /// Fails with [`crate::Error::FailedToGetFileSize`] if the file
    /// metadata cannot be retrieved.
    async fn file_size_bytes(&self, fid: u64) -> Result<u64>;

    /// Return true if the file is in the namespace and not scheduled for
    /// deletion
    async fn file_in_namespace(&self, fid: u64) -> Result<bool>;

    /// Drop the disk replicas of a file, leaving its tape copy intact
    async fn stagerrm_as_root(&self, fid: u64) -> Result<()>;

    /// Return the map from filesystem id to the name of its space
    async fn fs_id_to_space(&self) -> HashMap<u32, String>;

    /// Walk the namespace and return, per space, the files that currently
    /// have disk replicas.
    ///
    /// `stop` aborts the walk early; `nb_scanned` is incremented for every
    /// file visited.
    async fn space_to_disk_replicas(
        &self,
        spaces: &BTreeSet<String>,
        stop: &CancellationToken,
        nb_scanned: &AtomicU64,
    ) -> Result<HashMap<String, Vec<DiskReplica>>>;
}
