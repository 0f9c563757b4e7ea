//! Parity scheme capability set
//!
//! The coordinator is generic over the parity algebra: a scheme describes
//! the shape of its parity group, computes parity blocks in place, and
//! reconstructs erased cells. Everything that touches stripes, offsets or
//! buffers stays in the coordinator; the scheme is pure block algebra.

use crate::error::Result;
use crate::raid::group::GroupBuffer;
use crate::raid::layout_id::{LayoutId, Scheme};
use std::sync::Arc;

/// Shape of one parity group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupGeometry {
    /// Number of data stripes
    pub nb_data_files: usize,
    /// Number of parity stripes
    pub nb_parity_files: usize,
    /// Data blocks per group
    pub nb_data_blocks: usize,
    /// Data plus parity blocks per group
    pub nb_total_blocks: usize,
    /// Block size in bytes
    pub stripe_width: u64,
}

impl GroupGeometry {
    /// Total number of stripes
    pub fn nb_total_files(&self) -> usize {
        self.nb_data_files + self.nb_parity_files
    }

    /// Number of horizontal lines per group
    pub fn nb_lines(&self) -> usize {
        self.nb_data_blocks / self.nb_data_files
    }

    /// Bytes of file data per line
    pub fn size_line(&self) -> u64 {
        self.nb_data_files as u64 * self.stripe_width
    }

    /// Bytes of file data per group
    pub fn size_group(&self) -> u64 {
        self.nb_data_blocks as u64 * self.stripe_width
    }

    /// Map a data-block index within the group to its big (data + parity)
    /// block index
    pub fn map_small_to_big(&self, small: usize) -> usize {
        let line = small / self.nb_data_files;
        let pos = small % self.nb_data_files;
        line * self.nb_total_files() + pos
    }

    /// Decompose a big block index into its line and stripe position.
    /// Positions below `nb_data_files` are data stripes, the rest parity.
    pub fn big_position(&self, big: usize) -> (usize, usize) {
        (big / self.nb_total_files(), big % self.nb_total_files())
    }
}

/// Reconstruction failed: more erasures than the scheme can repair
#[derive(Debug, Clone, Copy)]
pub struct RecoverError {
    /// Number of stripes with erased cells
    pub nb_erased: usize,
    /// Maximum number of erased stripes the scheme repairs
    pub tolerance: usize,
}

/// Parity algebra of one layout.
///
/// `reconstruct` operates on the big-indexed cells of one group: `None`
/// marks an erasure; on success every cell is `Some` and data cells are
/// bit-identical to what `compute_parity` saw.
pub trait ParityScheme: Send + Sync {
    fn geometry(&self) -> GroupGeometry;

    /// Fill the parity blocks of a group from its data blocks. Data
    /// blocks are never modified.
    fn compute_parity(&self, group: &mut GroupBuffer) -> Result<()>;

    /// Rebuild the erased cells of a group in place
    fn reconstruct(&self, cells: &mut [Option<Vec<u8>>]) -> std::result::Result<(), RecoverError>;
}

/// Instantiate the parity scheme selected by a layout id
pub fn scheme_for(layout: &LayoutId) -> Result<Arc<dyn ParityScheme>> {
    match layout.scheme {
        Scheme::DualParity => Ok(Arc::new(crate::raid::raid_dp::DualParityScheme::new(
            layout.nb_data as usize,
            layout.stripe_width,
        )?)),
        Scheme::ReedSolomon => Ok(Arc::new(crate::raid::raid6::ReedSolomonScheme::new(
            layout.nb_data as usize,
            layout.nb_parity as usize,
            layout.stripe_width,
        )?)),
    }
}

/// XOR `src` into `acc`
pub(crate) fn xor_into(acc: &mut [u8], src: &[u8]) {
    debug_assert_eq!(acc.len(), src.len());
    for (a, s) in acc.iter_mut().zip(src) {
        *a ^= s;
    }
}

/// Count the stripes (columns) that have at least one erased cell
pub(crate) fn nb_erased_columns(cells: &[Option<Vec<u8>>], geometry: &GroupGeometry) -> usize {
    let mut erased = vec![false; geometry.nb_total_files()];
    for (big, cell) in cells.iter().enumerate() {
        if cell.is_none() {
            let (_line, pos) = geometry.big_position(big);
            erased[pos] = true;
        }
    }
    erased.iter().filter(|e| **e).count()
}
