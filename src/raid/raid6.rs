//! Reed-Solomon parity scheme
//!
//! One line per group: N data blocks and P parity blocks, parity computed
//! over GF(2^8). Any combination of up to P erased stripes in a group is
//! recoverable.

use crate::error::{Error, Result};
use crate::raid::group::GroupBuffer;
use crate::raid::parity::{nb_erased_columns, GroupGeometry, ParityScheme, RecoverError};
use reed_solomon_erasure::galois_8::ReedSolomon;

pub struct ReedSolomonScheme {
    geometry: GroupGeometry,
    rs: ReedSolomon,
}

impl ReedSolomonScheme {
    pub fn new(nb_data: usize, nb_parity: usize, stripe_width: u64) -> Result<Self> {
        let rs = ReedSolomon::new(nb_data, nb_parity).map_err(|e| {
            Error::InvalidLayout(format!("failed to create Reed-Solomon codec: {e}"))
        })?;
        Ok(Self {
            geometry: GroupGeometry {
                nb_data_files: nb_data,
                nb_parity_files: nb_parity,
                nb_data_blocks: nb_data,
                nb_total_blocks: nb_data + nb_parity,
                stripe_width,
            },
            rs,
        })
    }
}

impl ParityScheme for ReedSolomonScheme {
    fn geometry(&self) -> GroupGeometry {
        self.geometry
    }

    fn compute_parity(&self, group: &mut GroupBuffer) -> Result<()> {
        // Big-indexed blocks are already in shard order: data then parity
        for big in self.geometry.nb_data_blocks..self.geometry.nb_total_blocks {
            group.block_mut(big).fill(0);
        }
        self.rs
            .encode(group.blocks_mut())
            .map_err(|e| Error::Internal(format!("Reed-Solomon encoding failed: {e}")))
    }

    fn reconstruct(&self, cells: &mut [Option<Vec<u8>>]) -> std::result::Result<(), RecoverError> {
        let nb_missing = cells.iter().filter(|c| c.is_none()).count();
        if nb_missing == 0 {
            return Ok(());
        }
        if nb_missing > self.geometry.nb_parity_files {
            return Err(RecoverError {
                nb_erased: nb_erased_columns(cells, &self.geometry),
                tolerance: self.geometry.nb_parity_files,
            });
        }
        self.rs.reconstruct(cells).map_err(|_| RecoverError {
            nb_erased: nb_erased_columns(cells, &self.geometry),
            tolerance: self.geometry.nb_parity_files,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WIDTH: u64 = 64;

    fn filled_group(scheme: &ReedSolomonScheme) -> GroupBuffer {
        let geometry = scheme.geometry();
        let mut group = GroupBuffer::new(geometry);
        for small in 0..geometry.nb_data_blocks {
            let data = vec![(small as u8) + 1; WIDTH as usize];
            group.add_data_block(
                small as u64 * WIDTH,
                &data,
                geometry.map_small_to_big(small),
            );
        }
        scheme.compute_parity(&mut group).unwrap();
        group
    }

    fn cells_of(group: &GroupBuffer, nb_total: usize) -> Vec<Option<Vec<u8>>> {
        (0..nb_total).map(|big| Some(group.block(big).to_vec())).collect()
    }

    #[test]
    fn test_parity_leaves_data_untouched() {
        let scheme = ReedSolomonScheme::new(4, 2, WIDTH).unwrap();
        let group = filled_group(&scheme);
        for small in 0..4 {
            assert_eq!(group.block(small), &vec![(small as u8) + 1; WIDTH as usize][..]);
        }
    }

    #[test]
    fn test_recovers_up_to_parity_count() {
        let scheme = ReedSolomonScheme::new(4, 2, WIDTH).unwrap();
        let group = filled_group(&scheme);
        let reference = cells_of(&group, 6);

        let mut cells = reference.clone();
        cells[1] = None; // data stripe
        cells[4] = None; // parity stripe
        scheme.reconstruct(&mut cells).unwrap();
        assert_eq!(cells, reference);
    }

    #[test]
    fn test_too_many_erasures_fail() {
        let scheme = ReedSolomonScheme::new(4, 2, WIDTH).unwrap();
        let group = filled_group(&scheme);
        let mut cells = cells_of(&group, 6);
        cells[0] = None;
        cells[1] = None;
        cells[2] = None;

        let err = scheme.reconstruct(&mut cells).unwrap_err();
        assert_eq!(err.nb_erased, 3);
        assert_eq!(err.tolerance, 2);
    }

    proptest! {
        #[test]
        fn prop_any_two_erasures_recover(
            seed in proptest::collection::vec(0u8..=255, 4 * WIDTH as usize),
            lost_a in 0usize..6,
            lost_b in 0usize..6,
        ) {
            let scheme = ReedSolomonScheme::new(4, 2, WIDTH).unwrap();
            let geometry = scheme.geometry();
            let mut group = GroupBuffer::new(geometry);
            for small in 0..4 {
                let chunk = &seed[small * WIDTH as usize..(small + 1) * WIDTH as usize];
                group.add_data_block(
                    small as u64 * WIDTH,
                    chunk,
                    geometry.map_small_to_big(small),
                );
            }
            scheme.compute_parity(&mut group).unwrap();

            let reference = cells_of(&group, 6);
            let mut cells = reference.clone();
            cells[lost_a] = None;
            cells[lost_b] = None;

            scheme.reconstruct(&mut cells).unwrap();
            prop_assert_eq!(cells, reference);
        }
    }
}
