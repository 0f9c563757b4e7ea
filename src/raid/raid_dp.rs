//! Dual-parity scheme
//!
//! A group is an N x N matrix of data blocks plus one horizontal-parity
//! stripe and one diagonal-parity stripe. Row r of the horizontal stripe
//! is the XOR of data row r. Diagonals run over the N x (N+1) matrix of
//! data plus horizontal parity: cell (r, c) belongs to diagonal
//! (r + c) mod (N+1). Each diagonal misses exactly one column, and the
//! diagonal N is not stored; both facts together guarantee that repair of
//! any two lost stripes can always start somewhere.
//!
//! Reconstruction runs row and diagonal repairs to a fixed point, which
//! recovers any pattern of erasures confined to at most two stripes.

use crate::error::{Error, Result};
use crate::raid::group::GroupBuffer;
use crate::raid::parity::{
    nb_erased_columns, xor_into, GroupGeometry, ParityScheme, RecoverError,
};

pub struct DualParityScheme {
    geometry: GroupGeometry,
}

impl DualParityScheme {
    pub fn new(nb_data: usize, stripe_width: u64) -> Result<Self> {
        if nb_data == 0 {
            return Err(Error::InvalidLayout(
                "dual parity needs at least one data stripe".to_string(),
            ));
        }
        // Row-diagonal parity repairs any double loss only when the
        // modulus (data stripes + 1) is prime
        if !is_prime(nb_data + 1) {
            return Err(Error::InvalidLayout(format!(
                "dual parity requires a prime data stripe count + 1, got {nb_data} data stripes"
            )));
        }
        Ok(Self {
            geometry: GroupGeometry {
                nb_data_files: nb_data,
                nb_parity_files: 2,
                nb_data_blocks: nb_data * nb_data,
                nb_total_blocks: nb_data * nb_data + 2 * nb_data,
                stripe_width,
            },
        })
    }

    /// Big index of data cell (row, col)
    fn data(&self, row: usize, col: usize) -> usize {
        row * self.geometry.nb_total_files() + col
    }

    /// Big index of the horizontal parity block of `row`
    fn hp(&self, row: usize) -> usize {
        row * self.geometry.nb_total_files() + self.geometry.nb_data_files
    }

    /// Big index of the diagonal parity block of diagonal `d`
    fn dp(&self, d: usize) -> usize {
        d * self.geometry.nb_total_files() + self.geometry.nb_data_files + 1
    }

    /// Cells of diagonal `d` over the data + horizontal-parity matrix
    fn diagonal_members(&self, d: usize) -> Vec<usize> {
        let n = self.geometry.nb_data_files;
        let mut members = Vec::with_capacity(n);
        for row in 0..n {
            // col = (d - row) mod (n + 1); col n is the horizontal parity
            let col = (d + n + 1 - row) % (n + 1);
            if col < n {
                members.push(self.data(row, col));
            } else {
                members.push(self.hp(row));
            }
        }
        members
    }
}

impl ParityScheme for DualParityScheme {
    fn geometry(&self) -> GroupGeometry {
        self.geometry
    }

    fn compute_parity(&self, group: &mut GroupBuffer) -> Result<()> {
        let n = self.geometry.nb_data_files;
        let width = self.geometry.stripe_width as usize;

        // Horizontal parity: XOR of each data row
        for row in 0..n {
            let mut parity = vec![0u8; width];
            for col in 0..n {
                xor_into(&mut parity, group.block(self.data(row, col)));
            }
            group.block_mut(self.hp(row)).copy_from_slice(&parity);
        }

        // Diagonal parity over data and horizontal parity; diagonal n is
        // not stored
        for d in 0..n {
            let mut parity = vec![0u8; width];
            for member in self.diagonal_members(d) {
                xor_into(&mut parity, group.block(member));
            }
            group.block_mut(self.dp(d)).copy_from_slice(&parity);
        }
        Ok(())
    }

    fn reconstruct(&self, cells: &mut [Option<Vec<u8>>]) -> std::result::Result<(), RecoverError> {
        let n = self.geometry.nb_data_files;
        let width = self.geometry.stripe_width as usize;
        let fail = |cells: &[Option<Vec<u8>>]| RecoverError {
            nb_erased: nb_erased_columns(cells, &self.geometry),
            tolerance: 2,
        };

        if nb_erased_columns(cells, &self.geometry) > 2 {
            return Err(fail(cells));
        }

        loop {
            let mut progress = false;

            // Row repair: a row (data + horizontal parity) with exactly
            // one erased cell is the XOR of the others
            for row in 0..n {
                let mut members: Vec<usize> = (0..n).map(|col| self.data(row, col)).collect();
                members.push(self.hp(row));
                progress |= repair_one(cells, &members, width);
            }

            // Diagonal repair, including rebuilding a lost diagonal
            // parity block once its diagonal is complete
            for d in 0..n {
                let members = self.diagonal_members(d);
                if cells[self.dp(d)].is_some() {
                    let mut with_parity = members.clone();
                    with_parity.push(self.dp(d));
                    progress |= repair_one(cells, &with_parity, width);
                } else if members.iter().all(|m| cells[*m].is_some()) {
                    let mut parity = vec![0u8; width];
                    for member in &members {
                        xor_into(&mut parity, cells[*member].as_ref().unwrap());
                    }
                    cells[self.dp(d)] = Some(parity);
                    progress = true;
                }
            }

            if !progress {
                break;
            }
        }

        if cells.iter().any(|c| c.is_none()) {
            return Err(fail(cells));
        }
        Ok(())
    }
}

fn is_prime(v: usize) -> bool {
    if v < 2 {
        return false;
    }
    let mut d = 2;
    while d * d <= v {
        if v % d == 0 {
            return false;
        }
        d += 1;
    }
    true
}

/// If exactly one of `members` is erased, rebuild it as the XOR of the
/// others. Returns true if a cell was repaired.
fn repair_one(cells: &mut [Option<Vec<u8>>], members: &[usize], width: usize) -> bool {
    let mut missing = None;
    for &m in members {
        if cells[m].is_none() {
            if missing.is_some() {
                return false;
            }
            missing = Some(m);
        }
    }
    let Some(target) = missing else { return false };

    let mut value = vec![0u8; width];
    for &m in members {
        if m != target {
            xor_into(&mut value, cells[m].as_ref().unwrap());
        }
    }
    cells[target] = Some(value);
    true
}

// =============================================================================
// Tests
// =============================================================================
