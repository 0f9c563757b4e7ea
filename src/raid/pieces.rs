//! Bookkeeping for sparse (non-streaming) writes
//!
//! Every written range is recorded until its parity has been committed.
//! Ranges are merged on demand; a range is ready for parity once it fully
//! covers a group-aligned span, and a forced pass (at close) emits the
//! leftovers as well.

use std::collections::{BTreeMap, BTreeSet};

/// Ordered map of written ranges awaiting parity computation
#[derive(Debug, Default)]
pub struct PieceMap {
    pieces: BTreeMap<u64, u64>,
}

impl PieceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a written range. A re-written offset keeps the longer
    /// length.
    pub fn add_piece(&mut self, offset: u64, length: u64) {
        let entry = self.pieces.entry(offset).or_insert(0);
        if length > *entry {
            *entry = length;
        }
    }

    /// Merge adjacent and overlapping ranges in place
    pub fn merge(&mut self) {
        let mut merged: BTreeMap<u64, u64> = BTreeMap::new();
        let mut current: Option<(u64, u64)> = None;

        for (&offset, &length) in &self.pieces {
            match current {
                Some((start, end)) if offset <= end => {
                    current = Some((start, end.max(offset + length)));
                }
                Some((start, end)) => {
                    merged.insert(start, end - start);
                    current = Some((offset, offset + length));
                }
                None => current = Some((offset, offset + length)),
            }
        }
        if let Some((start, end)) = current {
            merged.insert(start, end - start);
        }
        self.pieces = merged;
    }

    /// Extract the offsets of the groups whose parity can be computed.
    ///
    /// Without `force_all`, only groups fully covered by a recorded range
    /// are returned and their span is removed from the map, leaving the
    /// uncovered edges behind. With `force_all`, every group touched by a
    /// range is returned and the map is drained.
    pub fn offset_groups(&mut self, size_group: u64, force_all: bool) -> BTreeSet<u64> {
        let mut groups = BTreeSet::new();
        let mut remaining: BTreeMap<u64, u64> = BTreeMap::new();

        for (&offset, &length) in &self.pieces {
            let piece_end = offset + length;
            let mut group_offset = (offset / size_group) * size_group;

            if force_all {
                while group_offset < piece_end {
                    groups.insert(group_offset);
                    group_offset += size_group;
                }
                continue;
            }

            if group_offset < offset {
                group_offset += size_group;
            }

            let mut covered_any = false;
            while group_offset + size_group <= piece_end {
                // Leading partial span stays in the map
                if !covered_any && group_offset > offset {
                    remaining.insert(offset, group_offset - offset);
                }
                covered_any = true;
                groups.insert(group_offset);
                group_offset += size_group;
            }

            if covered_any {
                // Trailing partial span stays in the map
                if group_offset < piece_end {
                    remaining.insert(group_offset, piece_end - group_offset);
                }
            } else {
                remaining.insert(offset, length);
            }
        }

        self.pieces = if force_all { BTreeMap::new() } else { remaining };
        groups
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    #[cfg(test)]
    fn ranges(&self) -> Vec<(u64, u64)> {
        self.pieces.iter().map(|(&o, &l)| (o, l)).collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
