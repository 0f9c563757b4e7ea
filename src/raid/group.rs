//! In-memory blocks of one parity group

use crate::raid::parity::GroupGeometry;

/// Data and parity blocks of the parity group currently being assembled.
///
/// Blocks are "big"-indexed: line-major over all stripes, data columns
/// first, parity columns last. Absent data is zero, so computing parity
/// over a partially filled group yields the parity of the zero-padded
/// group.
pub struct GroupBuffer {
    geometry: GroupGeometry,
    group_offset: Option<u64>,
    blocks: Vec<Vec<u8>>,
    present: Vec<bool>,
    nb_present: usize,
}

impl GroupBuffer {
    pub fn new(geometry: GroupGeometry) -> Self {
        let width = geometry.stripe_width as usize;
        let nb_total = geometry.nb_total_blocks;
        Self {
            geometry,
            group_offset: None,
            blocks: vec![vec![0u8; width]; nb_total],
            present: vec![false; geometry.nb_data_blocks],
            nb_present: 0,
        }
    }

    /// Offset of the group currently buffered, if any
    pub fn group_offset(&self) -> Option<u64> {
        self.group_offset
    }

    /// Zero all blocks and retarget the buffer at the group starting at
    /// `group_offset`
    pub fn reset(&mut self, group_offset: u64) {
        debug_assert_eq!(group_offset % self.geometry.size_group(), 0);
        for block in &mut self.blocks {
            block.fill(0);
        }
        self.present.fill(false);
        self.nb_present = 0;
        self.group_offset = Some(group_offset);
    }

    /// Copy a piece of file data into the group.
    ///
    /// `offset` is the global file offset of `data`; the piece must not
    /// cross a block boundary. Retargets the buffer when the offset
    /// belongs to a different group than the buffered one.
    pub fn add_data_block(&mut self, offset: u64, data: &[u8], big_index: usize) {
        let size_group = self.geometry.size_group();
        let group_offset = (offset / size_group) * size_group;
        if self.group_offset != Some(group_offset) {
            self.reset(group_offset);
        }

        let small = ((offset - group_offset) / self.geometry.stripe_width) as usize;
        let in_block = (offset % self.geometry.stripe_width) as usize;
        self.blocks[big_index][in_block..in_block + data.len()].copy_from_slice(data);

        if !self.present[small] {
            self.present[small] = true;
            self.nb_present += 1;
        }
    }

    /// True when every data block of the group has been supplied
    pub fn is_complete(&self) -> bool {
        self.nb_present == self.geometry.nb_data_blocks
    }

    /// True when at least one data block of the group has been supplied
    pub fn has_data(&self) -> bool {
        self.nb_present > 0
    }

    pub fn block(&self, big_index: usize) -> &[u8] {
        &self.blocks[big_index]
    }

    pub fn block_mut(&mut self, big_index: usize) -> &mut Vec<u8> {
        &mut self.blocks[big_index]
    }

    /// Split into the data blocks and the parity blocks of one line,
    /// for in-place parity computation
    pub fn blocks_mut(&mut self) -> &mut [Vec<u8>] {
        &mut self.blocks
    }
}

// =============================================================================
// Tests
// =============================================================================
