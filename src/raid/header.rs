//! Per-stripe header codec
//!
//! Every stripe file starts with one block-sized header recording the
//! stripe's logical id, the number of blocks of the logical file and the
//! size of its last block. The header is protected by a CRC32; anything
//! that fails to read or verify leaves the header invalid rather than
//! failing the open, because invalid headers are expected input for the
//! validator.

use crate::error::Result;
use crate::raid::stripe_io::StripeIo;
use std::time::Duration;

/// Size in bytes of the on-disk header record
pub const HEADER_SIZE: u64 = 4096;

const MAGIC: &[u8; 8] = b"_STRATA_";
const VERSION: u32 = 1;
const ENCODED_LEN: usize = 36;

/// In-memory stripe header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeHeader {
    stripe_id: u32,
    nb_blocks: u64,
    last_block_size: u64,
    valid: bool,
}

impl Default for StripeHeader {
    fn default() -> Self {
        Self::invalid()
    }
}

impl StripeHeader {
    /// A header that failed to read or verify
    pub fn invalid() -> Self {
        Self {
            stripe_id: 0,
            nb_blocks: 0,
            last_block_size: 0,
            valid: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    pub fn stripe_id(&self) -> u32 {
        self.stripe_id
    }

    pub fn set_stripe_id(&mut self, stripe_id: u32) {
        self.stripe_id = stripe_id;
    }

    pub fn nb_blocks(&self) -> u64 {
        self.nb_blocks
    }

    pub fn set_nb_blocks(&mut self, nb_blocks: u64) {
        self.nb_blocks = nb_blocks;
    }

    pub fn last_block_size(&self) -> u64 {
        self.last_block_size
    }

    pub fn set_last_block_size(&mut self, last_block_size: u64) {
        self.last_block_size = last_block_size;
    }

    /// Size of the logical file recorded by this header.
    ///
    /// A block-aligned file carries one extra empty block, so the size is
    /// always `(nb_blocks - 1) * stripe_width + last_block_size`.
    pub fn file_size(&self, stripe_width: u64) -> u64 {
        if self.nb_blocks == 0 {
            0
        } else {
            (self.nb_blocks - 1) * stripe_width + self.last_block_size
        }
    }

    /// Block count and last-block size for a logical file of `file_size`
    /// bytes: `ceil(file_size / stripe_width)` blocks, plus one empty
    /// block when the file is block-aligned.
    pub fn blocks_for_size(file_size: u64, stripe_width: u64) -> (u64, u64) {
        let last_block_size = file_size % stripe_width;
        let mut nb_blocks = file_size.div_ceil(stripe_width);
        if last_block_size == 0 {
            nb_blocks += 1;
        }
        (nb_blocks, last_block_size)
    }

    /// Serialize into a header-sized buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE as usize];
        buf[0..8].copy_from_slice(MAGIC);
        buf[8..12].copy_from_slice(&VERSION.to_le_bytes());
        buf[12..16].copy_from_slice(&self.stripe_id.to_le_bytes());
        buf[16..24].copy_from_slice(&self.nb_blocks.to_le_bytes());
        buf[24..32].copy_from_slice(&self.last_block_size.to_le_bytes());
        let crc = crc32fast::hash(&buf[0..32]);
        buf[32..ENCODED_LEN].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Deserialize from an on-disk buffer. Any mismatch yields an invalid
    /// header.
    pub fn decode(buf: &[u8]) -> Self {
        if buf.len() < ENCODED_LEN || &buf[0..8] != MAGIC {
            return Self::invalid();
        }
        let version = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        if version != VERSION {
            return Self::invalid();
        }
        let stored_crc = u32::from_le_bytes(buf[32..ENCODED_LEN].try_into().unwrap());
        if crc32fast::hash(&buf[0..32]) != stored_crc {
            return Self::invalid();
        }
        Self {
            stripe_id: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            nb_blocks: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            last_block_size: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            valid: true,
        }
    }

    /// Read the header from offset 0 of a stripe file. Failures yield an
    /// invalid header, never an error.
    pub async fn read_from(io: &dyn StripeIo, timeout: Duration) -> Self {
        let mut buf = vec![0u8; ENCODED_LEN];
        match io.read_at(0, &mut buf, timeout).await {
            Ok(n) if n == ENCODED_LEN => Self::decode(&buf),
            _ => Self::invalid(),
        }
    }

    /// Write the header to offset 0 of a stripe file
    pub async fn write_to(&self, io: &dyn StripeIo, timeout: Duration) -> Result<()> {
        let buf = self.encode();
        let n = io.write_at(0, &buf, timeout).await?;
        if n != buf.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "short header write",
            )
            .into());
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn header(stripe_id: u32, nb_blocks: u64, last: u64) -> StripeHeader {
        let mut h = StripeHeader::invalid();
        h.set_stripe_id(stripe_id);
        h.set_nb_blocks(nb_blocks);
        h.set_last_block_size(last);
        h.set_valid(true);
        h
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let h = header(3, 17, 100);
        let decoded = StripeHeader::decode(&h.encode());
        assert!(decoded.is_valid());
        assert_eq!(decoded, h);
    }

    #[test]
    fn test_corrupt_magic_is_invalid() {
        let mut buf = header(1, 2, 3).encode();
        buf[0] ^= 0xff;
        assert!(!StripeHeader::decode(&buf).is_valid());
    }

    #[test]
    fn test_corrupt_payload_fails_crc() {
        let mut buf = header(1, 2, 3).encode();
        buf[20] ^= 0x01;
        assert!(!StripeHeader::decode(&buf).is_valid());
    }

    #[test]
    fn test_zeroed_buffer_is_invalid() {
        let buf = vec![0u8; HEADER_SIZE as usize];
        assert!(!StripeHeader::decode(&buf).is_valid());
    }

    #[test]
    fn test_file_size_round_trip() {
        let w = 128;
        for file_size in [0u64, 1, 127, 128, 129, 5 * 128, 5 * 128 + 10] {
            let (nb_blocks, last) = StripeHeader::blocks_for_size(file_size, w);
            let h = header(0, nb_blocks, last);
            assert_eq!(h.file_size(w), file_size, "file_size={file_size}");
        }
    }

    #[test]
    fn test_aligned_file_has_extra_empty_block() {
        let (nb_blocks, last) = StripeHeader::blocks_for_size(5 * 128, 128);
        assert_eq!(nb_blocks, 6);
        assert_eq!(last, 0);

        let (nb_blocks, last) = StripeHeader::blocks_for_size(0, 128);
        assert_eq!(nb_blocks, 1);
        assert_eq!(last, 0);
    }
}
