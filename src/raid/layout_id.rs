//! Layout identifier
//!
//! A layout id packs everything needed to reopen a striped file: the
//! parity scheme, the data/parity stripe counts, the stripe width and the
//! checksum kind. The id travels in the open opaque between the entry
//! server and its stripe peers.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Minimum stripe width in bytes
pub const MIN_STRIPE_WIDTH: u64 = 64;

/// Maximum number of stripes (data + parity) in a layout
pub const MAX_TOTAL_STRIPES: u32 = 16;

/// Number of parity stripes of the dual-parity scheme
pub const DUAL_PARITY_NB_PARITY: u32 = 2;

/// Parity algebra of a layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scheme {
    /// Horizontal + diagonal XOR parity, always two parity stripes
    DualParity,
    /// Reed-Solomon parity, configurable parity stripe count
    ReedSolomon,
}

/// Checksum applied to stripe headers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumKind {
    None,
    Crc32,
}

/// Kind of I/O used to reach the stripes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoKind {
    Local,
    Remote,
}

/// Decoded layout identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutId {
    pub scheme: Scheme,
    pub nb_data: u32,
    pub nb_parity: u32,
    pub stripe_width: u64,
    pub checksum: ChecksumKind,
    pub io: IoKind,
}

impl LayoutId {
    /// Create and validate a layout id
    pub fn new(
        scheme: Scheme,
        nb_data: u32,
        nb_parity: u32,
        stripe_width: u64,
        checksum: ChecksumKind,
        io: IoKind,
    ) -> Result<Self> {
        let id = Self {
            scheme,
            nb_data,
            nb_parity,
            stripe_width,
            checksum,
            io,
        };
        id.validate()?;
        Ok(id)
    }

    /// Total number of stripes (data + parity)
    pub fn nb_total(&self) -> u32 {
        self.nb_data + self.nb_parity
    }

    fn validate(&self) -> Result<()> {
        if self.nb_total() < 2 {
            return Err(Error::InvalidLayout(
                "stripe count must be at least 2".to_string(),
            ));
        }
        if self.nb_total() > MAX_TOTAL_STRIPES {
            return Err(Error::InvalidLayout(format!(
                "stripe count must be at most {MAX_TOTAL_STRIPES}"
            )));
        }
        if self.stripe_width < MIN_STRIPE_WIDTH {
            return Err(Error::InvalidLayout(format!(
                "stripe width must be at least {MIN_STRIPE_WIDTH}"
            )));
        }
        if self.nb_data == 0 || self.nb_parity == 0 {
            return Err(Error::InvalidLayout(
                "layout needs at least one data and one parity stripe".to_string(),
            ));
        }
        if self.nb_parity > self.nb_data {
            return Err(Error::InvalidLayout(
                "parity stripe count must not exceed data stripe count".to_string(),
            ));
        }
        if self.scheme == Scheme::DualParity && self.nb_parity != DUAL_PARITY_NB_PARITY {
            return Err(Error::InvalidLayout(format!(
                "dual parity requires exactly {DUAL_PARITY_NB_PARITY} parity stripes"
            )));
        }
        Ok(())
    }

    /// Pack this id into 64 bits
    pub fn encode(&self) -> u64 {
        let scheme = match self.scheme {
            Scheme::DualParity => 0u64,
            Scheme::ReedSolomon => 1,
        };
        let checksum = match self.checksum {
            ChecksumKind::None => 0u64,
            ChecksumKind::Crc32 => 1,
        };
        let io = match self.io {
            IoKind::Local => 0u64,
            IoKind::Remote => 1,
        };
        (self.nb_data as u64)
            | ((self.nb_parity as u64) << 8)
            | (scheme << 16)
            | (checksum << 20)
            | (io << 24)
            | (self.stripe_width << 32)
    }

    /// Unpack a 64 bit id
    pub fn decode(bits: u64) -> Result<Self> {
        let scheme = match (bits >> 16) & 0xf {
            0 => Scheme::DualParity,
            1 => Scheme::ReedSolomon,
            v => {
                return Err(Error::InvalidLayout(format!("unknown parity scheme {v}")));
            }
        };
        let checksum = match (bits >> 20) & 0xf {
            0 => ChecksumKind::None,
            1 => ChecksumKind::Crc32,
            v => {
                return Err(Error::InvalidLayout(format!("unknown checksum kind {v}")));
            }
        };
        let io = match (bits >> 24) & 0xf {
            0 => IoKind::Local,
            1 => IoKind::Remote,
            v => return Err(Error::InvalidLayout(format!("unknown io kind {v}"))),
        };
        Self::new(
            scheme,
            (bits & 0xff) as u32,
            ((bits >> 8) & 0xff) as u32,
            bits >> 32,
            checksum,
            io,
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
