//! Striped RAID file layout engine
//!
//! A logical file is spread over N data stripes and P parity stripes,
//! each living behind a [`StripeIo`]. The entry server coordinates all
//! distributed work: parallel block reads and queued writes, per-group
//! parity, header validation and on-the-fly reconstruction of erased
//! blocks.

pub mod coordinator;
pub mod group;
pub mod header;
pub mod layout_id;
pub mod mock;
pub mod opaque;
pub mod parity;
pub mod pieces;
pub mod raid6;
pub mod raid_dp;
pub mod stripe_io;
pub mod validator;
pub mod writer;

pub use coordinator::LayoutCoordinator;
pub use group::GroupBuffer;
pub use header::{StripeHeader, HEADER_SIZE};
pub use layout_id::{ChecksumKind, IoKind, LayoutId, Scheme};
pub use mock::FaultyStripeFactory;
pub use opaque::OpenOpaque;
pub use parity::{scheme_for, GroupGeometry, ParityScheme};
pub use pieces::PieceMap;
pub use raid6::ReedSolomonScheme;
pub use raid_dp::DualParityScheme;
pub use stripe_io::{FileStripeFactory, FileStripeIo, OpenFlags, StripeIo, StripeIoFactory, StripeStat};
pub use writer::StripeWriter;
