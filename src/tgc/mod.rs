//! Tape-aware disk garbage collector
//!
//! One worker per space maintains a bounded LRU of the files with disk
//! replicas and, when the space falls below its availability target,
//! drops disk replicas of files that also exist on tape.
//!
//! The namespace, the space view and the tape system are reached through
//! the injected [`Mgm`] facade; nothing in this module touches global
//! state.

pub mod cached_value;
pub mod clock;
pub mod config;
pub mod constants;
pub mod histogram;
pub mod lru;
pub mod mgm;
pub mod mock;
pub mod multi;
pub mod registry;
pub mod space_stats;
pub mod stats;
pub mod tape_gc;

pub use cached_value::CachedValue;
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::SpaceConfig;
pub use histogram::FreedBytesHistogram;
pub use lru::Lru;
pub use mgm::{DiskReplica, Mgm};
pub use mock::MockMgm;
pub use multi::{MultiSpaceTapeGc, StatusError};
pub use registry::SpaceToTapeGcMap;
pub use space_stats::SmartSpaceStats;
pub use stats::{SpaceStats, TapeGcStats};
pub use tape_gc::TapeGc;
