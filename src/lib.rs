//! StrataStor - striped RAID file layout engine with a tape-aware disk
//! garbage collector
//!
//! Two independent cores of a disk-storage file-server framework:
//!
//! - [`raid`] - an entry-server-coordinated layout that reads and writes
//!   one logical file across N+P stripe files, computes parity per group,
//!   detects corruption and reconstructs data on the fly
//! - [`tgc`] - a per-space control loop that tracks the files with disk
//!   replicas in a bounded LRU and frees disk space by dropping replicas
//!   of files that also exist on tape
//!
//! The cores share no data, but both follow the same discipline: bounded
//! resources, tolerance of partial failure, and injected facades
//! ([`raid::StripeIoFactory`], [`tgc::Mgm`]) instead of global state.
//!
//! # Modules
//!
//! - [`error`] - error types
//! - [`metrics`] - atomic counters and gauges
//! - [`raid`] - striped RAID layout engine
//! - [`tgc`] - tape-aware garbage collector

pub mod error;
pub mod metrics;
pub mod raid;
pub mod tgc;

// Re-export commonly used types
pub use error::{Error, Result};
pub use raid::{LayoutCoordinator, LayoutId};
pub use tgc::{MultiSpaceTapeGc, TapeGc};
