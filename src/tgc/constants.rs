//! Tape-aware garbage collector constants

/// Default maximum age in seconds of a garbage collector's cached
/// configuration
pub const DEFAULT_CONFIG_CACHE_AGE_SECS: i64 = 10;

/// Space configuration member: delay in seconds between space queries
pub const NAME_QRY_PERIOD_SECS: &str = "tgc.qryperiodsecs";

/// Default delay in seconds between space queries
pub const DEFAULT_QRY_PERIOD_SECS: u64 = 310;

/// Space configuration member: number of available bytes the collector
/// is targeting
pub const NAME_AVAIL_BYTES: &str = "tgc.availbytes";

/// Default number of available bytes the collector is targeting
pub const DEFAULT_AVAIL_BYTES: u64 = 0;

/// Space configuration member: total number of bytes a space must have
/// before garbage collection can begin
pub const NAME_TOTAL_BYTES: &str = "tgc.totalbytes";

/// Default total number of bytes before garbage collection can begin
/// (1 exabyte)
pub const DEFAULT_TOTAL_BYTES: u64 = 1_000_000_000_000_000_000;

/// Default maximum number of entries in a per-space LRU queue
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000_000;

/// Maximum number of bins in a freed-bytes histogram
pub const FREED_BYTES_HISTOGRAM_MAX_NB_BINS: u32 = 1000;

/// Maximum width in seconds of a freed-bytes histogram bin
pub const FREED_BYTES_HISTOGRAM_MAX_BIN_WIDTH_SECS: u32 = 100_000;

/// Default number of bins in a freed-bytes histogram
pub const DEFAULT_HISTOGRAM_NB_BINS: u32 = 10;

/// Default width in seconds of a freed-bytes histogram bin
pub const DEFAULT_HISTOGRAM_BIN_WIDTH_SECS: u32 = 60;

/// Size in bytes of the status endpoint reply buffer (1 MiB)
pub const STATUS_REPLY_BUF_SIZE: u64 = 1_048_576;
