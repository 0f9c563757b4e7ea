//! Error types for StrataStor

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the RAID layout engine and the tape-aware GC
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // RAID Layout Errors
    // =========================================================================
    /// Invalid layout configuration
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    /// Stripe index out of range
    #[error("Illegal stripe index {index}, maximum is {max}")]
    IllegalStripeIndex { index: u32, max: u32 },

    /// A required open-opaque key is missing
    #[error("Open opaque is missing key: {0}")]
    OpaqueMissingKey(&'static str),

    /// An open-opaque value could not be parsed
    #[error("Invalid open-opaque value for {key}: {value}")]
    InvalidOpaque { key: String, value: String },

    /// Stripe file could not be opened
    #[error("Failed to open stripe {url}: {reason}")]
    StripeOpenFailed { url: String, reason: String },

    /// Too many stripe headers are corrupt to rebuild the layout maps
    #[error("{nb_invalid} stripe headers are invalid, can recover at most {tolerance}")]
    HeadersInvalid { nb_invalid: usize, tolerance: usize },

    /// More erasures in a parity group than the scheme can repair
    #[error("Group at offset {group_offset} has {nb_erased} erasures, tolerance is {tolerance}")]
    UnrecoverableGroup {
        group_offset: u64,
        nb_erased: usize,
        tolerance: usize,
    },

    /// Operation on a layout that is not open
    #[error("Layout file is not open")]
    NotOpen,

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(&'static str),

    /// Write-back of previously issued async requests failed
    #[error("{nb_failed} async write requests failed on stripe {stripe}")]
    WriteBackFailed { stripe: usize, nb_failed: usize },

    // =========================================================================
    // Tape GC Errors
    // =========================================================================
    /// LRU queue was constructed with a zero maximum size
    #[error("maxQueueSize must be greater than 0")]
    MaxQueueSizeIsZero,

    /// Pop from an empty LRU queue
    #[error("The LRU queue is empty")]
    QueueIsEmpty,

    /// A streamed JSON representation exceeded the permitted length
    #[error("maxLen exceeded: maxLen={0}")]
    MaxLenExceeded(u64),

    /// Space name is not known to the facade
    #[error("Cannot find space {0}")]
    SpaceNotFound(String),

    /// Space name must not be empty
    #[error("Space name is an empty string")]
    EmptySpaceName,

    /// The facade could not determine the size of a file
    #[error("Failed to get size of file {fid:#x}: {reason}")]
    FailedToGetFileSize { fid: u64, reason: String },

    /// The facade failed to drop a disk replica
    #[error("stagerrm failed for file {fid:#x}: {reason}")]
    StagerrmFailed { fid: u64, reason: String },

    /// A garbage collector already exists for the space
    #[error("A tape-aware garbage collector already exists for space {0}")]
    GcAlreadyExists(String),

    /// The space has no garbage collector
    #[error("Space {0} has no tape-aware garbage collector")]
    UnknownSpace(String),

    /// Garbage collection was already started
    #[error("Garbage collection has already been started")]
    GcAlreadyStarted,

    // =========================================================================
    // Histogram Errors
    // =========================================================================
    /// Invalid number of histogram bins
    #[error("nbBins is invalid: value must be > 0 and <= {max}, got {nb_bins}")]
    InvalidNbBins { nb_bins: u32, max: u32 },

    /// Invalid histogram bin width
    #[error("binWidthSecs is invalid: value must be > 0 and <= {max}, got {width}")]
    InvalidBinWidth { width: u32, max: u32 },

    /// Histogram lookup beyond the recorded history
    #[error("Cannot go back more than {depth} seconds: requested={requested}")]
    TooFarBackInTime { requested: u32, depth: u32 },

    /// Histogram bin index out of range
    #[error("binIndex is too large: binIndex={index} maxBinIndex={max}")]
    InvalidBinIndex { index: u32, max: u32 },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
