use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Library error type for media-frame operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The storage medium is missing or the media directory cannot be used.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(PathBuf),

    /// A scratch allocation exceeded the fixed pool capacity.
    #[error("scratch pool exhausted: requested {requested} bytes, capacity {capacity}")]
    PoolExhausted { requested: usize, capacity: usize },

    /// The shared decode unit could not be obtained within the bounded wait.
    #[error("decode unit busy past {0:?}")]
    DecoderBusy(Duration),

    /// The extraction context did not acknowledge a stop request in time.
    #[error("extraction context unresponsive past {0:?}")]
    ExtractionStall(Duration),

    /// Compressed data failed to decode.
    #[error("decode failed for {path}: {reason}")]
    DecodeFailed { path: PathBuf, reason: String },

    /// The shared unit rejected or failed a JPEG decode job.
    #[error("jpeg decode failed: {0}")]
    JpegDecode(String),

    /// Dimensions the decode hardware cannot handle (alignment, ceiling, budget).
    #[error("unsupported dimensions {width}x{height}: {reason}")]
    UnsupportedDimensions {
        width: u32,
        height: u32,
        reason: &'static str,
    },

    /// The container/format is not one this appliance plays.
    #[error("unsupported media format: {0}")]
    UnsupportedFormat(String),

    /// File size outside the plausible range for its kind.
    #[error("implausible file size {size} bytes for {path}")]
    ImplausibleSize { path: PathBuf, size: u64 },

    /// Index outside the collection bounds.
    #[error("index {index} out of range for {count} entries")]
    IndexOutOfRange { index: usize, count: usize },

    /// Every candidate in the collection failed to load.
    #[error("no playable media in collection")]
    NoMedia,

    /// A playback operation needed a current file and none was ever set.
    #[error("no current file")]
    NoCurrentFile,

    /// Playback operation issued in a state that cannot accept it.
    #[error("invalid playback state: {0}")]
    InvalidState(&'static str),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML/serde configuration error.
    #[error(transparent)]
    Config(#[from] serde_yaml::Error),
}

impl Error {
    /// Whether the controller's skip-and-continue loop may advance past this
    /// failure. Anything that only condemns a single entry is skippable;
    /// systemic failures (storage gone, pool exhausted, stuck decoder) abort
    /// the transition instead.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            Error::DecodeFailed { .. }
                | Error::JpegDecode(_)
                | Error::UnsupportedDimensions { .. }
                | Error::UnsupportedFormat(_)
                | Error::ImplausibleSize { .. }
                | Error::Io(_)
        )
    }
}
