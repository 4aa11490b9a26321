use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the synchronization components.
///
/// The batch pipeline catches these per file and logs them; none of them
/// aborts a batch on its own.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The source (video or capture) could not be opened. No data is produced.
    #[error("failed to open {}: {reason}", path.display())]
    VideoOpen { path: PathBuf, reason: String },

    /// Fewer than two sampled frames were available for the std computation.
    #[error("mask needs at least 2 sampled frames, got {got}")]
    InsufficientSamples { got: usize },

    /// The mask selects no pixel: none varied enough to be part of the LED,
    /// or an all-false mask was handed to the extractor.
    #[error("mask selects no pixels: {0}")]
    MaskEmpty(String),

    /// Region, mask and decimation disagree on the crop dimensions.
    #[error("dimension mismatch: {0}")]
    ChannelMismatch(String),

    /// The capture device (or its recording) failed to deliver a frame.
    #[error("device read error: {0}")]
    DeviceRead(String),

    /// A video frame could not be read from an already opened source.
    #[error("frame read error: {0}")]
    FrameRead(String),

    /// The external video encoder failed.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// The capture never delivered a single valid frame.
    #[error("capture contained no valid frames")]
    NoValidFrames,

    #[error("invalid region ({x0}, {y0})-({x1}, {y1}): top-left must be above and left of bottom-right")]
    InvalidRegion { x0: u32, y0: u32, x1: u32, y1: u32 },
}
