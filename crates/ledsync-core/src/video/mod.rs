pub mod decoder;
pub mod encoder;

use image::RgbImage;

use crate::error::SyncError;

/// One decoded frame with its playback position.
pub struct Frame {
    pub image: RgbImage,
    /// 0-based index from the start of the source.
    pub frame_number: u32,
    pub timestamp_seconds: f64,
}

/// A source of decoded RGB frames in playback order.
pub trait FrameSource {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Read the next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, SyncError>;
}
