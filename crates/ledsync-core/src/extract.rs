use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::mask::BinaryMask;
use crate::region::{crop_channel, Region};
use crate::video::decoder::VideoDecoder;
use crate::video::FrameSource;

/// Parameters for reading the LED trace out of a video.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Stop after this many frames.
    pub max_frames: usize,
    /// Spatial decimation; must equal the one the mask was built with.
    pub decimation: u32,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            max_frames: usize::MAX,
            decimation: 2,
        }
    }
}

/// Per-frame mean LED-channel brightness under the mask, in playback order.
#[derive(Debug, Clone, PartialEq)]
pub struct LedSignal {
    pub samples: Vec<f64>,
    /// Why reading stopped before the end of the video, if it did.
    pub read_error: Option<String>,
}

impl LedSignal {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn check_geometry(
    frame_size: (u32, u32),
    region: &Region,
    mask: &BinaryMask,
    decimation: u32,
) -> Result<(), SyncError> {
    if decimation == 0 {
        return Err(SyncError::ChannelMismatch("decimation must be >= 1".to_string()));
    }
    if !region.fits_within(frame_size.0, frame_size.1) {
        return Err(SyncError::ChannelMismatch(format!(
            "region {region:?} exceeds frame {}x{}",
            frame_size.0, frame_size.1
        )));
    }
    let expected = region.decimated_size(decimation)?;
    if mask.dimensions() != expected {
        return Err(SyncError::ChannelMismatch(format!(
            "mask is {:?} but region with decimation {decimation} crops to {expected:?}",
            mask.dimensions()
        )));
    }
    Ok(())
}

/// Mean of the pixels selected by `mask`. The mask must match the crop size
/// and select at least one pixel.
fn masked_mean(crop: &[u8], mask: &BinaryMask) -> f64 {
    let (sum, count) = crop
        .iter()
        .zip(mask.pixels())
        .filter(|(_, m)| **m)
        .fold((0u64, 0u64), |(s, c), (&v, _)| (s + v as u64, c + 1));
    sum as f64 / count as f64
}

/// Read up to `config.max_frames` frames from `source` and reduce each to
/// the mean LED-channel value under `mask`.
///
/// A read failure ends the signal early; the samples gathered so far are
/// kept and the failure is recorded in `read_error`.
pub fn extract_led_signal(
    source: &mut impl FrameSource,
    region: &Region,
    mask: &BinaryMask,
    config: &ExtractConfig,
) -> Result<LedSignal, SyncError> {
    check_geometry((source.width(), source.height()), region, mask, config.decimation)?;

    let selected = mask.true_count();
    if selected == 0 {
        return Err(SyncError::MaskEmpty(format!(
            "all {} mask pixels are false",
            mask.pixels().len()
        )));
    }

    info!(
        ?region,
        decimation = config.decimation,
        selected,
        max_frames = config.max_frames,
        "extracting LED signal"
    );

    let mut samples = Vec::new();
    let mut read_error = None;

    while samples.len() < config.max_frames {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!(frames_read = samples.len(), error = %e, "frame read failed, keeping partial signal");
                read_error = Some(e.to_string());
                break;
            }
        };

        let crop = crop_channel(&frame.image, region, config.decimation)?;
        let value = masked_mean(crop.as_raw(), mask);
        debug!(
            frame_number = frame.frame_number,
            timestamp_seconds = frame.timestamp_seconds,
            value,
            "LED sample"
        );
        samples.push(value);
    }

    info!(sample_count = samples.len(), truncated = read_error.is_some(), "LED signal extracted");

    Ok(LedSignal {
        samples,
        read_error,
    })
}

/// Open `path` and extract its LED signal. Opening failures yield
/// [`SyncError::VideoOpen`] and no samples.
pub fn extract_from_video(
    path: &Path,
    region: &Region,
    mask: &BinaryMask,
    config: &ExtractConfig,
) -> Result<LedSignal, SyncError> {
    let mut decoder = VideoDecoder::open(path)?;
    extract_led_signal(&mut decoder, region, mask, config)
}
