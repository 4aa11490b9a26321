use image::{GrayImage, RgbImage};
use tracing::{debug, info};

use crate::error::SyncError;
use crate::region::{crop_channel, crop_rgb, Region};
use crate::video::FrameSource;

/// Parameters for deriving the LED mask.
#[derive(Debug, Clone)]
pub struct MaskConfig {
    /// A pixel belongs to the LED if its temporal standard deviation
    /// (population std, in channel intensity units 0-255) is strictly above
    /// this value.
    pub std_threshold: f64,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            std_threshold: 20.0,
        }
    }
}

/// How frames are sampled from a video to build the std stack.
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    /// Read at most this many frames from the start of the video.
    pub max_frames: usize,
    /// Keep every Nth frame read.
    pub frame_stride: usize,
    /// Spatial decimation of the crop; extraction must use the same value.
    pub decimation: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_frames: 10_000,
            frame_stride: 25,
            decimation: 2,
        }
    }
}

/// Single-channel crops of the same region, all the same size, in time order.
#[derive(Debug, Clone)]
pub struct FrameStack {
    frames: Vec<GrayImage>,
}

impl FrameStack {
    pub fn new(frames: Vec<GrayImage>) -> Result<Self, SyncError> {
        if let Some(first) = frames.first() {
            let dims = first.dimensions();
            if let Some((i, f)) = frames.iter().enumerate().find(|(_, f)| f.dimensions() != dims) {
                return Err(SyncError::ChannelMismatch(format!(
                    "stack frame {i} is {:?}, expected {dims:?}",
                    f.dimensions()
                )));
            }
        }
        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// `(width, height)` of every frame, or `None` for an empty stack.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.frames.first().map(|f| f.dimensions())
    }

    pub fn frames(&self) -> &[GrayImage] {
        &self.frames
    }
}

/// Boolean LED mask over a decimated crop, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    width: u32,
    height: u32,
    pixels: Vec<bool>,
}

impl BinaryMask {
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<bool>) -> Result<Self, SyncError> {
        if pixels.len() != width as usize * height as usize {
            return Err(SyncError::ChannelMismatch(format!(
                "mask has {} pixels, expected {width}x{height}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Mask covering the whole crop. Used when no mask was derived for a video.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![true; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn pixels(&self) -> &[bool] {
        &self.pixels
    }

    pub fn true_count(&self) -> usize {
        self.pixels.iter().filter(|&&p| p).count()
    }
}

/// Result of [`build_mask`]. `std_map` is row-major like the mask and is
/// only meant for inspection.
#[derive(Debug, Clone)]
pub struct MaskBuild {
    pub mask: BinaryMask,
    pub std_map: Vec<f64>,
}

/// Mark the pixels whose temporal std across the stack exceeds the threshold.
pub fn build_mask(stack: &FrameStack, config: &MaskConfig) -> Result<MaskBuild, SyncError> {
    let t = stack.len();
    let Some((width, height)) = stack.dimensions().filter(|_| t >= 2) else {
        return Err(SyncError::InsufficientSamples { got: t });
    };

    let n = width as usize * height as usize;
    let mut sum = vec![0f64; n];
    let mut sum_sq = vec![0f64; n];
    for frame in stack.frames() {
        for (i, px) in frame.as_raw().iter().enumerate() {
            let v = *px as f64;
            sum[i] += v;
            sum_sq[i] += v * v;
        }
    }

    let t_f = t as f64;
    let std_map: Vec<f64> = sum
        .iter()
        .zip(&sum_sq)
        .map(|(s, sq)| {
            let mean = s / t_f;
            (sq / t_f - mean * mean).max(0.0).sqrt()
        })
        .collect();

    let pixels: Vec<bool> = std_map.iter().map(|&s| s > config.std_threshold).collect();
    let mask = BinaryMask {
        width,
        height,
        pixels,
    };

    let max_std = std_map.iter().copied().fold(0.0, f64::max);
    let selected = mask.true_count();
    debug!(samples = t, width, height, max_std, "std map computed");

    if selected == 0 {
        return Err(SyncError::MaskEmpty(format!(
            "no pixel exceeds std threshold {:.2} (max std {max_std:.2})",
            config.std_threshold
        )));
    }

    info!(
        samples = t,
        width,
        height,
        selected,
        threshold = config.std_threshold,
        "LED mask built"
    );

    Ok(MaskBuild { mask, std_map })
}

/// Sampled LED-channel crops plus the full-colour crop of the first frame.
pub struct SampledStack {
    pub stack: FrameStack,
    pub first_crop: Option<RgbImage>,
}

/// Read frames from the start of `source` and collect the decimated LED
/// channel of `region` from every `frame_stride`-th one.
///
/// Stops early, without error, when the source runs out.
pub fn sample_crop_stack(
    source: &mut impl FrameSource,
    region: &Region,
    config: &SamplingConfig,
) -> Result<SampledStack, SyncError> {
    let stride = config.frame_stride.max(1);
    let mut crops = Vec::new();
    let mut first_crop = None;
    let mut read = 0usize;

    while read < config.max_frames {
        let Some(frame) = source.next_frame()? else {
            break;
        };
        if first_crop.is_none() {
            first_crop = Some(crop_rgb(&frame.image, region, config.decimation)?);
        }
        if read % stride == 0 {
            crops.push(crop_channel(&frame.image, region, config.decimation)?);
        }
        read += 1;
    }

    info!(frames_read = read, sampled = crops.len(), stride, "crop stack sampled");

    Ok(SampledStack {
        stack: FrameStack::new(crops)?,
        first_crop,
    })
}

#[cfg(test)]
mod tests {
    use image::{Luma, Rgb};

    use super::*;
    use crate::test_support::SyntheticVideo;

    fn flat(w: u32, h: u32, v: u8) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([v]))
    }

    fn with_pixel(w: u32, h: u32, bg: u8, x: u32, y: u32, v: u8) -> GrayImage {
        let mut img = flat(w, h, bg);
        img.put_pixel(x, y, Luma([v]));
        img
    }

    #[test]
    fn alternating_pixel_is_in_mask() {
        let frames = (0..6)
            .map(|i| with_pixel(4, 3, 12, 2, 1, if i % 2 == 0 { 250 } else { 10 }))
            .collect();
        let stack = FrameStack::new(frames).unwrap();
        let build = build_mask(&stack, &MaskConfig::default()).unwrap();

        assert!(build.mask.get(2, 1));
        assert_eq!(build.mask.true_count(), 1);
        assert!((build.std_map[4 + 2] - 120.0).abs() < 1e-9);
    }

    #[test]
    fn single_frame_is_insufficient() {
        let stack = FrameStack::new(vec![flat(3, 3, 9)]).unwrap();
        assert!(matches!(
            build_mask(&stack, &MaskConfig::default()),
            Err(SyncError::InsufficientSamples { got: 1 })
        ));
        let empty = FrameStack::new(Vec::new()).unwrap();
        assert!(matches!(
            build_mask(&empty, &MaskConfig::default()),
            Err(SyncError::InsufficientSamples { got: 0 })
        ));
    }

    #[test]
    fn static_stack_is_mask_empty() {
        let frames = (0..5).map(|i| flat(3, 3, 100 + i as u8)).collect();
        let stack = FrameStack::new(frames).unwrap();
        let err = build_mask(&stack, &MaskConfig::default()).unwrap_err();
        assert!(matches!(err, SyncError::MaskEmpty(_)));
    }

    #[test]
    fn threshold_is_configurable() {
        let frames = (0..4)
            .map(|i| with_pixel(2, 2, 0, 0, 0, if i % 2 == 0 { 20 } else { 0 }))
            .collect();
        let stack = FrameStack::new(frames).unwrap();
        assert!(build_mask(&stack, &MaskConfig::default()).is_err());
        let build = build_mask(&stack, &MaskConfig { std_threshold: 5.0 }).unwrap();
        assert!(build.mask.get(0, 0));
    }

    #[test]
    fn stack_rejects_mixed_shapes() {
        let err = FrameStack::new(vec![flat(3, 3, 0), flat(3, 2, 0)]).unwrap_err();
        assert!(matches!(err, SyncError::ChannelMismatch(_)));
    }

    #[test]
    fn mask_pixel_count_must_match_shape() {
        assert!(BinaryMask::from_pixels(2, 2, vec![true; 3]).is_err());
        assert_eq!(BinaryMask::full(3, 2).true_count(), 6);
    }

    #[test]
    fn sampling_respects_stride_and_video_end() {
        let mut video = SyntheticVideo::blinking(12, 20, 10, Region::new(4, 2, 8, 6).unwrap());
        let region = Region::new(2, 0, 10, 8).unwrap();
        let config = SamplingConfig {
            max_frames: 100,
            frame_stride: 5,
            decimation: 2,
        };
        let sampled = sample_crop_stack(&mut video, &region, &config).unwrap();

        // frames 0, 5, 10 of a 12-frame video
        assert_eq!(sampled.stack.len(), 3);
        assert_eq!(sampled.stack.dimensions(), Some((4, 4)));
        let first = sampled.first_crop.unwrap();
        assert_eq!(first.dimensions(), (4, 4));
        assert_eq!(*first.get_pixel(0, 0), Rgb([10, 10, 10]));
    }
}
