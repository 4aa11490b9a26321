use image::{GrayImage, Luma, RgbImage};

use crate::error::SyncError;

/// Channel of an RGB frame the LED is detected in (red).
///
/// Mask derivation and signal extraction must read the same channel with the
/// same decimation. Both go through [`crop_channel`], which is the only place
/// this constant is read.
pub const LED_CHANNEL: usize = 0;

/// LED region of interest in original-frame pixels.
///
/// `(x0, y0)` is inclusive and `(x1, y1)` exclusive, so the crop is
/// `x1 - x0` wide and `y1 - y0` tall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl Region {
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Result<Self, SyncError> {
        if x0 >= x1 || y0 >= y1 {
            return Err(SyncError::InvalidRegion { x0, y0, x1, y1 });
        }
        Ok(Self { x0, y0, x1, y1 })
    }

    pub fn top_left(&self) -> (u32, u32) {
        (self.x0, self.y0)
    }

    pub fn bottom_right(&self) -> (u32, u32) {
        (self.x1, self.y1)
    }

    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    /// Size of the crop after keeping every `decimation`-th row and column,
    /// starting with the first.
    pub fn decimated_size(&self, decimation: u32) -> Result<(u32, u32), SyncError> {
        if decimation == 0 {
            return Err(SyncError::ChannelMismatch(
                "decimation must be >= 1".to_string(),
            ));
        }
        Ok((
            self.width().div_ceil(decimation),
            self.height().div_ceil(decimation),
        ))
    }

    pub fn fits_within(&self, frame_width: u32, frame_height: u32) -> bool {
        self.x1 <= frame_width && self.y1 <= frame_height
    }

}

fn check_crop(image: &RgbImage, region: &Region, decimation: u32) -> Result<(u32, u32), SyncError> {
    let size = region.decimated_size(decimation)?;
    if !region.fits_within(image.width(), image.height()) {
        return Err(SyncError::ChannelMismatch(format!(
            "region {:?} exceeds frame {}x{}",
            region,
            image.width(),
            image.height()
        )));
    }
    Ok(size)
}

/// Crop `region` out of `image`, decimate it, and keep only [`LED_CHANNEL`].
pub fn crop_channel(
    image: &RgbImage,
    region: &Region,
    decimation: u32,
) -> Result<GrayImage, SyncError> {
    let (w, h) = check_crop(image, region, decimation)?;
    Ok(GrayImage::from_fn(w, h, |i, j| {
        let px = image.get_pixel(region.x0 + i * decimation, region.y0 + j * decimation);
        Luma([px[LED_CHANNEL]])
    }))
}

/// Full-colour crop of `region`, decimated the same way as [`crop_channel`].
pub fn crop_rgb(image: &RgbImage, region: &Region, decimation: u32) -> Result<RgbImage, SyncError> {
    let (w, h) = check_crop(image, region, decimation)?;
    Ok(RgbImage::from_fn(w, h, |i, j| {
        *image.get_pixel(region.x0 + i * decimation, region.y0 + j * decimation)
    }))
}
