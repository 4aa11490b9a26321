use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{debug, info, warn};

use crate::mask::{BinaryMask, MaskBuild};

const FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf";

const TEXT_SCALE: f32 = 14.0;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const MASK_TINT: Rgb<u8> = Rgb([0, 255, 0]);
const BBOX_COLOR: Rgb<u8> = Rgb([255, 0, 255]);

/// Captions are drawn on a band this tall below the image.
const CAPTION_H: u32 = 20;

/// Renders operator-facing images of the mask derivation.
pub struct DebugRenderer {
    font: Option<FontVec>,
}

impl Default for DebugRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugRenderer {
    pub fn new() -> Self {
        let font = Self::load_font();
        Self { font }
    }

    /// Save the std map and the first-frame crop with the mask overlaid.
    /// Returns the two written paths.
    pub fn save_mask_diagnostics(
        &self,
        dir: &Path,
        stem: &str,
        build: &MaskBuild,
        first_crop: Option<&RgbImage>,
        std_threshold: f64,
    ) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create debug directory {}", dir.display()))?;

        let mut written = Vec::new();

        let std_path = dir.join(format!("{stem}_LED_std.png"));
        render_std_map(&build.std_map, build.mask.width(), build.mask.height())
            .save(&std_path)
            .with_context(|| format!("failed to save {}", std_path.display()))?;
        written.push(std_path);

        if let Some(crop) = first_crop {
            let mut img = overlay_mask(crop, &build.mask);
            if let Some(rect) = mask_bounding_rect(&build.mask) {
                draw_hollow_rect_mut(&mut img, rect, BBOX_COLOR);
            }
            let caption = format!(
                "std>{:.1} px:{}",
                std_threshold,
                build.mask.true_count()
            );
            let img = self.with_caption(img, &caption);

            let overlay_path = dir.join(format!("{stem}_LED_mask.png"));
            img.save(&overlay_path)
                .with_context(|| format!("failed to save {}", overlay_path.display()))?;
            written.push(overlay_path);
        }

        debug!(?written, "saved mask diagnostics");
        Ok(written)
    }

    fn with_caption(&self, img: RgbImage, caption: &str) -> RgbImage {
        let Some(font) = &self.font else { return img };
        let (w, h) = img.dimensions();
        let mut out = RgbImage::new(w.max(160), h + CAPTION_H);
        image::imageops::replace(&mut out, &img, 0, 0);
        draw_text_mut(
            &mut out,
            TEXT_COLOR,
            2,
            h as i32 + 3,
            PxScale::from(TEXT_SCALE),
            font,
            caption,
        );
        out
    }

    fn load_font() -> Option<FontVec> {
        let data = match std::fs::read(FONT_PATH) {
            Ok(data) => data,
            Err(e) => {
                warn!(path = FONT_PATH, error = %e, "failed to read font file, captions disabled");
                return None;
            }
        };
        match FontVec::try_from_vec(data) {
            Ok(font) => {
                info!(path = FONT_PATH, "loaded debug font");
                Some(font)
            }
            Err(e) => {
                warn!(path = FONT_PATH, error = %e, "failed to parse font file");
                None
            }
        }
    }
}

/// Std map scaled so its maximum is white.
fn render_std_map(std_map: &[f64], width: u32, height: u32) -> GrayImage {
    let max = std_map.iter().copied().fold(0.0, f64::max);
    let scale = if max > 0.0 { 255.0 / max } else { 0.0 };
    GrayImage::from_fn(width, height, |x, y| {
        let v = std_map[(y * width + x) as usize] * scale;
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

/// Blend mask pixels half-way towards the tint colour.
fn overlay_mask(crop: &RgbImage, mask: &BinaryMask) -> RgbImage {
    let mut img = crop.clone();
    for (x, y, px) in img.enumerate_pixels_mut() {
        if x < mask.width() && y < mask.height() && mask.get(x, y) {
            for c in 0..3 {
                px[c] = ((px[c] as u16 + MASK_TINT[c] as u16) / 2) as u8;
            }
        }
    }
    img
}

fn mask_bounding_rect(mask: &BinaryMask) -> Option<Rect> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for y in 0..mask.height() {
        for x in 0..mask.width() {
            if !mask.get(x, y) {
                continue;
            }
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
    }
    bounds.map(|(x0, y0, x1, y1)| {
        Rect::at(x0 as i32, y0 as i32).of_size(x1 - x0 + 1, y1 - y0 + 1)
    })
}
