//! Scripted frame sources shared by the unit tests.

use std::path::PathBuf;

use image::{Rgb, RgbImage};

use crate::error::SyncError;
use crate::region::Region;
use crate::video::{Frame, FrameSource};

pub const BACKGROUND: Rgb<u8> = Rgb([10, 10, 10]);
pub const LED_ON: Rgb<u8> = Rgb([240, 30, 30]);
pub const LED_OFF: Rgb<u8> = Rgb([40, 30, 30]);

/// In-memory video. Optionally fails when asked for frame `fail_at`.
pub struct SyntheticVideo {
    width: u32,
    height: u32,
    frames: Vec<RgbImage>,
    next: usize,
    pub fail_at: Option<usize>,
}

impl SyntheticVideo {
    pub fn from_frames(frames: Vec<RgbImage>) -> Self {
        let (width, height) = frames.first().map(|f| f.dimensions()).unwrap_or((0, 0));
        Self {
            width,
            height,
            frames,
            next: 0,
            fail_at: None,
        }
    }

    /// `count` frames with the LED inside `led` lit on even frame numbers.
    pub fn blinking(count: usize, width: u32, height: u32, led: Region) -> Self {
        let (x0, y0) = led.top_left();
        let (x1, y1) = led.bottom_right();
        let frames = (0..count)
            .map(|i| {
                RgbImage::from_fn(width, height, |x, y| {
                    if x >= x0 && x < x1 && y >= y0 && y < y1 {
                        if i % 2 == 0 {
                            LED_ON
                        } else {
                            LED_OFF
                        }
                    } else {
                        BACKGROUND
                    }
                })
            })
            .collect();
        Self::from_frames(frames)
    }
}

impl FrameSource for SyntheticVideo {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, SyncError> {
        if self.fail_at == Some(self.next) {
            return Err(SyncError::FrameRead(format!("scripted failure at frame {}", self.next)));
        }
        let Some(image) = self.frames.get(self.next).cloned() else {
            return Ok(None);
        };
        let frame_number = self.next as u32;
        self.next += 1;
        Ok(Some(Frame {
            image,
            frame_number,
            timestamp_seconds: frame_number as f64 / 30.0,
        }))
    }
}

/// Empty per-test directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ledsync-{}-{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
