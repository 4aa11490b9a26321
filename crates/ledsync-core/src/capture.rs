//! Replay of a recorded depth-camera capture.
//!
//! A capture is a newline-delimited JSON manifest exported from the camera
//! recording. The first line is a header carrying the recorded duration;
//! every further line is one delivery event:
//!
//! ```text
//! {"duration_ms": 61234.5}
//! {"kind": "frame", "frame_number": 17, "timestamp_ms": 1699874223011.2, "image": "color/000017.png"}
//! {"kind": "missing"}
//! {"kind": "fault", "message": "frame didn't arrive within 5000"}
//! ```
//!
//! Image paths are relative to the manifest's directory.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::reconcile::{FrameStream, RawFrameEvent};

/// File extension of capture manifests.
pub const MANIFEST_EXTENSION: &str = "jsonl";

#[derive(Debug, Deserialize)]
struct ManifestHeader {
    duration_ms: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ManifestEvent {
    Frame {
        frame_number: u64,
        timestamp_ms: f64,
        image: PathBuf,
    },
    Missing,
    Fault {
        message: String,
    },
}

/// [`FrameStream`] over a capture manifest. The file handle is released
/// when the capture is dropped.
pub struct ReplayCapture {
    path: PathBuf,
    base_dir: PathBuf,
    lines: Lines<BufReader<File>>,
    duration_ms: Option<f64>,
    line_no: usize,
}

impl ReplayCapture {
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        let open_err = |reason: String| SyncError::VideoOpen {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|e| open_err(e.to_string()))?;
        let mut lines = BufReader::new(file).lines();

        let header_line = lines
            .next()
            .ok_or_else(|| open_err("empty capture manifest".to_string()))?
            .map_err(|e| open_err(e.to_string()))?;
        let header: ManifestHeader = serde_json::from_str(&header_line)
            .map_err(|e| open_err(format!("bad manifest header: {e}")))?;

        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        info!(?path, duration_ms = ?header.duration_ms, "capture opened");

        Ok(Self {
            path: path.to_path_buf(),
            base_dir,
            lines,
            duration_ms: header.duration_ms,
            line_no: 1,
        })
    }
}

impl FrameStream for ReplayCapture {
    fn duration_ms(&self) -> Option<f64> {
        self.duration_ms
    }

    fn next_event(&mut self) -> Result<Option<RawFrameEvent>, SyncError> {
        loop {
            let Some(line) = self.lines.next() else {
                return Ok(None);
            };
            self.line_no += 1;
            let line = line.map_err(|e| {
                SyncError::DeviceRead(format!("{}:{}: {e}", self.path.display(), self.line_no))
            })?;
            if line.trim().is_empty() {
                continue;
            }

            let event: ManifestEvent = serde_json::from_str(&line).map_err(|e| {
                SyncError::DeviceRead(format!("{}:{}: {e}", self.path.display(), self.line_no))
            })?;

            return match event {
                ManifestEvent::Frame {
                    frame_number,
                    timestamp_ms,
                    image,
                } => {
                    let image_path = self.base_dir.join(&image);
                    let image = image::open(&image_path)
                        .map_err(|e| {
                            SyncError::DeviceRead(format!("{}: {e}", image_path.display()))
                        })?
                        .into_rgb8();
                    debug!(frame_number, timestamp_ms, "capture frame");
                    Ok(Some(RawFrameEvent::Frame {
                        frame_number,
                        timestamp_ms,
                        image,
                    }))
                }
                ManifestEvent::Missing => Ok(Some(RawFrameEvent::MissingPair)),
                ManifestEvent::Fault { message } => Err(SyncError::DeviceRead(message)),
            };
        }
    }
}
