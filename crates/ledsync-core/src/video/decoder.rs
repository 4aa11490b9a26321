use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use image::RgbImage;
use tracing::{debug, error, info, warn};

use super::{Frame, FrameSource};
use crate::error::SyncError;

/// Stream geometry reported by ffprobe.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ProbeResult {
    width: u32,
    height: u32,
    fps: f64,
}

/// Parse ffprobe's `width,height,num/den` csv line.
fn parse_probe_line(line: &str) -> Result<ProbeResult, String> {
    let parts: Vec<&str> = line.trim().split(',').collect();
    if parts.len() < 3 {
        return Err(format!("unexpected ffprobe output: {line:?}"));
    }

    let width: u32 = parts[0]
        .parse()
        .map_err(|e| format!("bad width {:?}: {e}", parts[0]))?;
    let height: u32 = parts[1]
        .parse()
        .map_err(|e| format!("bad height {:?}: {e}", parts[1]))?;

    let fps = match parts[2].split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().map_err(|e| format!("bad fps numerator: {e}"))?;
            let den: f64 = den.parse().map_err(|e| format!("bad fps denominator: {e}"))?;
            if den > 0.0 {
                num / den
            } else {
                0.0
            }
        }
        None => parts[2].parse().map_err(|e| format!("bad fps: {e}"))?,
    };

    if width == 0 || height == 0 {
        return Err(format!("invalid video dimensions: {width}x{height}"));
    }

    Ok(ProbeResult { width, height, fps })
}

fn probe(path: &Path) -> Result<ProbeResult, String> {
    info!(?path, "probing video metadata with ffprobe");

    let output = Command::new("ffprobe")
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", "stream=width,height,r_frame_rate",
            "-of", "csv=p=0",
        ])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| format!("failed to run ffprobe (is ffmpeg installed?): {e}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(%stderr, ?path, "ffprobe failed");
        return Err(format!("ffprobe failed: {}", stderr.trim()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let result = parse_probe_line(&stdout)?;
    if result.fps <= 0.0 {
        warn!(fps = result.fps, ?path, "video has non-positive fps, timestamps will be 0.0");
    }

    info!(width = result.width, height = result.height, fps = result.fps, "probe completed");
    Ok(result)
}

/// Decodes video frames by piping raw RGB24 data from the ffmpeg CLI.
///
/// The child process is killed and reaped when the decoder is dropped, so a
/// decoder going out of scope on any path releases the file.
pub struct VideoDecoder {
    child: Child,
    stdout: ChildStdout,
    path: PathBuf,
    width: u32,
    height: u32,
    fps: f64,
    frame_count: u32,
    frame_bytes: usize,
}

impl VideoDecoder {
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        let open_err = |reason: String| SyncError::VideoOpen {
            path: path.to_path_buf(),
            reason,
        };

        if !path.is_file() {
            return Err(open_err("file does not exist".to_string()));
        }

        let info = probe(path).map_err(open_err)?;

        info!(?path, "spawning ffmpeg decoder process");

        let mut child = Command::new("ffmpeg")
            .args(["-i"])
            .arg(path)
            .args([
                "-f", "rawvideo",
                "-pix_fmt", "rgb24",
                "-v", "error",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| open_err(format!("failed to spawn ffmpeg: {e}")))?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(open_err("ffmpeg stdout not available".to_string()));
        };

        let frame_bytes = (info.width as usize) * (info.height as usize) * 3;

        info!(
            width = info.width,
            height = info.height,
            fps = info.fps,
            frame_bytes,
            "video decoder opened"
        );

        Ok(Self {
            child,
            stdout,
            path: path.to_path_buf(),
            width: info.width,
            height: info.height,
            fps: info.fps,
            frame_count: 0,
            frame_bytes,
        })
    }
}

impl FrameSource for VideoDecoder {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, SyncError> {
        let mut buf = vec![0u8; self.frame_bytes];
        let mut read = 0;

        while read < self.frame_bytes {
            match self.stdout.read(&mut buf[read..]) {
                Ok(0) => {
                    if read == 0 {
                        info!(total_frames = self.frame_count, "video stream ended");
                        return Ok(None);
                    }
                    error!(
                        read_bytes = read,
                        expected_bytes = self.frame_bytes,
                        frame = self.frame_count,
                        "ffmpeg stream ended mid-frame"
                    );
                    return Err(SyncError::FrameRead(format!(
                        "stream ended mid-frame {} (read {read}/{} bytes)",
                        self.frame_count, self.frame_bytes,
                    )));
                }
                Ok(n) => read += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(frame = self.frame_count, %e, "failed to read from ffmpeg pipe");
                    return Err(SyncError::FrameRead(format!(
                        "failed to read frame {}: {e}",
                        self.frame_count
                    )));
                }
            }
        }

        let image = RgbImage::from_raw(self.width, self.height, buf).ok_or_else(|| {
            SyncError::FrameRead("raw frame buffer does not match frame size".to_string())
        })?;

        let frame_number = self.frame_count;
        let timestamp_seconds = if self.fps > 0.0 {
            frame_number as f64 / self.fps
        } else {
            0.0
        };
        self.frame_count += 1;

        debug!(frame_number, timestamp_seconds, "decoded frame");

        Ok(Some(Frame {
            image,
            frame_number,
            timestamp_seconds,
        }))
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        info!(total_frames = self.frame_count, path = ?self.path, "closing video decoder");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
