use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::rc::Rc;

use image::RgbImage;
use tracing::{error, info};

use crate::error::SyncError;
use crate::reconcile::FrameSink;

/// Output frame rate of every encoded fragment.
pub const OUTPUT_FPS: u32 = 30;

/// Encode `frames` into a single mp4 at [`OUTPUT_FPS`] by piping raw RGB24
/// data into the ffmpeg CLI.
pub fn encode_fragment(frames: &[Rc<RgbImage>], output: &Path) -> Result<(), SyncError> {
    let Some(first) = frames.first() else {
        return Err(SyncError::Encoding("refusing to encode an empty fragment".to_string()));
    };
    let (width, height) = first.dimensions();
    if let Some(bad) = frames.iter().position(|f| f.dimensions() != (width, height)) {
        return Err(SyncError::Encoding(format!(
            "frame {bad} is {:?}, fragment started at {width}x{height}",
            frames[bad].dimensions()
        )));
    }

    info!(?output, frame_count = frames.len(), width, height, "encoding fragment");

    let mut child = Command::new("ffmpeg")
        .args(["-y", "-v", "error"])
        .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
        .args(["-s", &format!("{width}x{height}")])
        .args(["-r", &OUTPUT_FPS.to_string()])
        .args(["-i", "pipe:0"])
        .args(["-c:v", "libx264", "-pix_fmt", "yuv420p"])
        .arg(output)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SyncError::Encoding(format!("failed to spawn ffmpeg: {e}")))?;

    let write_result = match child.stdin.take() {
        Some(mut stdin) => frames
            .iter()
            .try_for_each(|f| stdin.write_all(f.as_raw()))
            .map_err(|e| format!("failed to pipe frames to ffmpeg: {e}")),
        None => Err("ffmpeg stdin not available".to_string()),
    };

    // stdin is dropped above, signalling end of input.
    let output_result = child
        .wait_with_output()
        .map_err(|e| SyncError::Encoding(format!("failed to wait for ffmpeg: {e}")))?;

    if !output_result.status.success() {
        let stderr = String::from_utf8_lossy(&output_result.stderr);
        error!(%stderr, ?output, "ffmpeg encoder failed");
        return Err(SyncError::Encoding(format!("ffmpeg exited with {}: {}", output_result.status, stderr.trim())));
    }
    write_result.map_err(SyncError::Encoding)?;

    Ok(())
}

/// Join `fragments` into `output` with ffmpeg's concat demuxer, copying the
/// streams without re-encoding.
pub fn concat_fragments(fragments: &[PathBuf], output: &Path) -> Result<(), SyncError> {
    if fragments.is_empty() {
        return Err(SyncError::Encoding("no fragments to concatenate".to_string()));
    }

    let list_dir = fragments[0]
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let list_path = list_dir.join("file_list.txt");
    let listing: String = fragments
        .iter()
        .map(|f| {
            let abs = fs::canonicalize(f).unwrap_or_else(|_| f.clone());
            format!("file '{}'\n", abs.display())
        })
        .collect();
    fs::write(&list_path, listing)
        .map_err(|e| SyncError::Encoding(format!("failed to write {}: {e}", list_path.display())))?;

    info!(?output, fragment_count = fragments.len(), "concatenating fragments");

    let result = Command::new("ffmpeg")
        .args(["-y", "-f", "concat", "-safe", "0", "-i"])
        .arg(&list_path)
        .args(["-c", "copy"])
        .arg(output)
        .args(["-loglevel", "error"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| SyncError::Encoding(format!("failed to run ffmpeg concat: {e}")))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        error!(%stderr, ?output, "ffmpeg concat failed");
        return Err(SyncError::Encoding(format!("ffmpeg concat failed: {}", stderr.trim())));
    }

    info!(?output, "fragments concatenated");
    Ok(())
}

/// Writes each flushed batch of corrected frames as a numbered mp4 fragment
/// (`0000.mp4`, `0001.mp4`, ...) in one directory.
pub struct Mp4FragmentSink {
    dir: PathBuf,
    fragments: Vec<PathBuf>,
}

impl Mp4FragmentSink {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            fragments: Vec::new(),
        }
    }

    /// Fragments written so far, in playback order.
    pub fn fragments(&self) -> &[PathBuf] {
        &self.fragments
    }
}

impl FrameSink for Mp4FragmentSink {
    fn write_fragment(&mut self, frames: &[Rc<RgbImage>]) -> Result<(), SyncError> {
        let path = self.dir.join(format!("{:04}.mp4", self.fragments.len()));
        encode_fragment(frames, &path)?;
        self.fragments.push(path);
        Ok(())
    }
}
