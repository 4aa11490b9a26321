use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context, Result};
use image::RgbImage;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::artifacts::{self, LogRow, StoredMask};
use crate::capture::{ReplayCapture, MANIFEST_EXTENSION};
use crate::debug::DebugRenderer;
use crate::error::SyncError;
use crate::extract::{extract_from_video, ExtractConfig};
use crate::mask::{build_mask, sample_crop_stack, BinaryMask, MaskConfig, SamplingConfig};
use crate::reconcile::{reconcile_stream, ReconcileConfig, ReconcileReport};
use crate::region::Region;
use crate::video::decoder::VideoDecoder;
use crate::video::encoder::{concat_fragments, Mp4FragmentSink, OUTPUT_FPS};
use crate::video::FrameSource;

const VIDEO_EXTENSION: &str = "mp4";

/// Parameters for every pipeline stage.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub mask: MaskConfig,
    /// Sampling used to build masks; its decimation is also used for
    /// extraction when a video has no persisted mask.
    pub sampling: SamplingConfig,
    pub extract: ExtractConfig,
    pub reconcile: ReconcileConfig,
}

/// Chooses the LED region on the first frame of a video.
pub trait RoiSelector {
    /// Return the region for `source`, or `None` if the operator declined.
    fn select(&mut self, source: &Path, first_frame: &RgbImage) -> Result<Option<Region>>;
}

/// Selector that always answers with a region chosen ahead of time.
pub struct FixedRoi(pub Region);

impl RoiSelector for FixedRoi {
    fn select(&mut self, _source: &Path, _first_frame: &RgbImage) -> Result<Option<Region>> {
        Ok(Some(self.0))
    }
}

/// Ask `selector` for the region of `video` and persist it in `region_dir`.
pub fn set_region(video: &Path, region_dir: &Path, selector: &mut impl RoiSelector) -> Result<Region> {
    let mut decoder = VideoDecoder::open(video)?;
    let Some(first) = decoder.next_frame()? else {
        bail!("{} has no frames", video.display());
    };
    let Some(region) = selector.select(video, &first.image)? else {
        bail!("no region selected for {}", video.display());
    };
    if !region.fits_within(decoder.width(), decoder.height()) {
        bail!(
            "region {:?} exceeds {}x{} frame of {}",
            region,
            decoder.width(),
            decoder.height(),
            video.display()
        );
    }
    artifacts::save_region(region_dir, video, &region)?;
    Ok(region)
}

fn require_region(region_dir: &Path, video: &Path) -> Result<Region> {
    artifacts::load_region(region_dir, video)?.with_context(|| {
        format!(
            "no persisted region for {} in {}",
            video.display(),
            region_dir.display()
        )
    })
}

/// Sample `video` with its persisted region, derive the LED mask and store
/// it next to the region. Diagnostics go to `diagnostics_dir` when given.
pub fn build_mask_for_video(
    video: &Path,
    region_dir: &Path,
    diagnostics_dir: Option<&Path>,
    config: &PipelineConfig,
) -> Result<StoredMask> {
    let region = require_region(region_dir, video)?;

    let sampled = {
        let mut decoder = VideoDecoder::open(video)?;
        sample_crop_stack(&mut decoder, &region, &config.sampling)?
    };
    let build = build_mask(&sampled.stack, &config.mask)
        .with_context(|| format!("mask derivation failed for {}", video.display()))?;

    if let Some(dir) = diagnostics_dir {
        DebugRenderer::new()
            .save_mask_diagnostics(
                dir,
                &artifacts::source_stem(video),
                &build,
                sampled.first_crop.as_ref(),
                config.mask.std_threshold,
            )
            .context("failed to save mask diagnostics")?;
    }

    let stored = StoredMask {
        mask: build.mask,
        decimation: config.sampling.decimation,
        std_threshold: config.mask.std_threshold,
    };
    artifacts::save_mask(region_dir, video, &stored)?;
    Ok(stored)
}

/// Persisted mask for `video`, or a full mask over the region when none was
/// derived.
fn mask_or_full(region_dir: &Path, video: &Path, region: &Region, config: &PipelineConfig) -> Result<StoredMask> {
    if let Some(stored) = artifacts::load_mask(region_dir, video)? {
        return Ok(stored);
    }
    let decimation = config.sampling.decimation;
    let (w, h) = region.decimated_size(decimation)?;
    warn!(?video, "no persisted mask, averaging the whole region");
    Ok(StoredMask {
        mask: BinaryMask::full(w, h),
        decimation,
        std_threshold: config.mask.std_threshold,
    })
}

/// Extract the LED signal of one video and persist it in `output_dir`.
/// Returns the number of samples.
pub fn extract_video(
    video: &Path,
    region_dir: &Path,
    output_dir: &Path,
    config: &PipelineConfig,
) -> Result<usize> {
    let region = require_region(region_dir, video)?;
    let stored = mask_or_full(region_dir, video, &region, config)?;
    let extract_config = ExtractConfig {
        decimation: stored.decimation,
        ..config.extract.clone()
    };

    let signal = extract_from_video(video, &region, &stored.mask, &extract_config)?;
    if let Some(reason) = &signal.read_error {
        warn!(?video, %reason, samples = signal.len(), "video ended early, saving partial signal");
    }
    artifacts::save_signal(output_dir, video, &signal, stored.decimation)?;
    Ok(signal.len())
}

/// Counts for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(extension))
}

/// Files under `dir` (recursively) with `extension`, sorted by path.
pub fn find_sources(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("input folder does not exist: {}", dir.display());
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && has_extension(entry.path(), extension))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    Ok(files)
}

/// Extract signals for every mp4 under `video_dir`, skipping videos whose
/// signal already exists in `output_dir`. Per-file failures are logged and
/// counted; they do not stop the batch.
pub fn extract_folder(
    video_dir: &Path,
    region_dir: &Path,
    output_dir: &Path,
    config: &PipelineConfig,
) -> Result<BatchSummary> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let videos = find_sources(video_dir, VIDEO_EXTENSION)?;
    info!(?video_dir, count = videos.len(), "extracting LED signals");

    let mut summary = BatchSummary::default();
    for video in &videos {
        match artifacts::load_signal(output_dir, video) {
            Ok(Some(signal)) => {
                info!(?video, samples = signal.len(), "already processed, skipping");
                summary.skipped += 1;
                continue;
            }
            Ok(None) => {}
            Err(e) => warn!(?video, error = %format!("{e:#}"), "existing signal unreadable, reprocessing"),
        }

        info!(?video, "processing video");
        match extract_video(video, region_dir, output_dir, config) {
            Ok(samples) => {
                info!(?video, samples, "video done");
                summary.processed += 1;
            }
            Err(e) => {
                error!(?video, error = %format!("{e:#}"), "video failed");
                summary.failed += 1;
            }
        }
    }

    info!(
        processed = summary.processed,
        skipped = summary.skipped,
        failed = summary.failed,
        "extraction batch complete"
    );
    Ok(summary)
}

fn append_failure(failure: Option<String>, extra: String) -> Option<String> {
    Some(match failure {
        None => extra,
        Some(f) => format!("{f}; also {extra}"),
    })
}

fn log_row(capture: &Path, failure: Option<String>, duration: f64, num_frames: usize) -> LogRow {
    LogRow {
        source_path: capture.display().to_string(),
        failed: failure.unwrap_or_default(),
        duration,
        num_frames,
        calculated_duration: num_frames as f64 / OUTPUT_FPS as f64,
    }
}

fn reconcile_into_fragments(
    capture: &Path,
    tmp_dir: &Path,
    config: &PipelineConfig,
    interrupt: &AtomicBool,
) -> Result<(ReconcileReport, Vec<PathBuf>), SyncError> {
    let mut stream = ReplayCapture::open(capture)?;
    let mut sink = Mp4FragmentSink::new(tmp_dir);
    let report = reconcile_stream(&mut stream, &mut sink, &config.reconcile, interrupt)?;
    Ok((report, sink.fragments().to_vec()))
}

/// Convert one capture into `<output_dir>/<stem>.mp4`.
///
/// Never fails: every problem ends up in the returned log row. Fragments are
/// staged in `<output_dir>/tmp`, which is recreated per capture and removed
/// afterwards.
pub fn convert_capture(
    capture: &Path,
    output_dir: &Path,
    config: &PipelineConfig,
    interrupt: &AtomicBool,
) -> LogRow {
    let tmp_dir = output_dir.join("tmp");
    if tmp_dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(&tmp_dir) {
            warn!(?tmp_dir, error = %e, "failed to clear fragment directory");
        }
    }
    if let Err(e) = std::fs::create_dir_all(&tmp_dir) {
        return log_row(capture, Some(format!("failed to create {}: {e}", tmp_dir.display())), 0.0, 0);
    }

    let row = match reconcile_into_fragments(capture, &tmp_dir, config, interrupt) {
        Ok((report, fragments)) => {
            let mut failure = report.failure.clone();
            if !fragments.is_empty() {
                let output = output_dir.join(format!("{}.{VIDEO_EXTENSION}", artifacts::source_stem(capture)));
                info!(?output, "saving video");
                if let Err(e) = concat_fragments(&fragments, &output) {
                    failure = append_failure(failure, e.to_string());
                }
            }

            let report = ReconcileReport { failure, ..report };
            if let Err(e) = artifacts::save_summary(output_dir, capture, &report) {
                warn!(?capture, error = %format!("{e:#}"), "failed to save capture summary");
            }
            log_row(
                capture,
                report.failure,
                report.effective_duration_secs,
                report.corrected_frame_count,
            )
        }
        Err(e) => {
            error!(?capture, error = %e, "capture conversion failed");
            log_row(capture, Some(e.to_string()), 0.0, 0)
        }
    };

    if let Err(e) = std::fs::remove_dir_all(&tmp_dir) {
        warn!(?tmp_dir, error = %e, "failed to remove fragment directory");
    }
    row
}

/// Convert every capture manifest under `capture_dir` and write the log
/// table to `log_path`. An interrupt finishes the current capture and ends
/// the batch; the log is still written.
pub fn convert_folder(
    capture_dir: &Path,
    output_dir: &Path,
    log_path: &Path,
    config: &PipelineConfig,
    interrupt: &AtomicBool,
) -> Result<Vec<LogRow>> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let captures = find_sources(capture_dir, MANIFEST_EXTENSION)?;
    info!(?capture_dir, count = captures.len(), "converting captures");

    let mut rows = Vec::with_capacity(captures.len());
    for capture in &captures {
        info!(?capture, "processing capture");
        let row = convert_capture(capture, output_dir, config, interrupt);
        info!(
            ?capture,
            failed = %row.failed,
            duration = row.duration,
            num_frames = row.num_frames,
            "capture done"
        );
        rows.push(row);

        if interrupt.load(Ordering::Relaxed) {
            warn!("interrupted, stopping batch");
            break;
        }
    }

    artifacts::write_log_table(log_path, &rows)?;
    Ok(rows)
}
