//! Per-source artifacts persisted between runs, keyed by source basename.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use prost::Message;
use serde::Serialize;
use tracing::{debug, info};

use ledsync_proto::proto;

use crate::extract::LedSignal;
use crate::mask::BinaryMask;
use crate::reconcile::ReconcileReport;
use crate::region::Region;

pub const REGION_SUFFIX: &str = "_LED_position.pb";
pub const MASK_SUFFIX: &str = "_LED_binary_mask.pb";
pub const SIGNAL_SUFFIX: &str = "_LED_signal.pb";
pub const SUMMARY_SUFFIX: &str = "_duration.pb";

/// Source file name without its extension.
pub fn source_stem(source: &Path) -> String {
    source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn source_name(source: &Path) -> String {
    source
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn artifact_path(dir: &Path, source: &Path, suffix: &str) -> PathBuf {
    dir.join(format!("{}{suffix}", source_stem(source)))
}

fn write_message(path: &Path, message: &impl Message) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let buf = message.encode_to_vec();
    std::fs::write(path, &buf).with_context(|| format!("failed to write {}", path.display()))?;
    debug!(?path, bytes = buf.len(), "artifact written");
    Ok(())
}

fn read_message<M: Message + Default>(path: &Path) -> Result<Option<M>> {
    if !path.exists() {
        return Ok(None);
    }
    let buf = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let message =
        M::decode(buf.as_slice()).with_context(|| format!("failed to decode {}", path.display()))?;
    Ok(Some(message))
}

pub fn save_region(dir: &Path, source: &Path, region: &Region) -> Result<PathBuf> {
    let (x0, y0) = region.top_left();
    let (x1, y1) = region.bottom_right();
    let path = artifact_path(dir, source, REGION_SUFFIX);
    write_message(
        &path,
        &proto::LedRegion {
            source_file: source_name(source),
            x0,
            y0,
            x1,
            y1,
        },
    )?;
    info!(?path, ?region, "region saved");
    Ok(path)
}

/// Load the persisted region for `source`, or `None` if none was saved.
pub fn load_region(dir: &Path, source: &Path) -> Result<Option<Region>> {
    let path = artifact_path(dir, source, REGION_SUFFIX);
    let Some(msg) = read_message::<proto::LedRegion>(&path)? else {
        return Ok(None);
    };
    let region = Region::new(msg.x0, msg.y0, msg.x1, msg.y1)
        .with_context(|| format!("invalid region in {}", path.display()))?;
    Ok(Some(region))
}

/// A persisted mask together with the decimation it was built for.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMask {
    pub mask: BinaryMask,
    pub decimation: u32,
    pub std_threshold: f64,
}

pub fn save_mask(dir: &Path, source: &Path, stored: &StoredMask) -> Result<PathBuf> {
    let path = artifact_path(dir, source, MASK_SUFFIX);
    write_message(
        &path,
        &proto::LedMask {
            source_file: source_name(source),
            width: stored.mask.width(),
            height: stored.mask.height(),
            decimation: stored.decimation,
            pixels: stored.mask.pixels().to_vec(),
            std_threshold: stored.std_threshold,
        },
    )?;
    info!(?path, selected = stored.mask.true_count(), "mask saved");
    Ok(path)
}

pub fn load_mask(dir: &Path, source: &Path) -> Result<Option<StoredMask>> {
    let path = artifact_path(dir, source, MASK_SUFFIX);
    let Some(msg) = read_message::<proto::LedMask>(&path)? else {
        return Ok(None);
    };
    if msg.decimation == 0 {
        bail!("mask in {} has decimation 0", path.display());
    }
    let mask = BinaryMask::from_pixels(msg.width, msg.height, msg.pixels)
        .with_context(|| format!("corrupt mask in {}", path.display()))?;
    Ok(Some(StoredMask {
        mask,
        decimation: msg.decimation,
        std_threshold: msg.std_threshold,
    }))
}

pub fn save_signal(dir: &Path, source: &Path, signal: &LedSignal, decimation: u32) -> Result<PathBuf> {
    let path = artifact_path(dir, source, SIGNAL_SUFFIX);
    write_message(
        &path,
        &proto::LedSignal {
            source_file: source_name(source),
            samples: signal.samples.clone(),
            decimation,
            read_error: signal.read_error.clone(),
        },
    )?;
    info!(?path, sample_count = signal.len(), "signal saved");
    Ok(path)
}

pub fn load_signal(dir: &Path, source: &Path) -> Result<Option<LedSignal>> {
    let path = artifact_path(dir, source, SIGNAL_SUFFIX);
    Ok(read_message::<proto::LedSignal>(&path)?.map(|msg| LedSignal {
        samples: msg.samples,
        read_error: msg.read_error,
    }))
}

pub fn save_summary(dir: &Path, source: &Path, report: &ReconcileReport) -> Result<PathBuf> {
    let path = artifact_path(dir, source, SUMMARY_SUFFIX);
    write_message(
        &path,
        &proto::CaptureSummary {
            source_file: source_name(source),
            failure: report.failure.clone(),
            duration_seconds: report.effective_duration_secs,
            corrected_frame_count: report.corrected_frame_count as u64,
            captured_frame_count: report.captured_frame_count as u64,
            repeated_frame_count: report.repeated_frame_count as u64,
        },
    )?;
    Ok(path)
}

pub fn load_summary(dir: &Path, source: &Path) -> Result<Option<proto::CaptureSummary>> {
    read_message(&artifact_path(dir, source, SUMMARY_SUFFIX))
}

/// One row of the conversion log table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRow {
    pub source_path: String,
    /// Failure description, empty when the conversion succeeded.
    pub failed: String,
    /// Effective duration in seconds.
    pub duration: f64,
    pub num_frames: usize,
    /// `num_frames / 30`.
    pub calculated_duration: f64,
}

pub fn write_log_table(path: &Path, rows: &[LogRow]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create log table {}", path.display()))?;
    for row in rows {
        writer.serialize(row).context("failed to write log row")?;
    }
    writer.flush().context("failed to flush log table")?;
    info!(?path, rows = rows.len(), "log table saved");
    Ok(())
}
