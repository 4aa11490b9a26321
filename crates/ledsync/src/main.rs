mod cli;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use ledsync_core::pipeline::{self, FixedRoi, PipelineConfig};
use ledsync_core::region::Region;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();
    let config = PipelineConfig::default();

    match cli.command {
        cli::Command::SetRegion {
            video,
            region_dir,
            x0,
            y0,
            x1,
            y1,
        } => {
            let region = Region::new(x0, y0, x1, y1)?;
            pipeline::set_region(&video, &region_dir, &mut FixedRoi(region))
                .with_context(|| format!("failed to set region for {}", video.display()))?;
            info!(?video, ?region, "region set");
        }

        cli::Command::BuildMask {
            video,
            region_dir,
            diagnostics_dir,
        } => {
            let stored =
                pipeline::build_mask_for_video(&video, &region_dir, diagnostics_dir.as_deref(), &config)
                    .with_context(|| format!("failed to build mask for {}", video.display()))?;
            info!(
                ?video,
                selected = stored.mask.true_count(),
                width = stored.mask.width(),
                height = stored.mask.height(),
                "mask built"
            );
        }

        cli::Command::Extract {
            video_dir,
            region_dir,
            output_dir,
        } => {
            let summary = pipeline::extract_folder(&video_dir, &region_dir, &output_dir, &config)?;
            if summary.failed > 0 {
                warn!(failed = summary.failed, "some videos failed, see log above");
            }
        }

        cli::Command::Convert {
            capture_dir,
            output_dir,
            log_path,
        } => {
            let interrupt = install_interrupt_handler()?;
            let rows =
                pipeline::convert_folder(&capture_dir, &output_dir, &log_path, &config, &interrupt)?;
            let failed = rows.iter().filter(|r| !r.failed.is_empty()).count();
            info!(converted = rows.len() - failed, failed, ?log_path, "conversion complete");
        }
    }

    Ok(())
}

/// Flag raised on Ctrl-C. The pipeline finalizes the current capture,
/// writes the log table and stops.
fn install_interrupt_handler() -> Result<Arc<AtomicBool>> {
    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupt);
    ctrlc::set_handler(move || {
        warn!("interrupt received, finishing current capture");
        flag.store(true, Ordering::Relaxed);
    })
    .context("failed to install interrupt handler")?;
    Ok(interrupt)
}
