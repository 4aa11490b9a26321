use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ledsync", about = "LED-based synchronization of camera recordings")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Persist the LED region of a video (top-left inclusive, bottom-right exclusive).
    SetRegion {
        video: PathBuf,
        region_dir: PathBuf,
        x0: u32,
        y0: u32,
        x1: u32,
        y1: u32,
    },

    /// Derive the LED pixel mask of a video from its persisted region.
    BuildMask {
        video: PathBuf,
        region_dir: PathBuf,
        /// Directory for the std map and mask overlay images.
        diagnostics_dir: Option<PathBuf>,
    },

    /// Extract LED signals for every mp4 in a folder.
    Extract {
        video_dir: PathBuf,
        region_dir: PathBuf,
        output_dir: PathBuf,
    },

    /// Convert depth-camera captures into constant-rate mp4 videos.
    Convert {
        capture_dir: PathBuf,
        output_dir: PathBuf,
        /// CSV log table written after the batch.
        log_path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positional_region() {
        let cli = Cli::try_parse_from(["ledsync", "set-region", "a.mp4", "regions", "1", "2", "30", "40"]).unwrap();
        match cli.command {
            Command::SetRegion { video, x0, y1, .. } => {
                assert_eq!(video, PathBuf::from("a.mp4"));
                assert_eq!((x0, y1), (1, 40));
            }
            _ => panic!("expected set-region"),
        }
    }

    #[test]
    fn diagnostics_dir_is_optional() {
        let cli = Cli::try_parse_from(["ledsync", "build-mask", "a.mp4", "regions"]).unwrap();
        assert!(matches!(cli.command, Command::BuildMask { diagnostics_dir: None, .. }));
        assert!(Cli::try_parse_from(["ledsync", "convert", "captures", "out"]).is_err());
    }
}
