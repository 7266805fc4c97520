//! Representative-frame extraction for video thumbnails.
//!
//! Video decoding is delegated to an external capability. When none is
//! available the thumbnail pipeline shows a placeholder instead of failing.

use crate::error::{CatalogError, Result};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Frames past this index are never used as the representative frame.
const MAX_REPRESENTATIVE_FRAME: u64 = 100;

pub trait FrameExtractor: Send + Sync {
    fn extract_frame(&self, path: &Path) -> Result<DynamicImage>;
}

/// One tenth into the stream, capped at frame 100.
pub fn representative_frame_index(frame_count: Option<u64>) -> u64 {
    frame_count
        .map(|count| (count / 10).min(MAX_REPRESENTATIVE_FRAME))
        .unwrap_or(0)
}

/// Extracts frames by piping a single PNG out of the `ffmpeg` command-line tool.
#[derive(Debug, Clone)]
pub struct FfmpegFrameExtractor {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegFrameExtractor {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Returns an extractor if `ffmpeg` answers `-version` on the `PATH`.
    pub fn detect() -> Option<Self> {
        Self::detect_with(Self::new("ffmpeg", "ffprobe"))
    }

    fn detect_with(candidate: Self) -> Option<Self> {
        let available = Command::new(&candidate.ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);
        if available {
            Some(candidate)
        } else {
            log::warn!(
                "{} not found; video thumbnails will use a placeholder",
                candidate.ffmpeg.display()
            );
            None
        }
    }

    fn frame_count(&self, path: &Path) -> Option<u64> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=nb_frames",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stderr(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout).trim().parse().ok()
    }
}

impl FrameExtractor for FfmpegFrameExtractor {
    fn extract_frame(&self, path: &Path) -> Result<DynamicImage> {
        let frame_index = representative_frame_index(self.frame_count(path));
        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-i"])
            .arg(path)
            .args([
                "-vf",
                &format!("select=eq(n\\,{})", frame_index),
                "-frames:v",
                "1",
                "-f",
                "image2pipe",
                "-vcodec",
                "png",
                "-",
            ])
            .stdin(Stdio::null())
            .output()
            .map_err(|error| CatalogError::decode(path, format!("ffmpeg failed to start: {}", error)))?;

        if !output.status.success() || output.stdout.is_empty() {
            return Err(CatalogError::decode(
                path,
                format!(
                    "ffmpeg could not read frame {}: {}",
                    frame_index,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        image::load_from_memory(&output.stdout).map_err(|error| CatalogError::decode(path, error))
    }
}
