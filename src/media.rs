//! Media classification by extension and the screenshot / download heuristic.

use crate::image_decode;
use exif::Tag;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tiff", "tif", "webp"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "wmv", "flv"];

const SCREENSHOT_FILENAME_PATTERNS: &[&str] = &[
    "screenshot",
    "screen_shot",
    "screen-shot",
    "capture",
    "scrn",
    "vid_cap",
];
const DOWNLOADED_FILENAME_PATTERNS: &[&str] = &["download", "dl", "item"];
const SCREENSHOT_SOFTWARE_PATTERNS: &[&str] = &[
    "screenshot",
    "snipping tool",
    "greenshot",
    "lightshot",
    "flameshot",
    "shutter",
];
const DOWNLOADED_SOFTWARE_PATTERNS: &[&str] =
    &["chrome", "firefox", "edge", "safari", "opera", "downloader"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Folder,
    Image,
    Video,
    Other,
}

impl MediaKind {
    pub fn is_file(self) -> bool {
        !matches!(self, MediaKind::Folder)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceHint {
    Screenshot,
    Downloaded,
}

fn lower_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

pub fn is_image_path(path: &Path) -> bool {
    lower_extension(path)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

pub fn is_video_path(path: &Path) -> bool {
    lower_extension(path)
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Classifies a regular file by its extension.
pub fn classify_file(path: &Path) -> MediaKind {
    if is_image_path(path) {
        MediaKind::Image
    } else if is_video_path(path) {
        MediaKind::Video
    } else {
        MediaKind::Other
    }
}

/// Guesses whether a file is a screenshot or a download.
///
/// Screenshot filename patterns win outright. Otherwise EXIF `Software`,
/// `ImageDescription` and `UserComment` are consulted for images, and a
/// download-looking filename only applies when EXIF said nothing.
pub fn detect_source_hint(path: &Path) -> Option<SourceHint> {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if SCREENSHOT_FILENAME_PATTERNS
        .iter()
        .any(|pattern| filename.contains(pattern))
    {
        return Some(SourceHint::Screenshot);
    }
    let filename_suggests_download = DOWNLOADED_FILENAME_PATTERNS
        .iter()
        .any(|pattern| filename.contains(pattern));

    if is_image_path(path) {
        if let Some(exif) = image_decode::read_exif(path) {
            if let Some(hint) = hint_from_exif(&exif) {
                return Some(hint);
            }
        }
    }

    filename_suggests_download.then_some(SourceHint::Downloaded)
}

fn hint_from_exif(exif: &exif::Exif) -> Option<SourceHint> {
    if let Some(software) = image_decode::exif_text(exif, Tag::Software) {
        if SCREENSHOT_SOFTWARE_PATTERNS
            .iter()
            .any(|pattern| software.contains(pattern))
        {
            return Some(SourceHint::Screenshot);
        }
        if DOWNLOADED_SOFTWARE_PATTERNS
            .iter()
            .any(|pattern| software.contains(pattern))
        {
            return Some(SourceHint::Downloaded);
        }
    }

    [Tag::ImageDescription, Tag::UserComment]
        .iter()
        .filter_map(|tag| image_decode::exif_text(exif, *tag))
        .any(|text| text.contains("screenshot"))
        .then_some(SourceHint::Screenshot)
}
