//! Recursive batch file operations: consolidate, organise by date, separate.
//!
//! Each operation walks a root folder, collects matching media, then moves or
//! copies them one by one. Individual failures are counted, never fatal.

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::fs_ops::{self, SuffixStyle};
use crate::image_decode;
use crate::media::{self, SourceHint};
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const UNKNOWN_DATE_DIR: &str = "Unknown_Date";
const SAFE_NAME_MAX_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferAction {
    Move,
    Copy,
}

impl TransferAction {
    fn verb(self) -> &'static str {
        match self {
            TransferAction::Move => "Moving",
            TransferAction::Copy => "Copying",
        }
    }
}

/// What to do when the destination name is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    Skip,
    Overwrite,
    /// Pick a free variant of the name.
    Rename,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    pub action: TransferAction,
    pub conflict: ConflictPolicy,
    pub include_images: bool,
    pub include_videos: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            action: TransferAction::Move,
            conflict: ConflictPolicy::Rename,
            include_images: true,
            include_videos: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperationSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total: usize,
    /// Files filed under `Unknown_Date` by [`organize_by_date`].
    pub unknown_date: usize,
    pub screenshots: usize,
    pub videos: usize,
    pub cancelled: bool,
}

enum Transfer {
    Done,
    Skipped,
    Failed,
}

/// Media files under `root`. Subfolders of an `excluded` directory are not
/// descended into; its direct files are still listed.
fn collect_media(
    root: &Path,
    excluded: &[&Path],
    include_images: bool,
    include_videos: bool,
) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let nested_in_excluded = excluded
                .iter()
                .any(|dir| entry.path().starts_with(dir) && entry.path() != *dir);
            !(entry.file_type().is_dir() && nested_in_excluded)
        })
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(error) => {
                log::debug!("Skipping unreadable path during walk: {}", error);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            (include_images && media::is_image_path(path))
                || (include_videos && media::is_video_path(path))
        })
        .collect()
}

fn transfer(
    source: &Path,
    destination_dir: &Path,
    file_name: &str,
    options: &TransferOptions,
    style: SuffixStyle,
) -> Transfer {
    let mut destination = destination_dir.join(file_name);
    if destination == source {
        return Transfer::Skipped;
    }

    if destination.exists() {
        match options.conflict {
            ConflictPolicy::Skip => return Transfer::Skipped,
            ConflictPolicy::Overwrite => {
                if let Err(error) = fs_ops::remove_path(&destination) {
                    log::warn!("Error overwriting {}: {}", destination.display(), error);
                    return Transfer::Failed;
                }
            }
            ConflictPolicy::Rename => {
                match fs_ops::unique_destination(destination_dir, file_name, style) {
                    Ok(free) => destination = free,
                    Err(error) => {
                        log::warn!("{}", error);
                        return Transfer::Failed;
                    }
                }
            }
        }
    }

    let result = match options.action {
        TransferAction::Move => fs_ops::move_file_with_fallback(source, &destination),
        TransferAction::Copy => fs_ops::copy_file(source, &destination),
    };
    match result {
        Ok(()) => Transfer::Done,
        Err(error) => {
            log::warn!("{}", error);
            Transfer::Failed
        }
    }
}

fn tally(summary: &mut OperationSummary, outcome: Transfer) -> bool {
    match outcome {
        Transfer::Done => {
            summary.succeeded += 1;
            true
        }
        Transfer::Skipped => {
            summary.skipped += 1;
            false
        }
        Transfer::Failed => {
            summary.failed += 1;
            false
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Gathers every image/video below `root` into `destination`.
pub fn consolidate_media(
    root: &Path,
    destination: &Path,
    options: &TransferOptions,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(String),
) -> Result<OperationSummary> {
    std::fs::create_dir_all(destination)?;
    let found = collect_media(
        root,
        &[destination],
        options.include_images,
        options.include_videos,
    );
    let mut summary = OperationSummary {
        total: found.len(),
        ..OperationSummary::default()
    };
    if found.is_empty() {
        progress("No media found to consolidate.".to_string());
        return Ok(summary);
    }

    for (idx, source) in found.iter().enumerate() {
        if cancel.is_cancelled() {
            progress(format!("Consolidation cancelled ({}/{}).", idx, summary.total));
            summary.cancelled = true;
            break;
        }
        progress(format!("{}: {}/{}", options.action.verb(), idx + 1, summary.total));

        if source.parent() == Some(destination) {
            summary.skipped += 1;
            continue;
        }
        let outcome = transfer(
            source,
            destination,
            &file_name_of(source),
            options,
            SuffixStyle::Parenthesized,
        );
        tally(&mut summary, outcome);
    }

    log::info!(
        "Consolidated {} into {}: {} done, {} skipped, {} failed of {}",
        root.display(),
        destination.display(),
        summary.succeeded,
        summary.skipped,
        summary.failed,
        summary.total
    );
    Ok(summary)
}

/// Keeps alphanumerics, `_` and `-`, replaces anything else with `_`, and
/// truncates to 30 characters.
pub fn safe_file_stem(stem: &str) -> String {
    stem.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .take(SAFE_NAME_MAX_CHARS)
        .collect()
}

/// Destination directory and file name for a file dated `date`.
pub fn dated_destination(
    base: &Path,
    source: &Path,
    date: Option<chrono::NaiveDateTime>,
) -> (PathBuf, String) {
    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = source
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    match date {
        Some(date) => (
            base.join(date.format("%Y").to_string())
                .join(date.format("%m").to_string()),
            format!(
                "{}_{}{}",
                date.format("%d-%H%M%S"),
                safe_file_stem(&stem),
                extension
            ),
        ),
        None => (base.join(UNKNOWN_DATE_DIR), format!("{}{}", stem, extension)),
    }
}

/// Files media under `base/YYYY/MM/DD-HHMMSS_<name>` using the capture date.
pub fn organize_by_date(
    root: &Path,
    base: &Path,
    options: &TransferOptions,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(String),
) -> Result<OperationSummary> {
    std::fs::create_dir_all(base)?;
    let found = collect_media(root, &[base], options.include_images, options.include_videos);
    let mut summary = OperationSummary {
        total: found.len(),
        ..OperationSummary::default()
    };
    if found.is_empty() {
        progress("No media found to organize.".to_string());
        return Ok(summary);
    }

    for (idx, source) in found.iter().enumerate() {
        if cancel.is_cancelled() {
            progress(format!("Organization cancelled ({}/{}).", idx, summary.total));
            summary.cancelled = true;
            break;
        }
        progress(format!("Organizing: {}/{}", idx + 1, summary.total));

        let date = image_decode::media_date(source, media::is_image_path(source));
        if date.is_none() {
            summary.unknown_date += 1;
        }
        let (target_dir, file_name) = dated_destination(base, source, date);
        if let Err(error) = std::fs::create_dir_all(&target_dir) {
            log::warn!("Cannot create {}: {}", target_dir.display(), error);
            summary.failed += 1;
            continue;
        }
        let outcome = transfer(
            source,
            &target_dir,
            &file_name,
            options,
            SuffixStyle::Underscore,
        );
        tally(&mut summary, outcome);
    }

    log::info!(
        "Organized {} by date into {}: {} done, {} skipped, {} failed, {} undated",
        root.display(),
        base.display(),
        summary.succeeded,
        summary.skipped,
        summary.failed,
        summary.unknown_date
    );
    Ok(summary)
}

/// Destinations for [`separate_media`]; `None` disables that category.
#[derive(Debug, Clone, Default)]
pub struct SeparateTargets {
    pub screenshots: Option<PathBuf>,
    pub videos: Option<PathBuf>,
}

/// Pulls screenshot-hinted images and all videos out into their own folders.
pub fn separate_media(
    root: &Path,
    targets: &SeparateTargets,
    options: &TransferOptions,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(String),
) -> Result<OperationSummary> {
    for dir in [&targets.screenshots, &targets.videos].into_iter().flatten() {
        std::fs::create_dir_all(dir)?;
    }
    let excluded: Vec<&Path> = [&targets.screenshots, &targets.videos]
        .into_iter()
        .flatten()
        .map(PathBuf::as_path)
        .collect();
    let found = collect_media(
        root,
        &excluded,
        targets.screenshots.is_some(),
        targets.videos.is_some(),
    );
    let mut summary = OperationSummary {
        total: found.len(),
        ..OperationSummary::default()
    };
    if found.is_empty() {
        progress("No relevant media found to separate.".to_string());
        return Ok(summary);
    }

    for (idx, source) in found.iter().enumerate() {
        if cancel.is_cancelled() {
            progress(format!("Separation cancelled ({}/{}).", idx, summary.total));
            summary.cancelled = true;
            break;
        }
        progress(format!("Processing for separation: {}/{}", idx + 1, summary.total));

        let is_video = media::is_video_path(source);
        let target = if is_video {
            targets.videos.as_deref()
        } else if media::detect_source_hint(source) == Some(SourceHint::Screenshot) {
            targets.screenshots.as_deref()
        } else {
            None
        };
        let Some(target) = target else {
            continue;
        };
        if source.parent() == Some(target) {
            summary.skipped += 1;
            continue;
        }

        let outcome = transfer(
            source,
            target,
            &file_name_of(source),
            options,
            SuffixStyle::Parenthesized,
        );
        if tally(&mut summary, outcome) {
            if is_video {
                summary.videos += 1;
            } else {
                summary.screenshots += 1;
            }
        }
    }

    log::info!(
        "Separated {}: {} screenshots, {} videos, {} skipped, {} failed",
        root.display(),
        summary.screenshots,
        summary.videos,
        summary.skipped,
        summary.failed
    );
    Ok(summary)
}
