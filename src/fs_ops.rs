use crate::error::{CatalogError, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const MAX_NAME_SUFFIX: usize = 10_000;

/// How a conflicting destination name is varied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuffixStyle {
    /// `photo (1).jpg`
    Parenthesized,
    /// `photo_1.jpg`
    Underscore,
}

fn move_error(source: &Path, destination: &Path, reason: impl ToString) -> CatalogError {
    CatalogError::Move {
        from: source.to_path_buf(),
        to: destination.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Renames `source` to `destination`, creating parent directories. Falls back
/// to copy-then-remove when the rename crosses devices.
pub fn move_file_with_fallback(source: &Path, destination: &Path) -> Result<()> {
    let destination_parent = destination
        .parent()
        .ok_or_else(|| move_error(source, destination, "destination has no parent directory"))?;
    std::fs::create_dir_all(destination_parent).map_err(|error| {
        move_error(
            source,
            destination,
            format!(
                "failed to create destination directory {}: {}",
                destination_parent.display(),
                error
            ),
        )
    })?;

    match std::fs::rename(source, destination) {
        Ok(_) => Ok(()),
        Err(rename_error) => {
            // EEXIST / EXDEV
            if !matches!(rename_error.raw_os_error(), Some(17) | Some(18)) {
                return Err(move_error(source, destination, rename_error));
            }

            if source.is_dir() {
                copy_dir_recursive(source, destination)?;
                std::fs::remove_dir_all(source).map_err(|error| {
                    move_error(source, destination, format!("copied but not removed: {}", error))
                })?;
            } else {
                std::fs::copy(source, destination).map_err(|error| {
                    move_error(
                        source,
                        destination,
                        format!("copy after cross-device failure: {}", error),
                    )
                })?;
                std::fs::remove_file(source).map_err(|error| {
                    move_error(source, destination, format!("copied but not removed: {}", error))
                })?;
            }
            Ok(())
        }
    }
}

fn copy_dir_recursive(source: &Path, destination: &Path) -> Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|error| move_error(source, destination, error))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|error| move_error(source, destination, error))?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .map_err(|error| move_error(entry.path(), &target, error))?;
        } else {
            std::fs::copy(entry.path(), &target)
                .map_err(|error| move_error(entry.path(), &target, error))?;
        }
    }
    Ok(())
}

/// Copies a file, creating the destination's parent directories.
pub fn copy_file(source: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent).map_err(|error| move_error(source, destination, error))?;
    }
    std::fs::copy(source, destination).map_err(|error| move_error(source, destination, error))?;
    Ok(())
}

/// Permanently removes a file or directory tree.
pub fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() && !path.is_symlink() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// First name in `directory` derived from `file_name` that does not exist yet.
pub fn unique_destination(
    directory: &Path,
    file_name: &str,
    style: SuffixStyle,
) -> Result<PathBuf> {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|value| value.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string());
    let extension = path
        .extension()
        .map(|value| format!(".{}", value.to_string_lossy()))
        .unwrap_or_default();

    for suffix in 0..MAX_NAME_SUFFIX {
        let candidate_name = match (suffix, style) {
            (0, _) => file_name.to_string(),
            (n, SuffixStyle::Parenthesized) => format!("{} ({}){}", stem, n, extension),
            (n, SuffixStyle::Underscore) => format!("{}_{}{}", stem, n, extension),
        };
        let candidate = directory.join(candidate_name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(CatalogError::Config(format!(
        "no free destination filename in {} for {}",
        directory.display(),
        file_name
    )))
}
