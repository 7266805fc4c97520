use crate::error::{CatalogError, Result};
use crate::media::{self, MediaKind, SourceHint};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::UNIX_EPOCH;

/// One directory entry of the catalog. The path is the identity key.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub path: PathBuf,
    pub display_name: String,
    pub kind: MediaKind,
    pub size: u64,
    pub modified: Option<i64>,
    source_hint: OnceLock<Option<SourceHint>>,
}

impl CatalogEntry {
    pub fn new(path: PathBuf, kind: MediaKind, size: u64, modified: Option<i64>) -> Self {
        let display_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Self {
            path,
            display_name,
            kind,
            size,
            modified,
            source_hint: OnceLock::new(),
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == MediaKind::Folder
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Screenshot / download hint, computed on first access and memoised.
    pub fn source_hint(&self) -> Option<SourceHint> {
        if self.is_folder() {
            return None;
        }
        *self
            .source_hint
            .get_or_init(|| media::detect_source_hint(&self.path))
    }
}

/// Boolean view toggles applied to a scanned folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanFilters {
    pub include_images: bool,
    pub include_videos: bool,
    /// Restrict files to members of a similarity group (applied by the batch loader).
    pub only_similar: bool,
    /// Restrict files to entries hinted as screenshots or downloads.
    pub only_marked_sources: bool,
}

impl Default for ScanFilters {
    fn default() -> Self {
        Self {
            include_images: true,
            include_videos: true,
            only_similar: false,
            only_marked_sources: false,
        }
    }
}

impl ScanFilters {
    pub fn accepts(&self, entry: &CatalogEntry) -> bool {
        let type_ok = match entry.kind {
            MediaKind::Folder => return true,
            MediaKind::Image => self.include_images,
            MediaKind::Video => self.include_videos,
            MediaKind::Other => false,
        };
        type_ok && (!self.only_marked_sources || entry.source_hint().is_some())
    }
}

/// Lists the direct children of `folder` as catalog entries.
///
/// Folders sort before files; both sort by case-insensitive name. Entries that
/// cannot be inspected (permission errors, dangling links) are skipped.
pub fn scan_raw(folder: &Path) -> Result<Vec<CatalogEntry>> {
    let metadata = std::fs::metadata(folder).map_err(|error| CatalogError::access(folder, error))?;
    if !metadata.is_dir() {
        return Err(CatalogError::access(
            folder,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
        ));
    }

    let read_dir = std::fs::read_dir(folder).map_err(|error| CatalogError::access(folder, error))?;
    let mut entries = Vec::new();
    for dir_entry in read_dir {
        let dir_entry = match dir_entry {
            Ok(dir_entry) => dir_entry,
            Err(error) => {
                log::debug!("Skipping unreadable entry in {}: {}", folder.display(), error);
                continue;
            }
        };
        let path = dir_entry.path();
        // Follow symlinks so linked folders and files are listed by their target type.
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(error) => {
                log::debug!("Skipping {}: {}", path.display(), error);
                continue;
            }
        };

        let kind = if metadata.is_dir() {
            MediaKind::Folder
        } else if metadata.is_file() {
            media::classify_file(&path)
        } else {
            continue;
        };
        let modified = metadata
            .modified()
            .ok()
            .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map(|duration| duration.as_secs() as i64);
        let size = if metadata.is_file() { metadata.len() } else { 0 };
        entries.push(CatalogEntry::new(path, kind, size, modified));
    }

    sort_entries(&mut entries);
    Ok(entries)
}

pub fn sort_entries(entries: &mut [CatalogEntry]) {
    entries.sort_by(|a, b| {
        a.is_file()
            .cmp(&b.is_file())
            .then_with(|| {
                a.display_name
                    .to_lowercase()
                    .cmp(&b.display_name.to_lowercase())
            })
            .then_with(|| a.display_name.cmp(&b.display_name))
    });
}

pub fn apply_filters(entries: &[CatalogEntry], filters: &ScanFilters) -> Vec<CatalogEntry> {
    entries
        .iter()
        .filter(|entry| filters.accepts(entry))
        .cloned()
        .collect()
}

/// Scans `folder` and applies the type and source filters.
pub fn scan(folder: &Path, filters: &ScanFilters) -> Result<Vec<CatalogEntry>> {
    let started = std::time::Instant::now();
    let raw = scan_raw(folder)?;
    let filtered = apply_filters(&raw, filters);
    log::info!(
        "Scanned {}: {} entries, {} after filters ({:.1} ms)",
        folder.display(),
        raw.len(),
        filtered.len(),
        started.elapsed().as_secs_f64() * 1000.0
    );
    Ok(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(label: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "picsnest_scanner_test_{}_{}_{}",
            label,
            std::process::id(),
            stamp
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn names(entries: &[CatalogEntry]) -> Vec<&str> {
        entries.iter().map(|entry| entry.display_name.as_str()).collect()
    }

    #[test]
    fn test_scan_orders_folders_first_then_case_insensitive_names() {
        let dir = temp_dir("order");
        fs::create_dir(dir.join("zeta")).unwrap();
        fs::create_dir(dir.join("Alpha")).unwrap();
        fs::write(dir.join("b.png"), b"x").unwrap();
        fs::write(dir.join("A.jpg"), b"x").unwrap();
        fs::write(dir.join("c.mp4"), b"x").unwrap();
        fs::write(dir.join("readme.txt"), b"x").unwrap();

        let raw = scan_raw(&dir).expect("scan should succeed");
        assert_eq!(
            names(&raw),
            vec!["Alpha", "zeta", "A.jpg", "b.png", "c.mp4", "readme.txt"]
        );
        assert_eq!(raw[0].kind, MediaKind::Folder);
        assert_eq!(raw[5].kind, MediaKind::Other);

        let filtered = scan(&dir, &ScanFilters::default()).unwrap();
        assert_eq!(names(&filtered), vec!["Alpha", "zeta", "A.jpg", "b.png", "c.mp4"]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_type_filters_drop_files_but_keep_folders() {
        let dir = temp_dir("filters");
        fs::create_dir(dir.join("sub")).unwrap();
        fs::write(dir.join("a.png"), b"x").unwrap();
        fs::write(dir.join("b.mov"), b"x").unwrap();

        let images_only = ScanFilters {
            include_videos: false,
            ..ScanFilters::default()
        };
        assert_eq!(names(&scan(&dir, &images_only).unwrap()), vec!["sub", "a.png"]);

        let nothing = ScanFilters {
            include_images: false,
            include_videos: false,
            ..ScanFilters::default()
        };
        assert_eq!(names(&scan(&dir, &nothing).unwrap()), vec!["sub"]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_only_marked_sources_keeps_screenshots() {
        let dir = temp_dir("marked");
        fs::write(dir.join("Screenshot_1.png"), b"x").unwrap();
        fs::write(dir.join("beach.png"), b"x").unwrap();

        let marked = ScanFilters {
            only_marked_sources: true,
            ..ScanFilters::default()
        };
        let result = scan(&dir, &marked).unwrap();
        assert_eq!(names(&result), vec!["Screenshot_1.png"]);
        assert_eq!(result[0].source_hint(), Some(SourceHint::Screenshot));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_rescan_is_idempotent() {
        let dir = temp_dir("idempotent");
        fs::create_dir(dir.join("nested")).unwrap();
        for name in ["one.png", "Two.gif", "three.mkv"] {
            fs::write(dir.join(name), b"data").unwrap();
        }

        let first = scan(&dir, &ScanFilters::default()).unwrap();
        let second = scan(&dir, &ScanFilters::default()).unwrap();
        let first_paths: Vec<_> = first.iter().map(|entry| entry.path.clone()).collect();
        let second_paths: Vec<_> = second.iter().map(|entry| entry.path.clone()).collect();
        assert_eq!(first_paths, second_paths);
        assert_eq!(first, second);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_scan_rejects_missing_folder_and_plain_file() {
        let dir = temp_dir("access");
        let missing = dir.join("does_not_exist");
        assert!(scan(&missing, &ScanFilters::default())
            .expect_err("missing folder")
            .is_access());

        let file = dir.join("file.png");
        fs::write(&file, b"x").unwrap();
        assert!(scan(&file, &ScanFilters::default())
            .expect_err("file is not a folder")
            .is_access());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_entry_records_size_and_mtime() {
        let dir = temp_dir("meta");
        fs::write(dir.join("sized.png"), b"12345").unwrap();
        let raw = scan_raw(&dir).unwrap();
        assert_eq!(raw[0].size, 5);
        assert!(raw[0].modified.is_some());
        fs::remove_dir_all(&dir).ok();
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_skipped_not_an_access_error() {
        let dir = temp_dir("dangling");
        fs::write(dir.join("real.png"), b"x").unwrap();
        std::os::unix::fs::symlink(dir.join("gone.png"), dir.join("link.png")).unwrap();

        let raw = scan_raw(&dir).expect("unreadable entries are skipped");
        assert_eq!(names(&raw), vec!["real.png"]);

        fs::remove_dir_all(&dir).ok();
    }
}
