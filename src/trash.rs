//! Application-managed trash directory.
//!
//! Records are named `<timestamp>_<original name>` so age is derivable from the
//! name alone. Timestamps are unix seconds, bumped past the previous stamp so
//! they stay strictly increasing per store even within one second.

use crate::error::{CatalogError, Result};
use crate::fs_ops;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrashRecord {
    pub path: PathBuf,
    pub timestamp: u64,
}

/// Outcome of a cap enforcement or full purge.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeReport {
    pub purged: usize,
    pub failed: usize,
    pub failed_paths: Vec<String>,
}

impl PurgeReport {
    fn record_failure(&mut self, error: &CatalogError, path: &Path) {
        log::warn!("{}", error);
        self.failed += 1;
        self.failed_paths.push(path.to_string_lossy().to_string());
    }
}

/// Splits `<timestamp>_<rest>` and parses the timestamp.
pub fn parse_trash_name(name: &str) -> Option<u64> {
    let (stamp, _rest) = name.split_once('_')?;
    stamp.parse().ok()
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}

#[derive(Debug)]
pub struct TrashStore {
    dir: PathBuf,
    cap: Option<usize>,
    last_stamp: u64,
}

impl TrashStore {
    /// Opens (creating if needed) a trash directory. `cap == None` is unlimited.
    pub fn open(dir: impl Into<PathBuf>, cap: Option<usize>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let mut store = Self {
            dir,
            cap,
            last_stamp: 0,
        };
        store.last_stamp = store
            .records()
            .iter()
            .map(|record| record.timestamp)
            .max()
            .unwrap_or(0);
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cap(&self) -> Option<usize> {
        self.cap
    }

    fn next_stamp(&mut self) -> u64 {
        self.last_stamp = now_secs().max(self.last_stamp + 1);
        self.last_stamp
    }

    /// Moves `path` into the trash and returns its trashed location.
    pub fn move_in(&mut self, path: &Path) -> Result<PathBuf> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| CatalogError::Move {
                from: path.to_path_buf(),
                to: self.dir.clone(),
                reason: "path has no file name".into(),
            })?;

        let stamp = self.next_stamp();
        let mut destination = self.dir.join(format!("{}_{}", stamp, name));
        while destination.exists() {
            let stamp = self.next_stamp();
            destination = self.dir.join(format!("{}_{}", stamp, name));
        }
        fs_ops::move_file_with_fallback(path, &destination)?;
        log::debug!("Trashed {} as {}", path.display(), destination.display());
        Ok(destination)
    }

    /// Moves a trashed record back to `original`, recreating its parents.
    pub fn restore(&self, trashed: &Path, original: &Path) -> Result<()> {
        fs_ops::move_file_with_fallback(trashed, original)
    }

    /// Records with a parseable timestamp, oldest first.
    pub fn records(&self) -> Vec<TrashRecord> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(error) => {
                log::warn!("Cannot list trash {}: {}", self.dir.display(), error);
                return Vec::new();
            }
        };

        let mut records: Vec<TrashRecord> = read_dir
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                match parse_trash_name(&name) {
                    Some(timestamp) => Some(TrashRecord {
                        path: entry.path(),
                        timestamp,
                    }),
                    None => {
                        log::warn!("File in trash without expected timestamp format: {}", name);
                        None
                    }
                }
            })
            .collect();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.path.cmp(&b.path)));
        records
    }

    /// Permanently deletes the oldest records beyond the cap.
    pub fn enforce_cap(&self) -> PurgeReport {
        let mut report = PurgeReport::default();
        let Some(cap) = self.cap else {
            return report;
        };
        let records = self.records();
        let excess = records.len().saturating_sub(cap);
        for record in records.iter().take(excess) {
            match fs_ops::remove_path(&record.path) {
                Ok(_) => {
                    report.purged += 1;
                    log::debug!("Purged over-cap trash item {}", record.path.display());
                }
                Err(source) => {
                    let error = CatalogError::CapacityPurge {
                        path: record.path.clone(),
                        source,
                    };
                    report.record_failure(&error, &record.path);
                }
            }
        }
        report
    }

    /// Empties the trash directory, regardless of naming or cap.
    pub fn purge_all(&self) -> PurgeReport {
        purge_dir(&self.dir)
    }
}

/// Deletes every entry under `dir`. A missing directory is an empty purge.
pub fn purge_dir(dir: &Path) -> PurgeReport {
    let mut report = PurgeReport::default();
    let read_dir = match std::fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(error) => {
            if error.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Cannot list trash {}: {}", dir.display(), error);
            }
            return report;
        }
    };

    for entry in read_dir.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        match fs_ops::remove_path(&path) {
            Ok(_) => report.purged += 1,
            Err(source) => {
                let error = CatalogError::CapacityPurge {
                    path: path.clone(),
                    source,
                };
                report.record_failure(&error, &path);
            }
        }
    }
    log::info!(
        "Emptied trash {}: {} removed, {} failed",
        dir.display(),
        report.purged,
        report.failed
    );
    report
}
