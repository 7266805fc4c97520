use crate::error::{CatalogError, Result};
use crate::StorageProfile;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR_NAME: &str = "picsnest";
const TRASH_DIR_NAME: &str = ".app_trash_v3";
const FOLDER_STORE_FILENAME: &str = "folder_thumbs.json";
pub const SETTINGS_FILENAME: &str = "settings.json";

/// Engine-wide settings, constructed once and handed to each component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub trash_dir: PathBuf,
    /// Maximum number of trash records kept on disk. Zero or negative means unlimited.
    pub trash_max_items: i64,
    pub undo_capacity: usize,
    pub batch_size: usize,
    /// Thumbnails are fitted inside a square box of this many pixels.
    pub thumbnail_size: u32,
    /// Maximum Hamming distance between two hashes that still counts as similar.
    pub similarity_threshold: u32,
    pub drain_interval_ms: u64,
    pub drain_max_items: usize,
    /// Scroll fraction past which the next page is requested.
    pub load_more_threshold: f32,
    pub storage_profile: StorageProfile,
    pub thumbnail_cache_dir: Option<PathBuf>,
    pub folder_store_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            trash_dir: data_dir.join(TRASH_DIR_NAME),
            trash_max_items: -1,
            undo_capacity: 10,
            batch_size: 20,
            thumbnail_size: 120,
            similarity_threshold: 5,
            drain_interval_ms: 100,
            drain_max_items: 10,
            load_more_threshold: 0.85,
            storage_profile: StorageProfile::default(),
            thumbnail_cache_dir: None,
            folder_store_path: data_dir.join(FOLDER_STORE_FILENAME),
        }
    }
}

impl EngineConfig {
    /// Loads settings from a JSON file.
    ///
    /// A missing or unparsable file is not an error: defaults are returned and a
    /// warning is logged, so startup never fails on a bad settings file.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) => {
                if error.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to read settings {}: {}", path.display(), error);
                }
                return Self::default().with_env_overrides();
            }
        };

        let config = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_json::from_str::<Self>(&content).unwrap_or_else(|error| {
                log::warn!(
                    "Settings file {} is corrupt ({}); using defaults",
                    path.display(),
                    error
                );
                Self::default()
            })
        };
        config.with_env_overrides()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(self)?;
        std::fs::write(path, payload)?;
        Ok(())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = std::env::var_os("PICSNEST_TRASH_DIR") {
            self.trash_dir = PathBuf::from(dir);
        }
        self
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn trash_cap(&self) -> Option<usize> {
        usize::try_from(self.trash_max_items)
            .ok()
            .filter(|cap| *cap > 0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(CatalogError::Config("batch_size must be positive".into()));
        }
        if self.thumbnail_size == 0 {
            return Err(CatalogError::Config(
                "thumbnail_size must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.load_more_threshold) {
            return Err(CatalogError::Config(format!(
                "load_more_threshold {} is outside 0..=1",
                self.load_more_threshold
            )));
        }
        Ok(())
    }
}

/// Candidate per-user data directories, most specific first.
pub fn candidate_data_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(xdg_data_home) = std::env::var_os("XDG_DATA_HOME") {
        dirs.push(PathBuf::from(xdg_data_home).join(APP_DIR_NAME));
    }
    if let Some(home) = std::env::var_os("HOME") {
        dirs.push(
            PathBuf::from(home)
                .join(".local")
                .join("share")
                .join(APP_DIR_NAME),
        );
    }
    if let Some(app_data) = std::env::var_os("APPDATA") {
        dirs.push(PathBuf::from(app_data).join(APP_DIR_NAME));
    }
    dirs
}

pub fn default_data_dir() -> PathBuf {
    candidate_data_dirs()
        .into_iter()
        .next()
        .unwrap_or_else(|| std::env::temp_dir().join(APP_DIR_NAME))
}

pub fn default_trash_dir_candidates() -> Vec<PathBuf> {
    candidate_data_dirs()
        .into_iter()
        .map(|dir| dir.join(TRASH_DIR_NAME))
        .collect()
}
