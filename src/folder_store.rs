//! Per-folder display customisations (icon image, background colour), kept in
//! a JSON file keyed by folder path.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderCustomization {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
}

impl FolderCustomization {
    pub fn is_empty(&self) -> bool {
        self.icon_path.is_none() && self.background_color.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct FolderStore {
    path: PathBuf,
    folders: BTreeMap<String, FolderCustomization>,
}

fn key(folder: &Path) -> String {
    folder.to_string_lossy().to_string()
}

impl FolderStore {
    /// Loads the store. A missing, empty or corrupt file yields an empty map.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let folders = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|error| {
                log::warn!(
                    "Error decoding folder store {}: {}; starting empty",
                    path.display(),
                    error
                );
                BTreeMap::new()
            }),
            Err(error) => {
                if error.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Error loading folder store {}: {}", path.display(), error);
                }
                BTreeMap::new()
            }
        };
        Self { path, folders }
    }

    pub fn get(&self, folder: &Path) -> Option<&FolderCustomization> {
        self.folders.get(&key(folder))
    }

    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    pub fn set_icon(&mut self, folder: &Path, icon: impl Into<PathBuf>) -> Result<()> {
        self.folders.entry(key(folder)).or_default().icon_path = Some(icon.into());
        self.save()
    }

    pub fn set_color(&mut self, folder: &Path, color: impl Into<String>) -> Result<()> {
        self.folders.entry(key(folder)).or_default().background_color = Some(color.into());
        self.save()
    }

    pub fn clear_icon(&mut self, folder: &Path) -> Result<()> {
        if let Some(entry) = self.folders.get_mut(&key(folder)) {
            entry.icon_path = None;
        }
        self.prune(folder);
        self.save()
    }

    pub fn clear_color(&mut self, folder: &Path) -> Result<()> {
        if let Some(entry) = self.folders.get_mut(&key(folder)) {
            entry.background_color = None;
        }
        self.prune(folder);
        self.save()
    }

    /// Removes every customisation for `folder`.
    pub fn clear(&mut self, folder: &Path) -> Result<()> {
        self.folders.remove(&key(folder));
        self.save()
    }

    fn prune(&mut self, folder: &Path) {
        let folder_key = key(folder);
        if self
            .folders
            .get(&folder_key)
            .is_some_and(FolderCustomization::is_empty)
        {
            self.folders.remove(&folder_key);
        }
    }

    /// Writes the whole map. Every setter calls this, so the file never lags.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(&self.folders)?;
        std::fs::write(&self.path, payload)?;
        Ok(())
    }
}
