pub mod batch_loader;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod folder_store;
pub mod fs_ops;
pub mod image_decode;
pub mod media;
pub mod organizer;
pub mod scanner;
pub mod similarity;
pub mod thumbnails;
pub mod trash;
pub mod undo;
pub mod video;

use serde::{Deserialize, Serialize};

pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use engine::{CatalogEngine, CatalogObserver};
pub use error::{CatalogError, Result};

/// Storage class of the catalogued media; sizes the thumbnail I/O pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageProfile {
    Hdd,
    Ssd,
}

impl Default for StorageProfile {
    fn default() -> Self {
        Self::Hdd
    }
}

impl StorageProfile {
    pub fn label(self) -> &'static str {
        match self {
            StorageProfile::Hdd => "hdd",
            StorageProfile::Ssd => "ssd",
        }
    }
}
