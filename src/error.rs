use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// The requested folder is missing, not a directory, or unreadable.
    #[error("Cannot access folder {path}: {source}")]
    Access {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A single image or video could not be decoded into a thumbnail or hash.
    #[error("Failed to decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    /// A filesystem move failed while deleting, restoring or organising.
    #[error("Failed to move {from} to {to}: {reason}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        reason: String,
    },

    /// An over-cap trash record could not be removed.
    #[error("Failed to purge trash item {path}: {source}")]
    CapacityPurge {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image Error: {0}")]
    Image(#[from] image::ImageError),

    /// A single-flight operation was requested while one is already running.
    #[error("{0} is already running")]
    Busy(&'static str),

    #[error("Configuration Error: {0}")]
    Config(String),
}

impl CatalogError {
    pub fn access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Access {
            path: path.into(),
            source,
        }
    }

    pub fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_access(&self) -> bool {
        matches!(self, Self::Access { .. })
    }
}
