use crate::error::Result;
use crate::trash::{PurgeReport, TrashStore};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UndoKind {
    DeleteBatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrashedItem {
    pub original: PathBuf,
    pub trashed: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UndoEntry {
    pub kind: UndoKind,
    pub items: Vec<TrashedItem>,
}

/// Bounded LIFO of reversible operations; the oldest entry falls off silently.
#[derive(Debug, Clone)]
pub struct UndoStack {
    entries: VecDeque<UndoEntry>,
    capacity: usize,
}

impl UndoStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: UndoEntry) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn pop(&mut self) -> Option<UndoEntry> {
        self.entries.pop_back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteSummary {
    pub requested: usize,
    pub moved: usize,
    pub missing: usize,
    pub failed: usize,
    pub failed_paths: Vec<String>,
    pub purge: PurgeReport,
    /// Every requested path; callers drop these from in-memory state whether or
    /// not the move succeeded.
    #[serde(skip)]
    pub processed: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UndoSummary {
    pub restored: usize,
    pub not_restorable: usize,
    pub failed: usize,
    pub failed_paths: Vec<String>,
    pub restored_paths: Vec<PathBuf>,
}

/// Soft delete into the trash with a bounded undo history.
#[derive(Debug)]
pub struct TrashUndoManager {
    trash: TrashStore,
    undo: UndoStack,
}

impl TrashUndoManager {
    pub fn new(trash: TrashStore, undo_capacity: usize) -> Self {
        Self {
            trash,
            undo: UndoStack::new(undo_capacity),
        }
    }

    pub fn trash(&self) -> &TrashStore {
        &self.trash
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    /// Moves every existing path into the trash. Missing paths are counted and
    /// skipped; a failed move is reported without aborting the batch. One undo
    /// entry is pushed when anything moved, then the trash cap is enforced.
    pub fn delete_batch<'a>(
        &mut self,
        paths: impl IntoIterator<Item = &'a Path>,
    ) -> DeleteSummary {
        let mut summary = DeleteSummary::default();
        let mut items = Vec::new();

        for path in paths {
            summary.requested += 1;
            summary.processed.push(path.to_path_buf());
            if std::fs::symlink_metadata(path).is_err() {
                summary.missing += 1;
                continue;
            }
            match self.trash.move_in(path) {
                Ok(trashed) => {
                    summary.moved += 1;
                    items.push(TrashedItem {
                        original: path.to_path_buf(),
                        trashed,
                    });
                }
                Err(error) => {
                    log::warn!("Could not move {} to trash: {}", path.display(), error);
                    summary.failed += 1;
                    summary.failed_paths.push(path.to_string_lossy().to_string());
                }
            }
        }

        if !items.is_empty() {
            self.undo.push(UndoEntry {
                kind: UndoKind::DeleteBatch,
                items,
            });
            summary.purge = self.trash.enforce_cap();
        }

        log::info!(
            "Deleted {}/{} items ({} missing, {} failed, {} purged from trash)",
            summary.moved,
            summary.requested,
            summary.missing,
            summary.failed,
            summary.purge.purged
        );
        summary
    }

    /// Replays the most recent entry. `None` when there is nothing to undo.
    pub fn undo(&mut self) -> Option<UndoSummary> {
        let entry = self.undo.pop()?;
        let mut summary = UndoSummary::default();

        for item in &entry.items {
            if std::fs::symlink_metadata(&item.trashed).is_err() {
                log::warn!(
                    "Trashed file {} not found; it may have been purged by the trash cap",
                    item.trashed.display()
                );
                summary.not_restorable += 1;
                continue;
            }
            match self.trash.restore(&item.trashed, &item.original) {
                Ok(_) => {
                    summary.restored += 1;
                    summary.restored_paths.push(item.original.clone());
                }
                Err(error) => {
                    log::warn!("Undo could not restore {}: {}", item.original.display(), error);
                    summary.failed += 1;
                    summary
                        .failed_paths
                        .push(item.original.to_string_lossy().to_string());
                }
            }
        }

        log::info!(
            "Undo restored {}/{} items ({} not restorable, {} failed)",
            summary.restored,
            entry.items.len(),
            summary.not_restorable,
            summary.failed
        );
        Some(summary)
    }

    /// Permanently empties the trash directory.
    pub fn purge_all(&self) -> PurgeReport {
        self.trash.purge_all()
    }
}

/// Opens a manager over the configured trash directory.
pub fn open_manager(
    trash_dir: &Path,
    cap: Option<usize>,
    undo_capacity: usize,
) -> Result<TrashUndoManager> {
    Ok(TrashUndoManager::new(
        TrashStore::open(trash_dir, cap)?,
        undo_capacity,
    ))
}
