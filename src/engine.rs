//! The catalog engine: one control flow owning every piece of mutable state.
//!
//! Background work (thumbnail decoding, similarity hashing) only ever talks
//! back through channels that [`CatalogEngine::tick`] drains. Consumers learn
//! about changes through a [`CatalogObserver`].

use crate::batch_loader::{self, BatchLoader};
use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{CatalogError, Result};
use crate::folder_store::FolderStore;
use crate::fs_ops;
use crate::media::MediaKind;
use crate::organizer::OperationSummary;
use crate::scanner::{self, CatalogEntry, ScanFilters};
use crate::similarity::{
    DHash, PerceptualHasher, SimilarityEngine, SimilarityEvent, SimilarityGroup,
    SimilarityOutcome,
};
use crate::thumbnails::ThumbnailPipeline;
use crate::trash::PurgeReport;
use crate::undo::{self, DeleteSummary, TrashUndoManager, UndoSummary};
use crate::video::{FfmpegFrameExtractor, FrameExtractor};
use image::DynamicImage;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Callbacks fired from the control flow. Every method defaults to a no-op.
pub trait CatalogObserver {
    fn on_thumbnail_ready(
        &mut self,
        _path: &Path,
        _bitmap: Option<&DynamicImage>,
        _failed: bool,
    ) {
    }
    fn on_similarity_progress(&mut self, _text: &str) {}
    fn on_similarity_complete(&mut self, _groups: &[SimilarityGroup]) {}
    fn on_batch_available(&mut self, _entries: &[CatalogEntry]) {}
    fn on_delete_complete(&mut self, _count: usize) {}
    fn on_undo_complete(&mut self, _restored: usize) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl CatalogObserver for NoopObserver {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThumbnailState {
    #[default]
    Pending,
    Ready,
    Placeholder,
    Failed,
}

/// Read-only projection of one rendered entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewItem {
    pub kind: MediaKind,
    pub thumbnail: ThumbnailState,
}

/// What one [`CatalogEngine::tick`] applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub thumbnails_applied: usize,
    pub similarity: Option<SimilarityOutcome>,
}

pub struct CatalogEngine<O: CatalogObserver = NoopObserver> {
    config: EngineConfig,
    observer: O,
    current_folder: Option<PathBuf>,
    catalog: Vec<CatalogEntry>,
    filters: ScanFilters,
    loader: BatchLoader,
    view: HashMap<PathBuf, ViewItem>,
    pipeline: ThumbnailPipeline,
    folder_token: CancelToken,
    similarity: SimilarityEngine,
    manager: TrashUndoManager,
    folder_store: FolderStore,
}

impl<O: CatalogObserver> CatalogEngine<O> {
    /// Builds an engine with the dHash hasher and `ffmpeg` frames when available.
    pub fn new(config: EngineConfig, observer: O) -> Result<Self> {
        let frames = FfmpegFrameExtractor::detect()
            .map(|extractor| Arc::new(extractor) as Arc<dyn FrameExtractor>);
        Self::with_capabilities(config, observer, Arc::new(DHash), frames)
    }

    pub fn with_capabilities(
        config: EngineConfig,
        observer: O,
        hasher: Arc<dyn PerceptualHasher>,
        frames: Option<Arc<dyn FrameExtractor>>,
    ) -> Result<Self> {
        config.validate()?;
        let pipeline = ThumbnailPipeline::new(
            config.storage_profile,
            config.thumbnail_cache_dir.clone(),
            frames,
        )?;
        let manager =
            undo::open_manager(&config.trash_dir, config.trash_cap(), config.undo_capacity)?;
        let folder_store = FolderStore::load(&config.folder_store_path);
        log::info!(
            "Catalog engine ready (trash: {}, cap: {:?}, storage: {})",
            config.trash_dir.display(),
            config.trash_cap(),
            config.storage_profile.label()
        );

        Ok(Self {
            loader: BatchLoader::new(config.batch_size),
            config,
            observer,
            current_folder: None,
            catalog: Vec::new(),
            filters: ScanFilters::default(),
            view: HashMap::new(),
            pipeline,
            folder_token: CancelToken::new(),
            similarity: SimilarityEngine::new(hasher),
            manager,
            folder_store,
        })
    }

    /// Scans `folder` and replaces the catalog, then dispatches the first page.
    ///
    /// Navigating to a different folder forgets similarity results; reloading
    /// the same folder keeps them. On an access error the previous catalog is
    /// left untouched.
    pub fn load_folder(&mut self, folder: &Path) -> Result<usize> {
        let scanned = scanner::scan_raw(folder)?;

        let is_new_folder = self.current_folder.as_deref() != Some(folder);
        if is_new_folder {
            self.similarity.reset();
        }

        self.pipeline.cancel_all();
        self.folder_token = CancelToken::new();
        self.view.clear();
        self.current_folder = Some(folder.to_path_buf());
        self.catalog = scanned;
        self.rebuild_view_list();

        let listed = self.loader.entries().len();
        log::info!(
            "Loaded {}: {} entries, {} listed",
            folder.display(),
            self.catalog.len(),
            listed
        );
        self.next_batch();
        Ok(listed)
    }

    /// Re-scans the current folder.
    pub fn refresh(&mut self) -> Result<usize> {
        match self.current_folder.clone() {
            Some(folder) => self.load_folder(&folder),
            None => Ok(0),
        }
    }

    /// Applies new view toggles and reloads. Switching on the similar-only view
    /// before any scan has run starts one.
    pub fn set_filters(&mut self, filters: ScanFilters) -> Result<usize> {
        let wants_scan = filters.only_similar
            && !self.filters.only_similar
            && !self.similarity.has_completed()
            && !self.similarity.is_running();
        self.filters = filters;
        if wants_scan && self.current_folder.is_some() {
            self.find_similar()?;
        }
        self.refresh()
    }

    fn rebuild_view_list(&mut self) {
        let filtered = scanner::apply_filters(&self.catalog, &self.filters);
        let listed = if self.filters.only_similar {
            batch_loader::order_for_similar_view(
                &filtered,
                self.similarity.groups(),
                self.similarity.has_completed(),
            )
        } else {
            filtered
        };
        self.loader.reset(listed);
    }

    /// Hands out the next page and queues thumbnails for its files.
    pub fn next_batch(&mut self) -> Vec<CatalogEntry> {
        let batch = self.loader.next_batch();
        if batch.is_empty() {
            return batch;
        }
        for entry in &batch {
            self.view.insert(
                entry.path.clone(),
                ViewItem {
                    kind: entry.kind,
                    thumbnail: ThumbnailState::Pending,
                },
            );
        }
        let jobs = batch_loader::thumbnail_jobs(&batch, self.config.thumbnail_size);
        if !jobs.is_empty() {
            self.pipeline.submit(jobs, &self.folder_token);
        }
        self.observer.on_batch_available(&batch);
        batch
    }

    /// Loads the next page when the viewport has scrolled far enough.
    pub fn on_scroll(&mut self, scroll_fraction: f32) -> Option<Vec<CatalogEntry>> {
        if self.loader.is_exhausted()
            || !batch_loader::should_load_more(scroll_fraction, self.config.load_more_threshold)
        {
            return None;
        }
        Some(self.next_batch())
    }

    /// Periodic step: applies finished thumbnails and similarity events.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        for result in self.pipeline.drain(self.config.drain_max_items) {
            let Some(item) = self.view.get_mut(&result.entry_path) else {
                continue;
            };
            item.thumbnail = if result.failed {
                ThumbnailState::Failed
            } else if result.bitmap.is_some() {
                ThumbnailState::Ready
            } else {
                ThumbnailState::Placeholder
            };
            report.thumbnails_applied += 1;
            self.observer
                .on_thumbnail_ready(&result.entry_path, result.bitmap.as_ref(), result.failed);
        }

        let events = self.similarity.poll();
        let completed = events.iter().any(|event| {
            matches!(
                event,
                SimilarityEvent::Finished(SimilarityOutcome::Completed { .. })
            )
        });
        if completed {
            // Paths deleted while the scan ran must not come back into a group.
            let live: HashSet<&Path> = self
                .catalog
                .iter()
                .map(|entry| entry.path.as_path())
                .collect();
            self.similarity.retain_paths(|path| live.contains(path));
        }

        for event in events {
            match event {
                SimilarityEvent::Progress(text) => self.observer.on_similarity_progress(&text),
                SimilarityEvent::Finished(SimilarityOutcome::Completed { mut hashes, .. }) => {
                    let groups = self.similarity.groups().to_vec();
                    hashes.retain(|path, _| self.similarity.hash_of(path).is_some());
                    self.observer.on_similarity_progress(&format!(
                        "Found {} groups of similar images.",
                        groups.len()
                    ));
                    self.observer.on_similarity_complete(&groups);
                    if self.filters.only_similar {
                        self.view.clear();
                        self.rebuild_view_list();
                        self.next_batch();
                    }
                    report.similarity = Some(SimilarityOutcome::Completed { groups, hashes });
                }
                SimilarityEvent::Finished(SimilarityOutcome::Cancelled) => {
                    report.similarity = Some(SimilarityOutcome::Cancelled);
                }
            }
        }
        report
    }

    /// Starts a similarity scan over the images of the current folder.
    /// Returns `false` when one is already running.
    pub fn find_similar(&mut self) -> Result<bool> {
        let images: Vec<PathBuf> = self
            .catalog
            .iter()
            .filter(|entry| entry.kind == MediaKind::Image)
            .map(|entry| entry.path.clone())
            .collect();
        match self
            .similarity
            .start(images, self.config.similarity_threshold)
        {
            Ok(()) => Ok(true),
            Err(CatalogError::Busy(what)) => {
                log::info!("{} already in progress; ignoring request", what);
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }

    pub fn cancel_similarity(&self) {
        self.similarity.cancel();
    }

    /// Moves `paths` to the trash and drops them from every in-memory view,
    /// even when the physical move failed.
    pub fn delete_paths(&mut self, paths: &[PathBuf]) -> DeleteSummary {
        let summary = self
            .manager
            .delete_batch(paths.iter().map(PathBuf::as_path));

        let removed: HashSet<&Path> = summary.processed.iter().map(PathBuf::as_path).collect();
        self.catalog.retain(|entry| !removed.contains(entry.path.as_path()));
        for path in &removed {
            self.loader.remove(path);
            self.view.remove(*path);
            self.pipeline.forget(path);
        }
        self.similarity.prune_paths(removed.iter().copied());

        self.observer.on_delete_complete(summary.moved);
        summary
    }

    /// Restores the most recent deletion and re-scans the current folder.
    ///
    /// A failed re-scan is logged; the summary of the restore is still returned
    /// since the files are already back in place.
    pub fn undo(&mut self) -> Option<UndoSummary> {
        let summary = self.manager.undo()?;
        self.observer.on_undo_complete(summary.restored);
        if let Err(error) = self.refresh() {
            log::warn!("Re-scan after undo failed: {}", error);
        }
        Some(summary)
    }

    /// Rendered items whose thumbnail failed and whose file is still on disk.
    pub fn errored_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .view
            .iter()
            .filter(|(path, item)| item.thumbnail == ThumbnailState::Failed && path.exists())
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort();
        paths
    }

    pub fn delete_errored(&mut self) -> DeleteSummary {
        let errored = self.errored_paths();
        self.delete_paths(&errored)
    }

    /// Moves errored items into `destination`. Existing names are skipped and
    /// the first failure stops the run.
    pub fn move_errored(&mut self, destination: &Path) -> Result<OperationSummary> {
        if !destination.is_dir() {
            return Err(CatalogError::access(
                destination,
                std::io::Error::new(std::io::ErrorKind::NotFound, "destination is not a folder"),
            ));
        }

        let errored = self.errored_paths();
        let mut summary = OperationSummary {
            total: errored.len(),
            ..OperationSummary::default()
        };
        for path in &errored {
            let Some(name) = path.file_name() else {
                summary.skipped += 1;
                continue;
            };
            let target = destination.join(name);
            if target.exists() {
                summary.skipped += 1;
                continue;
            }
            if let Err(error) = fs_ops::move_file_with_fallback(path, &target) {
                log::warn!("Stopping errored-item move: {}", error);
                summary.failed += 1;
                break;
            }
            summary.succeeded += 1;
        }

        if summary.succeeded > 0 {
            self.refresh()?;
        }
        Ok(summary)
    }

    /// Deletes all but the first half (rounded up) of every similarity group.
    /// `None` until a scan has completed for this folder.
    pub fn auto_delete_similar_half(&mut self) -> Option<DeleteSummary> {
        if !self.similarity.has_completed() {
            return None;
        }
        let plan = self.similarity.pruning_plan();
        if plan.is_empty() {
            return Some(DeleteSummary::default());
        }
        let summary = self.delete_paths(&plan);
        if self.filters.only_similar {
            self.view.clear();
            self.rebuild_view_list();
            self.next_batch();
        }
        Some(summary)
    }

    /// Cancels background work, persists folder customisations, and empties
    /// the trash for good.
    pub fn shutdown(&mut self) -> PurgeReport {
        self.similarity.cancel();
        self.pipeline.cancel_all();
        self.folder_token.cancel();
        if let Err(error) = self.folder_store.save() {
            log::error!("Failed to save folder store: {}", error);
        }
        let report = self.manager.purge_all();
        if report.failed > 0 {
            log::warn!(
                "Could not delete {} items from trash {}",
                report.failed,
                self.manager.trash().dir().display()
            );
        }
        report
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn current_folder(&self) -> Option<&Path> {
        self.current_folder.as_deref()
    }

    /// Every entry of the current folder, unfiltered.
    pub fn catalog(&self) -> &[CatalogEntry] {
        &self.catalog
    }

    /// The filtered, possibly reordered list the pages are cut from.
    pub fn listing(&self) -> &[CatalogEntry] {
        self.loader.entries()
    }

    pub fn filters(&self) -> ScanFilters {
        self.filters
    }

    pub fn view_item(&self, path: &Path) -> Option<ViewItem> {
        self.view.get(path).copied()
    }

    pub fn rendered_count(&self) -> usize {
        self.view.len()
    }

    pub fn has_more(&self) -> bool {
        !self.loader.is_exhausted()
    }

    pub fn similarity(&self) -> &SimilarityEngine {
        &self.similarity
    }

    pub fn is_finding_similar(&self) -> bool {
        self.similarity.is_running()
    }

    pub fn can_undo(&self) -> bool {
        self.manager.can_undo()
    }

    pub fn thumbnails_idle(&self) -> bool {
        self.pipeline.is_idle()
    }

    pub fn folder_store(&self) -> &FolderStore {
        &self.folder_store
    }

    pub fn folder_store_mut(&mut self) -> &mut FolderStore {
        &mut self.folder_store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::fs;
    use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

    #[derive(Default)]
    struct Recorder {
        batches: Vec<usize>,
        thumbnails: Vec<(PathBuf, bool)>,
        progress: Vec<String>,
        completed_groups: Option<usize>,
        deleted: Vec<usize>,
        restored: Vec<usize>,
    }

    impl CatalogObserver for Recorder {
        fn on_thumbnail_ready(
            &mut self,
            path: &Path,
            _bitmap: Option<&DynamicImage>,
            failed: bool,
        ) {
            self.thumbnails.push((path.to_path_buf(), failed));
        }
        fn on_similarity_progress(&mut self, text: &str) {
            self.progress.push(text.to_string());
        }
        fn on_similarity_complete(&mut self, groups: &[SimilarityGroup]) {
            self.completed_groups = Some(groups.len());
        }
        fn on_batch_available(&mut self, entries: &[CatalogEntry]) {
            self.batches.push(entries.len());
        }
        fn on_delete_complete(&mut self, count: usize) {
            self.deleted.push(count);
        }
        fn on_undo_complete(&mut self, restored: usize) {
            self.restored.push(restored);
        }
    }

    fn temp_dir(label: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "picsnest_engine_test_{}_{}_{}",
            label,
            std::process::id(),
            stamp
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn engine_in(dir: &Path) -> CatalogEngine<Recorder> {
        engine_with_hasher(dir, Arc::new(DHash))
    }

    fn engine_with_hasher(
        dir: &Path,
        hasher: Arc<dyn PerceptualHasher>,
    ) -> CatalogEngine<Recorder> {
        let config = EngineConfig {
            trash_dir: dir.join("trash"),
            folder_store_path: dir.join("folder_thumbs.json"),
            ..EngineConfig::default()
        };
        CatalogEngine::with_capabilities(config, Recorder::default(), hasher, None).unwrap()
    }

    fn solid(path: &Path, color: [u8; 3]) {
        RgbImage::from_pixel(32, 32, Rgb(color)).save(path).unwrap();
    }

    fn gradient(path: &Path, reversed: bool) {
        RgbImage::from_fn(64, 64, |x, _| {
            let value = if reversed { 255 - x * 4 } else { x * 4 } as u8;
            Rgb([value, value, value])
        })
        .save(path)
        .unwrap();
    }

    fn tick_until(
        engine: &mut CatalogEngine<Recorder>,
        done: impl Fn(&CatalogEngine<Recorder>) -> bool,
    ) {
        let deadline = Instant::now() + Duration::from_secs(20);
        while !done(&*engine) && Instant::now() < deadline {
            engine.tick();
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn wait_for_similarity(engine: &mut CatalogEngine<Recorder>) -> SimilarityOutcome {
        let deadline = Instant::now() + Duration::from_secs(20);
        while Instant::now() < deadline {
            if let Some(outcome) = engine.tick().similarity {
                while engine.is_finding_similar() {
                    std::thread::sleep(Duration::from_millis(1));
                }
                return outcome;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("similarity scan did not finish");
    }

    #[test]
    fn test_load_folder_pages_and_applies_thumbnails() {
        let dir = temp_dir("load");
        let media = dir.join("media");
        fs::create_dir_all(media.join("album")).unwrap();
        for idx in 0..25 {
            solid(&media.join(format!("img_{:02}.png", idx)), [idx as u8, 0, 0]);
        }
        fs::write(media.join("broken.png"), b"garbage").unwrap();

        let mut engine = engine_in(&dir);
        let listed = engine.load_folder(&media).unwrap();
        assert_eq!(listed, 27);
        assert_eq!(engine.observer().batches, vec![20]);
        assert!(engine.on_scroll(0.2).is_none());
        assert_eq!(engine.on_scroll(0.9).map(|batch| batch.len()), Some(7));
        assert!(!engine.has_more());

        tick_until(&mut engine, |engine| engine.observer().thumbnails.len() >= 26);
        assert_eq!(engine.observer().thumbnails.len(), 26);
        assert_eq!(
            engine.view_item(&media.join("img_00.png")).unwrap().thumbnail,
            ThumbnailState::Ready
        );
        assert_eq!(engine.view_item(&media.join("album")).unwrap().kind, MediaKind::Folder);
        assert_eq!(engine.errored_paths(), vec![media.join("broken.png")]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_missing_folder_keeps_previous_catalog() {
        let dir = temp_dir("access");
        let media = dir.join("media");
        fs::create_dir_all(&media).unwrap();
        solid(&media.join("a.png"), [1, 2, 3]);

        let mut engine = engine_in(&dir);
        engine.load_folder(&media).unwrap();
        let error = engine.load_folder(&dir.join("nope")).expect_err("missing");
        assert!(error.is_access());
        assert_eq!(engine.current_folder(), Some(media.as_path()));
        assert_eq!(engine.catalog().len(), 1);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_delete_then_undo_round_trip_through_engine() {
        let dir = temp_dir("undo");
        let media = dir.join("media");
        fs::create_dir_all(&media).unwrap();
        let keep = media.join("keep.png");
        let doomed = media.join("doomed.png");
        solid(&keep, [0, 0, 0]);
        solid(&doomed, [255, 255, 255]);
        let original_bytes = fs::read(&doomed).unwrap();

        let mut engine = engine_in(&dir);
        engine.load_folder(&media).unwrap();
        let summary = engine.delete_paths(&[doomed.clone(), media.join("ghost.png")]);
        assert_eq!(summary.moved, 1);
        assert_eq!(summary.missing, 1);
        assert!(!doomed.exists());
        assert_eq!(engine.catalog().len(), 1);
        assert!(engine.view_item(&doomed).is_none());
        assert_eq!(engine.observer().deleted, vec![1]);

        let undo = engine.undo().expect("undo entry");
        assert_eq!(undo.restored, 1);
        assert_eq!(fs::read(&doomed).unwrap(), original_bytes);
        let paths: Vec<&Path> = engine.catalog().iter().map(|e| e.path.as_path()).collect();
        assert_eq!(paths, vec![doomed.as_path(), keep.as_path()]);
        assert_eq!(engine.observer().restored, vec![1]);
        assert!(engine.undo().is_none());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_similarity_groups_feed_similar_view_and_auto_delete() {
        let dir = temp_dir("similar");
        let media = dir.join("media");
        fs::create_dir_all(media.join("sub")).unwrap();
        gradient(&media.join("a_grad.png"), false);
        gradient(&media.join("b_grad.png"), false);
        gradient(&media.join("c_grad.png"), false);
        gradient(&media.join("z_reverse.png"), true);

        let mut engine = engine_in(&dir);
        engine.load_folder(&media).unwrap();
        assert!(engine.auto_delete_similar_half().is_none());

        engine
            .set_filters(ScanFilters {
                only_similar: true,
                ..ScanFilters::default()
            })
            .unwrap();
        assert_eq!(engine.listing().len(), 1);

        let outcome = wait_for_similarity(&mut engine);
        assert!(!outcome.is_cancelled());
        assert_eq!(engine.observer().completed_groups, Some(1));
        let names: Vec<&str> = engine
            .listing()
            .iter()
            .map(|entry| entry.display_name.as_str())
            .collect();
        assert_eq!(names, vec!["sub", "a_grad.png", "b_grad.png", "c_grad.png"]);

        let summary = engine.auto_delete_similar_half().expect("scan completed");
        assert_eq!(summary.moved, 1);
        assert!(!media.join("c_grad.png").exists());
        assert!(media.join("b_grad.png").exists());
        assert_eq!(engine.similarity().groups().len(), 1);
        assert_eq!(engine.similarity().groups()[0].len(), 2);

        fs::remove_dir_all(&dir).ok();
    }

    struct SlowHasher;

    impl PerceptualHasher for SlowHasher {
        fn hash_image(&self, _path: &Path) -> Result<u64> {
            std::thread::sleep(Duration::from_millis(20));
            Ok(0)
        }
    }

    #[test]
    fn test_second_similarity_request_while_running_is_a_noop() {
        let dir = temp_dir("single_flight");
        let media = dir.join("media");
        fs::create_dir_all(&media).unwrap();
        for idx in 0..15 {
            fs::write(media.join(format!("g_{:02}.png", idx)), b"x").unwrap();
        }
        let mut engine = engine_with_hasher(&dir, Arc::new(SlowHasher));
        engine.load_folder(&media).unwrap();

        assert!(engine.find_similar().unwrap());
        assert!(!engine.find_similar().unwrap());
        let outcome = wait_for_similarity(&mut engine);
        assert!(!outcome.is_cancelled());
        assert_eq!(engine.similarity().groups().len(), 1);
        assert!(engine
            .observer()
            .progress
            .iter()
            .any(|line| line == "Hashing 15/15"));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_delete_during_scan_keeps_last_copy_out_of_auto_delete() {
        let dir = temp_dir("delete_during_scan");
        let media = dir.join("media");
        fs::create_dir_all(&media).unwrap();
        let first = media.join("a.png");
        let second = media.join("b.png");
        fs::write(&first, b"x").unwrap();
        fs::write(&second, b"x").unwrap();

        let mut engine = engine_with_hasher(&dir, Arc::new(SlowHasher));
        engine.load_folder(&media).unwrap();
        assert!(engine.find_similar().unwrap());
        let deleted = engine.delete_paths(&[first.clone()]);
        assert_eq!(deleted.moved, 1);

        let outcome = wait_for_similarity(&mut engine);
        match outcome {
            SimilarityOutcome::Completed { groups, hashes } => {
                assert!(groups.is_empty());
                assert!(!hashes.contains_key(&first));
            }
            SimilarityOutcome::Cancelled => panic!("scan was not cancelled"),
        }
        assert!(engine.similarity().groups().is_empty());
        assert_eq!(engine.observer().completed_groups, Some(0));

        let summary = engine.auto_delete_similar_half().expect("scan completed");
        assert_eq!(summary.requested, 0);
        assert!(second.exists());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_undo_reports_restore_even_when_rescan_fails() {
        let dir = temp_dir("undo_rescan");
        let media = dir.join("media");
        let elsewhere = dir.join("elsewhere");
        fs::create_dir_all(&media).unwrap();
        fs::create_dir_all(&elsewhere).unwrap();
        let outside = elsewhere.join("kept.png");
        fs::write(&outside, b"bytes").unwrap();

        let mut engine = engine_in(&dir);
        engine.load_folder(&media).unwrap();
        assert_eq!(engine.delete_paths(&[outside.clone()]).moved, 1);
        fs::remove_dir_all(&media).unwrap();

        let summary = engine.undo().expect("undo entry");
        assert_eq!(summary.restored, 1);
        assert_eq!(fs::read(&outside).unwrap(), b"bytes");
        assert_eq!(engine.observer().restored, vec![1]);
        assert_eq!(engine.current_folder(), Some(media.as_path()));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_move_errored_skips_existing_and_shutdown_purges_trash() {
        let dir = temp_dir("errored");
        let media = dir.join("media");
        let quarantine = dir.join("quarantine");
        fs::create_dir_all(&media).unwrap();
        fs::create_dir_all(&quarantine).unwrap();
        fs::write(media.join("bad_one.jpg"), b"nope").unwrap();
        fs::write(media.join("bad_two.jpg"), b"nope").unwrap();
        fs::write(quarantine.join("bad_two.jpg"), b"taken").unwrap();
        solid(&media.join("fine.png"), [9, 9, 9]);

        let mut engine = engine_in(&dir);
        engine.load_folder(&media).unwrap();
        tick_until(&mut engine, |engine| engine.observer().thumbnails.len() >= 3);
        assert_eq!(engine.errored_paths().len(), 2);

        let summary = engine.move_errored(&quarantine).unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped, 1);
        assert!(quarantine.join("bad_one.jpg").exists());
        assert!(engine.move_errored(&dir.join("missing")).is_err());

        engine.delete_paths(&[media.join("fine.png")]);
        assert_eq!(fs::read_dir(dir.join("trash")).unwrap().count(), 1);
        engine
            .folder_store_mut()
            .set_color(&media, "#101010")
            .unwrap();
        let report = engine.shutdown();
        assert_eq!(report.purged, 1);
        assert_eq!(fs::read_dir(dir.join("trash")).unwrap().count(), 0);
        assert!(FolderStore::load(dir.join("folder_thumbs.json"))
            .get(&media)
            .is_some());

        fs::remove_dir_all(&dir).ok();
    }
}
