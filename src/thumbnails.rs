use crate::cancel::CancelToken;
use crate::error::{CatalogError, Result};
use crate::image_decode;
use crate::media::MediaKind;
use crate::video::FrameExtractor;
use crate::StorageProfile;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Instant, UNIX_EPOCH};

const THUMB_EXTENSION: &str = "jpg";
const THUMB_FILTER: FilterType = FilterType::Lanczos3;
const THUMB_JPEG_QUALITY_DEFAULT: u8 = 90;
const THUMB_CACHE_VERSION: &str = "picsnest-thumb-v1";
const HDD_FRIENDLY_IO_THREADS: usize = 4;
const SSD_FRIENDLY_IO_THREADS: usize = 12;

fn io_threads(profile: StorageProfile) -> usize {
    if let Ok(raw) = std::env::var("PICSNEST_IO_THREADS") {
        if let Ok(parsed) = raw.parse::<usize>() {
            return parsed.clamp(1, 32);
        }
    }

    let cpu_count = std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(4);
    match profile {
        StorageProfile::Hdd => cpu_count.clamp(2, HDD_FRIENDLY_IO_THREADS),
        StorageProfile::Ssd => cpu_count.clamp(4, SSD_FRIENDLY_IO_THREADS),
    }
}

fn build_io_pool(profile: StorageProfile) -> Result<rayon::ThreadPool> {
    let threads = io_threads(profile);
    let profile_name = profile.label();
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |idx| format!("thumb-io-{}-{}", profile_name, idx))
        .build()
        .map_err(|error| {
            CatalogError::Config(format!("failed to create thumbnail IO threadpool: {}", error))
        })
}

fn thumb_jpeg_quality() -> u8 {
    static QUALITY: OnceLock<u8> = OnceLock::new();
    *QUALITY.get_or_init(|| {
        std::env::var("PICSNEST_THUMB_JPEG_QUALITY")
            .ok()
            .and_then(|raw| raw.parse::<u8>().ok())
            .map(|quality| quality.clamp(40, 95))
            .unwrap_or(THUMB_JPEG_QUALITY_DEFAULT)
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailJob {
    pub entry_path: PathBuf,
    pub kind: MediaKind,
    pub desired_size: u32,
}

impl ThumbnailJob {
    pub fn new(entry_path: impl Into<PathBuf>, kind: MediaKind, desired_size: u32) -> Self {
        Self {
            entry_path: entry_path.into(),
            kind,
            desired_size,
        }
    }
}

/// Outcome for one job. `bitmap == None && !failed` is the video placeholder.
#[derive(Debug, Clone)]
pub struct ThumbnailResult {
    pub entry_path: PathBuf,
    pub bitmap: Option<DynamicImage>,
    pub failed: bool,
}

impl ThumbnailResult {
    fn ready(entry_path: PathBuf, bitmap: DynamicImage) -> Self {
        Self {
            entry_path,
            bitmap: Some(bitmap),
            failed: false,
        }
    }

    fn placeholder(entry_path: PathBuf) -> Self {
        Self {
            entry_path,
            bitmap: None,
            failed: false,
        }
    }

    fn failed(entry_path: PathBuf) -> Self {
        Self {
            entry_path,
            bitmap: None,
            failed: true,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.bitmap.is_none() && !self.failed
    }
}

/// Tagged with the generation that dispatched it so results from a cancelled
/// folder never reach the consumer.
struct Delivery {
    generation: u64,
    result: ThumbnailResult,
}

/// Shared read-only state handed to each worker.
struct Renderer {
    cache_dir: Option<PathBuf>,
    frame_extractor: Option<Arc<dyn FrameExtractor>>,
}

impl Renderer {
    fn render(&self, job: &ThumbnailJob) -> ThumbnailResult {
        let path = job.entry_path.clone();
        let cache_path = self
            .cache_dir
            .as_deref()
            .and_then(|dir| cache_path_for(&job.entry_path, job.desired_size, dir));

        if let Some(cached) = cache_path.as_deref().filter(|path| path.exists()) {
            match image::open(cached) {
                Ok(bitmap) => return ThumbnailResult::ready(path, bitmap),
                Err(error) => {
                    log::debug!("Ignoring unreadable cache file {}: {}", cached.display(), error)
                }
            }
        }

        let decoded = match job.kind {
            MediaKind::Image => image_decode::open_image(&job.entry_path),
            MediaKind::Video => match &self.frame_extractor {
                Some(extractor) => extractor.extract_frame(&job.entry_path),
                None => return ThumbnailResult::placeholder(path),
            },
            MediaKind::Folder | MediaKind::Other => return ThumbnailResult::placeholder(path),
        };

        match decoded {
            Ok(image) => {
                let thumbnail = fit_thumbnail(image, job.desired_size);
                if let Some(cache_path) = cache_path {
                    if let Err(error) = encode_jpeg_thumbnail(&thumbnail, &cache_path) {
                        log::warn!(
                            "Failed to cache thumbnail {}: {}",
                            cache_path.display(),
                            error
                        );
                    }
                }
                ThumbnailResult::ready(path, thumbnail)
            }
            Err(error) => {
                log::warn!("Thumbnail generation failed: {}", error);
                ThumbnailResult::failed(path)
            }
        }
    }
}

/// Normalises colour and shrinks the image to fit inside a `size` box.
pub fn fit_thumbnail(image: DynamicImage, size: u32) -> DynamicImage {
    let normalized = image_decode::normalize_color(image);
    if normalized.width() <= size && normalized.height() <= size {
        return normalized;
    }
    normalized.resize(size, size, THUMB_FILTER)
}

fn encode_jpeg_thumbnail(thumbnail: &DynamicImage, out_path: &Path) -> Result<()> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let rgb = thumbnail.to_rgb8();
    let file = File::create(out_path)?;
    let writer = BufWriter::with_capacity(64 * 1024, file);
    let mut encoder = JpegEncoder::new_with_quality(writer, thumb_jpeg_quality());
    encoder.encode(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(())
}

/// Cache file for `source`, keyed by path, box size, byte size and mtime so an
/// edited file never hits a stale entry. `None` when the source has no metadata.
pub fn cache_path_for(source: &Path, size: u32, cache_dir: &Path) -> Option<PathBuf> {
    let metadata = std::fs::metadata(source).ok()?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_nanos())
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(THUMB_CACHE_VERSION.as_bytes());
    hasher.update(source.to_string_lossy().as_bytes());
    hasher.update(size.to_le_bytes());
    hasher.update(metadata.len().to_le_bytes());
    hasher.update(mtime.to_le_bytes());
    let digest = hasher.finalize();
    Some(cache_dir.join(format!("{}.{}", hex_encode(&digest[..16]), THUMB_EXTENSION)))
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push(HEX[(byte >> 4) as usize] as char);
        output.push(HEX[(byte & 0x0f) as usize] as char);
    }
    output
}

/// Background thumbnail generation with a polled result queue.
///
/// Each [`submit`](Self::submit) call becomes one task on the I/O pool that
/// walks its jobs in order. Results are collected by [`drain`](Self::drain) on
/// the control thread; a path is never in flight twice.
pub struct ThumbnailPipeline {
    pool: rayon::ThreadPool,
    renderer: Arc<Renderer>,
    sender: Sender<Delivery>,
    receiver: Receiver<Delivery>,
    generation: u64,
    batch_tokens: Vec<CancelToken>,
    in_flight: HashSet<PathBuf>,
}

impl ThumbnailPipeline {
    pub fn new(
        profile: StorageProfile,
        cache_dir: Option<PathBuf>,
        frame_extractor: Option<Arc<dyn FrameExtractor>>,
    ) -> Result<Self> {
        if let Some(dir) = &cache_dir {
            std::fs::create_dir_all(dir).map_err(|error| {
                log::error!(
                    "Failed to create thumbnail cache dir {}: {}",
                    dir.display(),
                    error
                );
                CatalogError::Io(error)
            })?;
        }
        let (sender, receiver) = unbounded();
        Ok(Self {
            pool: build_io_pool(profile)?,
            renderer: Arc::new(Renderer {
                cache_dir,
                frame_extractor,
            }),
            sender,
            receiver,
            generation: 0,
            batch_tokens: Vec::new(),
            in_flight: HashSet::new(),
        })
    }

    /// Dispatches one batch. Jobs whose path is already in flight are dropped.
    /// Returns the number of jobs actually queued.
    pub fn submit(&mut self, jobs: Vec<ThumbnailJob>, cancel: &CancelToken) -> usize {
        let jobs: Vec<ThumbnailJob> = jobs
            .into_iter()
            .filter(|job| self.in_flight.insert(job.entry_path.clone()))
            .collect();
        if jobs.is_empty() {
            return 0;
        }

        let queued = jobs.len();
        let token = cancel.clone();
        self.batch_tokens.retain(|existing| !existing.is_cancelled());
        self.batch_tokens.push(token.clone());

        let renderer = Arc::clone(&self.renderer);
        let sender = self.sender.clone();
        let generation = self.generation;
        self.pool.spawn(move || {
            let started = Instant::now();
            let mut done = 0usize;
            let mut failed = 0usize;
            for job in &jobs {
                if token.is_cancelled() {
                    log::debug!(
                        "Thumbnail batch cancelled after {}/{} jobs",
                        done,
                        jobs.len()
                    );
                    return;
                }
                let result = renderer.render(job);
                failed += usize::from(result.failed);
                done += 1;
                if sender.send(Delivery { generation, result }).is_err() {
                    return;
                }
            }
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            let rate = if elapsed_ms > 0.0 {
                done as f64 / (elapsed_ms / 1000.0)
            } else {
                done as f64
            };
            log::info!(
                "Thumbnail batch complete: {} items, {} failed ({:.1} ms, {:.1} items/s)",
                done,
                failed,
                elapsed_ms,
                rate
            );
        });
        queued
    }

    /// Returns up to `max_items` completed results, discarding stale deliveries.
    pub fn drain(&mut self, max_items: usize) -> Vec<ThumbnailResult> {
        let mut results = Vec::new();
        while results.len() < max_items {
            match self.receiver.try_recv() {
                Ok(delivery) => {
                    if delivery.generation != self.generation {
                        continue;
                    }
                    self.in_flight.remove(&delivery.result.entry_path);
                    results.push(delivery.result);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        results
    }

    /// Cancels every outstanding batch and empties the result queue.
    pub fn cancel_all(&mut self) {
        for token in self.batch_tokens.drain(..) {
            token.cancel();
        }
        self.generation = self.generation.wrapping_add(1);
        let flushed = self.receiver.try_iter().count();
        if flushed > 0 {
            log::debug!("Discarded {} pending thumbnail results", flushed);
        }
        self.in_flight.clear();
    }

    /// Forgets a path so it may be queued again (e.g. after deletion).
    pub fn forget(&mut self, path: &Path) {
        self.in_flight.remove(path);
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::fs;
    use std::time::{Duration, SystemTime};

    fn temp_dir(label: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "picsnest_thumbnails_test_{}_{}_{}",
            label,
            std::process::id(),
            stamp
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn drain_until(
        pipeline: &mut ThumbnailPipeline,
        expected: usize,
    ) -> Vec<ThumbnailResult> {
        let deadline = Instant::now() + Duration::from_secs(20);
        let mut results = Vec::new();
        while results.len() < expected && Instant::now() < deadline {
            results.extend(pipeline.drain(10));
            std::thread::sleep(Duration::from_millis(10));
        }
        results
    }

    struct FixedFrame;

    impl FrameExtractor for FixedFrame {
        fn extract_frame(&self, _path: &Path) -> Result<DynamicImage> {
            Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
                400,
                200,
                Rgb([1, 2, 3]),
            )))
        }
    }

    #[test]
    fn test_images_are_fitted_into_the_box_and_failures_are_flagged() {
        let dir = temp_dir("fit");
        let wide = dir.join("wide.png");
        RgbImage::from_pixel(600, 300, Rgb([200, 10, 10])).save(&wide).unwrap();
        let broken = dir.join("broken.jpg");
        fs::write(&broken, b"not a jpeg").unwrap();

        let mut pipeline = ThumbnailPipeline::new(StorageProfile::Hdd, None, None).unwrap();
        let token = CancelToken::new();
        let queued = pipeline.submit(
            vec![
                ThumbnailJob::new(&wide, MediaKind::Image, 120),
                ThumbnailJob::new(&broken, MediaKind::Image, 120),
            ],
            &token,
        );
        assert_eq!(queued, 2);

        let results = drain_until(&mut pipeline, 2);
        assert_eq!(results.len(), 2);
        let ok = results.iter().find(|r| r.entry_path == wide).unwrap();
        let bitmap = ok.bitmap.as_ref().expect("wide image decoded");
        assert_eq!((bitmap.width(), bitmap.height()), (120, 60));
        let bad = results.iter().find(|r| r.entry_path == broken).unwrap();
        assert!(bad.failed);
        assert!(pipeline.is_idle());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_duplicate_paths_are_not_queued_twice() {
        let dir = temp_dir("dedup");
        let path = dir.join("a.png");
        RgbImage::new(4, 4).save(&path).unwrap();

        let mut pipeline = ThumbnailPipeline::new(StorageProfile::Hdd, None, None).unwrap();
        let token = CancelToken::new();
        let job = ThumbnailJob::new(&path, MediaKind::Image, 120);
        assert_eq!(pipeline.submit(vec![job.clone(), job.clone()], &token), 1);
        assert_eq!(pipeline.submit(vec![job.clone()], &token), 0);

        let results = drain_until(&mut pipeline, 1);
        assert_eq!(results.len(), 1);
        // Once consumed the path may be requested again.
        assert_eq!(pipeline.submit(vec![job], &token), 1);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_videos_without_extractor_get_placeholder() {
        let dir = temp_dir("video");
        let clip = dir.join("clip.mp4");
        fs::write(&clip, b"fake").unwrap();

        let mut pipeline = ThumbnailPipeline::new(StorageProfile::Hdd, None, None).unwrap();
        pipeline.submit(
            vec![ThumbnailJob::new(&clip, MediaKind::Video, 120)],
            &CancelToken::new(),
        );
        let results = drain_until(&mut pipeline, 1);
        assert!(results[0].is_placeholder());

        let extractor: Arc<dyn FrameExtractor> = Arc::new(FixedFrame);
        let mut with_frames =
            ThumbnailPipeline::new(StorageProfile::Hdd, None, Some(extractor)).unwrap();
        with_frames.submit(
            vec![ThumbnailJob::new(&clip, MediaKind::Video, 100)],
            &CancelToken::new(),
        );
        let results = drain_until(&mut with_frames, 1);
        let frame = results[0].bitmap.as_ref().expect("frame thumbnail");
        assert_eq!((frame.width(), frame.height()), (100, 50));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_cancel_all_discards_queued_results() {
        let dir = temp_dir("cancel");
        let mut jobs = Vec::new();
        for idx in 0..5 {
            let path = dir.join(format!("img_{}.png", idx));
            RgbImage::new(8, 8).save(&path).unwrap();
            jobs.push(ThumbnailJob::new(path, MediaKind::Image, 120));
        }

        let mut pipeline = ThumbnailPipeline::new(StorageProfile::Hdd, None, None).unwrap();
        let token = CancelToken::new();
        pipeline.submit(jobs, &token);
        pipeline.cancel_all();
        assert!(token.is_cancelled());
        assert_eq!(pipeline.in_flight_count(), 0);

        std::thread::sleep(Duration::from_millis(200));
        assert!(pipeline.drain(100).is_empty());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_disk_cache_is_written_and_keyed_by_content_metadata() {
        let dir = temp_dir("cache");
        let cache = dir.join("cache");
        let source = dir.join("photo.png");
        RgbImage::from_pixel(300, 300, Rgb([0, 128, 255])).save(&source).unwrap();

        let mut pipeline =
            ThumbnailPipeline::new(StorageProfile::Ssd, Some(cache.clone()), None).unwrap();
        pipeline.submit(
            vec![ThumbnailJob::new(&source, MediaKind::Image, 64)],
            &CancelToken::new(),
        );
        let results = drain_until(&mut pipeline, 1);
        assert!(!results[0].failed);

        let cached = cache_path_for(&source, 64, &cache).unwrap();
        assert!(cached.exists());
        assert_ne!(cached, cache_path_for(&source, 120, &cache).unwrap());
        assert!(cache_path_for(&dir.join("missing.png"), 64, &cache).is_none());

        fs::remove_dir_all(&dir).ok();
    }
}
