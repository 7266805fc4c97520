//! Near-duplicate detection: perceptual hashing plus transitive clustering.

use crate::cancel::CancelToken;
use crate::error::{CatalogError, Result};
use crate::image_decode;
use crossbeam_channel::{unbounded, Receiver, TryRecvError};
use image::imageops::FilterType;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

const PROGRESS_EVERY: usize = 10;
const DHASH_SIZE: u32 = 8;

/// Members of one cluster, kept sorted by path.
pub type SimilarityGroup = BTreeSet<PathBuf>;

pub trait PerceptualHasher: Send + Sync {
    fn hash_image(&self, path: &Path) -> Result<u64>;
}

pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Difference hash: 9x8 grayscale, one bit per horizontally adjacent pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct DHash;

impl DHash {
    pub fn hash_dynamic(image: &image::DynamicImage) -> u64 {
        let small = image
            .grayscale()
            .resize_exact(DHASH_SIZE + 1, DHASH_SIZE, FilterType::Lanczos3)
            .to_luma8();
        let mut hash = 0u64;
        for y in 0..DHASH_SIZE {
            for x in 0..DHASH_SIZE {
                let left = small.get_pixel(x, y)[0];
                let right = small.get_pixel(x + 1, y)[0];
                hash = (hash << 1) | u64::from(right > left);
            }
        }
        hash
    }
}

impl PerceptualHasher for DHash {
    fn hash_image(&self, path: &Path) -> Result<u64> {
        let image = image_decode::open_image(path)?;
        Ok(Self::hash_dynamic(&image))
    }
}

/// Disjoint-set forest over arbitrary keys with path compression.
#[derive(Debug, Clone)]
pub struct DisjointSet<K> {
    parent: HashMap<K, K>,
}

impl<K: Eq + Hash + Clone> DisjointSet<K> {
    pub fn new(keys: impl IntoIterator<Item = K>) -> Self {
        Self {
            parent: keys.into_iter().map(|key| (key.clone(), key)).collect(),
        }
    }

    /// Representative of `key`'s set. Unknown keys are their own root.
    pub fn find(&mut self, key: &K) -> K {
        let mut root = key.clone();
        while let Some(next) = self.parent.get(&root) {
            if *next == root {
                break;
            }
            root = next.clone();
        }

        let mut current = key.clone();
        while current != root {
            match self.parent.insert(current.clone(), root.clone()) {
                Some(next) => current = next,
                None => break,
            }
        }
        root
    }

    pub fn union(&mut self, a: &K, b: &K) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a != root_b {
            self.parent.insert(root_b, root_a);
        }
    }

    /// Partitions every key into its set.
    pub fn into_sets(mut self) -> Vec<Vec<K>> {
        let keys: Vec<K> = self.parent.keys().cloned().collect();
        let mut sets: HashMap<K, Vec<K>> = HashMap::new();
        for key in keys {
            let root = self.find(&key);
            sets.entry(root).or_default().push(key);
        }
        sets.into_values().collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimilarityOutcome {
    Completed {
        groups: Vec<SimilarityGroup>,
        hashes: HashMap<PathBuf, u64>,
    },
    Cancelled,
}

impl SimilarityOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SimilarityOutcome::Cancelled)
    }
}

fn should_report(index: usize, total: usize) -> bool {
    index % PROGRESS_EVERY == 0 || index + 1 == total
}

/// Unions every pair within `threshold` and returns the groups of two or more,
/// ordered by their smallest member. `None` when cancelled.
pub fn cluster<H>(
    items: &[(PathBuf, H)],
    threshold: u32,
    distance: impl Fn(&H, &H) -> u32,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(String),
) -> Option<Vec<SimilarityGroup>> {
    let mut sets = DisjointSet::new(items.iter().map(|(path, _)| path.clone()));
    let total = items.len();
    for (i, (path_a, hash_a)) in items.iter().enumerate() {
        if cancel.is_cancelled() {
            progress("Similarity scan cancelled (comparing).".to_string());
            return None;
        }
        if should_report(i, total) {
            progress(format!("Comparing {}/{}", i + 1, total));
        }
        for (path_b, hash_b) in &items[i + 1..] {
            if distance(hash_a, hash_b) <= threshold {
                sets.union(path_a, path_b);
            }
        }
    }

    let mut groups: Vec<SimilarityGroup> = sets
        .into_sets()
        .into_iter()
        .filter(|members| members.len() > 1)
        .map(|members| members.into_iter().collect())
        .collect();
    groups.sort();
    Some(groups)
}

/// Hashes `images` sequentially then clusters them by Hamming distance.
///
/// Undecodable images are logged and left out. Cancellation is observed before
/// every item of both phases.
pub fn find_similar(
    images: &[PathBuf],
    threshold: u32,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(String),
    hasher: &dyn PerceptualHasher,
) -> SimilarityOutcome {
    let started = Instant::now();
    let total = images.len();
    let mut hashed: Vec<(PathBuf, u64)> = Vec::with_capacity(total);

    for (i, path) in images.iter().enumerate() {
        if cancel.is_cancelled() {
            progress("Similarity scan cancelled (hashing).".to_string());
            return SimilarityOutcome::Cancelled;
        }
        if should_report(i, total) {
            progress(format!("Hashing {}/{}", i + 1, total));
        }
        match hasher.hash_image(path) {
            Ok(hash) => hashed.push((path.clone(), hash)),
            Err(error) => log::warn!("Could not hash {}: {}", path.display(), error),
        }
    }

    if cancel.is_cancelled() {
        progress("Similarity scan cancelled (hashing).".to_string());
        return SimilarityOutcome::Cancelled;
    }

    let Some(groups) = cluster(
        &hashed,
        threshold,
        |a, b| hamming_distance(*a, *b),
        cancel,
        progress,
    ) else {
        return SimilarityOutcome::Cancelled;
    };

    log::info!(
        "Similarity scan complete: {} images, {} hashed, {} groups ({:.1} ms)",
        total,
        hashed.len(),
        groups.len(),
        started.elapsed().as_secs_f64() * 1000.0
    );
    SimilarityOutcome::Completed {
        groups,
        hashes: hashed.into_iter().collect(),
    }
}

/// Messages from the background scan to the control thread.
#[derive(Debug)]
pub enum SimilarityEvent {
    Progress(String),
    Finished(SimilarityOutcome),
}

struct RunningGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Owns the stored clustering and runs at most one scan at a time.
pub struct SimilarityEngine {
    hasher: Arc<dyn PerceptualHasher>,
    running: Arc<AtomicBool>,
    cancel: CancelToken,
    events: Option<Receiver<SimilarityEvent>>,
    groups: Vec<SimilarityGroup>,
    hashes: HashMap<PathBuf, u64>,
    marked: HashSet<PathBuf>,
    completed: bool,
}

impl SimilarityEngine {
    pub fn new(hasher: Arc<dyn PerceptualHasher>) -> Self {
        Self {
            hasher,
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancelToken::new(),
            events: None,
            groups: Vec::new(),
            hashes: HashMap::new(),
            marked: HashSet::new(),
            completed: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Starts a background scan. Fails with `Busy` if one is already active.
    pub fn start(&mut self, images: Vec<PathBuf>, threshold: u32) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CatalogError::Busy("similarity scan"));
        }

        let (sender, receiver) = unbounded();
        let cancel = CancelToken::new();
        self.cancel = cancel.clone();
        self.events = Some(receiver);

        let hasher = Arc::clone(&self.hasher);
        let running_flag = Arc::clone(&self.running);
        let spawned = std::thread::Builder::new()
            .name("similarity-scan".into())
            .spawn(move || {
                let _running_guard = RunningGuard { flag: running_flag };
                let progress_sender = sender.clone();
                let mut progress = move |text: String| {
                    let _ = progress_sender.send(SimilarityEvent::Progress(text));
                };
                let outcome =
                    find_similar(&images, threshold, &cancel, &mut progress, hasher.as_ref());
                let _ = sender.send(SimilarityEvent::Finished(outcome));
            });

        if let Err(error) = spawned {
            self.running.store(false, Ordering::Release);
            self.events = None;
            return Err(CatalogError::Io(error));
        }
        Ok(())
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Collects pending events. A completed outcome replaces all stored state;
    /// a cancelled one leaves it untouched.
    pub fn poll(&mut self) -> Vec<SimilarityEvent> {
        let Some(receiver) = &self.events else {
            return Vec::new();
        };
        let mut events = Vec::new();
        let mut finished = false;
        loop {
            match receiver.try_recv() {
                Ok(event) => {
                    finished |= matches!(event, SimilarityEvent::Finished(_));
                    events.push(event);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    finished = true;
                    break;
                }
            }
        }
        if finished {
            self.events = None;
        }

        for event in &events {
            if let SimilarityEvent::Finished(SimilarityOutcome::Completed { groups, hashes }) =
                event
            {
                self.groups = groups.clone();
                self.hashes = hashes.clone();
                self.rebuild_marked();
                self.completed = true;
            }
        }
        events
    }

    /// Cancels any scan and forgets every stored group (folder navigation).
    pub fn reset(&mut self) {
        self.cancel();
        self.events = None;
        self.groups.clear();
        self.hashes.clear();
        self.marked.clear();
        self.completed = false;
    }

    pub fn has_completed(&self) -> bool {
        self.completed
    }

    pub fn groups(&self) -> &[SimilarityGroup] {
        &self.groups
    }

    pub fn hash_of(&self, path: &Path) -> Option<u64> {
        self.hashes.get(path).copied()
    }

    pub fn is_marked(&self, path: &Path) -> bool {
        self.marked.contains(path)
    }

    pub fn marked_paths(&self) -> &HashSet<PathBuf> {
        &self.marked
    }

    pub fn group_of(&self, path: &Path) -> Option<&SimilarityGroup> {
        self.groups.iter().find(|group| group.contains(path))
    }

    /// Removes paths from every group, dropping groups left with fewer than two.
    pub fn prune_paths<'a>(&mut self, removed: impl IntoIterator<Item = &'a Path>) {
        let mut touched = false;
        for path in removed {
            self.hashes.remove(path);
            for group in &mut self.groups {
                touched |= group.remove(path);
            }
        }
        if touched {
            self.groups.retain(|group| group.len() > 1);
            self.rebuild_marked();
        }
    }

    /// Keeps only paths accepted by `keep`, dropping groups left with fewer
    /// than two. Used to reconcile a finished scan with deletions made while
    /// it was running.
    pub fn retain_paths(&mut self, keep: impl Fn(&Path) -> bool) {
        self.hashes.retain(|path, _| keep(path));
        for group in &mut self.groups {
            group.retain(|path| keep(path));
        }
        self.groups.retain(|group| group.len() > 1);
        self.rebuild_marked();
    }

    /// Paths the keep-half heuristic would delete: every member past the first
    /// `ceil(n/2)` of each lexicographically sorted group.
    pub fn pruning_plan(&self) -> Vec<PathBuf> {
        self.groups
            .iter()
            .flat_map(|group| group.iter().skip(group.len().div_ceil(2)).cloned())
            .collect()
    }

    fn rebuild_marked(&mut self) {
        self.marked = self.groups.iter().flatten().cloned().collect();
    }
}
