use crate::scanner::CatalogEntry;
use crate::similarity::SimilarityGroup;
use crate::thumbnails::ThumbnailJob;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Hands out fixed-size pages of the filtered catalog.
///
/// The loader never looks at the viewport. Callers ask for the next page once
/// [`should_load_more`] says the user has scrolled far enough.
#[derive(Debug, Clone)]
pub struct BatchLoader {
    entries: Vec<CatalogEntry>,
    cursor: usize,
    page_size: usize,
}

impl BatchLoader {
    pub fn new(page_size: usize) -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            page_size: page_size.max(1),
        }
    }

    /// Replaces the backing list and rewinds to the first page.
    pub fn reset(&mut self, entries: Vec<CatalogEntry>) {
        self.entries = entries;
        self.cursor = 0;
    }

    pub fn next_batch(&mut self) -> Vec<CatalogEntry> {
        let end = (self.cursor + self.page_size).min(self.entries.len());
        let batch = self.entries[self.cursor..end].to_vec();
        self.cursor = end;
        batch
    }

    /// Drops an entry so later pages neither repeat nor skip anything.
    pub fn remove(&mut self, path: &Path) -> bool {
        let Some(index) = self.entries.iter().position(|entry| entry.path == path) else {
            return false;
        };
        self.entries.remove(index);
        if index < self.cursor {
            self.cursor -= 1;
        }
        true
    }

    pub fn remaining(&self) -> usize {
        self.entries.len() - self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.entries.len()
    }

    pub fn loaded(&self) -> &[CatalogEntry] {
        &self.entries[..self.cursor]
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

/// Reorders a filtered catalog for the similar-only view: folders, then each
/// group's members. Before any completed scan only folders are shown.
pub fn order_for_similar_view(
    entries: &[CatalogEntry],
    groups: &[SimilarityGroup],
    scan_completed: bool,
) -> Vec<CatalogEntry> {
    let mut ordered: Vec<CatalogEntry> = entries
        .iter()
        .filter(|entry| entry.is_folder())
        .cloned()
        .collect();
    if !scan_completed {
        return ordered;
    }

    let by_path: HashMap<&PathBuf, &CatalogEntry> = entries
        .iter()
        .filter(|entry| entry.is_file())
        .map(|entry| (&entry.path, entry))
        .collect();

    let mut sorted_groups: Vec<&SimilarityGroup> = groups.iter().collect();
    sorted_groups.sort_by(|a, b| a.first().cmp(&b.first()));
    for group in sorted_groups {
        ordered.extend(
            group
                .iter()
                .filter_map(|path| by_path.get(path).map(|entry| (*entry).clone())),
        );
    }
    ordered
}

/// True once the viewport has scrolled past `threshold` of the rendered content.
pub fn should_load_more(scroll_fraction: f32, threshold: f32) -> bool {
    scroll_fraction >= threshold
}

/// Thumbnail jobs for the file entries of one page.
pub fn thumbnail_jobs(batch: &[CatalogEntry], desired_size: u32) -> Vec<ThumbnailJob> {
    batch
        .iter()
        .filter(|entry| entry.is_file())
        .map(|entry| ThumbnailJob::new(entry.path.clone(), entry.kind, desired_size))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;

    fn entry(path: &str, kind: MediaKind) -> CatalogEntry {
        CatalogEntry::new(PathBuf::from(path), kind, 0, None)
    }

    fn images(count: usize) -> Vec<CatalogEntry> {
        (0..count)
            .map(|idx| entry(&format!("/photos/{:03}.png", idx), MediaKind::Image))
            .collect()
    }

    #[test]
    fn test_pages_of_45_by_20_yield_20_20_5_then_empty() {
        let catalog = images(45);
        let mut loader = BatchLoader::new(20);
        loader.reset(catalog.clone());

        let mut seen = Vec::new();
        let mut sizes = Vec::new();
        for _ in 0..4 {
            let batch = loader.next_batch();
            sizes.push(batch.len());
            seen.extend(batch.into_iter().map(|entry| entry.path));
        }
        assert_eq!(sizes, vec![20, 20, 5, 0]);
        let expected: Vec<PathBuf> = catalog.into_iter().map(|entry| entry.path).collect();
        assert_eq!(seen, expected);
        assert!(loader.is_exhausted());
        assert!(loader.next_batch().is_empty());
    }

    #[test]
    fn test_removing_loaded_entry_does_not_skip_next_page() {
        let mut loader = BatchLoader::new(2);
        loader.reset(images(5));
        let first = loader.next_batch();
        assert!(loader.remove(&first[0].path));

        let second = loader.next_batch();
        assert_eq!(second[0].path, PathBuf::from("/photos/002.png"));
        assert_eq!(loader.remaining(), 1);
        assert!(!loader.remove(Path::new("/photos/unknown.png")));
    }

    #[test]
    fn test_similar_view_orders_folders_then_groups_by_smallest_path() {
        let catalog = vec![
            entry("/p/sub", MediaKind::Folder),
            entry("/p/a.png", MediaKind::Image),
            entry("/p/b.png", MediaKind::Image),
            entry("/p/c.png", MediaKind::Image),
            entry("/p/d.png", MediaKind::Image),
            entry("/p/lonely.png", MediaKind::Image),
        ];
        let groups: Vec<SimilarityGroup> = vec![
            ["/p/d.png", "/p/b.png"].iter().map(PathBuf::from).collect(),
            ["/p/c.png", "/p/a.png"].iter().map(PathBuf::from).collect(),
        ];

        let ordered = order_for_similar_view(&catalog, &groups, true);
        let names: Vec<&str> = ordered.iter().map(|e| e.display_name.as_str()).collect();
        assert_eq!(names, vec!["sub", "a.png", "c.png", "b.png", "d.png"]);

        let before_scan = order_for_similar_view(&catalog, &groups, false);
        assert_eq!(before_scan.len(), 1);
        assert!(before_scan[0].is_folder());
    }

    #[test]
    fn test_similar_view_skips_members_filtered_out_of_catalog() {
        let catalog = vec![entry("/p/a.png", MediaKind::Image)];
        let groups: Vec<SimilarityGroup> =
            vec![["/p/a.png", "/p/gone.png"].iter().map(PathBuf::from).collect()];
        let ordered = order_for_similar_view(&catalog, &groups, true);
        assert_eq!(ordered.len(), 1);
    }

    #[test]
    fn test_scroll_threshold_and_jobs_skip_folders() {
        assert!(!should_load_more(0.5, 0.85));
        assert!(should_load_more(0.85, 0.85));
        assert!(should_load_more(1.0, 0.85));

        let batch = vec![
            entry("/p/sub", MediaKind::Folder),
            entry("/p/a.png", MediaKind::Image),
            entry("/p/v.mp4", MediaKind::Video),
        ];
        let jobs = thumbnail_jobs(&batch, 120);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].kind, MediaKind::Video);
        assert_eq!(jobs[0].desired_size, 120);
    }
}
