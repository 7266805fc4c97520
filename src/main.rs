use picsnest_lib::config::{self, EngineConfig, SETTINGS_FILENAME};
use picsnest_lib::engine::CatalogObserver;
use picsnest_lib::scanner::{CatalogEntry, ScanFilters};
use picsnest_lib::similarity::SimilarityGroup;
use picsnest_lib::CatalogEngine;
use image::DynamicImage;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Default)]
struct RunSummary {
    batches: usize,
    listed: usize,
    thumbnails_ready: usize,
    thumbnails_failed: usize,
    groups: Vec<SimilarityGroup>,
}

impl CatalogObserver for RunSummary {
    fn on_thumbnail_ready(&mut self, path: &Path, _bitmap: Option<&DynamicImage>, failed: bool) {
        if failed {
            self.thumbnails_failed += 1;
            eprintln!("thumbnail failed: {}", path.display());
        } else {
            self.thumbnails_ready += 1;
        }
    }

    fn on_similarity_progress(&mut self, text: &str) {
        println!("{}", text);
    }

    fn on_similarity_complete(&mut self, groups: &[SimilarityGroup]) {
        self.groups = groups.to_vec();
    }

    fn on_batch_available(&mut self, entries: &[CatalogEntry]) {
        self.batches += 1;
        self.listed += entries.len();
    }
}

struct Options {
    folder: PathBuf,
    filters: ScanFilters,
    similar: bool,
    threshold: Option<u32>,
    settings: Option<PathBuf>,
}

fn usage() {
    println!("Headless catalog walk-through of one folder.");
    println!();
    println!("Usage:");
    println!("  picsnest [OPTIONS] <FOLDER>");
    println!();
    println!("Options:");
    println!("  --images / --no-images   include or hide images (default: include)");
    println!("  --videos / --no-videos   include or hide videos (default: include)");
    println!("  --similar                run a similarity scan over the folder's images");
    println!("  --threshold N            maximum Hamming distance counted as similar");
    println!("  --settings PATH          settings file (default: <data dir>/{})", SETTINGS_FILENAME);
}

fn parse_args() -> Result<Options, String> {
    let mut folder = None;
    let mut filters = ScanFilters::default();
    let mut similar = false;
    let mut threshold = None;
    let mut settings = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            "--images" => filters.include_images = true,
            "--no-images" => filters.include_images = false,
            "--videos" => filters.include_videos = true,
            "--no-videos" => filters.include_videos = false,
            "--similar" => similar = true,
            "--threshold" => {
                let Some(raw) = args.next() else {
                    return Err("Missing value after --threshold".to_string());
                };
                let value = raw
                    .parse::<u32>()
                    .map_err(|_| format!("Invalid threshold: {}", raw))?;
                threshold = Some(value);
            }
            "--settings" => {
                let Some(path) = args.next() else {
                    return Err("Missing path after --settings".to_string());
                };
                settings = Some(PathBuf::from(path));
            }
            unknown if unknown.starts_with("--") => {
                return Err(format!("Unknown argument: {}", unknown));
            }
            path => {
                if folder.is_some() {
                    return Err(format!("Unexpected extra folder: {}", path));
                }
                folder = Some(PathBuf::from(path));
            }
        }
    }

    let Some(folder) = folder else {
        return Err("Missing folder to catalog".to_string());
    };
    Ok(Options {
        folder,
        filters,
        similar,
        threshold,
        settings,
    })
}

fn run(options: Options) -> picsnest_lib::Result<()> {
    let settings_path = options
        .settings
        .unwrap_or_else(|| config::default_data_dir().join(SETTINGS_FILENAME));
    let mut config = EngineConfig::load(&settings_path);
    if let Some(threshold) = options.threshold {
        config.similarity_threshold = threshold;
    }
    let interval = config.drain_interval();

    let started = Instant::now();
    let mut engine = CatalogEngine::new(config, RunSummary::default())?;
    engine.set_filters(options.filters)?;
    engine.load_folder(&options.folder)?;
    while engine.has_more() {
        engine.next_batch();
    }
    if options.similar {
        engine.find_similar()?;
    }

    while !engine.thumbnails_idle() || engine.is_finding_similar() {
        engine.tick();
        std::thread::sleep(interval);
    }
    // Pick up anything delivered after the last check.
    engine.tick();

    let summary = engine.observer();
    println!("Folder: {}", options.folder.display());
    println!("  entries: {}", engine.catalog().len());
    println!("  listed: {} in {} batches", summary.listed, summary.batches);
    println!("  thumbnails_ready: {}", summary.thumbnails_ready);
    println!("  thumbnails_failed: {}", summary.thumbnails_failed);
    if options.similar {
        println!("  similar_groups: {}", summary.groups.len());
        for (idx, group) in summary.groups.iter().enumerate() {
            println!("  group {}:", idx + 1);
            for path in group {
                println!("    {}", path.display());
            }
        }
    }
    println!("  elapsed_ms: {}", started.elapsed().as_millis());
    Ok(())
}

fn main() {
    env_logger::init();

    let options = match parse_args() {
        Ok(options) => options,
        Err(error) => {
            eprintln!("{}", error);
            usage();
            std::process::exit(2);
        }
    };

    if let Err(error) = run(options) {
        eprintln!("{}", error);
        std::process::exit(1);
    }
}
