use picsnest_lib::config;
use picsnest_lib::trash;
use std::env;
use std::path::PathBuf;

fn usage() {
    println!("Permanently empties the picsnest trash directory.");
    println!();
    println!("Usage:");
    println!("  cargo run --bin purge_trash");
    println!("  cargo run --bin purge_trash -- --trash-dir /path/to/trash");
}

fn parse_trash_dir() -> Result<Option<PathBuf>, String> {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            "--trash-dir" => {
                let Some(path) = args.next() else {
                    return Err("Missing path after --trash-dir".to_string());
                };
                return Ok(Some(PathBuf::from(path)));
            }
            unknown => {
                return Err(format!("Unknown argument: {}", unknown));
            }
        }
    }
    Ok(None)
}

fn resolve_trash_dir(flag_dir: Option<PathBuf>) -> Result<PathBuf, String> {
    if let Some(path) = flag_dir {
        return Ok(path);
    }
    if let Some(path) = env::var_os("PICSNEST_TRASH_DIR") {
        return Ok(PathBuf::from(path));
    }

    let candidates = config::default_trash_dir_candidates();
    if let Some(path) = candidates.iter().find(|path| path.is_dir()) {
        return Ok(path.clone());
    }

    Err(format!(
        "Could not locate trash directory. Checked: {}",
        candidates
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    ))
}

fn main() {
    env_logger::init();

    let trash_dir = match parse_trash_dir().and_then(resolve_trash_dir) {
        Ok(path) => path,
        Err(error) => {
            eprintln!("{}", error);
            usage();
            std::process::exit(1);
        }
    };

    if !trash_dir.is_dir() {
        eprintln!("Trash path is not a directory: {}", trash_dir.display());
        std::process::exit(1);
    }

    println!("Using trash directory: {}", trash_dir.display());
    let report = trash::purge_dir(&trash_dir);
    println!("Trash purge complete.");
    println!("  purged: {}", report.purged);
    println!("  failed: {}", report.failed);
    for path in &report.failed_paths {
        println!("    {}", path);
    }
    if report.failed > 0 {
        std::process::exit(1);
    }
}
