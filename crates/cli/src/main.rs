use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};

use faceatlas_core::clustering::cluster_store::{BatchEntry, BatchProgressFn, FaceClusterStore};
use faceatlas_core::detection::domain::face_detector::{DetectedFace, FaceDetector};
use faceatlas_core::detection::infrastructure::model_resolver::ModelResolver;
use faceatlas_core::detection::infrastructure::onnx_face_detector::OnnxFaceDetector;
use faceatlas_core::pipeline::scan_library_use_case::ScanLibraryUseCase;
use faceatlas_core::shared::constants::{
    DEFAULT_MATCH_THRESHOLD, DETECT_MODEL_NAME, DETECT_MODEL_URL, EMBED_MODEL_NAME,
    EMBED_MODEL_URL,
};
use faceatlas_core::storage::infrastructure::file_record_store::FileRecordStore;

/// Face grouping for a personal media library.
#[derive(Parser)]
#[command(name = "faceatlas")]
struct Cli {
    /// Media library directory.
    #[arg(long)]
    library: PathBuf,

    /// Where face records and groups are stored (default: <library>/.faceatlas).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect and group faces across the library, or just the given files.
    Scan {
        /// Library-relative image paths; scans the whole library when empty.
        files: Vec<String>,

        /// Face detection confidence threshold (0.0-1.0).
        #[arg(long, default_value = "0.5")]
        confidence: f64,

        /// Cosine similarity a face must exceed to join an existing group.
        #[arg(long, default_value = "0.6")]
        threshold: f64,
    },
    /// List face groups with image counts.
    Groups,
    /// List the images of one face group.
    Show {
        /// Group id as printed by `groups`.
        group_id: String,
    },
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| cli.library.join(".faceatlas"));

    match cli.command {
        Command::Scan {
            files,
            confidence,
            threshold,
        } => run_scan(&cli.library, &data_dir, files, confidence, threshold),
        Command::Groups => run_groups(&cli.library, &data_dir),
        Command::Show { group_id } => run_show(&cli.library, &data_dir, &group_id),
    }
}

fn run_scan(
    library: &Path,
    data_dir: &Path,
    files: Vec<String>,
    confidence: f64,
    threshold: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let detector = build_detector(confidence)?;
    let mut store = FaceClusterStore::new(
        library.to_path_buf(),
        Box::new(FileRecordStore::new(data_dir.to_path_buf())),
        detector,
        threshold,
    );
    store.load();

    let progress: BatchProgressFn = Box::new(|current, total, filename| {
        eprint!("\rProcessing {current}/{total}: {filename}        ");
    });

    let entries = if files.is_empty() {
        ScanLibraryUseCase::new(&mut store).execute(Some(progress))?
    } else {
        store.process_images(&files, Some(progress))
    };
    eprintln!();

    let failed: Vec<&BatchEntry> = entries.iter().filter(|e| e.outcome.is_err()).collect();
    for entry in &failed {
        if let Err(ref e) = entry.outcome {
            eprintln!("failed: {} ({e})", entry.filename);
        }
    }
    println!(
        "{} images processed, {} failed, {} face groups",
        entries.len() - failed.len(),
        failed.len(),
        store.get_face_groups().len()
    );
    Ok(())
}

fn run_groups(library: &Path, data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_query_store(library, data_dir);
    for group in store.get_face_groups() {
        println!("{}  {} images", group.id, group.image_count);
    }
    Ok(())
}

fn run_show(
    library: &Path,
    data_dir: &Path,
    group_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_query_store(library, data_dir);
    for image in store.get_group_images(group_id) {
        println!("{image}");
    }
    Ok(())
}

fn open_query_store(library: &Path, data_dir: &Path) -> FaceClusterStore {
    let mut store = FaceClusterStore::new(
        library.to_path_buf(),
        Box::new(FileRecordStore::new(data_dir.to_path_buf())),
        Box::new(UnloadedDetector),
        DEFAULT_MATCH_THRESHOLD,
    );
    store.load();
    store
}

fn build_detector(confidence: f64) -> Result<Box<dyn FaceDetector>, Box<dyn std::error::Error>> {
    log::info!("resolving face models");
    let resolver = ModelResolver::new(None)?;
    let detect_model = resolver.resolve(
        DETECT_MODEL_NAME,
        DETECT_MODEL_URL,
        Some(Box::new(download_progress)),
    )?;
    let embed_model = resolver.resolve(
        EMBED_MODEL_NAME,
        EMBED_MODEL_URL,
        Some(Box::new(download_progress)),
    )?;
    eprintln!();

    Ok(Box::new(OnnxFaceDetector::new(
        &detect_model,
        &embed_model,
        confidence,
    )?))
}

/// Placeholder for query commands that never run detection. Attempting to
/// detect through it reports the models as not loaded.
struct UnloadedDetector;

impl FaceDetector for UnloadedDetector {
    fn detect(
        &mut self,
        _image_bytes: &[u8],
    ) -> Result<Vec<DetectedFace>, Box<dyn std::error::Error>> {
        Err("face models not loaded".into())
    }
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if !cli.library.is_dir() {
        return Err(format!("Library directory not found: {}", cli.library.display()).into());
    }
    if let Command::Scan {
        confidence,
        threshold,
        ..
    } = &cli.command
    {
        if !(0.0..=1.0).contains(confidence) {
            return Err(format!(
                "Confidence must be between 0.0 and 1.0, got {confidence}"
            )
            .into());
        }
        if !(0.0..=1.0).contains(threshold) {
            return Err(format!(
                "Similarity threshold must be between 0.0 and 1.0, got {threshold}"
            )
            .into());
        }
    }
    Ok(())
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading face models... {pct}%");
    } else {
        eprint!("\rDownloading face models... {downloaded} bytes");
    }
}
