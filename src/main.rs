use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::warn;

use facesort::cancel::CancelToken;
use facesort::config::{Config, DetectionModel, DuplicatePolicy};
use facesort::db::maintenance::{run_maintenance, MaintenanceAction, MaintenanceOptions};
use facesort::db::{PhotoStore, SqliteStore};
use facesort::error::SetupError;
use facesort::exiftool::ExifTool;
use facesort::faces::{
    bind_names, dbscan, materialize, read_manifest, read_mapping, ArcFaceExtractor, DbscanParams,
    FaceProcessor, UltraFaceDetector, NOISE,
};
use facesort::ingest::{IngestOptions, IngestPipeline, IngestReport, LifecycleDirs};
use facesort::logging;
use facesort::scanner::{discover_media, merge_export};

#[derive(Parser, Debug)]
#[command(
    name = "facesort",
    version,
    about = "Cluster faces in photo exports, write names back, and ingest exports without duplicates"
)]
struct Cli {
    /// Path to config file (overrides FACESORT_CONFIG and the default location)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect faces under ROOT, cluster them and write the review manifest
    Scan {
        root: PathBuf,

        /// Output directory for clusters.csv and contact sheets
        #[arg(long, default_value = "face_clusters_out")]
        out: PathBuf,

        #[arg(long, value_enum)]
        model: Option<DetectionModel>,

        /// Neighbourhood radius
        #[arg(long)]
        eps: Option<f32>,

        /// Other faces required within eps for a core face
        #[arg(long)]
        min_points: Option<usize>,

        /// Detection worker threads
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Add mapped person names as keywords to the original photos
    BindNames {
        /// clusters.csv written by `scan`
        #[arg(long)]
        manifest: PathBuf,

        /// CSV of cluster_id,person_name
        #[arg(long)]
        mapping: PathBuf,

        #[arg(long)]
        dry_run: bool,

        /// Also link the names to stored faces in the database
        #[arg(long)]
        record_people: bool,
    },

    /// Import an export directory or archive (or everything in the intake directory)
    Ingest {
        source: Option<PathBuf>,

        #[arg(long)]
        dry_run: bool,

        /// Only import files with at least one detected face
        #[arg(long)]
        people_only: bool,

        #[arg(long, value_enum)]
        duplicates: Option<DuplicatePolicy>,

        #[arg(long)]
        intake: Option<PathBuf>,

        #[arg(long)]
        processed: Option<PathBuf>,

        #[arg(long)]
        pending: Option<PathBuf>,

        /// Cancel the run after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Report or remove stored photos with identical content
    Dedup {
        #[arg(long)]
        dry_run: bool,

        #[arg(long, value_enum, default_value = "report")]
        action: MaintenanceAction,

        /// Hash stored photos that have no content hash yet
        #[arg(long)]
        compute_hashes: bool,
    },

    /// Write sidecar JSON metadata into the media files of an unpacked export
    MergeMetadata {
        root: PathBuf,

        #[arg(long)]
        dry_run: bool,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;
    store.initialize()?;
    Ok(store)
}

fn require_path(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(SetupError::MissingPath(path.to_path_buf()).into())
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_scan(
    mut config: Config,
    cancel: CancelToken,
    root: &Path,
    out: &Path,
    model: Option<DetectionModel>,
    eps: Option<f32>,
    min_points: Option<usize>,
    workers: Option<usize>,
) -> Result<()> {
    require_path(root)?;
    let clustering = &mut config.clustering;
    if let Some(model) = model {
        clustering.model = model;
    }
    if let Some(eps) = eps {
        clustering.eps = eps;
    }
    if let Some(min_points) = min_points {
        clustering.min_points = min_points;
    }
    if let Some(workers) = workers {
        clustering.workers = workers;
    }

    let images = discover_media(root, &config.scanner.image_extensions);
    println!("Found {} images, scanning for faces.", images.len());

    let detector = UltraFaceDetector::load(&config.models.dir, config.clustering.model)
        .context("Failed to load face detection model")?;
    let extractor = ArcFaceExtractor::load(&config.models.dir)
        .context("Failed to load face embedding model")?;

    let summary = FaceProcessor::new(&detector, &extractor)
        .with_workers(config.clustering.workers)
        .with_cancel(cancel)
        .process_all(&images)?;

    if summary.faces.is_empty() {
        println!("No faces found.");
        return Ok(());
    }

    let embeddings: Vec<Vec<f32>> = summary.faces.iter().map(|f| f.embedding.clone()).collect();
    let labels = dbscan(&embeddings, DbscanParams::from(&config.clustering));
    let report = materialize(out, &summary.faces, &labels, &config.contact_sheet)?;

    let clusters: BTreeSet<i32> = labels.iter().copied().filter(|l| *l != NOISE).collect();
    let noise = labels.iter().filter(|l| **l == NOISE).count();
    println!(
        "{} faces in {} images: {} clusters, {} unclustered",
        summary.faces.len(),
        summary.images,
        clusters.len(),
        noise
    );
    if summary.failed_images > 0 || summary.failed_embeddings > 0 || report.skipped_crops > 0 {
        println!(
            "Skipped: {} unreadable images, {} faces without embedding, {} failed crops",
            summary.failed_images, summary.failed_embeddings, report.skipped_crops
        );
    }
    println!("Wrote {}", report.manifest.display());
    println!("Created {} contact sheets in {}", report.sheets.len(), out.display());
    Ok(())
}

fn cmd_bind_names(
    config: Config,
    manifest: &Path,
    mapping: &Path,
    dry_run: bool,
    record_people: bool,
) -> Result<()> {
    require_path(manifest)?;
    let mapping = read_mapping(mapping)?;
    let rows = read_manifest(manifest)?;

    let exiftool = ExifTool::new(&config.exiftool.path);
    if !dry_run {
        let version = exiftool.ensure_available()?;
        tracing::debug!(version = %version, "Using exiftool");
    }

    let store = if record_people && !dry_run {
        Some(open_store(&config)?)
    } else {
        None
    };

    let report = bind_names(
        &rows,
        &mapping,
        &exiftool,
        dry_run,
        store.as_ref().map(|s| s as &dyn PhotoStore),
    );

    if dry_run {
        for action in &report.planned {
            println!("DRY-RUN: {}", exiftool.render_command(&action.path, &action.directives()));
        }
        println!("{} planned keyword writes, {} files missing", report.planned.len(), report.missing);
    } else {
        println!(
            "{} written, {} failed, {} files missing",
            report.written, report.failed, report.missing
        );
        if let Some(store) = &store {
            println!("{} stored faces linked to people", report.faces_linked);
            let people = store.get_all_people()?;
            let names: Vec<&str> = people.iter().map(|p| p.name.as_str()).collect();
            println!("{} people known: {}", names.len(), names.join(", "));
        }
    }
    Ok(())
}

fn print_ingest_report(report: &IngestReport, dry_run: bool) {
    let prefix = if dry_run { "[DRY] " } else { "" };
    println!("{}{}", prefix, report.source.display());
    println!(
        "  imported {}, replaced {}, skipped duplicate {}, skipped faceless {}, failed {}",
        report.imported,
        report.replaced,
        report.skipped_duplicate,
        report.skipped_faceless,
        report.failed
    );
    if let Some(dest) = &report.archived_to {
        let verb = if dry_run { "would move to" } else { "moved to" };
        println!("  archive {} {}", verb, dest.display());
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_ingest(
    mut config: Config,
    cancel: CancelToken,
    source: Option<&Path>,
    dry_run: bool,
    people_only: bool,
    duplicates: Option<DuplicatePolicy>,
    intake: Option<PathBuf>,
    processed: Option<PathBuf>,
    pending: Option<PathBuf>,
) -> Result<()> {
    let ingest = &mut config.ingest;
    if let Some(dir) = intake {
        ingest.intake_dir = dir;
    }
    if let Some(dir) = processed {
        ingest.processed_dir = dir;
    }
    if let Some(dir) = pending {
        ingest.pending_dir = dir;
    }
    if let Some(policy) = duplicates {
        ingest.duplicate_policy = policy;
    }
    let people_only = people_only || ingest.people_only;

    let options = IngestOptions {
        people_only,
        duplicate_policy: config.ingest.duplicate_policy,
        dry_run,
    };

    let store = open_store(&config)?;
    let detector = if people_only {
        Some(
            UltraFaceDetector::load(&config.models.dir, config.clustering.model)
                .context("Failed to load face detection model")?,
        )
    } else {
        None
    };

    let mut pipeline = IngestPipeline::new(
        &store,
        LifecycleDirs::from(&config.ingest),
        config.scanner.clone(),
        options,
    )
    .with_cancel(cancel)
    .with_workers(config.clustering.workers);
    if let Some(detector) = &detector {
        pipeline = pipeline.with_detector(detector);
    }

    let reports = match source {
        Some(source) => vec![pipeline.run(source)?],
        None => pipeline.run_intake()?,
    };

    if reports.is_empty() {
        println!("Nothing to ingest in {}", config.ingest.intake_dir.display());
    }
    for report in &reports {
        print_ingest_report(report, dry_run);
    }
    Ok(())
}

fn cmd_dedup(config: Config, dry_run: bool, action: MaintenanceAction, compute_hashes: bool) -> Result<()> {
    let store = open_store(&config)?;
    let report = run_maintenance(
        &store,
        MaintenanceOptions {
            action,
            dry_run,
            compute_hashes,
        },
    )?;

    if compute_hashes {
        if dry_run {
            println!("{} photos need a content hash", report.missing_hashes);
        } else {
            println!(
                "Hashed {} of {} photos ({} unreadable)",
                report.hashed, report.missing_hashes, report.hash_failures
            );
        }
    }

    for group in &report.groups {
        println!("{} ({} copies)", group.file_hash, group.photos.len());
        if let Some(keep) = group.keeper() {
            println!("  KEEP   {} {}", keep.id, keep.original_path);
        }
        for extra in group.extras() {
            println!("  DELETE {} {}", extra.id, extra.original_path);
        }
    }

    if action == MaintenanceAction::Delete && !dry_run {
        println!("Deleted {} duplicate records", report.deleted);
    } else {
        println!(
            "{} duplicate groups, {} records would be deleted",
            report.groups.len(),
            report.redundant()
        );
    }
    Ok(())
}

fn cmd_merge_metadata(config: Config, root: &Path, dry_run: bool) -> Result<()> {
    let exiftool = ExifTool::new(&config.exiftool.path);
    if !dry_run {
        exiftool.ensure_available()?;
    }

    let report = merge_export(root, &config.scanner.media_extensions, &exiftool, dry_run)?;
    println!(
        "{} updated, {} failed, {} without sidecar, {} malformed sidecars",
        report.updated, report.failed, report.without_sidecar, report.malformed
    );
    Ok(())
}

fn execute(command: Command, config: Config, cancel: CancelToken) -> Result<()> {
    match command {
        Command::Scan {
            root,
            out,
            model,
            eps,
            min_points,
            workers,
        } => cmd_scan(config, cancel, &root, &out, model, eps, min_points, workers),
        Command::BindNames {
            manifest,
            mapping,
            dry_run,
            record_people,
        } => cmd_bind_names(config, &manifest, &mapping, dry_run, record_people),
        Command::Ingest {
            source,
            dry_run,
            people_only,
            duplicates,
            intake,
            processed,
            pending,
            timeout: _,
        } => cmd_ingest(
            config,
            cancel,
            source.as_deref(),
            dry_run,
            people_only,
            duplicates,
            intake,
            processed,
            pending,
        ),
        Command::Dedup {
            dry_run,
            action,
            compute_hashes,
        } => cmd_dedup(config, dry_run, action, compute_hashes),
        Command::MergeMetadata { root, dry_run } => cmd_merge_metadata(config, &root, dry_run),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    logging::init(config.log_dir.clone(), cli.verbose)?;

    let cancel = match &cli.command {
        Command::Ingest {
            timeout: Some(secs),
            ..
        } => CancelToken::with_timeout(Duration::from_secs(*secs)),
        _ => CancelToken::new(),
    };

    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current file");
            watcher.cancel();
        }
    });

    let command = cli.command;
    tokio::task::spawn_blocking(move || execute(command, config, cancel)).await?
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
