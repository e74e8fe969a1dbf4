//! Per-file ingestion: hash, face filter, dedup, metadata merge, persist.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::archive::{extract_to_scratch, is_archive};
use super::lifecycle::LifecycleDirs;
use crate::cancel::CancelToken;
use crate::config::{DuplicatePolicy, ScannerConfig};
use crate::db::{BoundingBox, NewFace, NewPhoto, PhotoStore};
use crate::error::{IngestError, SetupError};
use crate::faces::detector::{load_image, FaceDetector};
use crate::scanner::{discover_media, has_extension, hash_files, read_metadata_for};

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    pub people_only: bool,
    pub duplicate_policy: DuplicatePolicy,
    pub dry_run: bool,
}

/// Final counts of one run. In a dry run the counts describe what would
/// have happened.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestReport {
    pub source: PathBuf,
    pub discovered: usize,
    pub imported: usize,
    pub replaced: usize,
    pub skipped_duplicate: usize,
    pub skipped_faceless: usize,
    pub failed: usize,
    /// Where the archive was moved (or would be, in a dry run)
    pub archived_to: Option<PathBuf>,
}

/// Outcome of face filtering for one file
enum FaceCheck {
    /// Filter disabled
    NotChecked,
    Faces(Vec<BoundingBox>),
    NoFaces,
    /// Detection failed; the file is imported anyway
    Undetermined,
}

/// An earlier copy of the same content
#[derive(Debug)]
enum Prior {
    Stored(i64),
    /// Seen earlier in a dry run, which stores nothing
    Planned(PathBuf),
}

pub struct IngestPipeline<'a> {
    store: &'a dyn PhotoStore,
    detector: Option<&'a dyn FaceDetector>,
    dirs: LifecycleDirs,
    scanner: ScannerConfig,
    options: IngestOptions,
    cancel: CancelToken,
    workers: usize,
}

impl<'a> IngestPipeline<'a> {
    pub fn new(
        store: &'a dyn PhotoStore,
        dirs: LifecycleDirs,
        scanner: ScannerConfig,
        options: IngestOptions,
    ) -> Self {
        Self {
            store,
            detector: None,
            dirs,
            scanner,
            options,
            cancel: CancelToken::new(),
            workers: 4,
        }
    }

    pub fn with_detector(mut self, detector: &'a dyn FaceDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Ingest one export: a directory, or a zip/tar/tar.gz archive.
    ///
    /// An archive is unpacked into a scratch directory that is removed on
    /// every exit path, and moved into the processed directory only when the
    /// run completes outside dry-run mode.
    pub fn run(&self, source: &Path) -> Result<IngestReport, IngestError> {
        if !source.exists() {
            return Err(IngestError::SourceNotFound(source.to_path_buf()));
        }
        if self.options.people_only && self.detector.is_none() {
            return Err(SetupError::Capability(
                "face filtering requested but no face detector is available".to_string(),
            )
            .into());
        }

        let archive = is_archive(source);
        if !archive && !source.is_dir() {
            return Err(IngestError::UnsupportedSource(source.to_path_buf()));
        }

        let scratch = if archive {
            Some(extract_to_scratch(source)?)
        } else {
            None
        };
        let root = scratch.as_ref().map(|s| s.path()).unwrap_or(source);

        let mut report = IngestReport {
            source: source.to_path_buf(),
            ..Default::default()
        };
        self.ingest_tree(root, source, &mut report)?;

        if archive {
            if self.options.dry_run {
                let dest = self
                    .dirs
                    .processed_destination(source)
                    .map_err(IngestError::Io)?;
                info!(archive = %source.display(), dest = %dest.display(), "DRY-RUN: would move archive to processed");
                report.archived_to = Some(dest);
            } else {
                let dest = self
                    .dirs
                    .move_to_processed(source)
                    .map_err(IngestError::Io)?;
                info!(archive = %source.display(), dest = %dest.display(), "Archive moved to processed");
                report.archived_to = Some(dest);
            }
        }

        info!(
            source = %source.display(),
            imported = report.imported,
            replaced = report.replaced,
            skipped_duplicate = report.skipped_duplicate,
            skipped_faceless = report.skipped_faceless,
            failed = report.failed,
            dry_run = self.options.dry_run,
            "Ingest finished"
        );
        Ok(report)
    }

    /// Ingest every directory and archive directly inside the intake
    /// directory, in name order. An aborting error stops the batch.
    pub fn run_intake(&self) -> Result<Vec<IngestReport>, IngestError> {
        let intake = &self.dirs.intake;
        if !intake.is_dir() {
            return Err(IngestError::SourceNotFound(intake.clone()));
        }

        let mut entries: Vec<PathBuf> = std::fs::read_dir(intake)
            .map_err(|e| IngestError::Io(anyhow::Error::new(e).context("Failed to read intake directory")))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_dir() || is_archive(p))
            .collect();
        entries.sort();

        let mut reports = Vec::with_capacity(entries.len());
        for entry in entries {
            reports.push(self.run(&entry)?);
        }
        Ok(reports)
    }

    /// `root` is where files are read; `origin` is the export as the user
    /// named it, used to build the recorded path.
    fn ingest_tree(&self, root: &Path, origin: &Path, report: &mut IngestReport) -> Result<(), IngestError> {
        let files = discover_media(root, &self.scanner.media_extensions);
        report.discovered = files.len();
        info!(root = %origin.display(), files = files.len(), "Discovered media");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| IngestError::Io(anyhow::Error::new(e).context("Failed to build hashing pool")))?;
        let hashes = pool.install(|| hash_files(&files));

        // Content planned for import during a dry run, by hash
        let mut planned: HashMap<String, PathBuf> = HashMap::new();

        for (file, hash) in files.iter().zip(hashes) {
            if self.cancel.is_cancelled() {
                warn!("Ingest cancelled");
                return Err(IngestError::Cancelled);
            }

            let recorded = match file.strip_prefix(root) {
                Ok(rel) if root != origin => origin.join(rel),
                _ => file.clone(),
            };
            self.ingest_file(file, &recorded, hash, &mut planned, report)?;
        }

        Ok(())
    }

    fn check_faces(&self, path: &Path) -> FaceCheck {
        let Some(detector) = self.detector.filter(|_| self.options.people_only) else {
            return FaceCheck::NotChecked;
        };

        let result = if has_extension(path, &self.scanner.image_extensions) {
            load_image(path).and_then(|img| detector.detect(&img))
        } else {
            Err(anyhow::anyhow!("not a still image"))
        };

        match result {
            Ok(boxes) if boxes.is_empty() => FaceCheck::NoFaces,
            Ok(boxes) => FaceCheck::Faces(boxes),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Face detection failed, importing anyway");
                FaceCheck::Undetermined
            }
        }
    }

    fn ingest_file(
        &self,
        path: &Path,
        recorded: &Path,
        hash: Option<String>,
        planned: &mut HashMap<String, PathBuf>,
        report: &mut IngestReport,
    ) -> Result<(), IngestError> {
        let Some(hash) = hash else {
            report.failed += 1;
            return Ok(());
        };

        let faces = match self.check_faces(path) {
            FaceCheck::NoFaces => {
                self.route_to_pending(path, report);
                return Ok(());
            }
            FaceCheck::Faces(boxes) => Some(boxes),
            FaceCheck::NotChecked | FaceCheck::Undetermined => None,
        };

        let prior = match self.store.find_by_hash(&hash)? {
            Some(photo) => Some(Prior::Stored(photo.id)),
            None => planned.get(&hash).cloned().map(Prior::Planned),
        };
        let replacing = match (prior, self.options.duplicate_policy) {
            (None, _) => None,
            (Some(prior), DuplicatePolicy::Skip) => {
                debug!(path = %path.display(), existing = ?prior, "Duplicate, skipping");
                report.skipped_duplicate += 1;
                return Ok(());
            }
            (Some(Prior::Stored(existing_id)), DuplicatePolicy::Error) => {
                return Err(IngestError::DuplicateAbort {
                    path: path.to_path_buf(),
                    hash,
                    existing_id,
                });
            }
            (Some(Prior::Planned(first)), DuplicatePolicy::Error) => {
                return Err(IngestError::DuplicateInRun {
                    path: path.to_path_buf(),
                    hash,
                    first,
                });
            }
            (Some(prior), DuplicatePolicy::Replace) => Some(prior),
        };

        let meta = read_metadata_for(path);
        let photo = NewPhoto {
            original_path: recorded.to_string_lossy().into_owned(),
            file_hash: Some(hash.clone()),
            title: meta.title.unwrap_or_default(),
            description: meta.description.unwrap_or_default(),
            taken_at: meta.taken_at,
            latitude: meta.latitude,
            longitude: meta.longitude,
            json_metadata: meta.raw,
        };

        if self.options.dry_run {
            info!(
                path = %path.display(),
                replace = ?replacing,
                taken_at = ?photo.taken_at,
                lat = ?photo.latitude,
                lon = ?photo.longitude,
                "DRY-RUN: would store photo"
            );
            if replacing.is_none() {
                planned.insert(hash, path.to_path_buf());
            }
        } else {
            let id = match replacing {
                Some(Prior::Stored(id)) => {
                    self.store.update_photo(id, &photo)?;
                    id
                }
                // Planned priors only exist in a dry run
                Some(Prior::Planned(_)) | None => self.store.create_photo(&photo)?,
            };
            if let Some(boxes) = faces {
                let new_faces: Vec<NewFace> = boxes
                    .into_iter()
                    .map(|bbox| NewFace { bbox, embedding: None })
                    .collect();
                self.store.replace_faces(id, &new_faces)?;
            }
        }

        match replacing {
            Some(_) => report.replaced += 1,
            None => report.imported += 1,
        }
        Ok(())
    }

    /// A faceless file counts as skipped once it is safely in pending-review;
    /// a failed copy counts as failed instead.
    fn route_to_pending(&self, path: &Path, report: &mut IngestReport) {
        if self.options.dry_run {
            info!(path = %path.display(), "DRY-RUN: no faces, would copy to pending-review");
            report.skipped_faceless += 1;
            return;
        }

        match self.dirs.copy_to_pending(path) {
            Ok(dest) => {
                info!(path = %path.display(), dest = %dest.display(), "No faces, copied to pending-review");
                report.skipped_faceless += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to copy to pending-review");
                report.failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::ingest::archive::tests::write_zip;
    use anyhow::{anyhow, Result};
    use image::{DynamicImage, RgbImage};
    use std::fs;
    use tempfile::{tempdir, TempDir};

    struct FixedDetector(Vec<BoundingBox>);

    impl FaceDetector for FixedDetector {
        fn detect(&self, _img: &DynamicImage) -> Result<Vec<BoundingBox>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenDetector;

    impl FaceDetector for BrokenDetector {
        fn detect(&self, _img: &DynamicImage) -> Result<Vec<BoundingBox>> {
            Err(anyhow!("model crashed"))
        }
    }

    struct Fixture {
        root: TempDir,
        store: SqliteStore,
    }

    impl Fixture {
        fn new() -> Self {
            let store = SqliteStore::open_in_memory().unwrap();
            store.initialize().unwrap();
            Self {
                root: tempdir().unwrap(),
                store,
            }
        }

        fn dirs(&self) -> LifecycleDirs {
            LifecycleDirs {
                intake: self.root.path().join("intake"),
                processed: self.root.path().join("processed"),
                pending: self.root.path().join("pending"),
            }
        }

        fn export_dir(&self, name: &str) -> PathBuf {
            let dir = self.root.path().join(name);
            fs::create_dir_all(&dir).unwrap();
            dir
        }

        fn pipeline(&self, options: IngestOptions) -> IngestPipeline<'_> {
            IngestPipeline::new(&self.store, self.dirs(), ScannerConfig::default(), options)
                .with_workers(2)
        }
    }

    fn png_bytes(shade: u8) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, image::Rgb([shade, shade, shade])))
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn options(policy: DuplicatePolicy) -> IngestOptions {
        IngestOptions {
            duplicate_policy: policy,
            ..Default::default()
        }
    }

    fn face_box() -> BoundingBox {
        BoundingBox::new(0, 2, 2, 0).unwrap()
    }

    #[test]
    fn test_imports_with_sidecar_metadata() {
        let fx = Fixture::new();
        let export = fx.export_dir("export");
        fs::write(export.join("IMG_1.png"), png_bytes(10)).unwrap();
        fs::write(
            export.join("IMG_1.json"),
            r#"{"title": "Beach", "photoTakenTime": {"timestamp": "1600000000"},
                "geoData": {"latitude": 0.0, "latitudeE7": 377749000, "longitudeE7": -1224194000}}"#,
        )
        .unwrap();
        fs::write(export.join("notes.txt"), b"ignored").unwrap();

        let report = fx.pipeline(IngestOptions::default()).run(&export).unwrap();
        assert_eq!(report.discovered, 1);
        assert_eq!(report.imported, 1);

        let photo = fx.store.find_by_hash(&crate::scanner::hash_reader(&png_bytes(10)[..]).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(photo.title, "Beach");
        assert_eq!(photo.latitude, Some(37.7749));
        assert_eq!(photo.longitude, Some(-122.4194));
        assert_eq!(photo.taken_at.unwrap().timestamp(), 1_600_000_000);
        assert!(photo.json_metadata.is_some());
        assert!(photo.original_path.ends_with("IMG_1.png"));
    }

    #[test]
    fn test_skip_policy_keeps_one_record() {
        let fx = Fixture::new();
        let export = fx.export_dir("export");
        fs::write(export.join("a.png"), png_bytes(1)).unwrap();

        fx.pipeline(options(DuplicatePolicy::Skip)).run(&export).unwrap();
        let second = fx.pipeline(options(DuplicatePolicy::Skip)).run(&export).unwrap();

        assert_eq!(second.skipped_duplicate, 1);
        assert_eq!(second.imported, 0);
        assert_eq!(fx.store.count_photos().unwrap(), 1);
    }

    #[test]
    fn test_replace_policy_updates_in_place() {
        let fx = Fixture::new();
        let first_export = fx.export_dir("first");
        fs::write(first_export.join("a.png"), png_bytes(1)).unwrap();
        fs::write(first_export.join("a.json"), r#"{"title": "Old"}"#).unwrap();
        fx.pipeline(options(DuplicatePolicy::Replace)).run(&first_export).unwrap();
        let original = fx.store.duplicate_groups().unwrap();
        assert!(original.is_empty());

        let second_export = fx.export_dir("second");
        fs::write(second_export.join("b.png"), png_bytes(1)).unwrap();
        fs::write(second_export.join("b.json"), r#"{"title": "New"}"#).unwrap();
        let report = fx.pipeline(options(DuplicatePolicy::Replace)).run(&second_export).unwrap();

        assert_eq!(report.replaced, 1);
        assert_eq!(fx.store.count_photos().unwrap(), 1);
        let hash = crate::scanner::hash_reader(&png_bytes(1)[..]).unwrap();
        let photo = fx.store.find_by_hash(&hash).unwrap().unwrap();
        assert_eq!(photo.title, "New");
        assert!(photo.original_path.ends_with("b.png"));
    }

    #[test]
    fn test_error_policy_aborts_and_keeps_first() {
        let fx = Fixture::new();
        let first_export = fx.export_dir("first");
        fs::write(first_export.join("a.png"), png_bytes(1)).unwrap();
        fs::write(first_export.join("a.json"), r#"{"title": "First"}"#).unwrap();
        fx.pipeline(options(DuplicatePolicy::Error)).run(&first_export).unwrap();

        let second_export = fx.export_dir("second");
        fs::write(second_export.join("a.png"), png_bytes(1)).unwrap();
        fs::write(second_export.join("a.json"), r#"{"title": "Second"}"#).unwrap();
        let err = fx.pipeline(options(DuplicatePolicy::Error)).run(&second_export).unwrap_err();

        assert!(matches!(err, IngestError::DuplicateAbort { .. }));
        assert_eq!(fx.store.count_photos().unwrap(), 1);
        let hash = crate::scanner::hash_reader(&png_bytes(1)[..]).unwrap();
        assert_eq!(fx.store.find_by_hash(&hash).unwrap().unwrap().title, "First");
    }

    #[test]
    fn test_people_only_routes_faceless_to_pending() {
        let fx = Fixture::new();
        let export = fx.export_dir("export");
        fs::write(export.join("empty.png"), png_bytes(3)).unwrap();

        let detector = FixedDetector(Vec::new());
        let report = fx
            .pipeline(IngestOptions {
                people_only: true,
                ..Default::default()
            })
            .with_detector(&detector)
            .run(&export)
            .unwrap();

        assert_eq!(report.skipped_faceless, 1);
        assert_eq!(fx.store.count_photos().unwrap(), 0);
        assert!(fx.dirs().pending.join("empty.png").exists());
        assert!(export.join("empty.png").exists());
    }

    #[test]
    fn test_people_only_detection_error_fails_open() {
        let fx = Fixture::new();
        let export = fx.export_dir("export");
        fs::write(export.join("a.png"), png_bytes(4)).unwrap();
        fs::write(export.join("clip.mp4"), b"not decodable").unwrap();

        let report = fx
            .pipeline(IngestOptions {
                people_only: true,
                ..Default::default()
            })
            .with_detector(&BrokenDetector)
            .run(&export)
            .unwrap();

        assert_eq!(report.imported, 2);
        assert_eq!(report.skipped_faceless, 0);
        assert_eq!(fx.store.count_photos().unwrap(), 2);
        assert!(!fx.dirs().pending.exists());
    }

    #[test]
    fn test_people_only_records_faces() {
        let fx = Fixture::new();
        let export = fx.export_dir("export");
        fs::write(export.join("a.png"), png_bytes(5)).unwrap();

        let detector = FixedDetector(vec![face_box()]);
        fx.pipeline(IngestOptions {
            people_only: true,
            ..Default::default()
        })
        .with_detector(&detector)
        .run(&export)
        .unwrap();

        let hash = crate::scanner::hash_reader(&png_bytes(5)[..]).unwrap();
        let photo = fx.store.find_by_hash(&hash).unwrap().unwrap();
        let faces = fx.store.faces_for_photo(photo.id).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].bbox, face_box());
    }

    #[test]
    fn test_people_only_requires_detector() {
        let fx = Fixture::new();
        let export = fx.export_dir("export");
        let err = fx
            .pipeline(IngestOptions {
                people_only: true,
                ..Default::default()
            })
            .run(&export)
            .unwrap_err();
        assert!(matches!(err, IngestError::Setup(_)));
    }

    #[test]
    fn test_archive_moves_to_processed_on_success() {
        let fx = Fixture::new();
        let intake = fx.export_dir("intake");
        let archive = intake.join("takeout.zip");
        write_zip(&archive, &[("Photos/a.png", &png_bytes(6)), ("Photos/b.png", &png_bytes(7))]);

        let report = fx.pipeline(IngestOptions::default()).run(&archive).unwrap();

        assert_eq!(report.imported, 2);
        assert!(!archive.exists());
        let dest = fx.dirs().processed.join("takeout.zip");
        assert!(dest.exists());
        assert_eq!(report.archived_to, Some(dest));

        let hash = crate::scanner::hash_reader(&png_bytes(6)[..]).unwrap();
        let photo = fx.store.find_by_hash(&hash).unwrap().unwrap();
        assert_eq!(PathBuf::from(photo.original_path), archive.join("Photos/a.png"));
    }

    #[test]
    fn test_aborted_archive_stays_in_place() {
        let fx = Fixture::new();
        let seed = fx.export_dir("seed");
        fs::write(seed.join("a.png"), png_bytes(8)).unwrap();
        fx.pipeline(options(DuplicatePolicy::Error)).run(&seed).unwrap();

        let intake = fx.export_dir("intake");
        let archive = intake.join("takeout.zip");
        write_zip(&archive, &[("a.png", &png_bytes(8))]);

        let err = fx.pipeline(options(DuplicatePolicy::Error)).run(&archive).unwrap_err();
        assert!(matches!(err, IngestError::DuplicateAbort { .. }));
        assert!(archive.exists());
        assert!(!fx.dirs().processed.exists());
    }

    #[test]
    fn test_dry_run_mutates_nothing() {
        let fx = Fixture::new();
        let intake = fx.export_dir("intake");
        let archive = intake.join("takeout.zip");
        write_zip(&archive, &[("a.png", &png_bytes(9)), ("b.png", &png_bytes(9))]);

        let detector = FixedDetector(vec![face_box()]);
        let report = fx
            .pipeline(IngestOptions {
                dry_run: true,
                people_only: true,
                duplicate_policy: DuplicatePolicy::Skip,
            })
            .with_detector(&detector)
            .run(&archive)
            .unwrap();

        assert_eq!(report.imported, 1);
        assert_eq!(report.skipped_duplicate, 1);
        assert_eq!(fx.store.count_photos().unwrap(), 0);
        assert!(archive.exists());
        assert_eq!(report.archived_to, Some(fx.dirs().processed.join("takeout.zip")));
        assert!(!fx.dirs().processed.exists());
    }

    #[test]
    fn test_dry_run_predicts_duplicates_within_export() {
        let fx = Fixture::new();
        let export = fx.export_dir("export");
        fs::write(export.join("a.png"), png_bytes(16)).unwrap();
        fs::write(export.join("b.png"), png_bytes(16)).unwrap();

        let dry = |policy| {
            fx.pipeline(IngestOptions {
                dry_run: true,
                duplicate_policy: policy,
                ..Default::default()
            })
            .run(&export)
        };

        let err = dry(DuplicatePolicy::Error).unwrap_err();
        match err {
            IngestError::DuplicateInRun { path, first, .. } => {
                assert_eq!(path, export.join("b.png"));
                assert_eq!(first, export.join("a.png"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let replace = dry(DuplicatePolicy::Replace).unwrap();
        assert_eq!((replace.imported, replace.replaced), (1, 1));
        assert_eq!(fx.store.count_photos().unwrap(), 0);

        let err = fx.pipeline(options(DuplicatePolicy::Error)).run(&export).unwrap_err();
        assert!(matches!(err, IngestError::DuplicateAbort { .. }));
        assert_eq!(fx.store.count_photos().unwrap(), 1);
    }

    #[test]
    fn test_failed_pending_copy_counts_only_as_failed() {
        let fx = Fixture::new();
        let export = fx.export_dir("export");
        fs::write(export.join("empty.png"), png_bytes(17)).unwrap();
        let dirs = fx.dirs();
        fs::write(&dirs.pending, b"a file where the directory should be").unwrap();

        let detector = FixedDetector(Vec::new());
        let report = IngestPipeline::new(
            &fx.store,
            dirs,
            ScannerConfig::default(),
            IngestOptions {
                people_only: true,
                ..Default::default()
            },
        )
        .with_detector(&detector)
        .run(&export)
        .unwrap();

        assert_eq!(report.discovered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped_faceless, 0);
        assert_eq!(fx.store.count_photos().unwrap(), 0);
    }

    #[test]
    fn test_corrupt_archive_left_in_place() {
        let fx = Fixture::new();
        let intake = fx.export_dir("intake");
        let archive = intake.join("broken.zip");
        fs::write(&archive, b"not a zip at all").unwrap();

        let err = fx.pipeline(IngestOptions::default()).run(&archive).unwrap_err();

        assert!(matches!(err, IngestError::Archive { .. }));
        assert!(archive.exists());
        assert!(!fx.dirs().processed.exists());
        assert_eq!(fx.store.count_photos().unwrap(), 0);
    }

    #[test]
    fn test_unhashable_file_counts_as_failed() {
        let fx = Fixture::new();
        let export = fx.export_dir("export");
        let path = export.join("vanished.png");

        let mut report = IngestReport::default();
        fx.pipeline(IngestOptions::default())
            .ingest_file(&path, &path, None, &mut HashMap::new(), &mut report)
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.imported, 0);
        assert_eq!(fx.store.count_photos().unwrap(), 0);
    }

    #[test]
    fn test_cancelled_run_cleans_up() {
        let fx = Fixture::new();
        let intake = fx.export_dir("intake");
        let archive = intake.join("takeout.zip");
        write_zip(&archive, &[("a.png", &png_bytes(12))]);

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = fx
            .pipeline(IngestOptions::default())
            .with_cancel(cancel)
            .run(&archive)
            .unwrap_err();

        assert!(matches!(err, IngestError::Cancelled));
        assert!(archive.exists());
        assert_eq!(fx.store.count_photos().unwrap(), 0);
    }

    #[test]
    fn test_missing_and_unsupported_sources() {
        let fx = Fixture::new();
        let missing = fx.root.path().join("nope");
        assert!(matches!(
            fx.pipeline(IngestOptions::default()).run(&missing),
            Err(IngestError::SourceNotFound(_))
        ));

        let plain = fx.root.path().join("photo.png");
        fs::write(&plain, png_bytes(13)).unwrap();
        assert!(matches!(
            fx.pipeline(IngestOptions::default()).run(&plain),
            Err(IngestError::UnsupportedSource(_))
        ));
    }

    #[test]
    fn test_run_intake_in_name_order() {
        let fx = Fixture::new();
        let intake = fx.dirs().intake;
        fs::create_dir_all(intake.join("b_dir")).unwrap();
        fs::write(intake.join("b_dir/x.png"), png_bytes(14)).unwrap();
        write_zip(&intake.join("a.zip"), &[("y.png", &png_bytes(15))]);
        fs::write(intake.join("readme.txt"), b"skip me").unwrap();

        let reports = fx.pipeline(IngestOptions::default()).run_intake().unwrap();

        let sources: Vec<PathBuf> = reports.iter().map(|r| r.source.clone()).collect();
        assert_eq!(sources, vec![intake.join("a.zip"), intake.join("b_dir")]);
        assert_eq!(fx.store.count_photos().unwrap(), 2);
        assert!(fx.dirs().processed.join("a.zip").exists());
    }
}
