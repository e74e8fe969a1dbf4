use anyhow::{bail, Result};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::detector::{load_image, EmbeddingExtractor, FaceDetector};
use crate::cancel::CancelToken;
use crate::db::BoundingBox;

/// A face found during a scan, with its identity embedding
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub path: PathBuf,
    /// Position of the face in the detector's output for this image
    pub face_index: usize,
    pub bbox: BoundingBox,
    pub embedding: Vec<f32>,
}

/// Outcome of scanning a set of images
#[derive(Debug, Default)]
pub struct ScanSummary {
    pub images: usize,
    /// Faces in (path, face_index) order
    pub faces: Vec<DetectedFace>,
    /// Images that could not be decoded or run through detection
    pub failed_images: usize,
    /// Faces dropped because no embedding could be computed
    pub failed_embeddings: usize,
}

struct ImageResult {
    faces: Vec<DetectedFace>,
    failed_embeddings: usize,
}

/// Runs detection and embedding over many images on a bounded worker pool.
pub struct FaceProcessor<'a> {
    detector: &'a dyn FaceDetector,
    extractor: &'a dyn EmbeddingExtractor,
    workers: usize,
    cancel: CancelToken,
}

impl<'a> FaceProcessor<'a> {
    pub fn new(detector: &'a dyn FaceDetector, extractor: &'a dyn EmbeddingExtractor) -> Self {
        Self {
            detector,
            extractor,
            workers: 1,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Detect and embed every face of one image.
    ///
    /// A face whose embedding fails is dropped with a warning; the image's
    /// other faces are kept.
    fn process_image(&self, path: &Path) -> Result<ImageResult> {
        let img = load_image(path)?;
        let boxes = self.detector.detect(&img)?;

        let mut result = ImageResult {
            faces: Vec::with_capacity(boxes.len()),
            failed_embeddings: 0,
        };

        for (face_index, bbox) in boxes.into_iter().enumerate() {
            match self.extractor.embed(&img, &bbox) {
                Ok(embedding) => result.faces.push(DetectedFace {
                    path: path.to_path_buf(),
                    face_index,
                    bbox,
                    embedding,
                }),
                Err(e) => {
                    warn!(path = %path.display(), face_index, error = %e, "Embedding failed, skipping face");
                    result.failed_embeddings += 1;
                }
            }
        }

        debug!(path = %path.display(), faces = result.faces.len(), "Processed image");
        Ok(result)
    }

    /// Process all images. Output is re-sorted by path and in-image index so
    /// clustering sees the same order regardless of worker scheduling.
    pub fn process_all(&self, paths: &[PathBuf]) -> Result<ScanSummary> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()?;

        info!(images = paths.len(), workers = self.workers, "Scanning for faces");

        let results: Vec<Option<Result<ImageResult>>> = pool.install(|| {
            paths
                .par_iter()
                .map(|path| {
                    if self.cancel.is_cancelled() {
                        None
                    } else {
                        Some(self.process_image(path))
                    }
                })
                .collect()
        });

        if self.cancel.is_cancelled() {
            bail!("Face scan cancelled");
        }

        let mut summary = ScanSummary {
            images: paths.len(),
            ..Default::default()
        };

        for (path, result) in paths.iter().zip(results) {
            match result {
                Some(Ok(image)) => {
                    summary.faces.extend(image.faces);
                    summary.failed_embeddings += image.failed_embeddings;
                }
                Some(Err(e)) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable image");
                    summary.failed_images += 1;
                }
                None => {}
            }
        }

        summary
            .faces
            .sort_by(|a, b| a.path.cmp(&b.path).then(a.face_index.cmp(&b.face_index)));

        info!(
            faces = summary.faces.len(),
            failed_images = summary.failed_images,
            failed_embeddings = summary.failed_embeddings,
            "Face scan finished"
        );
        Ok(summary)
    }
}
