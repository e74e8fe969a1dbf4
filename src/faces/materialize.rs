//! Review artifacts for a clustering run: the CSV manifest and one contact
//! sheet per cluster.

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::clustering::group_by_label;
use super::detector::load_image;
use super::processor::DetectedFace;
use crate::config::ContactSheetConfig;
use crate::db::BoundingBox;

pub const MANIFEST_FILE: &str = "clusters.csv";

/// One manifest line. Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRow {
    pub cluster_id: i32,
    pub filename: String,
    pub face_index: usize,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl ManifestRow {
    pub fn new(cluster_id: i32, face: &DetectedFace) -> Self {
        Self {
            cluster_id,
            filename: face.path.to_string_lossy().into_owned(),
            face_index: face.face_index,
            top: face.bbox.top,
            right: face.bbox.right,
            bottom: face.bbox.bottom,
            left: face.bbox.left,
        }
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        BoundingBox::new(self.top, self.right, self.bottom, self.left)
    }
}

/// Write the manifest, one row per face in detection order.
pub fn write_manifest(path: &Path, rows: &[ManifestRow]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create manifest {}", path.display()))?;

    if rows.is_empty() {
        wtr.write_record(["cluster_id", "filename", "face_index", "top", "right", "bottom", "left"])?;
    }
    for row in rows {
        wtr.serialize(row)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Read a manifest, skipping rows that do not parse.
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestRow>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open manifest {}", path.display()))?;

    let mut rows = Vec::new();
    for (line, record) in rdr.deserialize::<ManifestRow>().enumerate() {
        match record {
            Ok(row) => rows.push(row),
            Err(e) => warn!(line = line + 2, error = %e, "Skipping malformed manifest row"),
        }
    }
    Ok(rows)
}

/// File name of a cluster's contact sheet
pub fn contact_sheet_name(cluster_id: i32) -> String {
    format!("cluster_{}.jpg", cluster_id)
}

#[derive(Debug, Default)]
pub struct MaterializeReport {
    pub manifest: PathBuf,
    pub sheets: Vec<PathBuf>,
    /// Faces left off their sheet because the crop failed
    pub skipped_crops: usize,
}

/// Keeps the most recently decoded source image; faces of one image are
/// usually adjacent within a cluster.
#[derive(Default)]
struct ImageCache {
    path: Option<PathBuf>,
    image: Option<DynamicImage>,
}

impl ImageCache {
    fn get(&mut self, path: &Path) -> Result<&DynamicImage> {
        if self.path.as_deref() != Some(path) || self.image.is_none() {
            self.image = None;
            self.path = Some(path.to_path_buf());
            self.image = Some(load_image(path)?);
        }
        self.image
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Image cache is empty"))
    }
}

pub struct ContactSheetWriter {
    config: ContactSheetConfig,
}

impl ContactSheetWriter {
    pub fn new(config: ContactSheetConfig) -> Self {
        Self { config }
    }

    fn thumbnail(&self, cache: &mut ImageCache, face: &DetectedFace) -> Result<RgbImage> {
        let img = cache.get(&face.path)?;
        let (width, height) = img.dimensions();
        let bbox = face
            .bbox
            .clamp_to(width, height)
            .ok_or_else(|| anyhow::anyhow!("Face box lies outside the image"))?;

        let crop = img.crop_imm(
            bbox.left as u32,
            bbox.top as u32,
            bbox.width() as u32,
            bbox.height() as u32,
        );
        let size = self.config.thumb_size;
        Ok(crop.resize_exact(size, size, FilterType::Lanczos3).to_rgb8())
    }

    /// Row-major grid of thumbnails; unfilled cells keep the background colour.
    pub fn render(&self, thumbs: &[RgbImage]) -> Option<RgbImage> {
        if thumbs.is_empty() {
            return None;
        }

        let size = self.config.thumb_size;
        let cols = self.config.columns.max(1);
        let rows = (thumbs.len() as u32).div_ceil(cols);
        let mut sheet = RgbImage::from_pixel(cols * size, rows * size, Rgb(self.config.background));

        for (i, thumb) in thumbs.iter().enumerate() {
            let i = i as u32;
            let x = (i % cols) * size;
            let y = (i / cols) * size;
            image::imageops::replace(&mut sheet, thumb, x as i64, y as i64);
        }

        Some(sheet)
    }

    fn save(&self, sheet: &RgbImage, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create contact sheet {}", path.display()))?;
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
            BufWriter::new(file),
            self.config.jpeg_quality,
        );
        encoder.encode_image(sheet)?;
        Ok(())
    }

    /// Write one sheet per label. Returns the sheet paths and the number of
    /// faces whose crop failed.
    fn write_sheets(
        &self,
        out_dir: &Path,
        faces: &[DetectedFace],
        labels: &[i32],
    ) -> Result<(Vec<PathBuf>, usize)> {
        let mut sheets = Vec::new();
        let mut skipped = 0;
        let mut cache = ImageCache::default();

        for (label, members) in group_by_label(labels) {
            let mut thumbs = Vec::with_capacity(members.len());
            for face in members.into_iter().map(|idx| &faces[idx]) {
                match self.thumbnail(&mut cache, face) {
                    Ok(thumb) => thumbs.push(thumb),
                    Err(e) => {
                        warn!(
                            path = %face.path.display(),
                            face_index = face.face_index,
                            cluster = label,
                            error = %e,
                            "Skipping face on contact sheet"
                        );
                        skipped += 1;
                    }
                }
            }

            if let Some(sheet) = self.render(&thumbs) {
                let path = out_dir.join(contact_sheet_name(label));
                self.save(&sheet, &path)?;
                sheets.push(path);
            }
        }

        Ok((sheets, skipped))
    }
}

/// Write the manifest and contact sheets for a clustering result.
/// `faces` and `labels` are parallel slices.
pub fn materialize(
    out_dir: &Path,
    faces: &[DetectedFace],
    labels: &[i32],
    config: &ContactSheetConfig,
) -> Result<MaterializeReport> {
    anyhow::ensure!(
        faces.len() == labels.len(),
        "{} faces but {} cluster labels",
        faces.len(),
        labels.len()
    );
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;

    let rows: Vec<ManifestRow> = faces
        .iter()
        .zip(labels)
        .map(|(face, label)| ManifestRow::new(*label, face))
        .collect();
    let manifest = out_dir.join(MANIFEST_FILE);
    write_manifest(&manifest, &rows)?;
    info!(path = %manifest.display(), rows = rows.len(), "Wrote manifest");

    let writer = ContactSheetWriter::new(config.clone());
    let (sheets, skipped_crops) = writer.write_sheets(out_dir, faces, labels)?;
    info!(sheets = sheets.len(), skipped = skipped_crops, "Wrote contact sheets");

    Ok(MaterializeReport {
        manifest,
        sheets,
        skipped_crops,
    })
}
