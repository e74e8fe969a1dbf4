use anyhow::{anyhow, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::DetectionModel;
use crate::db::BoundingBox;

/// Finds face boxes in a decoded image, in the model's output order.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, img: &DynamicImage) -> Result<Vec<BoundingBox>>;
}

/// Computes a fixed-length identity vector for one face of an image.
pub trait EmbeddingExtractor: Send + Sync {
    fn embed(&self, img: &DynamicImage, bbox: &BoundingBox) -> Result<Vec<f32>>;
}

const ARCFACE_FILE: &str = "arcface-resnet100.onnx";
const ARCFACE_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/arcface/model/arcfaceresnet100-11-int8.onnx";

impl DetectionModel {
    /// Network input size as (width, height)
    pub fn input_size(self) -> (u32, u32) {
        match self {
            DetectionModel::Rfb320 => (320, 240),
            DetectionModel::Rfb640 => (640, 480),
        }
    }

    fn file_name(self) -> &'static str {
        match self {
            DetectionModel::Rfb320 => "ultraface-320.onnx",
            DetectionModel::Rfb640 => "ultraface-640.onnx",
        }
    }

    fn url(self) -> &'static str {
        match self {
            DetectionModel::Rfb320 => "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx",
            DetectionModel::Rfb640 => "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-640.onnx",
        }
    }
}

/// Download a model file if it doesn't exist
fn ensure_model(models_dir: &Path, filename: &str, url: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(models_dir)?;
    let model_path = models_dir.join(filename);

    if !model_path.exists() {
        tracing::info!(model = %filename, "Downloading model...");
        let response = ureq::get(url)
            .call()
            .map_err(|e| anyhow!("Failed to download model: {}", e))?;

        // Write beside the target first so an interrupted download is never mistaken for a model
        let partial = model_path.with_extension("onnx.part");
        let mut file = std::fs::File::create(&partial)?;
        std::io::copy(&mut response.into_reader(), &mut file)?;
        std::fs::rename(&partial, &model_path)?;
        tracing::info!(model = %filename, path = ?model_path, "Model downloaded");
    }

    Ok(model_path)
}

fn load_session(path: &Path) -> Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(path)?;
    Ok(session)
}

/// Load an image for detection
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|e| anyhow!("Failed to load image {}: {}", path.display(), e))
}

/// UltraFace detector (lightweight and fast)
pub struct UltraFaceDetector {
    session: Mutex<Session>,
    model: DetectionModel,
}

impl UltraFaceDetector {
    const CONFIDENCE_THRESHOLD: f32 = 0.7;
    const NMS_THRESHOLD: f32 = 0.3;

    pub fn load(models_dir: &Path, model: DetectionModel) -> Result<Self> {
        let path = ensure_model(models_dir, model.file_name(), model.url())?;
        Ok(Self {
            session: Mutex::new(load_session(&path)?),
            model,
        })
    }
}

impl FaceDetector for UltraFaceDetector {
    fn detect(&self, img: &DynamicImage) -> Result<Vec<BoundingBox>> {
        let (input_width, input_height) = self.model.input_size();
        let (orig_width, orig_height) = img.dimensions();

        let resized = img.resize_exact(input_width, input_height, image::imageops::FilterType::Triangle);
        let input_data = to_nchw(&resized, 127.0, 128.0);
        let input_tensor = Tensor::from_array((
            [1usize, 3, input_height as usize, input_width as usize],
            input_data.into_boxed_slice(),
        ))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow!("Failed to lock detection model: {}", e))?;
        let outputs = session.run(ort::inputs!["input" => input_tensor])?;

        let scores_value = outputs.get("scores")
            .ok_or_else(|| anyhow!("No scores output"))?;
        let boxes_value = outputs.get("boxes")
            .ok_or_else(|| anyhow!("No boxes output"))?;

        let (scores_shape, scores_data) = scores_value.try_extract_tensor::<f32>()?;
        let (_boxes_shape, boxes_data) = boxes_value.try_extract_tensor::<f32>()?;

        // scores: [1, anchors, 2] (background, face); boxes: [1, anchors, 4] normalised x1 y1 x2 y2
        let num_anchors = scores_shape.get(1).copied().unwrap_or(0).max(0) as usize;
        let mut candidates = Vec::new();

        for i in 0..num_anchors {
            let confidence = scores_data[i * 2 + 1];
            if confidence <= Self::CONFIDENCE_THRESHOLD {
                continue;
            }

            let x1 = (boxes_data[i * 4] * orig_width as f32) as i32;
            let y1 = (boxes_data[i * 4 + 1] * orig_height as f32) as i32;
            let x2 = (boxes_data[i * 4 + 2] * orig_width as f32) as i32;
            let y2 = (boxes_data[i * 4 + 3] * orig_height as f32) as i32;

            let bbox = BoundingBox::new(y1, x2, y2, x1).and_then(|b| b.clamp_to(orig_width, orig_height));
            if let Some(bbox) = bbox {
                candidates.push((bbox, confidence));
            }
        }

        Ok(nms(candidates, Self::NMS_THRESHOLD)
            .into_iter()
            .map(|(bbox, _)| bbox)
            .collect())
    }
}

/// ArcFace embedding model (512-dim, L2 normalised)
pub struct ArcFaceExtractor {
    session: Mutex<Session>,
}

impl ArcFaceExtractor {
    const INPUT_SIZE: u32 = 112;

    pub fn load(models_dir: &Path) -> Result<Self> {
        let path = ensure_model(models_dir, ARCFACE_FILE, ARCFACE_URL)?;
        Ok(Self {
            session: Mutex::new(load_session(&path)?),
        })
    }
}

impl EmbeddingExtractor for ArcFaceExtractor {
    fn embed(&self, img: &DynamicImage, bbox: &BoundingBox) -> Result<Vec<f32>> {
        let face_img = crop_face(img, bbox)
            .ok_or_else(|| anyhow!("Face box lies outside the image"))?;
        let resized = face_img.resize_exact(
            Self::INPUT_SIZE,
            Self::INPUT_SIZE,
            image::imageops::FilterType::Triangle,
        );
        let input_data = to_nchw(&resized, 127.5, 127.5);
        let input_tensor = Tensor::from_array((
            [1usize, 3, Self::INPUT_SIZE as usize, Self::INPUT_SIZE as usize],
            input_data.into_boxed_slice(),
        ))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow!("Failed to lock embedding model: {}", e))?;
        // ArcFace ONNX model uses "data" as input name
        let outputs = session.run(ort::inputs!["data" => input_tensor])?;

        let embedding_output = outputs.iter().next()
            .ok_or_else(|| anyhow!("No embedding output"))?;
        let (_shape, embedding_data) = embedding_output.1.try_extract_tensor::<f32>()?;

        Ok(l2_normalize(embedding_data.to_vec()))
    }
}

/// Pack an RGB image into a normalised NCHW buffer: `(pixel - mean) / scale`.
fn to_nchw(img: &DynamicImage, mean: f32, scale: f32) -> Vec<f32> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let idx = y as usize * width as usize + x as usize;
        data[idx] = (pixel[0] as f32 - mean) / scale;
        data[plane + idx] = (pixel[1] as f32 - mean) / scale;
        data[2 * plane + idx] = (pixel[2] as f32 - mean) / scale;
    }

    data
}

fn l2_normalize(v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.into_iter().map(|x| x / norm).collect()
    } else {
        v
    }
}

/// Non-maximum suppression to remove overlapping detections
fn nms(mut boxes: Vec<(BoundingBox, f32)>, threshold: f32) -> Vec<(BoundingBox, f32)> {
    boxes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }

        keep.push(boxes[i]);

        for j in (i + 1)..boxes.len() {
            if !suppressed[j] && compute_iou(&boxes[i].0, &boxes[j].0) > threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Intersection over Union between two bounding boxes
fn compute_iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let left = a.left.max(b.left);
    let top = a.top.max(b.top);
    let right = a.right.min(b.right);
    let bottom = a.bottom.min(b.bottom);

    let intersection = ((right - left).max(0) * (bottom - top).max(0)) as f32;
    let area_a = (a.width() * a.height()) as f32;
    let area_b = (b.width() * b.height()) as f32;
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Crop the face region with 20% padding, clipped to the image
fn crop_face(img: &DynamicImage, bbox: &BoundingBox) -> Option<DynamicImage> {
    let (width, height) = img.dimensions();
    let pad_x = (bbox.width() as f32 * 0.2) as i32;
    let pad_y = (bbox.height() as f32 * 0.2) as i32;

    let padded = BoundingBox::new(
        bbox.top - pad_y,
        bbox.right + pad_x,
        bbox.bottom + pad_y,
        bbox.left - pad_x,
    )?
    .clamp_to(width, height)?;

    Some(img.crop_imm(
        padded.left as u32,
        padded.top as u32,
        padded.width() as u32,
        padded.height() as u32,
    ))
}

/// Euclidean distance between two embeddings; `f32::MAX` on length mismatch
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }

    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}
