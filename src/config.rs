use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Directory for rolling log files; stderr only when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub contact_sheet: ContactSheetConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub exiftool: ExifToolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Extensions considered for face scanning.
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    /// Extensions imported from an export (images and videos).
    #[serde(default = "default_media_extensions")]
    pub media_extensions: Vec<String>,
}

fn default_image_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "heic", "webp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_media_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "heic", "heif", "webp", "gif", "mp4", "mov"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
            media_extensions: default_media_extensions(),
        }
    }
}

/// UltraFace variant used for detection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DetectionModel {
    /// 320x240 input, fast
    #[default]
    Rfb320,
    /// 640x480 input, finds smaller faces
    Rfb640,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Neighbourhood radius (Euclidean, on L2-normalised embeddings).
    #[serde(default = "default_eps")]
    pub eps: f32,

    /// Other faces required within `eps` for a face to be a core point.
    #[serde(default = "default_min_points")]
    pub min_points: usize,

    #[serde(default)]
    pub model: DetectionModel,

    /// Worker threads for detection and embedding.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_eps() -> f32 {
    0.9
}

fn default_min_points() -> usize {
    1
}

fn default_workers() -> usize {
    4
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            eps: default_eps(),
            min_points: default_min_points(),
            model: DetectionModel::default(),
            workers: default_workers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactSheetConfig {
    #[serde(default = "default_thumb_size")]
    pub thumb_size: u32,

    #[serde(default = "default_columns")]
    pub columns: u32,

    /// RGB fill for empty grid cells.
    #[serde(default = "default_background")]
    pub background: [u8; 3],

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_thumb_size() -> u32 {
    128
}

fn default_columns() -> u32 {
    8
}

fn default_background() -> [u8; 3] {
    [30, 30, 30]
}

fn default_jpeg_quality() -> u8 {
    85
}

impl Default for ContactSheetConfig {
    fn default() -> Self {
        Self {
            thumb_size: default_thumb_size(),
            columns: default_columns(),
            background: default_background(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

/// What to do when an imported file's content already exists in the store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    #[default]
    Skip,
    Replace,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_intake_dir")]
    pub intake_dir: PathBuf,

    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,

    #[serde(default = "default_pending_dir")]
    pub pending_dir: PathBuf,

    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,

    #[serde(default)]
    pub people_only: bool,
}

fn ingest_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("facesort")
}

fn default_intake_dir() -> PathBuf {
    ingest_root().join("intake")
}

fn default_processed_dir() -> PathBuf {
    ingest_root().join("processed")
}

fn default_pending_dir() -> PathBuf {
    ingest_root().join("pending_review")
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            intake_dir: default_intake_dir(),
            processed_dir: default_processed_dir(),
            pending_dir: default_pending_dir(),
            duplicate_policy: DuplicatePolicy::default(),
            people_only: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_models_dir")]
    pub dir: PathBuf,
}

fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("facesort")
        .join("models")
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: default_models_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExifToolConfig {
    /// Executable name or absolute path.
    #[serde(default = "default_exiftool_path")]
    pub path: PathBuf,
}

fn default_exiftool_path() -> PathBuf {
    PathBuf::from("exiftool")
}

impl Default for ExifToolConfig {
    fn default() -> Self {
        Self {
            path: default_exiftool_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("facesort")
        .join("facesort.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_dir: None,
            scanner: ScannerConfig::default(),
            clustering: ClusteringConfig::default(),
            contact_sheet: ContactSheetConfig::default(),
            ingest: IngestConfig::default(),
            models: ModelsConfig::default(),
            exiftool: ExifToolConfig::default(),
        }
    }
}

impl Config {
    /// Load from the default location, writing defaults there on first run.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// `FACESORT_CONFIG` wins over `$XDG_CONFIG_HOME/facesort/config.toml`.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("FACESORT_CONFIG") {
            return PathBuf::from(path);
        }

        Self::config_dir().join("config.toml")
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("facesort")
    }
}
