pub mod clustering;
pub mod detector;
pub mod materialize;
pub mod names;
pub mod processor;

pub use clustering::{dbscan, DbscanParams, NOISE};
pub use detector::{ArcFaceExtractor, EmbeddingExtractor, FaceDetector, UltraFaceDetector};
pub use materialize::{materialize, read_manifest, write_manifest, ManifestRow, MaterializeReport};
pub use names::{bind_names, read_mapping, BindReport, TagAction};
pub use processor::{DetectedFace, FaceProcessor, ScanSummary};
