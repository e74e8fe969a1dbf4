pub mod archive;
pub mod lifecycle;
pub mod pipeline;

pub use archive::{extract_to_scratch, is_archive, ArchiveKind};
pub use lifecycle::{unique_destination, LifecycleDirs};
pub use pipeline::{IngestOptions, IngestPipeline, IngestReport};
