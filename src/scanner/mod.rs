pub mod discovery;
pub mod hashing;
pub mod merge;
pub mod sidecar;

pub use discovery::{discover_media, has_extension};
pub use hashing::{hash_file, hash_files, hash_reader};
pub use merge::{merge_export, MergeReport};
pub use sidecar::{read_metadata_for, Field, Sidecar, SidecarMetadata};
