//! Storage abstraction for the ingestion pipeline and maintenance jobs.
//!
//! The pipeline only talks to this trait, so it runs the same against the
//! SQLite store and against in-memory databases in tests.

use anyhow::Result;

use super::faces::{BoundingBox, Face, NewFace};
use super::{DuplicateGroup, NewPhoto, Photo};

pub trait PhotoStore {
    // === Photo Operations ===

    /// Look up a photo by content hash. With several matches the oldest wins.
    fn find_by_hash(&self, hash: &str) -> Result<Option<Photo>>;

    /// Fetch a photo by id
    fn get_photo(&self, id: i64) -> Result<Option<Photo>>;

    /// Insert a photo, returning its id
    fn create_photo(&self, photo: &NewPhoto) -> Result<i64>;

    /// Overwrite a photo's fields in place, keeping its id and creation time
    fn update_photo(&self, id: i64, photo: &NewPhoto) -> Result<()>;

    /// Delete a photo and its faces
    fn delete_photo(&self, id: i64) -> Result<()>;

    /// Total photo count
    fn count_photos(&self) -> Result<usize>;

    // === Maintenance ===

    /// Photos whose hash is missing or empty
    fn photos_without_hash(&self) -> Result<Vec<Photo>>;

    /// Store a computed hash
    fn set_hash(&self, id: i64, hash: &str) -> Result<()>;

    /// Hashes shared by more than one photo, largest sets first
    fn duplicate_groups(&self) -> Result<Vec<DuplicateGroup>>;

    /// Delete several photos in one transaction
    fn delete_photos(&self, ids: &[i64]) -> Result<usize>;

    // === Face Operations ===

    /// Replace all faces of a photo
    fn replace_faces(&self, photo_id: i64, faces: &[NewFace]) -> Result<()>;

    /// Faces of a photo in insertion order
    fn faces_for_photo(&self, photo_id: i64) -> Result<Vec<Face>>;

    /// Bind `name` (created if new) to faces with this box on photos stored
    /// under `original_path`. Returns the number of faces linked.
    fn assign_person(&self, original_path: &str, bbox: &BoundingBox, name: &str) -> Result<usize>;
}
