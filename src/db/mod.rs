mod schema;
pub mod backend;
pub mod faces;
pub mod maintenance;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde_json::Value;

pub use backend::PhotoStore;
pub use faces::{BoundingBox, Face, NewFace, Person};
pub use schema::SCHEMA;
pub use sqlite::SqliteStore;

/// A stored photo record
#[derive(Debug, Clone, PartialEq)]
pub struct Photo {
    pub id: i64,
    pub original_path: String,
    pub file_hash: Option<String>,
    pub title: String,
    pub description: String,
    pub taken_at: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub json_metadata: Option<Value>,
    pub created_at: String,
}

/// Field values for creating or replacing a photo
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewPhoto {
    pub original_path: String,
    pub file_hash: Option<String>,
    pub title: String,
    pub description: String,
    pub taken_at: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub json_metadata: Option<Value>,
}

/// Photos sharing one content hash, oldest first
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub file_hash: String,
    pub photos: Vec<Photo>,
}

impl DuplicateGroup {
    /// The photo kept when duplicates are removed
    pub fn keeper(&self) -> Option<&Photo> {
        self.photos.first()
    }

    /// Photos removed when duplicates are removed
    pub fn extras(&self) -> &[Photo] {
        self.photos.get(1..).unwrap_or(&[])
    }
}
