//! Face and person records.

use serde::{Deserialize, Serialize};

/// Pixel bounding box of a face, `top < bottom` and `left < right`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl BoundingBox {
    /// Returns `None` for degenerate boxes.
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Option<Self> {
        if top < bottom && left < right {
            Some(Self {
                top,
                right,
                bottom,
                left,
            })
        } else {
            None
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Clip to an image of the given size. `None` if nothing remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        let max_x = width.min(i32::MAX as u32) as i32;
        let max_y = height.min(i32::MAX as u32) as i32;
        Self::new(
            self.top.clamp(0, max_y),
            self.right.clamp(0, max_x),
            self.bottom.clamp(0, max_y),
            self.left.clamp(0, max_x),
        )
    }
}

/// A stored face in a photo
#[derive(Debug, Clone)]
pub struct Face {
    pub id: i64,
    pub photo_id: i64,
    pub person_id: Option<i64>,
    pub bbox: BoundingBox,
    pub embedding: Option<Vec<f32>>,
}

/// Face data to attach to a photo.
#[derive(Debug, Clone)]
pub struct NewFace {
    pub bbox: BoundingBox,
    pub embedding: Option<Vec<f32>>,
}

/// A named individual
#[derive(Debug, Clone)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub notes: String,
}

pub(crate) fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub(crate) fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
