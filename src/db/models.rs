//! Photo and face records as stored and read back as aggregates.

use serde::{Deserialize, Serialize};

/// Tag given to every freshly detected face.
pub const UNKNOWN_TAG: &str = "Unknown";

/// A photo that yielded at least one face.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub uri: String,
    /// Seconds since the Unix epoch.
    pub date_added: i64,
    pub width: u32,
    pub height: u32,
}

/// Face bounding box in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f32 {
        (self.right - self.left).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.bottom - self.top).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.left.max(other.left);
        let y1 = self.top.max(other.top);
        let x2 = self.right.min(other.right);
        let y2 = self.bottom.min(other.bottom);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// A detected face. `id` is `None` until the store assigns one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub id: Option<i64>,
    pub photo_uri: String,
    pub bbox: BoundingBox,
    pub tag: String,
}

impl FaceRecord {
    pub fn new(photo_uri: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            id: None,
            photo_uri: photo_uri.into(),
            bbox,
            tag: UNKNOWN_TAG.to_string(),
        }
    }
}

/// A photo together with its faces in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoWithFaces {
    pub photo: PhotoRecord,
    pub faces: Vec<FaceRecord>,
}

impl PhotoWithFaces {
    pub fn face(&self, face_id: i64) -> Option<&FaceRecord> {
        self.faces.iter().find(|f| f.id == Some(face_id))
    }
}
