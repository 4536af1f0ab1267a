//! Collaborators that sit outside the ingestion core: the device media
//! index, image decoding, and the photo-library permission gate.

pub mod decode;
pub mod discovery;

use crate::error::ScanError;

pub use decode::{FsImageDecoder, ImageDecoder};
pub use discovery::FsMediaIndex;

/// One row of the media index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRow {
    pub id: i64,
    /// Seconds since the Unix epoch.
    pub date_added: i64,
    /// File path or uri identifying the image.
    pub location: String,
    pub width: u32,
    pub height: u32,
}

/// Filter applied by the media index before rows are returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaQuery {
    /// Keep only rows whose location contains this substring.
    pub path_contains: Option<String>,
}

impl MediaQuery {
    pub fn matches(&self, location: &str) -> bool {
        self.path_contains
            .as_deref()
            .map_or(true, |needle| location.contains(needle))
    }
}

/// Rows in `date_added` descending order. An `Err` item means the index
/// became unreadable part-way through.
pub type MediaCursor = Box<dyn Iterator<Item = Result<MediaRow, ScanError>> + Send>;

/// Read-only catalog of the device's images.
pub trait MediaIndex: Send + Sync {
    fn query(&self, query: &MediaQuery) -> Result<MediaCursor, ScanError>;
}

/// Whether the process may read the photo library.
pub trait PermissionGate: Send + Sync {
    fn is_granted(&self) -> bool;
}
