use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use super::{MediaCursor, MediaIndex, MediaQuery, MediaRow, PermissionGate};
use crate::error::ScanError;

/// Media index backed by a directory tree of image files.
///
/// Only paths and modification times are read while walking; `date_added`
/// is the mtime. Dimensions are left at 0 and filled in from the decoded
/// image when a photo is stored.
#[derive(Debug, Clone)]
pub struct FsMediaIndex {
    root: PathBuf,
    extensions: Vec<String>,
}

impl FsMediaIndex {
    pub fn new(root: impl Into<PathBuf>, extensions: &[String]) -> Self {
        Self {
            root: root.into(),
            extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
        }
    }

    fn has_image_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|e| *e == ext))
    }

    /// Walk the root. A failure below the root stops the walk and is
    /// returned next to the rows found before it.
    fn discover(
        &self,
        query: &MediaQuery,
    ) -> Result<(Vec<MediaRow>, Option<ScanError>), ScanError> {
        std::fs::read_dir(&self.root).map_err(|e| ScanError::Unavailable {
            root: self.root.clone(),
            reason: e.to_string(),
        })?;

        let mut rows = Vec::new();
        let mut walk_error = None;

        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(root = %self.root.display(), error = %e, "media walk failed");
                    walk_error = Some(ScanError::Read(e.to_string()));
                    break;
                }
            };

            let path = entry.path();
            if !entry.file_type().is_file() || !self.has_image_extension(path) {
                continue;
            }

            let location = path.to_string_lossy().to_string();
            if !query.matches(&location) {
                continue;
            }

            let date_added = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);

            rows.push(MediaRow {
                id: 0,
                date_added,
                location,
                width: 0,
                height: 0,
            });
        }

        // Most recent first; location keeps equal timestamps in a stable order.
        rows.sort_by(|a, b| {
            b.date_added
                .cmp(&a.date_added)
                .then_with(|| a.location.cmp(&b.location))
        });
        for (index, row) in rows.iter_mut().enumerate() {
            row.id = index as i64 + 1;
        }

        Ok((rows, walk_error))
    }
}

/// Rows in order, then the walk failure (if any) as the final item.
fn into_cursor(rows: Vec<MediaRow>, walk_error: Option<ScanError>) -> MediaCursor {
    Box::new(rows.into_iter().map(Ok).chain(walk_error.into_iter().map(Err)))
}

impl MediaIndex for FsMediaIndex {
    fn query(&self, query: &MediaQuery) -> Result<MediaCursor, ScanError> {
        let (rows, walk_error) = self.discover(query)?;
        tracing::debug!(root = %self.root.display(), rows = rows.len(), "media index queried");
        Ok(into_cursor(rows, walk_error))
    }
}

impl PermissionGate for FsMediaIndex {
    fn is_granted(&self) -> bool {
        std::fs::read_dir(&self.root).is_ok()
    }
}
