//! Lazy, deduplicating enumeration of the media index.

use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::db::{PhotoRecord, PhotoStore};
use crate::error::ScanError;
use crate::media::{MediaCursor, MediaIndex, MediaQuery, MediaRow};

pub struct GalleryScanner {
    index: Arc<dyn MediaIndex>,
    store: PhotoStore,
    query: MediaQuery,
}

impl GalleryScanner {
    pub fn new(index: Arc<dyn MediaIndex>, store: PhotoStore, query: MediaQuery) -> Self {
        Self { index, store, query }
    }

    /// Enumerate unprocessed photos in batches of at most `batch_size`.
    ///
    /// Each call queries the index afresh. A URI is skipped if the store
    /// has it at the moment the scan reaches it.
    pub fn scan(&self, batch_size: NonZeroUsize) -> ScanBatches {
        let (cursor, failure) = match self.index.query(&self.query) {
            Ok(cursor) => (Some(cursor), None),
            Err(e) => {
                tracing::warn!(error = %e, "media index query failed");
                (None, Some(e))
            }
        };

        ScanBatches {
            cursor,
            store: self.store.clone(),
            batch_size: batch_size.get(),
            failure,
            skipped: 0,
        }
    }
}

/// Batches produced by [`GalleryScanner::scan`].
///
/// The sequence ends early if enumeration fails; the failure is then
/// available from [`ScanBatches::failure`].
pub struct ScanBatches {
    cursor: Option<MediaCursor>,
    store: PhotoStore,
    batch_size: usize,
    failure: Option<ScanError>,
    skipped: usize,
}

impl ScanBatches {
    pub fn failure(&self) -> Option<&ScanError> {
        self.failure.as_ref()
    }

    pub fn into_failure(self) -> Option<ScanError> {
        self.failure
    }

    /// Candidates dropped so far because they were already processed.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn fail(&mut self, error: ScanError, discarded: usize) {
        tracing::warn!(error = %error, discarded, "scan ended early");
        self.cursor = None;
        self.failure = Some(error);
    }
}

impl Iterator for ScanBatches {
    type Item = Vec<PhotoRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut batch = Vec::with_capacity(self.batch_size);

        loop {
            let Some(cursor) = self.cursor.as_mut() else {
                return None;
            };

            let row = match cursor.next() {
                Some(Ok(row)) => row,
                Some(Err(e)) => {
                    self.fail(e, batch.len());
                    return None;
                }
                None => {
                    self.cursor = None;
                    return (!batch.is_empty()).then_some(batch);
                }
            };

            match self.store.is_processed(&row.location) {
                Ok(true) => {
                    self.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    self.fail(ScanError::Dedup(e), batch.len());
                    return None;
                }
            }

            batch.push(to_record(row));
            if batch.len() == self.batch_size {
                return Some(batch);
            }
        }
    }
}

fn to_record(row: MediaRow) -> PhotoRecord {
    PhotoRecord {
        uri: row.location,
        date_added: row.date_added,
        width: row.width,
        height: row.height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BoundingBox, FaceRecord};

    /// Index serving a fixed row list, optionally failing after `fail_after` rows.
    struct FakeIndex {
        rows: Vec<MediaRow>,
        fail_after: Option<usize>,
        unavailable: bool,
    }

    impl FakeIndex {
        fn with_uris(uris: &[&str]) -> Self {
            let rows = uris
                .iter()
                .enumerate()
                .map(|(i, uri)| MediaRow {
                    id: i as i64,
                    date_added: 1000 - i as i64,
                    location: uri.to_string(),
                    width: 64,
                    height: 48,
                })
                .collect();
            Self {
                rows,
                fail_after: None,
                unavailable: false,
            }
        }
    }

    impl MediaIndex for FakeIndex {
        fn query(&self, query: &MediaQuery) -> Result<MediaCursor, ScanError> {
            if self.unavailable {
                return Err(ScanError::Read("index offline".to_string()));
            }
            let mut items: Vec<Result<MediaRow, ScanError>> = self
                .rows
                .iter()
                .filter(|r| query.matches(&r.location))
                .cloned()
                .map(Ok)
                .collect();
            if let Some(n) = self.fail_after {
                items.truncate(n);
                items.push(Err(ScanError::Read("cursor closed".to_string())));
            }
            Ok(Box::new(items.into_iter()))
        }
    }

    fn test_store() -> PhotoStore {
        let store = PhotoStore::open_in_memory().unwrap();
        store.initialize().unwrap();
        store
    }

    fn mark_processed(store: &PhotoStore, uri: &str) {
        let photo = PhotoRecord {
            uri: uri.to_string(),
            date_added: 1,
            width: 1,
            height: 1,
        };
        let face = FaceRecord::new(uri, BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        store.insert_with_faces(&photo, &[face]).unwrap();
    }

    fn uris(batch: &[PhotoRecord]) -> Vec<&str> {
        batch.iter().map(|p| p.uri.as_str()).collect()
    }

    fn batch(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_batches_are_full_except_last() {
        let index = FakeIndex::with_uris(&["a", "b", "c", "d", "e"]);
        let scanner = GalleryScanner::new(Arc::new(index), test_store(), MediaQuery::default());

        let batches: Vec<_> = scanner.scan(batch(2)).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(uris(&batches[0]), vec!["a", "b"]);
        assert_eq!(uris(&batches[1]), vec!["c", "d"]);
        assert_eq!(uris(&batches[2]), vec!["e"]);
    }

    #[test]
    fn test_processed_uris_are_skipped() {
        let store = test_store();
        mark_processed(&store, "b");
        mark_processed(&store, "d");

        let index = FakeIndex::with_uris(&["a", "b", "c", "d"]);
        let scanner = GalleryScanner::new(Arc::new(index), store, MediaQuery::default());

        let mut batches = scanner.scan(batch(10));
        let first = batches.next().unwrap();
        assert_eq!(uris(&first), vec!["a", "c"]);
        assert!(batches.next().is_none());
        assert_eq!(batches.skipped(), 2);
        assert!(batches.failure().is_none());
    }

    #[test]
    fn test_dedup_is_checked_when_reached() {
        let store = test_store();
        let index = FakeIndex::with_uris(&["a", "b", "c"]);
        let scanner = GalleryScanner::new(Arc::new(index), store.clone(), MediaQuery::default());

        let mut batches = scanner.scan(batch(1));
        assert_eq!(uris(&batches.next().unwrap()), vec!["a"]);

        // Committed after the scan started but before it reaches "c".
        mark_processed(&store, "c");
        assert_eq!(uris(&batches.next().unwrap()), vec!["b"]);
        assert!(batches.next().is_none());
    }

    #[test]
    fn test_every_scan_enumerates_afresh() {
        let store = test_store();
        let index = FakeIndex::with_uris(&["a", "b"]);
        let scanner = GalleryScanner::new(Arc::new(index), store.clone(), MediaQuery::default());

        assert_eq!(scanner.scan(batch(5)).flatten().count(), 2);
        mark_processed(&store, "a");
        assert_eq!(scanner.scan(batch(5)).flatten().count(), 1);
    }

    #[test]
    fn test_path_filter_is_passed_to_index() {
        let index = FakeIndex::with_uris(&["/DCIM/Camera/a.jpg", "/Download/b.jpg"]);
        let query = MediaQuery {
            path_contains: Some("DCIM/Camera".to_string()),
        };
        let scanner = GalleryScanner::new(Arc::new(index), test_store(), query);

        let all: Vec<_> = scanner.scan(batch(5)).flatten().collect();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].uri, "/DCIM/Camera/a.jpg");
        assert_eq!((all[0].width, all[0].height), (64, 48));
    }

    #[test]
    fn test_mid_scan_failure_discards_partial_batch() {
        let mut index = FakeIndex::with_uris(&["a", "b", "c", "d", "e"]);
        index.fail_after = Some(3);
        let scanner = GalleryScanner::new(Arc::new(index), test_store(), MediaQuery::default());

        let mut batches = scanner.scan(batch(2));
        assert_eq!(uris(&batches.next().unwrap()), vec!["a", "b"]);
        // "c" was pending when the cursor failed.
        assert!(batches.next().is_none());
        assert!(batches.next().is_none());
        assert!(matches!(batches.failure(), Some(ScanError::Read(_))));
    }

    #[test]
    fn test_unavailable_index_yields_nothing_but_reports_failure() {
        let mut index = FakeIndex::with_uris(&["a"]);
        index.unavailable = true;
        let scanner = GalleryScanner::new(Arc::new(index), test_store(), MediaQuery::default());

        let mut batches = scanner.scan(batch(2));
        assert!(batches.next().is_none());
        assert!(batches.into_failure().is_some());
    }

    #[test]
    fn test_empty_index_is_not_a_failure() {
        let index = FakeIndex::with_uris(&[]);
        let scanner = GalleryScanner::new(Arc::new(index), test_store(), MediaQuery::default());

        let mut batches = scanner.scan(batch(2));
        assert!(batches.next().is_none());
        assert!(batches.failure().is_none());
    }
}
