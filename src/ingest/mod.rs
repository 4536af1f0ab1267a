//! Batch-by-batch ingestion: scan, decode, detect, persist.
//!
//! Batches are handled one after another; photos within a batch run
//! concurrently. A photo that fails is logged and skipped without affecting
//! its siblings.

mod progress;

pub use progress::IngestionState;

use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::db::{FaceRecord, PhotoRecord, PhotoStore};
use crate::error::{IngestError, PhotoError};
use crate::faces::DetectionPort;
use crate::media::{ImageDecoder, PermissionGate};
use crate::scanner::GalleryScanner;
use progress::ProgressPublisher;

/// What happened to one photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoOutcome {
    Persisted { faces: usize },
    NoFaces,
}

/// Summary of one `run`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub batches: usize,
    pub processed: usize,
    pub persisted: usize,
    pub faces_found: usize,
    pub failed: usize,
    pub cancelled: bool,
    /// Why enumeration stopped early, if it did.
    pub scan_error: Option<String>,
}

#[derive(Debug, Default)]
struct BatchSummary {
    persisted: usize,
    faces_found: usize,
    failed: usize,
}

/// Decode, detect and persist a single photo.
#[derive(Clone)]
struct PhotoPipeline {
    decoder: Arc<dyn ImageDecoder>,
    detector: DetectionPort,
    store: PhotoStore,
}

impl PhotoPipeline {
    async fn process(self, mut photo: PhotoRecord) -> Result<PhotoOutcome, PhotoError> {
        let decoder = Arc::clone(&self.decoder);
        let uri = photo.uri.clone();
        let image = tokio::task::spawn_blocking(move || decoder.decode(&uri))
            .await
            .map_err(|e| PhotoError::Worker(format!("decode task failed: {e}")))??;

        let detection = self.detector.detect(image).await?;
        tracing::debug!(
            uri = %photo.uri,
            faces = detection.matches.len(),
            timing_ms = detection.timing_ms,
            "detection finished"
        );
        if detection.matches.is_empty() {
            return Ok(PhotoOutcome::NoFaces);
        }

        // The media index could not read the header; the decoder could.
        if photo.width == 0 || photo.height == 0 {
            photo.width = detection.image_width;
            photo.height = detection.image_height;
        }

        let faces: Vec<FaceRecord> = detection
            .matches
            .iter()
            .map(|bbox| FaceRecord::new(photo.uri.as_str(), *bbox))
            .collect();

        let store = self.store.clone();
        let stored = tokio::task::spawn_blocking(move || store.insert_with_faces(&photo, &faces))
            .await
            .map_err(|e| PhotoError::Worker(format!("store task failed: {e}")))??;

        Ok(PhotoOutcome::Persisted {
            faces: stored.faces.len(),
        })
    }
}

pub struct IngestionCoordinator {
    scanner: Arc<GalleryScanner>,
    pipeline: PhotoPipeline,
    permission: Arc<dyn PermissionGate>,
    progress: ProgressPublisher,
}

impl IngestionCoordinator {
    pub fn new(
        scanner: GalleryScanner,
        detector: DetectionPort,
        store: PhotoStore,
        decoder: Arc<dyn ImageDecoder>,
        permission: Arc<dyn PermissionGate>,
    ) -> Self {
        Self {
            scanner: Arc::new(scanner),
            pipeline: PhotoPipeline {
                decoder,
                detector,
                store,
            },
            permission,
            progress: ProgressPublisher::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<IngestionState> {
        self.progress.subscribe()
    }

    pub fn state(&self) -> IngestionState {
        self.progress.snapshot()
    }

    /// Run one ingestion pass over every unprocessed photo.
    ///
    /// Cancelling `cancel` stops pulling batches and abandons the batch in
    /// flight; that batch is not counted.
    pub async fn run(
        &self,
        batch_size: NonZeroUsize,
        cancel: CancellationToken,
    ) -> Result<IngestReport, IngestError> {
        if !self.permission.is_granted() {
            tracing::warn!("photo library access not granted, ingestion not started");
            return Err(IngestError::PermissionDenied(
                "media index refused read access".to_string(),
            ));
        }

        let _loading = self.progress.loading();
        tracing::info!(batch_size = batch_size.get(), "ingestion started");

        // Capacity 1 keeps the scan at most one batch ahead of processing.
        let (tx, mut rx) = mpsc::channel::<Vec<PhotoRecord>>(1);
        let scanner = Arc::clone(&self.scanner);
        let producer = tokio::task::spawn_blocking(move || {
            let mut batches = scanner.scan(batch_size);
            for batch in batches.by_ref() {
                if tx.blocking_send(batch).is_err() {
                    break;
                }
            }
            batches.into_failure()
        });

        let mut report = IngestReport::default();
        loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                batch = rx.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };

            let size = batch.len();
            let summary = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                summary = self.process_batch(batch) => summary,
            };

            report.batches += 1;
            report.processed += size;
            report.persisted += summary.persisted;
            report.faces_found += summary.faces_found;
            report.failed += summary.failed;
            self.progress.advance(size);
            tracing::debug!(
                batch = report.batches,
                size,
                persisted = summary.persisted,
                failed = summary.failed,
                "batch complete"
            );
        }
        drop(rx);

        if report.cancelled {
            tracing::info!(processed = report.processed, "ingestion cancelled");
        } else {
            match producer.await {
                Ok(Some(e)) => report.scan_error = Some(e.to_string()),
                Ok(None) => {}
                Err(e) => report.scan_error = Some(format!("scan task failed: {e}")),
            }
            tracing::info!(
                processed = report.processed,
                persisted = report.persisted,
                faces = report.faces_found,
                failed = report.failed,
                scan_error = report.scan_error.as_deref(),
                "ingestion finished"
            );
        }

        Ok(report)
    }

    /// Dropping the returned future aborts every task still in the set.
    async fn process_batch(&self, batch: Vec<PhotoRecord>) -> BatchSummary {
        let mut tasks = JoinSet::new();
        for photo in batch {
            let pipeline = self.pipeline.clone();
            tasks.spawn(async move {
                let uri = photo.uri.clone();
                (uri, pipeline.process(photo).await)
            });
        }

        let mut summary = BatchSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((uri, Ok(PhotoOutcome::Persisted { faces }))) => {
                    tracing::debug!(uri = %uri, faces, "photo persisted");
                    summary.persisted += 1;
                    summary.faces_found += faces;
                }
                Ok((uri, Ok(PhotoOutcome::NoFaces))) => {
                    tracing::debug!(uri = %uri, "no faces found");
                }
                Ok((uri, Err(e))) => {
                    tracing::warn!(uri = %uri, error = %e, "photo skipped");
                    summary.failed += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, "photo task aborted");
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}
