//! Incremental face-tagging ingestion for a local photo collection.
//!
//! A [`scanner::GalleryScanner`] enumerates unprocessed photos in batches,
//! an [`ingest::IngestionCoordinator`] runs face detection on each batch
//! through a [`faces::DetectionPort`], and photos with faces land in a
//! [`db::PhotoStore`] where they can be paged through and retagged.

pub mod config;
pub mod db;
pub mod error;
pub mod faces;
pub mod ingest;
pub mod logging;
pub mod media;
pub mod scanner;
pub mod tagging;
