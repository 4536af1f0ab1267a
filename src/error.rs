//! Error types for each stage of the ingestion pipeline.
//!
//! Per-photo failures (`DecodeError`, `DetectionError`, `StoreError`) are
//! contained inside the photo's own task and surface as [`PhotoError`].
//! Only [`ScanError`] can end a run early, and it does so by exhausting the
//! batch sequence rather than by returning an error to the caller.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("photo store lock poisoned")]
    Poisoned,
    #[error("refusing to persist {uri} without any faces")]
    EmptyAggregate { uri: String },
    #[error("face belongs to {face_uri}, not {uri}")]
    ForeignFace { uri: String, face_uri: String },
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("media index unavailable at {root}: {reason}")]
    Unavailable { root: PathBuf, reason: String },
    #[error("media index read failed: {0}")]
    Read(String),
    #[error("dedup check failed: {0}")]
    Dedup(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("failed to decode {uri}: {source}")]
    Image {
        uri: String,
        #[source]
        source: image::ImageError,
    },
    #[error("cannot read {uri}: {reason}")]
    Unreadable { uri: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectionError {
    #[error("face detector init failed: {0}")]
    InitFailed(String),
    #[error("face detector is closed")]
    Closed,
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("detection worker failed: {0}")]
    Worker(String),
}

/// Failure of a single photo's decode, detect and persist unit.
#[derive(Error, Debug)]
pub enum PhotoError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Detection(#[from] DetectionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("worker task failed: {0}")]
    Worker(String),
}

/// Errors that prevent an ingestion run from starting.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("photo library read access not granted: {0}")]
    PermissionDenied(String),
}

#[derive(Error, Debug)]
pub enum TagError {
    #[error("no photo stored for {0}")]
    PhotoNotFound(String),
    #[error("photo {uri} has no face with id {face_id}")]
    FaceNotFound { uri: String, face_id: i64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}
