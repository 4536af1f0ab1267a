//! Shared, bounded-concurrency entry point to a [`FaceDetector`].

use image::DynamicImage;
use std::num::NonZeroUsize;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Semaphore;

use super::detector::{Detection, FaceDetector};
use crate::error::DetectionError;

enum PortState {
    Ready(Arc<dyn FaceDetector>),
    Failed(String),
    Closed,
}

struct PortInner {
    state: RwLock<PortState>,
    permits: Arc<Semaphore>,
}

/// Cloneable handle that dispatches detection calls to the blocking pool,
/// at most `max_concurrency` at a time.
#[derive(Clone)]
pub struct DetectionPort {
    inner: Arc<PortInner>,
}

impl DetectionPort {
    pub fn new(detector: Arc<dyn FaceDetector>, max_concurrency: NonZeroUsize) -> Self {
        Self::with_state(PortState::Ready(detector), max_concurrency)
    }

    /// Wrap the outcome of opening a detector. A failed open is remembered:
    /// every `detect` reports it and nothing is retried.
    pub fn from_init<D>(result: Result<D, DetectionError>, max_concurrency: NonZeroUsize) -> Self
    where
        D: FaceDetector + 'static,
    {
        match result {
            Ok(detector) => Self::new(Arc::new(detector), max_concurrency),
            Err(e) => {
                tracing::error!(error = %e, "face detector unavailable");
                let reason = match e {
                    DetectionError::InitFailed(reason) => reason,
                    other => other.to_string(),
                };
                Self::with_state(PortState::Failed(reason), max_concurrency)
            }
        }
    }

    fn with_state(state: PortState, max_concurrency: NonZeroUsize) -> Self {
        Self {
            inner: Arc::new(PortInner {
                state: RwLock::new(state),
                permits: Arc::new(Semaphore::new(max_concurrency.get())),
            }),
        }
    }

    fn current(&self) -> Result<Arc<dyn FaceDetector>, DetectionError> {
        let state = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            PortState::Ready(detector) => Ok(Arc::clone(detector)),
            PortState::Failed(reason) => Err(DetectionError::InitFailed(reason.clone())),
            PortState::Closed => Err(DetectionError::Closed),
        }
    }

    pub async fn detect(&self, image: DynamicImage) -> Result<Detection, DetectionError> {
        // Fail fast without queueing behind other callers.
        self.current()?;

        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| DetectionError::Closed)?;
        let detector = self.current()?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            detector.detect(&image)
        })
        .await
        .map_err(|e| DetectionError::Worker(format!("detection task panicked: {e}")))?
    }

    /// Release the detector. Calls already running finish; later calls fail
    /// with [`DetectionError::Closed`].
    pub fn close(&self) {
        let previous = {
            let mut state = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, PortState::Closed)
        };
        self.inner.permits.close();

        match previous {
            PortState::Ready(detector) => {
                detector.close();
                tracing::debug!("detection port closed");
            }
            PortState::Failed(_) => tracing::debug!("detection port closed after failed init"),
            PortState::Closed => tracing::warn!("detection port already closed"),
        }
    }

    pub fn is_closed(&self) -> bool {
        let state = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
        matches!(*state, PortState::Closed)
    }
}
