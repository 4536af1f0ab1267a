use serde::Serialize;
use tokio::sync::watch;

/// Snapshot of ingestion progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestionState {
    /// True while a run is pulling and processing batches.
    pub is_loading: bool,
    /// Photos handed to the pipeline since the coordinator was created.
    pub processed_count: u64,
    /// Runs currently in progress. `is_loading` is true while this is non-zero.
    pub active_runs: u32,
}

/// Single writer side of the progress channel.
pub(crate) struct ProgressPublisher {
    tx: watch::Sender<IngestionState>,
}

impl ProgressPublisher {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(IngestionState::default());
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<IngestionState> {
        self.tx.subscribe()
    }

    pub(crate) fn snapshot(&self) -> IngestionState {
        *self.tx.borrow()
    }

    pub(crate) fn advance(&self, photos: usize) {
        self.tx
            .send_modify(|state| state.processed_count += photos as u64);
    }

    /// Register a run; the state stays loading until every guard is dropped.
    pub(crate) fn loading(&self) -> LoadingGuard<'_> {
        self.tx.send_modify(|state| {
            state.active_runs += 1;
            state.is_loading = true;
        });
        LoadingGuard { publisher: self }
    }

    fn finish_run(&self) {
        self.tx.send_modify(|state| {
            state.active_runs = state.active_runs.saturating_sub(1);
            state.is_loading = state.active_runs > 0;
        });
    }
}

pub(crate) struct LoadingGuard<'a> {
    publisher: &'a ProgressPublisher,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.publisher.finish_run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_clears_loading_on_drop() {
        let publisher = ProgressPublisher::new();
        let rx = publisher.subscribe();
        assert!(!rx.borrow().is_loading);

        {
            let _guard = publisher.loading();
            assert!(rx.borrow().is_loading);
        }
        assert!(!rx.borrow().is_loading);
    }

    #[test]
    fn test_count_accumulates() {
        let publisher = ProgressPublisher::new();
        publisher.advance(2);
        publisher.advance(3);
        assert_eq!(publisher.snapshot().processed_count, 5);
    }

    #[test]
    fn test_overlapping_runs_keep_loading() {
        let publisher = ProgressPublisher::new();

        let first = publisher.loading();
        let second = publisher.loading();
        assert_eq!(publisher.snapshot().active_runs, 2);

        drop(first);
        assert!(publisher.snapshot().is_loading);

        drop(second);
        let state = publisher.snapshot();
        assert!(!state.is_loading);
        assert_eq!(state.active_runs, 0);
    }
}
