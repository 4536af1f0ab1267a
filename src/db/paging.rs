//! Offset-paged, live-updating view over stored aggregates.
//!
//! Pages are loaded on demand and carry no placeholders. Every committed
//! store write bumps a change generation; a view that has seen a newer
//! generation than the one its pages were loaded at is stale and should be
//! reloaded from the first page.

use tokio::sync::watch;

use super::{PhotoStore, PhotoWithFaces};
use crate::error::StoreError;

pub const PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub index: usize,
    pub items: Vec<PhotoWithFaces>,
    /// Index of the following page, if there is one.
    pub next: Option<usize>,
}

pub struct PagedView {
    store: PhotoStore,
    page_size: usize,
    changes: watch::Receiver<u64>,
}

impl PagedView {
    pub(crate) fn new(store: PhotoStore, page_size: usize) -> Self {
        let changes = store.subscribe();
        Self {
            store,
            page_size: page_size.max(1),
            changes,
        }
    }

    /// Load one page and mark the current store generation as seen.
    pub fn load(&mut self, index: usize) -> Result<Page, StoreError> {
        self.changes.borrow_and_update();

        // An index whose offset SQLite cannot represent is past the end.
        let offset = index
            .checked_mul(self.page_size)
            .and_then(|offset| i64::try_from(offset).ok());
        let Some(offset) = offset else {
            return Ok(Page {
                index,
                items: Vec::new(),
                next: None,
            });
        };

        // One extra row tells us whether another page follows.
        let limit = self.page_size as i64 + 1;
        let mut items = self.store.load_page(offset, limit)?;
        let next = if items.len() > self.page_size {
            items.truncate(self.page_size);
            index.checked_add(1)
        } else {
            None
        };

        Ok(Page { index, items, next })
    }

    /// Load every page in order, concatenated.
    pub fn load_all(&mut self) -> Result<Vec<PhotoWithFaces>, StoreError> {
        let mut all = Vec::new();
        let mut index = Some(0);
        while let Some(current) = index {
            let page = self.load(current)?;
            all.extend(page.items);
            index = page.next;
        }
        Ok(all)
    }

    /// Whether a write has been committed since the last `load`.
    pub fn is_stale(&self) -> bool {
        self.changes.has_changed().unwrap_or(false)
    }

    /// Wait until the store commits another write.
    pub async fn invalidated(&mut self) -> bool {
        self.changes.changed().await.is_ok()
    }
}
