//! SQLite-backed photo store.
//!
//! One connection is shared behind a mutex, so every write is serialized and
//! the last writer for a given uri wins. Each committed write bumps a change
//! generation that paged readers watch to know when to reload.

mod models;
mod paging;
mod schema;

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

use crate::error::StoreError;

pub use models::{BoundingBox, FaceRecord, PhotoRecord, PhotoWithFaces, UNKNOWN_TAG};
pub use paging::{Page, PagedView, PAGE_SIZE};
pub use schema::SCHEMA;

const AGGREGATE_COLUMNS: &str = r#"
    p.uri, p.date_added, p.width, p.height,
    f.id, f.photo_uri, f.pos_left, f.pos_top, f.pos_right, f.pos_bottom, f.tag
"#;

struct StoreInner {
    conn: Mutex<Connection>,
    changes: watch::Sender<u64>,
}

/// Cheaply clonable handle to the shared photo store.
#[derive(Clone)]
pub struct PhotoStore {
    inner: Arc<StoreInner>,
}

impl PhotoStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "photo store opened");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(schema::CONNECTION_PRAGMAS)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let (changes, _) = watch::channel(0);
        Ok(Self {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(conn),
                changes,
            }),
        })
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.inner.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn notify_changed(&self) {
        self.inner
            .changes
            .send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Receiver that observes a new generation after every committed write.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Whether a row exists for `uri`, i.e. the photo was already ingested.
    pub fn is_processed(&self, uri: &str) -> Result<bool, StoreError> {
        let exists = self.conn()?.query_row(
            "SELECT EXISTS(SELECT 1 FROM photo WHERE uri = ?1)",
            [uri],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn get_by_uri(&self, uri: &str) -> Result<Option<PhotoWithFaces>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {AGGREGATE_COLUMNS}
            FROM photo p
            LEFT JOIN face f ON f.photo_uri = p.uri
            WHERE p.uri = ?1
            ORDER BY f.id
            "#
        ))?;
        let rows = stmt
            .query_map([uri], row_to_parts)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(group_aggregates(rows).into_iter().next())
    }

    /// One page of aggregates, most recent first, ties broken by uri.
    pub(crate) fn load_page(&self, offset: i64, limit: i64) -> Result<Vec<PhotoWithFaces>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {AGGREGATE_COLUMNS}
            FROM (
                SELECT uri, date_added, width, height
                FROM photo
                ORDER BY date_added DESC, uri ASC
                LIMIT ?1 OFFSET ?2
            ) p
            LEFT JOIN face f ON f.photo_uri = p.uri
            ORDER BY p.date_added DESC, p.uri ASC, f.id ASC
            "#
        ))?;
        let rows = stmt
            .query_map(params![limit, offset], row_to_parts)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(group_aggregates(rows))
    }

    pub fn paged_view(&self) -> PagedView {
        PagedView::new(self.clone(), PAGE_SIZE)
    }

    pub fn photo_count(&self) -> Result<i64, StoreError> {
        let count = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM photo", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn face_count(&self) -> Result<i64, StoreError> {
        let count = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM face", [], |row| row.get(0))?;
        Ok(count)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Upsert `photo` and replace its face set in one transaction.
    ///
    /// Faces that already carry an id keep it; new faces get the next id.
    /// Returns the aggregate as stored.
    pub fn insert_with_faces(
        &self,
        photo: &PhotoRecord,
        faces: &[FaceRecord],
    ) -> Result<PhotoWithFaces, StoreError> {
        if faces.is_empty() {
            return Err(StoreError::EmptyAggregate {
                uri: photo.uri.clone(),
            });
        }
        if let Some(foreign) = faces.iter().find(|f| f.photo_uri != photo.uri) {
            return Err(StoreError::ForeignFace {
                uri: photo.uri.clone(),
                face_uri: foreign.photo_uri.clone(),
            });
        }

        let stored = {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;

            tx.execute(
                r#"
                INSERT INTO photo (uri, date_added, width, height)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(uri) DO UPDATE SET
                    date_added = excluded.date_added,
                    width = excluded.width,
                    height = excluded.height
                "#,
                params![photo.uri, photo.date_added, photo.width, photo.height],
            )?;
            tx.execute("DELETE FROM face WHERE photo_uri = ?1", [&photo.uri])?;

            let mut stored_faces = Vec::with_capacity(faces.len());
            {
                let mut stmt = tx.prepare(
                    r#"
                    INSERT INTO face (id, photo_uri, pos_left, pos_top, pos_right, pos_bottom, tag)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                )?;
                for face in faces {
                    stmt.execute(params![
                        face.id,
                        photo.uri,
                        f64::from(face.bbox.left),
                        f64::from(face.bbox.top),
                        f64::from(face.bbox.right),
                        f64::from(face.bbox.bottom),
                        face.tag,
                    ])?;
                    stored_faces.push(FaceRecord {
                        id: Some(tx.last_insert_rowid()),
                        ..face.clone()
                    });
                }
            }
            tx.commit()?;

            PhotoWithFaces {
                photo: photo.clone(),
                faces: stored_faces,
            }
        };

        self.notify_changed();
        tracing::debug!(uri = %photo.uri, faces = stored.faces.len(), "photo stored");
        Ok(stored)
    }

    /// Full-aggregate upsert used by tag edits.
    pub fn update_photo(&self, aggregate: &PhotoWithFaces) -> Result<PhotoWithFaces, StoreError> {
        self.insert_with_faces(&aggregate.photo, &aggregate.faces)
    }

    /// Remove a photo and its faces. Returns whether a photo was removed.
    pub fn delete_by_uri(&self, uri: &str) -> Result<bool, StoreError> {
        let removed = {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM face WHERE photo_uri = ?1", [uri])?;
            let removed = tx.execute("DELETE FROM photo WHERE uri = ?1", [uri])?;
            tx.commit()?;
            removed > 0
        };

        if removed {
            self.notify_changed();
            tracing::debug!(uri = %uri, "photo deleted");
        }
        Ok(removed)
    }

    /// Date of the most recently added stored photo, if any.
    pub fn latest_date_added(&self) -> Result<Option<i64>, StoreError> {
        let latest = self
            .conn()?
            .query_row(
                "SELECT date_added FROM photo ORDER BY date_added DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(latest)
    }
}

fn row_to_parts(row: &rusqlite::Row) -> rusqlite::Result<(PhotoRecord, Option<FaceRecord>)> {
    let photo = PhotoRecord {
        uri: row.get(0)?,
        date_added: row.get(1)?,
        width: row.get(2)?,
        height: row.get(3)?,
    };

    let face = match row.get::<_, Option<i64>>(4)? {
        Some(id) => Some(FaceRecord {
            id: Some(id),
            photo_uri: row.get(5)?,
            bbox: BoundingBox::new(
                row.get::<_, f64>(6)? as f32,
                row.get::<_, f64>(7)? as f32,
                row.get::<_, f64>(8)? as f32,
                row.get::<_, f64>(9)? as f32,
            ),
            tag: row.get(10)?,
        }),
        None => None,
    };

    Ok((photo, face))
}

/// Fold joined rows (ordered by photo) into aggregates.
fn group_aggregates(
    rows: impl IntoIterator<Item = (PhotoRecord, Option<FaceRecord>)>,
) -> Vec<PhotoWithFaces> {
    let mut aggregates: Vec<PhotoWithFaces> = Vec::new();

    for (photo, face) in rows {
        let same_photo = aggregates
            .last()
            .is_some_and(|last| last.photo.uri == photo.uri);
        if !same_photo {
            aggregates.push(PhotoWithFaces {
                photo,
                faces: Vec::new(),
            });
        }
        if let (Some(face), Some(last)) = (face, aggregates.last_mut()) {
            last.faces.push(face);
        }
    }

    aggregates
}
