//! Face tag edits.

use crate::db::{FaceRecord, PhotoStore, PhotoWithFaces};
use crate::error::TagError;

/// Return a copy of `aggregate` where every face equal to `target` carries
/// `new_tag`. Nothing else changes.
pub fn apply_tag(aggregate: &PhotoWithFaces, target: &FaceRecord, new_tag: &str) -> PhotoWithFaces {
    let faces = aggregate
        .faces
        .iter()
        .map(|face| {
            if face == target {
                FaceRecord {
                    tag: new_tag.to_string(),
                    ..face.clone()
                }
            } else {
                face.clone()
            }
        })
        .collect();

    PhotoWithFaces {
        photo: aggregate.photo.clone(),
        faces,
    }
}

/// Read-modify-write tag edits against a [`PhotoStore`].
#[derive(Clone)]
pub struct TagEditor {
    store: PhotoStore,
}

impl TagEditor {
    pub fn new(store: PhotoStore) -> Self {
        Self { store }
    }

    pub fn retag(&self, uri: &str, face_id: i64, tag: &str) -> Result<PhotoWithFaces, TagError> {
        let current = self
            .store
            .get_by_uri(uri)?
            .ok_or_else(|| TagError::PhotoNotFound(uri.to_string()))?;
        let target = current
            .face(face_id)
            .cloned()
            .ok_or_else(|| TagError::FaceNotFound {
                uri: uri.to_string(),
                face_id,
            })?;

        let updated = apply_tag(&current, &target, tag);
        let stored = self.store.update_photo(&updated)?;
        tracing::info!(uri = %uri, face_id, tag = %tag, "face retagged");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BoundingBox, PhotoRecord, UNKNOWN_TAG};

    fn aggregate() -> PhotoWithFaces {
        let uri = "file:///DCIM/Camera/party.jpg";
        let mut f1 = FaceRecord::new(uri, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        f1.id = Some(1);
        let mut f2 = FaceRecord::new(uri, BoundingBox::new(20.0, 0.0, 30.0, 10.0));
        f2.id = Some(2);
        PhotoWithFaces {
            photo: PhotoRecord {
                uri: uri.to_string(),
                date_added: 1_700_000_000,
                width: 640,
                height: 480,
            },
            faces: vec![f1, f2],
        }
    }

    fn test_store() -> PhotoStore {
        let store = PhotoStore::open_in_memory().unwrap();
        store.initialize().unwrap();
        store
    }

    #[test]
    fn test_apply_tag_changes_only_target() {
        let original = aggregate();
        let target = original.faces[0].clone();

        let tagged = apply_tag(&original, &target, "Alice");
        assert_eq!(tagged.faces[0].tag, "Alice");
        assert_eq!(tagged.faces[0].bbox, target.bbox);
        assert_eq!(tagged.faces[1], original.faces[1]);
        assert_eq!(tagged.photo, original.photo);
        // Input untouched.
        assert_eq!(original.faces[0].tag, UNKNOWN_TAG);
    }

    #[test]
    fn test_apply_tag_is_idempotent() {
        let original = aggregate();
        let target = original.faces[1].clone();

        let once = apply_tag(&original, &target, "Bob");
        let retarget = once.faces[1].clone();
        let twice = apply_tag(&once, &retarget, "Bob");
        assert_eq!(once, twice);
        assert_eq!(twice.faces.len(), original.faces.len());
    }

    #[test]
    fn test_apply_tag_with_absent_target_is_noop() {
        let original = aggregate();
        let stranger = FaceRecord::new("elsewhere.jpg", BoundingBox::new(1.0, 1.0, 2.0, 2.0));
        assert_eq!(apply_tag(&original, &stranger, "Eve"), original);
    }

    #[test]
    fn test_retag_persists_and_keeps_ids() {
        let store = test_store();
        let fresh = aggregate();
        let faces: Vec<_> = fresh
            .faces
            .iter()
            .map(|f| FaceRecord { id: None, ..f.clone() })
            .collect();
        let stored = store.insert_with_faces(&fresh.photo, &faces).unwrap();
        let first_id = stored.faces[0].id.unwrap();

        let editor = TagEditor::new(store.clone());
        let updated = editor.retag(&fresh.photo.uri, first_id, "Alice").unwrap();

        assert_eq!(updated.faces[0].tag, "Alice");
        assert_eq!(updated.faces[0].id, Some(first_id));
        assert_eq!(updated.faces[1].tag, UNKNOWN_TAG);

        let reread = store.get_by_uri(&fresh.photo.uri).unwrap().unwrap();
        assert_eq!(reread, updated);
        assert_eq!(store.face_count().unwrap(), 2);
    }

    #[test]
    fn test_retag_unknown_photo_or_face() {
        let store = test_store();
        let editor = TagEditor::new(store.clone());
        assert!(matches!(
            editor.retag("nope.jpg", 1, "Alice"),
            Err(TagError::PhotoNotFound(_))
        ));

        let fresh = aggregate();
        let faces = vec![FaceRecord::new(fresh.photo.uri.as_str(), BoundingBox::new(0.0, 0.0, 5.0, 5.0))];
        store.insert_with_faces(&fresh.photo, &faces).unwrap();
        assert!(matches!(
            editor.retag(&fresh.photo.uri, 9999, "Alice"),
            Err(TagError::FaceNotFound { face_id: 9999, .. })
        ));
    }
}
