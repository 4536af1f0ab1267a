/// Pragmas applied to every new connection. SQLite disables foreign key
/// enforcement unless asked, and the face -> photo cascade depends on it.
pub const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON;";

pub const SCHEMA: &str = r#"
-- Photos that yielded at least one face
CREATE TABLE IF NOT EXISTS photo (
    uri TEXT PRIMARY KEY NOT NULL,
    date_added INTEGER NOT NULL,   -- seconds since the Unix epoch
    width INTEGER NOT NULL,
    height INTEGER NOT NULL
);

-- Paging order: most recent first, ties by uri
CREATE INDEX IF NOT EXISTS idx_photo_recency ON photo(date_added DESC, uri);

-- Faces detected in a photo, in source-image pixel coordinates
CREATE TABLE IF NOT EXISTS face (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo_uri TEXT NOT NULL,
    pos_left REAL NOT NULL,
    pos_top REAL NOT NULL,
    pos_right REAL NOT NULL,
    pos_bottom REAL NOT NULL,
    tag TEXT NOT NULL DEFAULT 'Unknown',
    FOREIGN KEY (photo_uri) REFERENCES photo(uri) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_face_photo_uri ON face(photo_uri);
"#;
