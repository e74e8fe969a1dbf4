pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Photos table: one row per imported media file
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    original_path TEXT NOT NULL,
    file_hash TEXT,                -- SHA-256 of file content, lowercase hex
    title TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    taken_at TEXT,                 -- RFC 3339, UTC
    latitude REAL,
    longitude REAL,
    json_metadata TEXT,            -- raw sidecar document
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_photos_file_hash ON photos(file_hash);
CREATE INDEX IF NOT EXISTS idx_photos_original_path ON photos(original_path);

-- People: named individuals
CREATE TABLE IF NOT EXISTS people (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    notes TEXT NOT NULL DEFAULT ''
);

-- Faces: detected faces in photos
CREATE TABLE IF NOT EXISTS faces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo_id INTEGER NOT NULL,
    person_id INTEGER,            -- NULL until a name is bound
    bbox_top INTEGER NOT NULL,
    bbox_right INTEGER NOT NULL,
    bbox_bottom INTEGER NOT NULL,
    bbox_left INTEGER NOT NULL,
    embedding BLOB,               -- float32 array, little endian
    FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE,
    FOREIGN KEY (person_id) REFERENCES people(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_faces_photo ON faces(photo_id);
CREATE INDEX IF NOT EXISTS idx_faces_person ON faces(person_id);
"#;
