//! SQLite backend implementation.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use super::backend::PhotoStore;
use super::faces::{bytes_to_embedding, embedding_to_bytes, BoundingBox, Face, NewFace, Person};
use super::schema::SCHEMA;
use super::{DuplicateGroup, NewPhoto, Photo};

const PHOTO_COLUMNS: &str = "id, original_path, file_hash, title, description, taken_at, \
                             latitude, longitude, json_metadata, created_at";

pub struct SqliteStore {
    pub(crate) conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ========================================================================
    // People
    // ========================================================================

    pub fn find_or_create_person(&self, name: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO people (name) VALUES (?)",
            [name],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM people WHERE name = ?",
            [name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_all_people(&self) -> Result<Vec<Person>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, notes FROM people ORDER BY name")?;
        let people = stmt
            .query_map([], |row| {
                Ok(Person {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    notes: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(people)
    }

    fn query_photos(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Photo>> {
        let mut stmt = self.conn.prepare(sql)?;
        let photos = stmt
            .query_map(params, photo_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(photos)
    }
}

fn photo_from_row(row: &Row) -> rusqlite::Result<Photo> {
    let taken_at: Option<String> = row.get(5)?;
    let json_metadata: Option<String> = row.get(8)?;
    Ok(Photo {
        id: row.get(0)?,
        original_path: row.get(1)?,
        file_hash: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        taken_at: taken_at
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        latitude: row.get(6)?,
        longitude: row.get(7)?,
        json_metadata: json_metadata.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: row.get(9)?,
    })
}

fn photo_params(photo: &NewPhoto) -> (Option<String>, Option<String>) {
    let taken_at = photo.taken_at.map(|dt| dt.to_rfc3339());
    let json = photo.json_metadata.as_ref().map(|v| v.to_string());
    (taken_at, json)
}

impl PhotoStore for SqliteStore {
    fn find_by_hash(&self, hash: &str) -> Result<Option<Photo>> {
        let sql = format!(
            "SELECT {PHOTO_COLUMNS} FROM photos WHERE file_hash = ? ORDER BY created_at, id LIMIT 1"
        );
        let photo = self
            .conn
            .query_row(&sql, [hash], photo_from_row)
            .optional()?;
        Ok(photo)
    }

    fn get_photo(&self, id: i64) -> Result<Option<Photo>> {
        let sql = format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE id = ?");
        let photo = self.conn.query_row(&sql, [id], photo_from_row).optional()?;
        Ok(photo)
    }

    fn create_photo(&self, photo: &NewPhoto) -> Result<i64> {
        let (taken_at, json) = photo_params(photo);
        self.conn.execute(
            r#"
            INSERT INTO photos (original_path, file_hash, title, description, taken_at,
                                latitude, longitude, json_metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                photo.original_path,
                photo.file_hash,
                photo.title,
                photo.description,
                taken_at,
                photo.latitude,
                photo.longitude,
                json,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_photo(&self, id: i64, photo: &NewPhoto) -> Result<()> {
        let (taken_at, json) = photo_params(photo);
        let changed = self.conn.execute(
            r#"
            UPDATE photos
            SET original_path = ?, file_hash = ?, title = ?, description = ?, taken_at = ?,
                latitude = ?, longitude = ?, json_metadata = ?
            WHERE id = ?
            "#,
            params![
                photo.original_path,
                photo.file_hash,
                photo.title,
                photo.description,
                taken_at,
                photo.latitude,
                photo.longitude,
                json,
                id,
            ],
        )?;
        if changed == 0 {
            anyhow::bail!("photo {id} not found");
        }
        Ok(())
    }

    fn delete_photo(&self, id: i64) -> Result<()> {
        self.conn.execute("DELETE FROM photos WHERE id = ?", [id])?;
        Ok(())
    }

    fn count_photos(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM photos", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn photos_without_hash(&self) -> Result<Vec<Photo>> {
        let sql = format!(
            "SELECT {PHOTO_COLUMNS} FROM photos WHERE file_hash IS NULL OR file_hash = '' ORDER BY id"
        );
        self.query_photos(&sql, [])
    }

    fn set_hash(&self, id: i64, hash: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE photos SET file_hash = ? WHERE id = ?",
            params![hash, id],
        )?;
        Ok(())
    }

    fn duplicate_groups(&self) -> Result<Vec<DuplicateGroup>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT file_hash
            FROM photos
            WHERE file_hash IS NOT NULL AND file_hash != ''
            GROUP BY file_hash
            HAVING COUNT(*) > 1
            ORDER BY COUNT(*) DESC, file_hash
            "#,
        )?;
        let hashes = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let sql = format!(
            "SELECT {PHOTO_COLUMNS} FROM photos WHERE file_hash = ? ORDER BY created_at, id"
        );
        hashes
            .into_iter()
            .map(|hash| {
                let photos = self.query_photos(&sql, [&hash])?;
                Ok(DuplicateGroup {
                    file_hash: hash,
                    photos,
                })
            })
            .collect()
    }

    fn delete_photos(&self, ids: &[i64]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM photos WHERE id = ?")?;
            for id in ids {
                deleted += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    fn replace_faces(&self, photo_id: i64, faces: &[NewFace]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM faces WHERE photo_id = ?", [photo_id])?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO faces (photo_id, bbox_top, bbox_right, bbox_bottom, bbox_left, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )?;
            for face in faces {
                let embedding = face.embedding.as_deref().map(embedding_to_bytes);
                stmt.execute(params![
                    photo_id,
                    face.bbox.top,
                    face.bbox.right,
                    face.bbox.bottom,
                    face.bbox.left,
                    embedding,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn faces_for_photo(&self, photo_id: i64) -> Result<Vec<Face>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, photo_id, person_id, bbox_top, bbox_right, bbox_bottom, bbox_left, embedding
            FROM faces
            WHERE photo_id = ?
            ORDER BY id
            "#,
        )?;
        let faces = stmt
            .query_map([photo_id], |row| {
                let embedding_bytes: Option<Vec<u8>> = row.get(7)?;
                Ok(Face {
                    id: row.get(0)?,
                    photo_id: row.get(1)?,
                    person_id: row.get(2)?,
                    bbox: BoundingBox {
                        top: row.get(3)?,
                        right: row.get(4)?,
                        bottom: row.get(5)?,
                        left: row.get(6)?,
                    },
                    embedding: embedding_bytes.map(|b| bytes_to_embedding(&b)),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(faces)
    }

    fn assign_person(&self, original_path: &str, bbox: &BoundingBox, name: &str) -> Result<usize> {
        let person_id = self.find_or_create_person(name)?;
        let updated = self.conn.execute(
            r#"
            UPDATE faces
            SET person_id = ?
            WHERE bbox_top = ? AND bbox_right = ? AND bbox_bottom = ? AND bbox_left = ?
              AND photo_id IN (SELECT id FROM photos WHERE original_path = ?)
            "#,
            params![
                person_id,
                bbox.top,
                bbox.right,
                bbox.bottom,
                bbox.left,
                original_path,
            ],
        )?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.initialize().unwrap();
        store
    }

    fn photo(path: &str, hash: Option<&str>) -> NewPhoto {
        NewPhoto {
            original_path: path.to_string(),
            file_hash: hash.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_and_get_photo() {
        let store = store();
        let taken = Utc.with_ymd_and_hms(2021, 6, 1, 12, 30, 0).unwrap();
        let new = NewPhoto {
            original_path: "/photos/a.jpg".to_string(),
            file_hash: Some("abc".to_string()),
            title: "Beach".to_string(),
            description: "Sunset".to_string(),
            taken_at: Some(taken),
            latitude: Some(37.7749),
            longitude: Some(-122.4194),
            json_metadata: Some(json!({"title": "Beach"})),
        };
        let id = store.create_photo(&new).unwrap();

        let loaded = store.get_photo(id).unwrap().unwrap();
        assert_eq!(loaded.original_path, "/photos/a.jpg");
        assert_eq!(loaded.title, "Beach");
        assert_eq!(loaded.taken_at, Some(taken));
        assert_eq!(loaded.latitude, Some(37.7749));
        assert_eq!(loaded.json_metadata, Some(json!({"title": "Beach"})));
        assert!(!loaded.created_at.is_empty());
        assert_eq!(store.count_photos().unwrap(), 1);
    }

    #[test]
    fn test_update_keeps_id() {
        let store = store();
        let id = store.create_photo(&photo("/a.jpg", Some("h1"))).unwrap();
        let mut replacement = photo("/b.jpg", Some("h1"));
        replacement.title = "New".to_string();
        store.update_photo(id, &replacement).unwrap();

        let loaded = store.get_photo(id).unwrap().unwrap();
        assert_eq!(loaded.original_path, "/b.jpg");
        assert_eq!(loaded.title, "New");
        assert_eq!(store.count_photos().unwrap(), 1);
        assert!(store.update_photo(id + 100, &replacement).is_err());
    }

    #[test]
    fn test_find_by_hash_returns_oldest() {
        let store = store();
        let first = store.create_photo(&photo("/a.jpg", Some("same"))).unwrap();
        store.create_photo(&photo("/b.jpg", Some("same"))).unwrap();

        let found = store.find_by_hash("same").unwrap().unwrap();
        assert_eq!(found.id, first);
        assert!(store.find_by_hash("other").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_groups_ordering() {
        let store = store();
        store.create_photo(&photo("/a1.jpg", Some("aaa"))).unwrap();
        store.create_photo(&photo("/a2.jpg", Some("aaa"))).unwrap();
        store.create_photo(&photo("/b1.jpg", Some("bbb"))).unwrap();
        store.create_photo(&photo("/b2.jpg", Some("bbb"))).unwrap();
        store.create_photo(&photo("/b3.jpg", Some("bbb"))).unwrap();
        store.create_photo(&photo("/c.jpg", Some("ccc"))).unwrap();
        store.create_photo(&photo("/d.jpg", None)).unwrap();

        let groups = store.duplicate_groups().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].file_hash, "bbb");
        assert_eq!(groups[0].photos.len(), 3);
        assert_eq!(groups[0].keeper().unwrap().original_path, "/b1.jpg");
        assert_eq!(groups[0].extras().len(), 2);
        assert_eq!(groups[1].file_hash, "aaa");
    }

    #[test]
    fn test_delete_photos_and_hash_backfill() {
        let store = store();
        let a = store.create_photo(&photo("/a.jpg", None)).unwrap();
        let b = store.create_photo(&photo("/b.jpg", Some(""))).unwrap();
        store.create_photo(&photo("/c.jpg", Some("x"))).unwrap();

        let missing: Vec<i64> = store
            .photos_without_hash()
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(missing, vec![a, b]);

        store.set_hash(a, "filled").unwrap();
        assert_eq!(store.photos_without_hash().unwrap().len(), 1);

        assert_eq!(store.delete_photos(&[a, b]).unwrap(), 2);
        assert_eq!(store.count_photos().unwrap(), 1);
    }

    #[test]
    fn test_faces_and_person_assignment() {
        let store = store();
        let id = store.create_photo(&photo("/p.jpg", Some("h"))).unwrap();
        let bbox = BoundingBox::new(10, 60, 70, 20).unwrap();
        let other = BoundingBox::new(100, 160, 170, 120).unwrap();
        store
            .replace_faces(
                id,
                &[
                    NewFace {
                        bbox,
                        embedding: Some(vec![0.1, 0.2]),
                    },
                    NewFace {
                        bbox: other,
                        embedding: None,
                    },
                ],
            )
            .unwrap();

        let faces = store.faces_for_photo(id).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].bbox, bbox);
        assert_eq!(faces[0].embedding.as_deref(), Some(&[0.1f32, 0.2][..]));

        assert_eq!(store.assign_person("/p.jpg", &bbox, "Alice").unwrap(), 1);
        assert_eq!(store.assign_person("/p.jpg", &bbox, "Alice").unwrap(), 1);
        assert_eq!(store.assign_person("/missing.jpg", &bbox, "Alice").unwrap(), 0);
        let people = store.get_all_people().unwrap();
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].name, "Alice");

        let faces = store.faces_for_photo(id).unwrap();
        assert!(faces[0].person_id.is_some());
        assert!(faces[1].person_id.is_none());

        store.replace_faces(id, &[]).unwrap();
        assert!(store.faces_for_photo(id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_photo_cascades_faces() {
        let store = store();
        let id = store.create_photo(&photo("/p.jpg", None)).unwrap();
        store
            .replace_faces(
                id,
                &[NewFace {
                    bbox: BoundingBox::new(0, 10, 10, 0).unwrap(),
                    embedding: None,
                }],
            )
            .unwrap();
        store.delete_photo(id).unwrap();
        assert!(store.get_photo(id).unwrap().is_none());
        assert!(store.faces_for_photo(id).unwrap().is_empty());
    }
}
