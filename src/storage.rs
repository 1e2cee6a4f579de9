//! Session persistence.
//!
//! `SessionStore` is the persistence collaborator the session hand-off talks
//! to. The SQLite store keeps rows in a database and capture images as files
//! under an object directory, laid out as `<user>/<session>/<captured_at>.jpg`.

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::clock::EpochMillis;
use crate::detect::{BoundingBox, Direction};
use crate::session::DirectionTally;

#[derive(Clone, Copy, Debug)]
pub struct CaptureUpload<'a> {
    pub user_id: &'a str,
    pub session_id: &'a str,
    pub image_jpeg: &'a [u8],
    pub direction: Direction,
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
    pub captured_at_ms: EpochMillis,
}

#[derive(Clone, Copy, Debug)]
pub struct SessionUpdate<'a> {
    pub session_id: &'a str,
    pub user_id: &'a str,
    pub ended_at_ms: EpochMillis,
    pub duration_seconds: f64,
    pub total_captures: usize,
    pub direction_tally: &'a DirectionTally,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionRow {
    pub session_id: String,
    pub user_id: String,
    pub started_at_ms: EpochMillis,
    pub ended_at_ms: Option<EpochMillis>,
    pub duration_seconds: Option<f64>,
    pub total_captures: usize,
    pub direction_tally: DirectionTally,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoredCapture {
    pub session_id: String,
    pub object_key: String,
    /// Hex SHA-256 of the stored image.
    pub sha256: String,
    pub direction: Direction,
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
    pub captured_at_ms: EpochMillis,
}

pub trait SessionStore {
    fn create_session(&mut self, user_id: &str, session_id: &str, started_at_ms: EpochMillis)
        -> Result<()>;

    fn upload_capture(&mut self, upload: &CaptureUpload<'_>) -> Result<StoredCapture>;

    fn update_session(&mut self, update: &SessionUpdate<'_>) -> Result<()>;

    /// Newest first.
    fn list_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<SessionRow>>;

    /// One session row, if it exists.
    fn get_session(&self, user_id: &str, session_id: &str) -> Result<Option<SessionRow>> {
        Ok(self
            .list_sessions(user_id, usize::MAX)?
            .into_iter()
            .find(|row| row.session_id == session_id))
    }

    /// Oldest first.
    fn session_captures(&self, user_id: &str, session_id: &str) -> Result<Vec<StoredCapture>>;

    /// Remove a session with its captures. Returns false when it did not exist.
    fn delete_session(&mut self, user_id: &str, session_id: &str) -> Result<bool>;
}

/// Object keys become filesystem paths; keep ids to one plain path segment.
fn validate_key_segment(kind: &str, value: &str) -> Result<()> {
    let ok = !value.is_empty()
        && value.len() <= 128
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && value != "."
        && value != "..";
    if ok {
        Ok(())
    } else {
        Err(anyhow!("invalid {} '{}' for object key", kind, value))
    }
}

pub fn capture_object_key(user_id: &str, session_id: &str, captured_at_ms: EpochMillis) -> Result<String> {
    validate_key_segment("user id", user_id)?;
    validate_key_segment("session id", session_id)?;
    Ok(format!("{}/{}/{}.jpg", user_id, session_id, captured_at_ms))
}

fn to_i64(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("{} exceeds i64 range", what))
}

fn session_row(row: &rusqlite::Row<'_>) -> Result<SessionRow> {
    let started_at: i64 = row.get(2)?;
    let ended_at: Option<i64> = row.get(3)?;
    let total_captures: i64 = row.get(5)?;
    let summary: String = row.get(6)?;
    Ok(SessionRow {
        session_id: row.get(0)?,
        user_id: row.get(1)?,
        started_at_ms: started_at.max(0) as u64,
        ended_at_ms: ended_at.map(|v| v.max(0) as u64),
        duration_seconds: row.get(4)?,
        total_captures: total_captures.max(0) as usize,
        direction_tally: serde_json::from_str(&summary).context("corrupt direction_summary")?,
    })
}

pub struct SqliteSessionStore {
    conn: Connection,
    object_dir: PathBuf,
}

impl SqliteSessionStore {
    /// Open (or create) the database and object directory.
    ///
    /// `db_path` may be a `file:` URI, which allows shared in-memory databases in tests.
    pub fn open(db_path: &str, object_dir: impl AsRef<Path>) -> Result<Self> {
        let conn = if db_path.starts_with("file:") {
            Connection::open_with_flags(
                db_path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI,
            )?
        } else {
            Connection::open(db_path)?
        };
        let object_dir = object_dir.as_ref().to_path_buf();
        fs::create_dir_all(&object_dir)
            .with_context(|| format!("create object dir {}", object_dir.display()))?;
        let mut store = Self { conn, object_dir };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn object_path(&self, object_key: &str) -> PathBuf {
        self.object_dir.join(object_key)
    }

    /// Read back a stored capture image.
    pub fn read_object(&self, object_key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(object_key);
        fs::read(&path).with_context(|| format!("read object {}", path.display()))
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS detection_sessions (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              user_id TEXT NOT NULL,
              session_id TEXT NOT NULL UNIQUE,
              started_at INTEGER NOT NULL,
              ended_at INTEGER,
              duration_seconds REAL,
              total_captures INTEGER NOT NULL DEFAULT 0,
              direction_summary TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS capture_images (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              user_id TEXT NOT NULL,
              session_id TEXT NOT NULL,
              object_key TEXT NOT NULL UNIQUE,
              sha256 TEXT NOT NULL,
              direction TEXT NOT NULL,
              confidence REAL NOT NULL,
              bbox_json TEXT,
              captured_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_user ON detection_sessions(user_id, started_at);
            CREATE INDEX IF NOT EXISTS idx_captures_session ON capture_images(session_id, captured_at);
            "#,
        )?;
        Ok(())
    }
}

impl SessionStore for SqliteSessionStore {
    fn create_session(
        &mut self,
        user_id: &str,
        session_id: &str,
        started_at_ms: EpochMillis,
    ) -> Result<()> {
        let summary = serde_json::to_string(&DirectionTally::new())?;
        self.conn
            .execute(
                r#"
                INSERT INTO detection_sessions(user_id, session_id, started_at, total_captures, direction_summary)
                VALUES (?1, ?2, ?3, 0, ?4)
                "#,
                params![user_id, session_id, to_i64(started_at_ms, "started_at")?, summary],
            )
            .with_context(|| format!("insert session {}", session_id))?;
        Ok(())
    }

    fn upload_capture(&mut self, upload: &CaptureUpload<'_>) -> Result<StoredCapture> {
        if upload.image_jpeg.is_empty() {
            return Err(anyhow!("capture image is empty"));
        }
        let object_key =
            capture_object_key(upload.user_id, upload.session_id, upload.captured_at_ms)?;
        let path = self.object_path(&object_key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("create object {}", path.display()))?;
        file.write_all(upload.image_jpeg)
            .with_context(|| format!("write object {}", path.display()))?;

        let sha256 = hex::encode(Sha256::digest(upload.image_jpeg));
        let bbox_json = upload.bbox.map(|b| serde_json::to_string(&b)).transpose()?;
        let inserted = self.conn.execute(
            r#"
            INSERT INTO capture_images(user_id, session_id, object_key, sha256, direction, confidence, bbox_json, captured_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                upload.user_id,
                upload.session_id,
                object_key,
                sha256,
                upload.direction.as_str(),
                f64::from(upload.confidence),
                bbox_json,
                to_i64(upload.captured_at_ms, "captured_at")?
            ],
        );
        if let Err(e) = inserted {
            // Keep objects and rows in step.
            let _ = fs::remove_file(&path);
            return Err(e).with_context(|| format!("insert capture row {}", object_key));
        }

        Ok(StoredCapture {
            session_id: upload.session_id.to_string(),
            object_key,
            sha256,
            direction: upload.direction,
            confidence: upload.confidence,
            bbox: upload.bbox,
            captured_at_ms: upload.captured_at_ms,
        })
    }

    fn update_session(&mut self, update: &SessionUpdate<'_>) -> Result<()> {
        let summary = serde_json::to_string(update.direction_tally)?;
        let changed = self.conn.execute(
            r#"
            UPDATE detection_sessions
            SET ended_at = ?1, duration_seconds = ?2, total_captures = ?3, direction_summary = ?4
            WHERE session_id = ?5 AND user_id = ?6
            "#,
            params![
                to_i64(update.ended_at_ms, "ended_at")?,
                update.duration_seconds,
                to_i64(update.total_captures as u64, "total_captures")?,
                summary,
                update.session_id,
                update.user_id
            ],
        )?;
        if changed == 0 {
            return Err(anyhow!(
                "session {} not found for user {}",
                update.session_id,
                update.user_id
            ));
        }
        Ok(())
    }

    fn list_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<SessionRow>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT session_id, user_id, started_at, ended_at, duration_seconds, total_captures, direction_summary
            FROM detection_sessions
            WHERE user_id = ?1
            ORDER BY started_at DESC, id DESC
            LIMIT ?2
            "#,
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = stmt.query(params![user_id, limit])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(session_row(row)?);
        }
        Ok(out)
    }

    fn get_session(&self, user_id: &str, session_id: &str) -> Result<Option<SessionRow>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT session_id, user_id, started_at, ended_at, duration_seconds, total_captures, direction_summary
            FROM detection_sessions
            WHERE user_id = ?1 AND session_id = ?2
            "#,
        )?;
        let mut rows = stmt.query(params![user_id, session_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(session_row(row)?)),
            None => Ok(None),
        }
    }

    fn session_captures(&self, user_id: &str, session_id: &str) -> Result<Vec<StoredCapture>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT session_id, object_key, sha256, direction, confidence, bbox_json, captured_at
            FROM capture_images
            WHERE user_id = ?1 AND session_id = ?2
            ORDER BY captured_at ASC, id ASC
            "#,
        )?;
        let mut rows = stmt.query(params![user_id, session_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let direction: String = row.get(3)?;
            let confidence: f64 = row.get(4)?;
            let bbox_json: Option<String> = row.get(5)?;
            let captured_at: i64 = row.get(6)?;
            out.push(StoredCapture {
                session_id: row.get(0)?,
                object_key: row.get(1)?,
                sha256: row.get(2)?,
                direction: Direction::parse(&direction)
                    .ok_or_else(|| anyhow!("corrupt capture direction '{}'", direction))?,
                confidence: confidence as f32,
                bbox: bbox_json
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .context("corrupt bbox_json")?,
                captured_at_ms: captured_at.max(0) as u64,
            });
        }
        Ok(out)
    }

    fn delete_session(&mut self, user_id: &str, session_id: &str) -> Result<bool> {
        let exists = self
            .conn
            .query_row(
                "SELECT id FROM detection_sessions WHERE user_id = ?1 AND session_id = ?2",
                params![user_id, session_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .is_some();

        for capture in self.session_captures(user_id, session_id)? {
            let path = self.object_path(&capture.object_key);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("remove object {}", path.display()))
                }
            }
        }

        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM capture_images WHERE user_id = ?1 AND session_id = ?2",
            params![user_id, session_id],
        )?;
        tx.execute(
            "DELETE FROM detection_sessions WHERE user_id = ?1 AND session_id = ?2",
            params![user_id, session_id],
        )?;
        tx.commit()?;
        Ok(exists)
    }
}

/// Store kept entirely in memory. Images are retained alongside their metadata.
#[derive(Clone, Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Vec<SessionRow>,
    captures: Vec<(StoredCapture, String, Vec<u8>)>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image(&self, object_key: &str) -> Option<&[u8]> {
        self.captures
            .iter()
            .find(|(capture, _, _)| capture.object_key == object_key)
            .map(|(_, _, bytes)| bytes.as_slice())
    }
}

impl SessionStore for InMemorySessionStore {
    fn create_session(
        &mut self,
        user_id: &str,
        session_id: &str,
        started_at_ms: EpochMillis,
    ) -> Result<()> {
        if self.sessions.iter().any(|s| s.session_id == session_id) {
            return Err(anyhow!("session {} already exists", session_id));
        }
        self.sessions.push(SessionRow {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            started_at_ms,
            ended_at_ms: None,
            duration_seconds: None,
            total_captures: 0,
            direction_tally: DirectionTally::new(),
        });
        Ok(())
    }

    fn upload_capture(&mut self, upload: &CaptureUpload<'_>) -> Result<StoredCapture> {
        if upload.image_jpeg.is_empty() {
            return Err(anyhow!("capture image is empty"));
        }
        let object_key =
            capture_object_key(upload.user_id, upload.session_id, upload.captured_at_ms)?;
        if self.image(&object_key).is_some() {
            return Err(anyhow!("object {} already exists", object_key));
        }
        let stored = StoredCapture {
            session_id: upload.session_id.to_string(),
            object_key,
            sha256: hex::encode(Sha256::digest(upload.image_jpeg)),
            direction: upload.direction,
            confidence: upload.confidence,
            bbox: upload.bbox,
            captured_at_ms: upload.captured_at_ms,
        };
        self.captures.push((
            stored.clone(),
            upload.user_id.to_string(),
            upload.image_jpeg.to_vec(),
        ));
        Ok(stored)
    }

    fn update_session(&mut self, update: &SessionUpdate<'_>) -> Result<()> {
        let row = self
            .sessions
            .iter_mut()
            .find(|s| s.session_id == update.session_id && s.user_id == update.user_id)
            .ok_or_else(|| {
                anyhow!(
                    "session {} not found for user {}",
                    update.session_id,
                    update.user_id
                )
            })?;
        row.ended_at_ms = Some(update.ended_at_ms);
        row.duration_seconds = Some(update.duration_seconds);
        row.total_captures = update.total_captures;
        row.direction_tally = update.direction_tally.clone();
        Ok(())
    }

    fn list_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<SessionRow>> {
        let mut rows: Vec<SessionRow> = self
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at_ms.cmp(&a.started_at_ms));
        rows.truncate(limit);
        Ok(rows)
    }

    fn session_captures(&self, user_id: &str, session_id: &str) -> Result<Vec<StoredCapture>> {
        let mut out: Vec<StoredCapture> = self
            .captures
            .iter()
            .filter(|(c, owner, _)| c.session_id == session_id && owner == user_id)
            .map(|(c, _, _)| c.clone())
            .collect();
        out.sort_by_key(|c| c.captured_at_ms);
        Ok(out)
    }

    fn delete_session(&mut self, user_id: &str, session_id: &str) -> Result<bool> {
        let before = self.sessions.len();
        self.sessions
            .retain(|s| !(s.session_id == session_id && s.user_id == user_id));
        self.captures
            .retain(|(c, owner, _)| !(c.session_id == session_id && owner == user_id));
        Ok(self.sessions.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_reject_path_tricks() {
        assert_eq!(
            capture_object_key("u1", "s-1", 42).unwrap(),
            "u1/s-1/42.jpg"
        );
        assert!(capture_object_key("../etc", "s", 1).is_err());
        assert!(capture_object_key("u", "a/b", 1).is_err());
        assert!(capture_object_key("", "s", 1).is_err());
    }

    #[test]
    fn in_memory_store_round_trips_metadata() -> Result<()> {
        let mut store = InMemorySessionStore::new();
        store.create_session("u1", "s1", 1_000)?;
        let stored = store.upload_capture(&CaptureUpload {
            user_id: "u1",
            session_id: "s1",
            image_jpeg: b"jpeg",
            direction: Direction::Left,
            confidence: 0.75,
            bbox: None,
            captured_at_ms: 4_000,
        })?;
        assert_eq!(store.image(&stored.object_key), Some(&b"jpeg"[..]));
        assert!(store.create_session("u1", "s1", 2_000).is_err());
        assert!(store.delete_session("u1", "s1")?);
        assert!(store.session_captures("u1", "s1")?.is_empty());
        assert!(!store.delete_session("u1", "s1")?);
        Ok(())
    }
}
