use anyhow::Result;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use headwatch::session::PersistStage;
use headwatch::storage::CaptureUpload;
use headwatch::{
    persist_summary, BoundingBox, CaptureRecord, Direction, SessionRecorder, SessionStore,
    SqliteSessionStore,
};

fn open_store(dir: &TempDir) -> Result<SqliteSessionStore> {
    let db = dir.path().join("sessions.db");
    SqliteSessionStore::open(db.to_str().unwrap(), dir.path().join("objects"))
}

fn capture(direction: Direction, at: u64, payload: &[u8]) -> CaptureRecord {
    CaptureRecord {
        captured_at_ms: at,
        direction,
        image_jpeg: payload.to_vec(),
        confidence: 0.87,
        bbox: Some(BoundingBox::new(440.0, 180.0, 840.0, 540.0)),
    }
}

#[test]
fn persisted_session_round_trips() -> Result<()> {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;

    let mut recorder = SessionRecorder::new();
    recorder.start_session("sess-1".into(), 1_700_000_000_000).unwrap();
    recorder.append_capture(capture(Direction::Left, 1_700_000_004_000, b"left-jpeg"));
    recorder.append_capture(capture(Direction::Right, 1_700_000_012_000, b"right-jpeg"));
    let summary = recorder.stop_session(1_700_000_020_500).unwrap();

    let report = persist_summary(&mut store, "student-1", &summary);
    assert!(report.is_clean(), "{:?}", report.failures);
    assert_eq!(report.uploaded, 2);

    let rows = store.list_sessions("student-1", 10)?;
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.session_id, "sess-1");
    assert_eq!(row.started_at_ms, 1_700_000_000_000);
    assert_eq!(row.ended_at_ms, Some(1_700_000_020_500));
    assert_eq!(row.duration_seconds, Some(20.5));
    assert_eq!(row.total_captures, 2);
    assert_eq!(row.direction_tally.get(Direction::Left), 1);
    assert_eq!(row.direction_tally.get(Direction::Right), 1);
    assert_eq!(row.direction_tally.get(Direction::Front), 0);

    let captures = store.session_captures("student-1", "sess-1")?;
    assert_eq!(captures.len(), 2);
    assert_eq!(captures[0].direction, Direction::Left);
    assert_eq!(captures[0].object_key, "student-1/sess-1/1700000004000.jpg");
    assert_eq!(captures[0].sha256, hex::encode(Sha256::digest(b"left-jpeg")));
    assert_eq!(captures[1].bbox, Some(BoundingBox::new(440.0, 180.0, 840.0, 540.0)));
    assert_eq!(store.read_object(&captures[1].object_key)?, b"right-jpeg");

    // Other users see nothing.
    assert!(store.list_sessions("student-2", 10)?.is_empty());
    assert!(store.get_session("student-2", "sess-1")?.is_none());
    Ok(())
}

#[test]
fn sessions_list_newest_first_with_limit() -> Result<()> {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;
    for (id, started) in [("a", 1_000), ("b", 3_000), ("c", 2_000)] {
        store.create_session("u", id, started)?;
    }
    let ids: Vec<String> = store
        .list_sessions("u", 2)?
        .into_iter()
        .map(|row| row.session_id)
        .collect();
    assert_eq!(ids, vec!["b", "c"]);

    let open = store.get_session("u", "a")?.expect("session a");
    assert_eq!(open.ended_at_ms, None);
    assert_eq!(open.direction_tally.total(), 0);
    Ok(())
}

#[test]
fn delete_removes_rows_and_objects() -> Result<()> {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;
    store.create_session("u", "s", 0)?;
    let stored = store.upload_capture(&CaptureUpload {
        user_id: "u",
        session_id: "s",
        image_jpeg: b"jpeg",
        direction: Direction::Right,
        confidence: 0.5,
        bbox: None,
        captured_at_ms: 3_500,
    })?;
    let path = store.object_path(&stored.object_key);
    assert!(path.exists());

    assert!(store.delete_session("u", "s")?);
    assert!(!path.exists());
    assert!(store.list_sessions("u", 10)?.is_empty());
    assert!(store.session_captures("u", "s")?.is_empty());
    assert!(!store.delete_session("u", "s")?);
    Ok(())
}

#[test]
fn failed_items_do_not_block_the_rest() -> Result<()> {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;

    let mut recorder = SessionRecorder::new();
    recorder.start_session("s-dup".into(), 0).unwrap();
    recorder.append_capture(capture(Direction::Left, 4_000, b"one"));
    // Same timestamp, same object key: the second upload is rejected.
    recorder.append_capture(capture(Direction::Left, 4_000, b"two"));
    recorder.append_capture(capture(Direction::Right, 9_000, b""));
    recorder.append_capture(capture(Direction::Right, 12_000, b"four"));
    let summary = recorder.stop_session(15_000).unwrap();

    let report = persist_summary(&mut store, "u", &summary);
    assert_eq!(report.uploaded, 2);
    let stages: Vec<PersistStage> = report.failures.iter().map(|f| f.stage).collect();
    assert_eq!(
        stages,
        vec![
            PersistStage::UploadCapture { index: 1 },
            PersistStage::UploadCapture { index: 2 },
        ]
    );

    let row = store.get_session("u", "s-dup")?.expect("row written");
    assert_eq!(row.ended_at_ms, Some(15_000));
    assert_eq!(row.total_captures, 4);
    assert_eq!(store.session_captures("u", "s-dup")?.len(), 2);
    Ok(())
}

#[test]
fn unsafe_ids_never_reach_the_filesystem() -> Result<()> {
    let dir = TempDir::new()?;
    let mut store = open_store(&dir)?;
    let result = store.upload_capture(&CaptureUpload {
        user_id: "../escape",
        session_id: "s",
        image_jpeg: b"jpeg",
        direction: Direction::Left,
        confidence: 0.5,
        bbox: None,
        captured_at_ms: 1,
    });
    assert!(result.is_err());
    assert!(!dir.path().join("escape").exists());
    Ok(())
}
