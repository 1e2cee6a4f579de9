//! Detection session lifecycle and the hand-off to persistence.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::clock::EpochMillis;
use crate::detect::{BoundingBox, Direction};
use crate::error::SessionError;
use crate::storage::{CaptureUpload, SessionStore, SessionUpdate};

/// Random version-4 UUID.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One screenshot taken during a qualifying hold.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CaptureRecord {
    pub captured_at_ms: EpochMillis,
    pub direction: Direction,
    /// JPEG bytes. Not serialised; summaries carry metadata only.
    #[serde(skip_serializing)]
    pub image_jpeg: Vec<u8>,
    /// Primary detection at capture time.
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
}

/// Capture counts per direction. Always lists all three directions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirectionTally(BTreeMap<Direction, u32>);

impl DirectionTally {
    pub fn new() -> Self {
        Self(Direction::ALL.iter().map(|d| (*d, 0)).collect())
    }

    pub fn increment(&mut self, direction: Direction) {
        *self.0.entry(direction).or_insert(0) += 1;
    }

    pub fn get(&self, direction: Direction) -> u32 {
        self.0.get(&direction).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Direction, u32)> + '_ {
        self.0.iter().map(|(d, n)| (*d, *n))
    }
}

impl Default for DirectionTally {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionState {
    pub session_id: String,
    pub start_ms: EpochMillis,
    pub end_ms: Option<EpochMillis>,
    pub captures: Vec<CaptureRecord>,
    pub direction_tally: DirectionTally,
}

/// Immutable result of a stopped session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub start_ms: EpochMillis,
    pub end_ms: EpochMillis,
    /// Rounded to two decimals.
    pub duration_seconds: f64,
    pub total_captures: usize,
    pub direction_tally: DirectionTally,
    pub captures: Vec<CaptureRecord>,
}

/// Owns the single active session of a controller.
#[derive(Debug, Default)]
pub struct SessionRecorder {
    active: Option<SessionState>,
}

impl SessionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&SessionState> {
        self.active.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn start_session(
        &mut self,
        session_id: String,
        start_ms: EpochMillis,
    ) -> Result<&SessionState, SessionError> {
        if self.active.is_some() {
            return Err(SessionError::AlreadyActive);
        }
        log::info!("session {} started", session_id);
        Ok(&*self.active.insert(SessionState {
            session_id,
            start_ms,
            end_ms: None,
            captures: Vec::new(),
            direction_tally: DirectionTally::new(),
        }))
    }

    /// Append a capture to the active session. Returns false, and logs, when
    /// there is no active session.
    pub fn append_capture(&mut self, record: CaptureRecord) -> bool {
        let Some(session) = self.active.as_mut() else {
            log::warn!(
                "dropping {} capture at {}: no active session",
                record.direction,
                record.captured_at_ms
            );
            return false;
        };
        session.direction_tally.increment(record.direction);
        session.captures.push(record);
        log::info!(
            "session {}: capture #{} stored",
            session.session_id,
            session.captures.len()
        );
        true
    }

    pub fn stop_session(&mut self, end_ms: EpochMillis) -> Result<SessionSummary, SessionError> {
        let mut session = self.active.take().ok_or(SessionError::NoActiveSession)?;
        session.end_ms = Some(end_ms);
        let elapsed_ms = end_ms.saturating_sub(session.start_ms);
        let duration_seconds = (elapsed_ms as f64 / 10.0).round() / 100.0;
        log::info!(
            "session {} stopped after {:.2}s with {} captures",
            session.session_id,
            duration_seconds,
            session.captures.len()
        );
        Ok(SessionSummary {
            session_id: session.session_id,
            start_ms: session.start_ms,
            end_ms,
            duration_seconds,
            total_captures: session.captures.len(),
            direction_tally: session.direction_tally,
            captures: session.captures,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "stage")]
pub enum PersistStage {
    CreateSession,
    UploadCapture { index: usize },
    UpdateSession,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PersistFailure {
    pub stage: PersistStage,
    pub reason: String,
}

/// Outcome of handing a summary to the store. Failures are per item.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PersistReport {
    pub uploaded: usize,
    pub failures: Vec<PersistFailure>,
}

impl PersistReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Write a stopped session: session row, each capture, then final metadata.
///
/// Every step is attempted regardless of earlier failures.
pub fn persist_summary(
    store: &mut dyn SessionStore,
    user_id: &str,
    summary: &SessionSummary,
) -> PersistReport {
    let mut report = PersistReport::default();

    if let Err(e) = store.create_session(user_id, &summary.session_id, summary.start_ms) {
        log::warn!("session {}: create failed: {:#}", summary.session_id, e);
        report.failures.push(PersistFailure {
            stage: PersistStage::CreateSession,
            reason: format!("{:#}", e),
        });
    }

    for (index, capture) in summary.captures.iter().enumerate() {
        let upload = CaptureUpload {
            user_id,
            session_id: &summary.session_id,
            image_jpeg: &capture.image_jpeg,
            direction: capture.direction,
            confidence: capture.confidence,
            bbox: capture.bbox,
            captured_at_ms: capture.captured_at_ms,
        };
        match store.upload_capture(&upload) {
            Ok(_) => report.uploaded += 1,
            Err(e) => {
                log::warn!(
                    "session {}: capture {}/{} upload failed: {:#}",
                    summary.session_id,
                    index + 1,
                    summary.captures.len(),
                    e
                );
                report.failures.push(PersistFailure {
                    stage: PersistStage::UploadCapture { index },
                    reason: format!("{:#}", e),
                });
            }
        }
    }

    let update = SessionUpdate {
        session_id: &summary.session_id,
        user_id,
        ended_at_ms: summary.end_ms,
        duration_seconds: summary.duration_seconds,
        total_captures: summary.total_captures,
        direction_tally: &summary.direction_tally,
    };
    if let Err(e) = store.update_session(&update) {
        log::warn!("session {}: update failed: {:#}", summary.session_id, e);
        report.failures.push(PersistFailure {
            stage: PersistStage::UpdateSession,
            reason: format!("{:#}", e),
        });
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemorySessionStore, SessionRow, StoredCapture};
    use anyhow::{anyhow, Result};

    fn capture(direction: Direction, at: EpochMillis) -> CaptureRecord {
        CaptureRecord {
            captured_at_ms: at,
            direction,
            image_jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
            confidence: 0.9,
            bbox: Some(BoundingBox::new(1.0, 2.0, 3.0, 4.0)),
        }
    }

    #[test]
    fn session_id_is_uuid_shaped() {
        let id = new_session_id();
        let parsed = uuid::Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
        assert_ne!(id, new_session_id());
    }

    #[test]
    fn only_one_active_session() {
        let mut recorder = SessionRecorder::new();
        recorder.start_session("a".into(), 0).unwrap();
        assert_eq!(
            recorder.start_session("b".into(), 1).unwrap_err(),
            SessionError::AlreadyActive
        );
        assert_eq!(recorder.active().unwrap().session_id, "a");
    }

    #[test]
    fn append_without_session_is_noop() {
        let mut recorder = SessionRecorder::new();
        assert!(!recorder.append_capture(capture(Direction::Left, 5)));
        assert!(!recorder.is_active());
    }

    #[test]
    fn stop_summarises_and_clears() {
        let mut recorder = SessionRecorder::new();
        recorder.start_session("s1".into(), 1_000).unwrap();
        assert!(recorder.append_capture(capture(Direction::Left, 4_000)));
        assert!(recorder.append_capture(capture(Direction::Right, 9_000)));
        assert!(recorder.append_capture(capture(Direction::Left, 15_000)));

        let summary = recorder.stop_session(13_346).unwrap();
        assert_eq!(summary.session_id, "s1");
        assert_eq!(summary.duration_seconds, 12.35);
        assert_eq!(summary.total_captures, 3);
        assert_eq!(summary.direction_tally.get(Direction::Left), 2);
        assert_eq!(summary.direction_tally.get(Direction::Right), 1);
        assert_eq!(summary.direction_tally.get(Direction::Front), 0);
        assert!(!recorder.is_active());
    }

    #[test]
    fn second_stop_fails_without_touching_first_summary() {
        let mut recorder = SessionRecorder::new();
        recorder.start_session("s1".into(), 0).unwrap();
        recorder.append_capture(capture(Direction::Right, 10));
        let first = recorder.stop_session(2_000).unwrap();
        let snapshot = first.clone();
        assert_eq!(
            recorder.stop_session(3_000).unwrap_err(),
            SessionError::NoActiveSession
        );
        assert_eq!(first, snapshot);
    }

    #[test]
    fn tally_serialises_every_direction() {
        let mut tally = DirectionTally::new();
        tally.increment(Direction::Right);
        assert_eq!(
            serde_json::to_string(&tally).unwrap(),
            r#"{"LEFT":0,"FRONT":0,"RIGHT":1}"#
        );
        assert_eq!(tally.total(), 1);
    }

    /// Store that rejects chosen capture indices.
    struct FlakyStore {
        inner: InMemorySessionStore,
        fail_uploads: Vec<usize>,
        uploads_seen: usize,
    }

    impl SessionStore for FlakyStore {
        fn create_session(&mut self, user_id: &str, session_id: &str, started_at_ms: EpochMillis) -> Result<()> {
            self.inner.create_session(user_id, session_id, started_at_ms)
        }

        fn upload_capture(&mut self, upload: &CaptureUpload<'_>) -> Result<StoredCapture> {
            let index = self.uploads_seen;
            self.uploads_seen += 1;
            if self.fail_uploads.contains(&index) {
                return Err(anyhow!("bucket unavailable"));
            }
            self.inner.upload_capture(upload)
        }

        fn update_session(&mut self, update: &SessionUpdate<'_>) -> Result<()> {
            self.inner.update_session(update)
        }

        fn list_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<SessionRow>> {
            self.inner.list_sessions(user_id, limit)
        }

        fn session_captures(&self, user_id: &str, session_id: &str) -> Result<Vec<StoredCapture>> {
            self.inner.session_captures(user_id, session_id)
        }

        fn delete_session(&mut self, user_id: &str, session_id: &str) -> Result<bool> {
            self.inner.delete_session(user_id, session_id)
        }
    }

    #[test]
    fn upload_failures_are_reported_per_item() {
        let mut recorder = SessionRecorder::new();
        recorder.start_session("s1".into(), 0).unwrap();
        for at in [3_000, 9_000, 15_000] {
            recorder.append_capture(capture(Direction::Left, at));
        }
        let summary = recorder.stop_session(20_000).unwrap();

        let mut store = FlakyStore {
            inner: InMemorySessionStore::default(),
            fail_uploads: vec![1],
            uploads_seen: 0,
        };
        let report = persist_summary(&mut store, "user-1", &summary);

        assert_eq!(report.uploaded, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, PersistStage::UploadCapture { index: 1 });

        let rows = store.list_sessions("user-1", 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ended_at_ms, Some(20_000));
        assert_eq!(rows[0].total_captures, 3);
        assert_eq!(store.session_captures("user-1", "s1").unwrap().len(), 2);
    }
}
