use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tempfile::TempDir;

use headwatch::detect::backends::ScriptedBackend;
use headwatch::detect::SharedBackend;
use headwatch::ingest::open_camera;
use headwatch::overlay::DrawOp;
use headwatch::{
    persist_summary, Applied, CameraError, ControllerSettings, DetectionController,
    DetectorStatus, Direction, FrameDimensions, ManualClock, SessionError, SessionStore,
    SqliteSessionStore,
};

const SETTLE: Duration = Duration::from_secs(5);

fn controller(camera_url: &str, script: &str, clock: &ManualClock) -> Result<DetectionController> {
    controller_with(camera_url, Arc::new(ScriptedBackend::from_spec(script)?), clock)
}

fn controller_with(
    camera_url: &str,
    backend: SharedBackend,
    clock: &ManualClock,
) -> Result<DetectionController> {
    let settings = ControllerSettings {
        display: FrameDimensions::new(1280, 720),
        offline_after: 3,
        ..ControllerSettings::default()
    };
    let camera = open_camera(camera_url, settings.display)?;
    Ok(DetectionController::new(
        settings,
        camera,
        backend,
        Box::new(clock.clone()),
    ))
}

/// Advance the clock one poll interval, tick, and wait for the reply.
fn step(ctrl: &mut DetectionController, clock: &ManualClock) -> Vec<Applied> {
    clock.advance(500);
    let report = ctrl.tick().expect("tick");
    assert!(report.submitted.is_some());
    ctrl.settle(SETTLE)
}

/// Scripted backend whose steps take `delays` each, shared with the test.
fn slow_backend(script: &str, delays: &[u64]) -> Result<Arc<ScriptedBackend>> {
    Ok(Arc::new(ScriptedBackend::from_spec(script)?.with_delays(
        delays.iter().copied().map(Duration::from_millis).collect(),
    )))
}

/// Block until the backend has handed out `calls` script steps.
fn wait_for_calls(backend: &ScriptedBackend, calls: usize) {
    let deadline = Instant::now() + SETTLE;
    while backend.calls() < calls {
        assert!(Instant::now() < deadline, "backend never reached {} calls", calls);
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn sustained_right_look_captures_once_and_persists() -> Result<()> {
    let clock = ManualClock::new(1_700_000_000_000);
    let mut ctrl = controller("stub://webcam", "RIGHT", &clock)?;
    let session_id = ctrl.start()?;

    let mut captured_at_tick = Vec::new();
    for tick in 0..16 {
        for applied in step(&mut ctrl, &clock) {
            if let Applied::Observed { captured: true, .. } = applied {
                captured_at_tick.push(tick);
            }
        }
    }
    // First reply bootstraps at tick 0; hold reaches 3000ms at tick 6.
    assert_eq!(captured_at_tick, vec![6]);
    assert_eq!(ctrl.stabilizer_state().sticky_direction, Some(Direction::Right));
    assert_eq!(ctrl.stabilizer_state().hold_duration_ms, 7_500);

    // The detector runs at 640x480; boxes land in 1280x720 display space.
    assert!(ctrl.overlay().ops().contains(&DrawOp::StrokeRect {
        x: 440.0,
        y: 180.0,
        w: 400.0,
        h: 360.0,
        color: headwatch::overlay::SIDE_COLOR,
        width: 3.0,
    }));

    let summary = ctrl.stop()?;
    assert_eq!(summary.session_id, session_id);
    assert_eq!(summary.total_captures, 1);
    assert_eq!(summary.duration_seconds, 8.0);
    let capture = &summary.captures[0];
    assert_eq!(capture.direction, Direction::Right);
    assert_eq!(capture.captured_at_ms, 1_700_000_003_500);
    assert_eq!(capture.confidence, 0.9);
    assert_eq!(&capture.image_jpeg[..2], &[0xFF, 0xD8]);

    let dir = TempDir::new()?;
    let mut store = SqliteSessionStore::open(
        dir.path().join("h.db").to_str().unwrap(),
        dir.path().join("objects"),
    )?;
    let report = persist_summary(&mut store, "student", &summary);
    assert!(report.is_clean());
    let stored = store.session_captures("student", &session_id)?;
    assert_eq!(stored.len(), 1);
    assert_eq!(store.read_object(&stored[0].object_key)?, capture.image_jpeg);
    Ok(())
}

#[test]
fn front_facing_subject_never_captures() -> Result<()> {
    let clock = ManualClock::new(0);
    let mut ctrl = controller("stub://webcam", "FRONT", &clock)?;
    ctrl.start()?;
    for _ in 0..20 {
        step(&mut ctrl, &clock);
    }
    let summary = ctrl.stop()?;
    assert_eq!(summary.total_captures, 0);
    assert_eq!(summary.direction_tally.total(), 0);
    Ok(())
}

#[test]
fn single_frame_glance_is_ignored() -> Result<()> {
    let clock = ManualClock::new(0);
    // One LEFT frame 500ms into a RIGHT hold.
    let mut ctrl = controller("stub://webcam", "RIGHT,LEFT,RIGHT,RIGHT,RIGHT,RIGHT,RIGHT,RIGHT", &clock)?;
    ctrl.start()?;
    let mut transitions = Vec::new();
    for _ in 0..8 {
        for applied in step(&mut ctrl, &clock) {
            if let Applied::Observed { transition, .. } = applied {
                transitions.push(transition);
            }
        }
    }
    assert!(transitions
        .iter()
        .all(|t| !matches!(t, headwatch::Transition::Changed { .. })));
    assert_eq!(ctrl.stabilizer_state().sticky_direction, Some(Direction::Right));
    let summary = ctrl.stop()?;
    assert_eq!(summary.total_captures, 1);
    Ok(())
}

#[test]
fn detector_outage_keeps_loop_alive() -> Result<()> {
    let clock = ManualClock::new(0);
    let mut ctrl = controller("stub://webcam", "fail,fail,fail,LEFT", &clock)?;
    ctrl.start()?;

    for _ in 0..3 {
        let applied = step(&mut ctrl, &clock);
        assert!(matches!(applied.as_slice(), [Applied::Failed { .. }]));
    }
    assert_eq!(ctrl.status(), DetectorStatus::Offline);
    assert_eq!(ctrl.stabilizer_state().sticky_direction, None);

    step(&mut ctrl, &clock);
    assert_eq!(ctrl.status(), DetectorStatus::Online);
    assert_eq!(ctrl.stabilizer_state().sticky_direction, Some(Direction::Left));
    ctrl.stop()?;
    Ok(())
}

#[test]
fn camera_failures_block_start() -> Result<()> {
    let clock = ManualClock::new(0);
    for (url, expected) in [
        ("stub://webcam?fail=permission", CameraError::PermissionDenied),
        ("stub://webcam?fail=missing", CameraError::DeviceNotFound),
    ] {
        let mut ctrl = controller(url, "FRONT", &clock)?;
        let err = ctrl.start().unwrap_err();
        assert_eq!(err.downcast_ref::<CameraError>(), Some(&expected));
        assert!(ctrl.active_session().is_none());
        assert!(!ctrl.is_running());
    }
    Ok(())
}

#[test]
fn stop_twice_reports_no_active_session() -> Result<()> {
    let clock = ManualClock::new(10_000);
    let mut ctrl = controller("stub://webcam", "LEFT", &clock)?;
    ctrl.start()?;
    clock.advance(1_234);
    let first = ctrl.stop()?;
    let snapshot = first.clone();

    let err = ctrl.stop().unwrap_err();
    assert_eq!(
        err.downcast_ref::<SessionError>(),
        Some(&SessionError::NoActiveSession)
    );
    assert_eq!(first, snapshot);
    assert_eq!(first.duration_seconds, 1.23);
    assert!(ctrl.tick().is_err());
    Ok(())
}

#[test]
fn restart_after_stop_opens_fresh_session() -> Result<()> {
    let clock = ManualClock::new(0);
    let mut ctrl = controller("stub://webcam", "LEFT", &clock)?;
    let first = ctrl.start()?;
    assert!(ctrl.start().is_err());
    step(&mut ctrl, &clock);
    ctrl.stop()?;

    let second = ctrl.start()?;
    assert_ne!(first, second);
    assert_eq!(ctrl.stabilizer_state().sticky_direction, None);
    ctrl.stop()?;
    Ok(())
}

#[test]
fn slow_reply_overtaken_by_newer_one_is_stale() -> Result<()> {
    let clock = ManualClock::new(0);
    let backend = slow_backend("RIGHT,LEFT", &[400, 0])?;
    let mut ctrl = controller_with("stub://webcam", backend.clone(), &clock)?;
    ctrl.start()?;

    clock.advance(500);
    assert_eq!(ctrl.tick()?.submitted, Some(0));
    // Frame 0 has taken the slow RIGHT step before frame 1 is sent.
    wait_for_calls(&backend, 1);
    clock.advance(500);
    let report = ctrl.tick()?;
    assert_eq!(report.submitted, Some(1));
    assert!(report.applied.is_empty());
    assert_eq!(ctrl.in_flight(), 2);

    let applied = ctrl.settle(SETTLE);
    assert!(
        matches!(
            applied.as_slice(),
            [Applied::Observed { seq: 1, .. }, Applied::Stale { seq: 0 }]
        ),
        "{:?}",
        applied
    );
    assert_eq!(ctrl.stabilizer_state().sticky_direction, Some(Direction::Left));
    assert_eq!(
        ctrl.latest_result().map(|result| result.primary_direction),
        Some(Direction::Left)
    );
    ctrl.stop()?;
    Ok(())
}

#[test]
fn busy_detector_skips_submissions_past_the_cap() -> Result<()> {
    let clock = ManualClock::new(0);
    let backend = slow_backend("FRONT", &[300])?;
    let mut ctrl = controller_with("stub://webcam", backend.clone(), &clock)?;
    ctrl.start()?;

    let mut submitted = Vec::new();
    for _ in 0..=headwatch::controller::MAX_IN_FLIGHT {
        clock.advance(500);
        submitted.push(ctrl.tick()?.submitted);
    }
    assert_eq!(submitted, vec![Some(0), Some(1), Some(2), None]);
    assert_eq!(ctrl.in_flight(), headwatch::controller::MAX_IN_FLIGHT);

    let applied = ctrl.settle(SETTLE);
    assert_eq!(applied.len(), 3);
    assert_eq!(ctrl.in_flight(), 0);
    assert_eq!(backend.calls(), 3);

    // The skipped tick did not consume a sequence number.
    clock.advance(500);
    assert_eq!(ctrl.tick()?.submitted, Some(3));
    ctrl.stop()?;
    Ok(())
}

#[test]
fn stop_abandons_replies_still_in_flight() -> Result<()> {
    let clock = ManualClock::new(0);
    let backend = slow_backend("LEFT", &[200])?;
    let mut ctrl = controller_with("stub://webcam", backend.clone(), &clock)?;
    ctrl.start()?;

    clock.advance(500);
    assert_eq!(ctrl.tick()?.submitted, Some(0));
    wait_for_calls(&backend, 1);
    let summary = ctrl.stop()?;
    assert_eq!(summary.total_captures, 0);
    assert!(!ctrl.is_running());
    assert_eq!(ctrl.in_flight(), 0);

    thread::sleep(Duration::from_millis(300));
    assert!(ctrl.settle(SETTLE).is_empty());
    assert_eq!(ctrl.stabilizer_state().sticky_direction, None);
    assert!(ctrl.latest_result().is_none());

    // The old reply does not leak into the next session either.
    ctrl.start()?;
    assert!(ctrl.settle(Duration::from_millis(50)).is_empty());
    assert_eq!(ctrl.stabilizer_state().sticky_direction, None);
    ctrl.stop()?;
    Ok(())
}
