//! headwatchd - head-direction detection loop
//!
//! This daemon:
//! 1. Acquires the configured camera and opens a detection session
//! 2. Every poll interval, submits a frame to the detector without blocking
//! 3. Debounces directions and captures once per sustained look-away
//! 4. On Ctrl-C (or `--duration-secs`), releases the camera, closes the
//!    session and writes it to the local session store

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use headwatch::ingest::open_camera;
use headwatch::ui::Ui;
use headwatch::{
    persist_summary, CameraError, DetectionController, DetectorStatus, HeadwatchConfig,
    ShapeCanvas, SqliteSessionStore, SystemClock,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a head-direction detection session")]
struct Args {
    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long, value_name = "SECS")]
    duration_secs: Option<u64>,
    /// Write the latest overlay shapes (boxes, plates, arrows; no text) as a
    /// transparent PNG after every applied result.
    #[arg(long, value_name = "PATH")]
    shapes_png: Option<PathBuf>,
    /// Write the session summary (without image bytes) as JSON.
    #[arg(long, value_name = "PATH")]
    summary_json: Option<PathBuf>,
    /// Do not write the session to the store.
    #[arg(long)]
    no_persist: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = Ui::from_flag(
        &args.ui,
        std::io::stderr().is_terminal(),
        std::io::stdout().is_terminal(),
    );
    let cfg = HeadwatchConfig::load()?;

    let backend = {
        let _stage = ui.stage("Select detector backend");
        let registry = cfg.backend_registry()?;
        log::info!(
            "detector backends: {} (using {})",
            registry.list().join(", "),
            cfg.detector.backend
        );
        registry.require_default()?
    };
    let camera = open_camera(&cfg.camera_url, cfg.display)?;

    let mut controller = DetectionController::new(
        cfg.controller_settings(),
        camera,
        backend,
        Box::new(SystemClock::new()),
    );

    let session_id = {
        let _stage = ui.stage("Start camera");
        match controller.start() {
            Ok(id) => id,
            Err(err) => {
                if let Some(camera_err) = err.downcast_ref::<CameraError>() {
                    log::error!("cannot start detection: {}", camera_err);
                }
                return Err(err);
            }
        }
    };
    log::info!(
        "session {} running for user {}; polling every {}ms",
        session_id,
        cfg.user_id,
        cfg.poll_interval.as_millis()
    );

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    let deadline = args
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let live = ui.live("detect");
    let mut shapes_canvas = args
        .shapes_png
        .as_ref()
        .map(|_| ShapeCanvas::new(cfg.display.width, cfg.display.height));

    loop {
        let report = controller.tick()?;
        if !report.applied.is_empty() {
            if let (Some(canvas), Some(path)) = (shapes_canvas.as_mut(), args.shapes_png.as_ref()) {
                controller.overlay().replay(canvas);
                if let Err(e) = canvas.save_png(path) {
                    log::warn!("{:#}", e);
                }
            }
        }

        let state = controller.stabilizer_state();
        let captures = controller
            .active_session()
            .map_or(0, |session| session.captures.len());
        let status = match controller.status() {
            DetectorStatus::Online => "",
            DetectorStatus::Offline => " [detector offline]",
        };
        live.set(&format!(
            "{} held {:.1}s, {} captures{}",
            state
                .sticky_direction
                .map_or("-", |direction| direction.as_str()),
            state.hold_duration_ms as f64 / 1000.0,
            captures,
            status
        ));

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            log::info!("duration reached, stopping");
            break;
        }
        match shutdown_rx.recv_timeout(cfg.poll_interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received, stopping detection");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    let summary = controller.stop()?;
    live.finish(&format!(
        "{} captures in {:.2}s",
        summary.total_captures, summary.duration_seconds
    ));
    for (direction, count) in summary.direction_tally.iter() {
        println!("{:<5} {}", direction, count);
    }

    if let Some(path) = &args.summary_json {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json)
            .with_context(|| format!("write summary {}", path.display()))?;
    }

    if args.no_persist {
        log::info!("session {} not persisted (--no-persist)", summary.session_id);
        return Ok(());
    }

    let report = {
        let _stage = ui.stage("Save session");
        let mut store = SqliteSessionStore::open(&cfg.storage.db_path, &cfg.storage.object_dir)?;
        persist_summary(&mut store, &cfg.user_id, &summary)
    };
    if report.is_clean() {
        println!(
            "session {} saved with {} captures",
            summary.session_id, report.uploaded
        );
    } else {
        eprintln!(
            "session {} saved with {} warnings:",
            summary.session_id,
            report.failures.len()
        );
        for failure in &report.failures {
            eprintln!("  {:?}: {}", failure.stage, failure.reason);
        }
    }
    Ok(())
}
