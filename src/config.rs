use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::{CaptureWindow, DEFAULT_WINDOW_END_MS, DEFAULT_WINDOW_START_MS};
use crate::controller::ControllerSettings;
use crate::detect::{BackendRegistry, FrameDimensions, HttpBackend, ScriptedBackend};
use crate::stabilizer::DEFAULT_DEBOUNCE_MS;

const DEFAULT_USER_ID: &str = "local";
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_DISPLAY_WIDTH: u32 = 1280;
const DEFAULT_DISPLAY_HEIGHT: u32 = 720;
const DEFAULT_DETECTOR_BACKEND: &str = "http";
const DEFAULT_DETECTOR_URL: &str = "http://127.0.0.1:5001/detect";
const DEFAULT_DETECTOR_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_OFFLINE_AFTER: u32 = 5;
const DEFAULT_DETECTOR_SCRIPT: &str = "FRONT";
const DEFAULT_CAMERA_URL: &str = "stub://webcam";
const DEFAULT_DB_PATH: &str = "headwatch.db";
const DEFAULT_OBJECT_DIR: &str = "headwatch_objects";

const KNOWN_BACKENDS: [&str; 2] = ["http", "stub"];

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct HeadwatchConfigFile {
    user_id: Option<String>,
    poll_interval_ms: Option<u64>,
    display: Option<DisplayConfigFile>,
    detector: Option<DetectorConfigFile>,
    camera: Option<CameraConfigFile>,
    stabilizer: Option<StabilizerConfigFile>,
    capture: Option<CaptureConfigFile>,
    storage: Option<StorageConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    url: Option<String>,
    timeout_ms: Option<u64>,
    offline_after: Option<u32>,
    script: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StabilizerConfigFile {
    debounce_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    window_start_ms: Option<u64>,
    window_end_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    db_path: Option<String>,
    object_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct HeadwatchConfig {
    pub user_id: String,
    pub poll_interval: Duration,
    pub display: FrameDimensions,
    pub detector: DetectorSettings,
    pub camera_url: String,
    pub debounce_ms: u64,
    pub capture_window: CaptureWindow,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// `http` or `stub`.
    pub backend: String,
    pub url: String,
    pub timeout: Duration,
    pub offline_after: u32,
    /// Step script for the `stub` backend, e.g. `LEFT,LEFT,FRONT`.
    pub script: String,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub db_path: String,
    pub object_dir: PathBuf,
}

impl HeadwatchConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("HEADWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: HeadwatchConfigFile) -> Self {
        let display = file.display.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let capture = file.capture.unwrap_or_default();
        let storage = file.storage.unwrap_or_default();
        Self {
            user_id: file
                .user_id
                .unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            poll_interval: Duration::from_millis(
                file.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            display: FrameDimensions::new(
                display.width.unwrap_or(DEFAULT_DISPLAY_WIDTH),
                display.height.unwrap_or(DEFAULT_DISPLAY_HEIGHT),
            ),
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_DETECTOR_BACKEND.to_string()),
                url: detector
                    .url
                    .unwrap_or_else(|| DEFAULT_DETECTOR_URL.to_string()),
                timeout: Duration::from_millis(
                    detector.timeout_ms.unwrap_or(DEFAULT_DETECTOR_TIMEOUT_MS),
                ),
                offline_after: detector.offline_after.unwrap_or(DEFAULT_OFFLINE_AFTER),
                script: detector
                    .script
                    .unwrap_or_else(|| DEFAULT_DETECTOR_SCRIPT.to_string()),
            },
            camera_url: file
                .camera
                .and_then(|camera| camera.url)
                .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
            debounce_ms: file
                .stabilizer
                .and_then(|s| s.debounce_ms)
                .unwrap_or(DEFAULT_DEBOUNCE_MS),
            capture_window: CaptureWindow {
                start_ms: capture.window_start_ms.unwrap_or(DEFAULT_WINDOW_START_MS),
                end_ms: capture.window_end_ms.unwrap_or(DEFAULT_WINDOW_END_MS),
            },
            storage: StorageSettings {
                db_path: storage
                    .db_path
                    .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
                object_dir: storage
                    .object_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OBJECT_DIR)),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(user_id) = non_empty_env("HEADWATCH_USER_ID") {
            self.user_id = user_id;
        }
        if let Some(url) = non_empty_env("HEADWATCH_DETECTOR_URL") {
            self.detector.url = url;
        }
        if let Some(backend) = non_empty_env("HEADWATCH_DETECTOR_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(url) = non_empty_env("HEADWATCH_CAMERA_URL") {
            self.camera_url = url;
        }
        if let Some(path) = non_empty_env("HEADWATCH_DB_PATH") {
            self.storage.db_path = path;
        }
        if let Some(interval) = non_empty_env("HEADWATCH_POLL_INTERVAL_MS") {
            let ms: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("HEADWATCH_POLL_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.poll_interval = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.detector.backend = self.detector.backend.trim().to_ascii_lowercase();
        if !KNOWN_BACKENDS.contains(&self.detector.backend.as_str()) {
            return Err(anyhow!(
                "unknown detector backend '{}' (expected one of: {})",
                self.detector.backend,
                KNOWN_BACKENDS.join(", ")
            ));
        }
        if self.user_id.trim().is_empty() {
            return Err(anyhow!("user_id must not be empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll_interval_ms must be greater than zero"));
        }
        if self.display.width == 0 || self.display.height == 0 {
            return Err(anyhow!("display dimensions must be greater than zero"));
        }
        if self.capture_window.start_ms >= self.capture_window.end_ms {
            return Err(anyhow!(
                "capture window start ({}ms) must be before its end ({}ms)",
                self.capture_window.start_ms,
                self.capture_window.end_ms
            ));
        }
        if self.detector.offline_after == 0 {
            return Err(anyhow!("detector.offline_after must be at least 1"));
        }
        Ok(())
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            display: self.display,
            debounce_ms: self.debounce_ms,
            window: self.capture_window,
            offline_after: self.detector.offline_after,
        }
    }

    /// Both backends registered, the configured one as default.
    pub fn backend_registry(&self) -> Result<BackendRegistry> {
        let mut registry = BackendRegistry::new();
        registry.register(HttpBackend::new(&self.detector.url, self.detector.timeout)?);
        registry.register(ScriptedBackend::from_spec(&self.detector.script)?);
        registry.set_default(&self.detector.backend)?;
        Ok(registry)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<HeadwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
