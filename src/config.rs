use crate::common::Polygon;
use crate::error::ConfigError;
use crate::pipeline::after_hours::AfterHoursSchedule;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/footfall";
const ENV_PREFIX: &str = "FOOTFALL";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub camera: CameraSettings,
    pub zones: ZoneSettings,
    pub counting: CountingSettings,
    pub dispatch: DispatchSettings,
    pub recording: RecordingSettings,
    pub notifications: NotificationSettings,
    pub visit_log: PathBuf,
    pub log_level: String,
    pub status_interval_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub stream_id: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub drop_grab_count: usize,
    pub reconnect_secs: f64,
    pub read_timeout_secs: f64,
    pub ffmpeg: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ZoneSettings {
    pub door: Polygon,
    pub inside: Polygon,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CountingSettings {
    pub entry_cooldown_secs: f64,
    pub entry_radius: f32,
    pub notify_cooldown_secs: f64,
    pub empty_frame_threshold: u32,
    pub trail_length: usize,
    pub cleanup_interval_secs: f64,
    pub detector_timeout_secs: Option<f64>,
    pub frame_wait_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub queue_capacity: usize,
    pub drain_on_stop: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    pub enabled: bool,
    pub output_root: PathBuf,
    pub save_raw: bool,
    pub save_annotated: bool,
    pub fps: u32,
    pub segment_secs: f64,
    pub target_width: u32,
    pub target_height: u32,
    pub enable_faststart: bool,
    pub enable_hls: bool,
    pub hls_chunk_secs: u32,
    pub post_process_capacity: usize,
    pub faststart_timeout_secs: f64,
    pub hls_timeout_secs: f64,
    pub retry_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub entry_message: String,
    pub after_hours: AfterHoursSchedule,
    pub after_hours_cooldown_secs: f64,
    pub snapshot_width: u32,
    pub snapshot_height: u32,
    pub storage_root: PathBuf,
    pub public_base_url: String,
    pub upload_recordings: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            camera: CameraSettings::default(),
            zones: ZoneSettings::default(),
            counting: CountingSettings::default(),
            dispatch: DispatchSettings::default(),
            recording: RecordingSettings::default(),
            notifications: NotificationSettings::default(),
            visit_log: PathBuf::from("data/visitors.jsonl"),
            log_level: "info".to_string(),
            status_interval_secs: 60.0,
        }
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            stream_id: "cam1".to_string(),
            url: String::new(),
            width: 1280,
            height: 720,
            drop_grab_count: 1,
            reconnect_secs: 2.0,
            read_timeout_secs: 5.0,
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }
}

impl Default for ZoneSettings {
    // Factory layout for a 1280x720 entrance camera.
    fn default() -> Self {
        Self {
            door: Polygon::from(vec![
                [1.0, 300.0],
                [25.0, 290.0],
                [100.0, 330.0],
                [250.0, 340.0],
                [510.0, 650.0],
                [1000.0, 720.0],
                [1.0, 720.0],
            ]),
            inside: Polygon::from(vec![
                [1.0, 301.0],
                [1.0, 1.0],
                [1280.0, 1.0],
                [1280.0, 720.0],
                [1001.0, 720.0],
                [511.0, 649.0],
                [251.0, 339.0],
                [101.0, 329.0],
                [26.0, 289.0],
            ]),
        }
    }
}

impl Default for CountingSettings {
    fn default() -> Self {
        Self {
            entry_cooldown_secs: 5.0,
            entry_radius: 100.0,
            notify_cooldown_secs: 10.0,
            empty_frame_threshold: 5,
            trail_length: 30,
            cleanup_interval_secs: 60.0,
            detector_timeout_secs: Some(2.0),
            frame_wait_secs: 0.5,
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 20,
            drain_on_stop: false,
        }
    }
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            output_root: PathBuf::from("recordings"),
            save_raw: true,
            save_annotated: false,
            fps: 15,
            segment_secs: 180.0,
            target_width: 960,
            target_height: 540,
            enable_faststart: true,
            enable_hls: true,
            hls_chunk_secs: 2,
            post_process_capacity: 32,
            faststart_timeout_secs: 60.0,
            hls_timeout_secs: 120.0,
            retry_secs: 2.0,
        }
    }
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            entry_message: "Someone just walked in".to_string(),
            after_hours: AfterHoursSchedule::default(),
            after_hours_cooldown_secs: 600.0,
            snapshot_width: 960,
            snapshot_height: 540,
            storage_root: PathBuf::from("data/objects"),
            public_base_url: "file://data/objects".to_string(),
            upload_recordings: false,
        }
    }
}

impl Settings {
    /// Layers an optional settings file (any format the `config` crate knows)
    /// under `FOOTFALL__SECTION__KEY` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::with_name(path.unwrap_or(DEFAULT_CONFIG_PATH)).required(path.is_some()))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.url.trim().is_empty() {
            return Err(ConfigError::invalid("camera.url", "a stream url is required"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::invalid("camera.width/height", "frame size must be non-zero"));
        }
        if self.zones.door.len() < 3 {
            return Err(ConfigError::invalid("zones.door", "polygon needs at least 3 points"));
        }
        if self.zones.inside.len() < 3 {
            return Err(ConfigError::invalid("zones.inside", "polygon needs at least 3 points"));
        }
        self.validate_durations()?;
        if self.dispatch.queue_capacity == 0 {
            return Err(ConfigError::invalid("dispatch.queue_capacity", "must be at least 1"));
        }
        let rec = &self.recording;
        if rec.enabled {
            if rec.output_root.as_os_str().is_empty() {
                return Err(ConfigError::invalid("recording.output_root", "an output directory is required"));
            }
            if !rec.save_raw && !rec.save_annotated {
                return Err(ConfigError::invalid(
                    "recording.save_raw/save_annotated",
                    "at least one output stream must be enabled",
                ));
            }
            if rec.fps == 0 {
                return Err(ConfigError::invalid("recording.fps", "must be at least 1"));
            }
            if rec.segment_secs <= 0.0 {
                return Err(ConfigError::invalid("recording.segment_secs", "must be positive"));
            }
            if rec.post_process_capacity == 0 {
                return Err(ConfigError::invalid("recording.post_process_capacity", "must be at least 1"));
            }
        }
        self.log_level
            .parse::<tracing::Level>()
            .map_err(|e| ConfigError::invalid("log_level", e.to_string()))?;
        Ok(())
    }

    fn validate_durations(&self) -> Result<(), ConfigError> {
        let camera = &self.camera;
        let counting = &self.counting;
        let recording = &self.recording;
        let fields = [
            ("camera.reconnect_secs", camera.reconnect_secs),
            ("camera.read_timeout_secs", camera.read_timeout_secs),
            ("counting.entry_cooldown_secs", counting.entry_cooldown_secs),
            ("counting.notify_cooldown_secs", counting.notify_cooldown_secs),
            ("counting.cleanup_interval_secs", counting.cleanup_interval_secs),
            ("counting.frame_wait_secs", counting.frame_wait_secs),
            ("recording.segment_secs", recording.segment_secs),
            ("recording.faststart_timeout_secs", recording.faststart_timeout_secs),
            ("recording.hls_timeout_secs", recording.hls_timeout_secs),
            ("recording.retry_secs", recording.retry_secs),
            (
                "notifications.after_hours_cooldown_secs",
                self.notifications.after_hours_cooldown_secs,
            ),
            ("status_interval_secs", self.status_interval_secs),
        ];
        for (field, value) in fields {
            check_secs(field, value)?;
        }
        if let Some(timeout) = counting.detector_timeout_secs {
            check_secs("counting.detector_timeout_secs", timeout)?;
        }
        Ok(())
    }

    pub fn log_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }

    pub fn status_interval(&self) -> Duration {
        secs(self.status_interval_secs)
    }
}

/// Converts a seconds setting, clamping negative values to zero and values
/// too large for a `Duration` to `Duration::MAX`.
pub fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

fn check_secs(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_nan() || value < 0.0 {
        return Err(ConfigError::invalid(field, "must be a non-negative number of seconds"));
    }
    Duration::try_from_secs_f64(value)
        .map(|_| ())
        .map_err(|e| ConfigError::invalid(field, e.to_string()))
}
