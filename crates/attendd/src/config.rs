use attend_core::engine::{EngineConfig, ScanMode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How scan windows are started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Always scanning, smoothing-based qualification.
    Continuous,
    /// Windows opened by the serial motion sensor (and the manual key).
    Motion,
    /// Windows opened by the manual key only.
    Manual,
}

impl FromStr for TriggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "continuous" => Ok(Self::Continuous),
            "motion" => Ok(Self::Motion),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown trigger mode {other:?}")),
        }
    }
}

/// Where attendance rows go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// CSV with `Name,Date,Time,Status` columns.
    Spreadsheet,
    /// CSV with `Name,Timestamp` columns.
    Log,
    Sqlite,
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spreadsheet" => Ok(Self::Spreadsheet),
            "log" => Ok(Self::Log),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!("unknown sink kind {other:?}")),
        }
    }
}

/// Daemon configuration.
///
/// Layered: built-in defaults, then the TOML file named by `ATTEND_CONFIG`
/// (if set), then individual `ATTEND_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    /// Frames dropped at startup while auto exposure settles.
    pub warmup_frames: usize,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// `labels.json` written by the training step.
    pub registry_path: PathBuf,
    /// Enrolled embeddings written by the training step.
    pub gallery_path: PathBuf,
    pub sink: SinkKind,
    pub sink_path: PathBuf,
    pub trigger: TriggerMode,
    /// Motion sensor tty; auto-detected when unset.
    pub serial_port: Option<String>,
    pub serial_baud: u32,
    /// Quiet period after a windowed scan before listening for triggers again.
    pub post_scan_pause_ms: u64,
    /// Edge of the grid cell used to key faces across frames, in pixels.
    pub grid_cell_size: f32,
    pub detector_min_score: f32,
    pub min_face_size: f32,
    pub confidence_threshold: f32,
    pub cooldown_secs: u64,
    pub scan_window_secs: u64,
    pub min_occurrence_count: usize,
    pub smoothing_enabled: bool,
    pub smoothing_capacity: usize,
    pub smoothing_min_votes: usize,
    pub history_reset_interval_frames: u64,
}

impl Default for Config {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            camera_device: "/dev/video0".to_string(),
            warmup_frames: 4,
            model_dir: attend_core::default_model_dir(),
            registry_path: PathBuf::from("labels.json"),
            gallery_path: PathBuf::from("gallery.json"),
            sink: SinkKind::Spreadsheet,
            sink_path: PathBuf::from("attendance_log.csv"),
            trigger: TriggerMode::Motion,
            serial_port: None,
            serial_baud: attend_hw::trigger::DEFAULT_BAUD,
            post_scan_pause_ms: 2000,
            grid_cell_size: attend_core::smoothing::DEFAULT_GRID_CELL,
            detector_min_score: attend_core::detector::DEFAULT_MIN_SCORE,
            min_face_size: attend_core::detector::DEFAULT_MIN_FACE_SIZE,
            confidence_threshold: engine.confidence_threshold,
            cooldown_secs: engine.cooldown_secs,
            scan_window_secs: engine.scan_window_secs,
            min_occurrence_count: engine.min_occurrence_count,
            smoothing_enabled: engine.smoothing_enabled,
            smoothing_capacity: engine.smoothing_capacity,
            smoothing_min_votes: engine.smoothing_min_votes,
            history_reset_interval_frames: engine.history_reset_interval_frames,
        }
    }
}

impl Config {
    /// Load from `ATTEND_CONFIG` and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("ATTEND_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Override fields from `ATTEND_*` variables. Unparseable values are
    /// ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn set<T: FromStr>(lookup: &dyn Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
            if let Some(raw) = lookup(key) {
                match raw.trim().parse() {
                    Ok(v) => *slot = v,
                    Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable setting"),
                }
            }
        }
        let lookup: &dyn Fn(&str) -> Option<String> = &lookup;

        set(lookup, "ATTEND_CAMERA_DEVICE", &mut self.camera_device);
        set(lookup, "ATTEND_WARMUP_FRAMES", &mut self.warmup_frames);
        set(lookup, "ATTEND_MODEL_DIR", &mut self.model_dir);
        set(lookup, "ATTEND_REGISTRY_PATH", &mut self.registry_path);
        set(lookup, "ATTEND_GALLERY_PATH", &mut self.gallery_path);
        set(lookup, "ATTEND_SINK", &mut self.sink);
        set(lookup, "ATTEND_SINK_PATH", &mut self.sink_path);
        set(lookup, "ATTEND_TRIGGER", &mut self.trigger);
        if let Some(port) = lookup("ATTEND_SERIAL_PORT") {
            self.serial_port = Some(port).filter(|p| !p.is_empty());
        }
        set(lookup, "ATTEND_SERIAL_BAUD", &mut self.serial_baud);
        set(lookup, "ATTEND_POST_SCAN_PAUSE_MS", &mut self.post_scan_pause_ms);
        set(lookup, "ATTEND_GRID_CELL_SIZE", &mut self.grid_cell_size);
        set(lookup, "ATTEND_DETECTOR_MIN_SCORE", &mut self.detector_min_score);
        set(lookup, "ATTEND_MIN_FACE_SIZE", &mut self.min_face_size);
        set(lookup, "ATTEND_CONFIDENCE_THRESHOLD", &mut self.confidence_threshold);
        set(lookup, "ATTEND_COOLDOWN_SECS", &mut self.cooldown_secs);
        set(lookup, "ATTEND_SCAN_WINDOW_SECS", &mut self.scan_window_secs);
        set(lookup, "ATTEND_MIN_OCCURRENCE_COUNT", &mut self.min_occurrence_count);
        set(lookup, "ATTEND_SMOOTHING_ENABLED", &mut self.smoothing_enabled);
        set(lookup, "ATTEND_SMOOTHING_CAPACITY", &mut self.smoothing_capacity);
        set(lookup, "ATTEND_SMOOTHING_MIN_VOTES", &mut self.smoothing_min_votes);
        set(
            lookup,
            "ATTEND_HISTORY_RESET_INTERVAL_FRAMES",
            &mut self.history_reset_interval_frames,
        );
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            mode: match self.trigger {
                TriggerMode::Continuous => ScanMode::Continuous,
                TriggerMode::Motion | TriggerMode::Manual => ScanMode::Windowed,
            },
            confidence_threshold: self.confidence_threshold,
            cooldown_secs: self.cooldown_secs,
            scan_window_secs: self.scan_window_secs,
            min_occurrence_count: self.min_occurrence_count,
            smoothing_enabled: self.smoothing_enabled,
            smoothing_capacity: self.smoothing_capacity,
            smoothing_min_votes: self.smoothing_min_votes,
            history_reset_interval_frames: self.history_reset_interval_frames,
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir.join("det_10g.onnx").to_string_lossy().into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir.join("w600k_r50.onnx").to_string_lossy().into_owned()
    }
}
