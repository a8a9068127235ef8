//! attend-core — attendance decision engine.
//!
//! Takes per-frame face recognition results, gates them by distance,
//! smooths them per face position, and emits at most one attendance event
//! per person per cooldown period. Face detection (SCRFD) and recognition
//! (ArcFace + gallery) run via ONNX Runtime behind the [`Detector`] and
//! [`Recognizer`] traits.

pub mod cooldown;
pub mod detector;
pub mod engine;
pub mod gate;
pub mod recognizer;
pub mod registry;
pub mod sink;
pub mod smoothing;
pub mod types;

pub use cooldown::CooldownLedger;
pub use detector::{Detector, FaceDetector};
pub use engine::{
    DecisionEngine, EngineConfig, EngineState, FaceLabel, FrameReport, LogOutcome, LogStatus,
    ScanMode, ScanReport,
};
pub use gate::RecognitionGate;
pub use recognizer::{FaceRecognizer, Gallery, Recognizer};
pub use registry::IdentityRegistry;
pub use sink::{AttendanceSink, MemorySink, SinkError};
pub use smoothing::{FaceKeyer, GridKeyer, PositionKey, SmoothingBuffer};
pub use types::{
    AttendanceEvent, BoundingBox, Embedding, FaceObservation, IdentityId, Outcome, Prediction,
    Status, Vote,
};

/// Default model directory (`$XDG_DATA_HOME/attend/models`).
pub fn default_model_dir() -> std::path::PathBuf {
    let data = std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        });
    data.join("attend").join("models")
}
