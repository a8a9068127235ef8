use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classifier-internal identity number, assigned sequentially by offline training.
///
/// Signed because classifiers commonly report `-1` for "no label".
pub type IdentityId = i64;

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector score in [0, 1]. Unrelated to the recognition distance.
    pub confidence: f32,
}

/// Raw output of the recognition source for one face crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub identity_id: IdentityId,
    /// Distance-like score: lower means a closer match.
    pub confidence: f32,
}

/// A face seen in one frame together with what the classifier made of it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceObservation {
    pub bbox: BoundingBox,
    pub prediction: Prediction,
}

/// Recognition gate verdict for a single face crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Known(IdentityId),
    Unknown,
}

/// Smoothing buffer verdict for one face position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// Not enough agreeing observations yet.
    Pending,
    Identified(IdentityId),
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// Attendance status written to the sink. Only presence is ever recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Present,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Present => f.write_str("Present"),
        }
    }
}

/// The only artifact persisted by the engine: one row per qualifying detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub name: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM:SS`
    pub time: String,
    pub status: Status,
}

impl AttendanceEvent {
    pub fn present(name: &str, at: DateTime<Local>) -> Self {
        Self {
            name: name.to_string(),
            date: at.format("%Y-%m-%d").to_string(),
            time: at.format("%H:%M:%S").to_string(),
            status: Status::Present,
        }
    }

    /// Combined `YYYY-MM-DD HH:MM:SS` form used by the plain log layout.
    pub fn timestamp(&self) -> String {
        format!("{} {}", self.date, self.time)
    }
}
