//! Recognition source.
//!
//! [`Recognizer`] is the `predict(face) -> (id, distance)` contract the engine
//! consumes. [`FaceRecognizer`] fulfils it with an ArcFace embedding and a
//! nearest-neighbour search over an enrolled [`Gallery`].

use crate::types::{BoundingBox, Embedding, IdentityId, Prediction};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;

/// Cosine similarity 1.0 maps to distance 0, similarity 0 to distance 100.
const DISTANCE_SCALE: f32 = 100.0;

/// Reported for an empty gallery; above any sane threshold.
pub const NO_MATCH_DISTANCE: f32 = 2.0 * DISTANCE_SCALE;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("gallery file not found: {0}")]
    GalleryNotFound(String),
    #[error("failed to read gallery: {0}")]
    GalleryIo(#[from] std::io::Error),
    #[error("malformed gallery: {0}")]
    GalleryParse(#[from] serde_json::Error),
    #[error("face region {0:?} lies outside the frame")]
    EmptyCrop(BoundingBox),
    #[error("frame buffer too short: expected {expected} bytes, got {actual}")]
    BadFrame { expected: usize, actual: usize },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Classifies one face crop. Lower confidence means a closer match.
pub trait Recognizer {
    fn predict(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Prediction, RecognizerError>;
}

#[derive(Debug, Clone, Deserialize)]
struct GalleryEntry {
    id: IdentityId,
    embedding: Vec<f32>,
}

/// Enrolled embeddings, several per identity allowed.
///
/// Produced offline alongside the identity registry as a JSON array of
/// `{"id": 0, "embedding": [...]}` objects.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<(IdentityId, Embedding)>,
}

impl Gallery {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RecognizerError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RecognizerError::GalleryNotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        let gallery = Self::from_json(&raw)?;
        tracing::info!(path = %path.display(), embeddings = gallery.len(), "loaded gallery");
        Ok(gallery)
    }

    pub fn from_json(raw: &str) -> Result<Self, RecognizerError> {
        let entries: Vec<GalleryEntry> = serde_json::from_str(raw)?;
        Ok(Self {
            entries: entries
                .into_iter()
                .map(|e| (e.id, Embedding { values: e.embedding }))
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Closest enrolled identity as a distance-like prediction.
    ///
    /// Every entry is compared; the best cosine similarity `s` is reported as
    /// `(1 - s) * 100`. An empty gallery yields id -1 at [`NO_MATCH_DISTANCE`].
    pub fn nearest(&self, query: &Embedding) -> Prediction {
        let mut best = Prediction { identity_id: -1, confidence: NO_MATCH_DISTANCE };
        for (id, embedding) in &self.entries {
            let distance = (1.0 - query.similarity(embedding)) * DISTANCE_SCALE;
            if distance < best.confidence {
                best = Prediction { identity_id: *id, confidence: distance };
            }
        }
        best
    }
}

/// ArcFace (w600k_r50) embedder matched against a [`Gallery`].
pub struct FaceRecognizer {
    session: Session,
    gallery: Gallery,
}

impl FaceRecognizer {
    pub fn load(model_path: &str, gallery: Gallery) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            gallery = gallery.len(),
            "loaded ArcFace recognizer"
        );

        Ok(Self { session, gallery })
    }

    /// L2-normalized embedding for one face region.
    pub fn embed(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        let crop = crop_face(frame, width, height, face)?;
        let input = Self::preprocess(&crop);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw.to_vec()
        };
        Ok(Embedding { values })
    }

    /// 112x112 grayscale crop -> NCHW tensor, gray replicated across channels.
    fn preprocess(crop: &GrayImage) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in crop.enumerate_pixels() {
            let v = (pixel.0[0] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = v;
            }
        }
        tensor
    }
}

impl Recognizer for FaceRecognizer {
    fn predict(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Prediction, RecognizerError> {
        let embedding = self.embed(frame, width, height, face)?;
        Ok(self.gallery.nearest(&embedding))
    }
}

/// Cut the face region (clamped to the frame) and scale it to the ArcFace input.
pub fn crop_face(
    frame: &[u8],
    width: u32,
    height: u32,
    face: &BoundingBox,
) -> Result<GrayImage, RecognizerError> {
    let expected = (width * height) as usize;
    let image = GrayImage::from_raw(width, height, frame[..expected.min(frame.len())].to_vec())
        .ok_or(RecognizerError::BadFrame { expected, actual: frame.len() })?;

    let x0 = face.x.max(0.0).floor() as u32;
    let y0 = face.y.max(0.0).floor() as u32;
    let x1 = ((face.x + face.width).ceil().max(0.0) as u32).min(width);
    let y1 = ((face.y + face.height).ceil().max(0.0) as u32).min(height);
    if x0 >= x1 || y0 >= y1 {
        return Err(RecognizerError::EmptyCrop(*face));
    }

    let region = imageops::crop_imm(&image, x0, y0, x1 - x0, y1 - y0).to_image();
    Ok(imageops::resize(
        &region,
        ARCFACE_INPUT_SIZE,
        ARCFACE_INPUT_SIZE,
        FilterType::Triangle,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9 }
    }

    #[test]
    fn test_gallery_nearest_picks_closest() {
        let gallery = Gallery::from_json(
            r#"[
                {"id": 0, "embedding": [1.0, 0.0, 0.0]},
                {"id": 1, "embedding": [0.0, 1.0, 0.0]},
                {"id": 1, "embedding": [0.6, 0.8, 0.0]}
            ]"#,
        )
        .unwrap();
        let query = Embedding { values: vec![0.0, 1.0, 0.0] };
        let p = gallery.nearest(&query);
        assert_eq!(p.identity_id, 1);
        assert!(p.confidence.abs() < 1e-4);

        let query = Embedding { values: vec![0.8, 0.6, 0.0] };
        let p = gallery.nearest(&query);
        assert_eq!(p.identity_id, 1);
        assert!((p.confidence - 4.0).abs() < 1e-3, "distance {}", p.confidence);
    }

    #[test]
    fn test_gallery_empty_reports_no_match() {
        let p = Gallery::default().nearest(&Embedding { values: vec![1.0] });
        assert_eq!(p.identity_id, -1);
        assert_eq!(p.confidence, NO_MATCH_DISTANCE);
    }

    #[test]
    fn test_gallery_missing_file() {
        let err = Gallery::load("/nonexistent/gallery.json").unwrap_err();
        assert!(matches!(err, RecognizerError::GalleryNotFound(_)));
    }

    #[test]
    fn test_crop_face_resizes_to_input() {
        let frame = vec![90u8; 200 * 100];
        let crop = crop_face(&frame, 200, 100, &bbox(150.0, 50.0, 100.0, 100.0)).unwrap();
        assert_eq!(crop.dimensions(), (ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE));
        assert!(crop.pixels().all(|p| p.0[0].abs_diff(90) <= 1));
    }

    #[test]
    fn test_crop_face_outside_frame() {
        let frame = vec![0u8; 64 * 64];
        let err = crop_face(&frame, 64, 64, &bbox(100.0, 100.0, 20.0, 20.0)).unwrap_err();
        assert!(matches!(err, RecognizerError::EmptyCrop(_)));
    }

    #[test]
    fn test_preprocess_channels_identical() {
        let crop = GrayImage::from_pixel(ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, image::Luma([100]));
        let tensor = FaceRecognizer::preprocess(&crop);
        let expected = (100.0 - ARCFACE_MEAN) / ARCFACE_STD;
        assert!((tensor[[0, 0, 5, 7]] - expected).abs() < 1e-6);
        assert_eq!(tensor[[0, 0, 5, 7]], tensor[[0, 2, 5, 7]]);
    }
}
