//! Recognition gate: raw classifier output -> `Known` / `Unknown`.

use crate::registry::IdentityRegistry;
use crate::types::{Outcome, Prediction};

/// Default maximum distance for a prediction to count as a match.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 80.0;

/// Pure threshold check against the identity registry.
#[derive(Debug, Clone, Copy)]
pub struct RecognitionGate {
    threshold: f32,
}

impl Default for RecognitionGate {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl RecognitionGate {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// `Known(id)` iff the score is strictly below the threshold and the id is
    /// registered. An id the registry does not know (classifier and registry
    /// out of sync) is `Unknown`, never an error. NaN scores are `Unknown`.
    pub fn classify(&self, prediction: &Prediction, registry: &IdentityRegistry) -> Outcome {
        if !(prediction.confidence < self.threshold) {
            return Outcome::Unknown;
        }
        if !registry.contains(prediction.identity_id) {
            tracing::debug!(
                id = prediction.identity_id,
                "classifier returned id absent from registry; treating as unknown"
            );
            return Outcome::Unknown;
        }
        Outcome::Known(prediction.identity_id)
    }
}
