//! Classifier invocation: normalized tensor in, labeled probabilities out.

use crate::labels::{Emotion, NUM_EMOTIONS};
use crate::network::{EmotionNet, INPUT_CHANNELS, INPUT_SIZE};
use ndarray::Array4;
use serde::Serialize;
use thiserror::Error;

/// Tolerance for the probability-vector normalization check.
const PROBABILITY_SUM_TOLERANCE: f32 = 1e-3;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("classifier expects a (1, {INPUT_SIZE}, {INPUT_SIZE}, {INPUT_CHANNELS}) tensor, got {0:?}")]
    BadInputShape(Vec<usize>),
    #[error("probability vector is not normalized (sum {0}); model weights are unusable")]
    DegenerateOutput(f32),
}

/// One classification result for a single frame.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub emotion: Emotion,
    pub confidence: f32,
    /// Probabilities in label-index order; sums to 1 within tolerance.
    pub probabilities: [f32; NUM_EMOTIONS],
}

/// Run the model on one normalized batch and pick the argmax label.
///
/// The model handle is shared read-only; this never mutates it, so any
/// failure here cannot corrupt later requests.
pub fn predict(net: &EmotionNet, batch: &Array4<f32>) -> Result<Prediction, ClassifierError> {
    let expected: [usize; 4] = [1, INPUT_SIZE, INPUT_SIZE, INPUT_CHANNELS];
    if batch.shape() != &expected[..] {
        return Err(ClassifierError::BadInputShape(batch.shape().to_vec()));
    }

    let output = net.forward(batch);
    let row = output.row(0);

    let sum: f32 = row.sum();
    if !sum.is_finite() || (sum - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
        return Err(ClassifierError::DegenerateOutput(sum));
    }

    let mut probabilities = [0.0f32; NUM_EMOTIONS];
    for (dst, &src) in probabilities.iter_mut().zip(row.iter()) {
        *dst = src;
    }

    // Ties keep the lowest index, matching argmax at training time.
    let mut best = 0;
    for (i, &p) in probabilities.iter().enumerate() {
        if p > probabilities[best] {
            best = i;
        }
    }

    // best < NUM_EMOTIONS, so the lookup cannot fail.
    let emotion = Emotion::from_index(best).unwrap_or(Emotion::Neutral);

    Ok(Prediction {
        emotion,
        confidence: probabilities[best],
        probabilities,
    })
}
