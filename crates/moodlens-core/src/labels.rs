//! The fixed, ordered emotion label set.
//!
//! The classifier was trained against this exact index order; storage and
//! inference must never reorder it, or results are silently corrupted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Output cardinality of the classifier head.
pub const NUM_EMOTIONS: usize = 7;

/// One of the seven emotion categories the classifier can output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Emotion {
    Surprise,
    Fear,
    Disgust,
    Happiness,
    Sadness,
    Anger,
    Neutral,
}

impl Emotion {
    /// All emotions in training index order. Index 0 is Surprise, index 6 is
    /// Neutral.
    pub const ALL: [Emotion; NUM_EMOTIONS] = [
        Emotion::Surprise,
        Emotion::Fear,
        Emotion::Disgust,
        Emotion::Happiness,
        Emotion::Sadness,
        Emotion::Anger,
        Emotion::Neutral,
    ];

    /// Map a classifier output index back to its emotion.
    pub fn from_index(index: usize) -> Option<Emotion> {
        Emotion::ALL.get(index).copied()
    }

    /// The training index of this emotion.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Surprise => "Surprise",
            Emotion::Fear => "Fear",
            Emotion::Disgust => "Disgust",
            Emotion::Happiness => "Happiness",
            Emotion::Sadness => "Sadness",
            Emotion::Anger => "Anger",
            Emotion::Neutral => "Neutral",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
