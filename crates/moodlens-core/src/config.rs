//! Pipeline configuration, loaded from environment variables.

use std::path::PathBuf;

/// File name of the repaired classifier artifact.
const DEFAULT_ARTIFACT_NAME: &str = "emotion_cnn_fixed.safetensors";
/// File name of the SCRFD face detection model.
const DEFAULT_DETECTOR_NAME: &str = "det_10g.onnx";

pub struct Config {
    /// Directory containing model files.
    pub model_dir: PathBuf,
    /// Classifier artifact path; the loader derives its own `_fixed` fallback.
    pub artifact_path: PathBuf,
    /// SCRFD face detection model path.
    pub detector_path: PathBuf,
}

impl Config {
    /// Load configuration from `MOODLENS_*` environment variables with
    /// defaults relative to `models/`.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("MOODLENS_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("models"));

        let artifact_path = std::env::var("MOODLENS_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| model_dir.join(DEFAULT_ARTIFACT_NAME));

        let detector_path = std::env::var("MOODLENS_DETECTOR_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| model_dir.join(DEFAULT_DETECTOR_NAME));

        Self {
            model_dir,
            artifact_path,
            detector_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths_derive_from_model_dir() {
        // Env vars are process-global; only assert the derivation logic via
        // explicit construction.
        let model_dir = PathBuf::from("models");
        assert_eq!(
            model_dir.join(DEFAULT_ARTIFACT_NAME),
            PathBuf::from("models/emotion_cnn_fixed.safetensors")
        );
        assert_eq!(
            model_dir.join(DEFAULT_DETECTOR_NAME),
            PathBuf::from("models/det_10g.onnx")
        );
    }
}
