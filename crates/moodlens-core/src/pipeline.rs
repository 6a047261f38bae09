//! Per-request orchestration: decode → localize → normalize → classify →
//! compose.
//!
//! The model handle is loaded once and shared read-only; the localizer's
//! inference session requires `&mut` and is serialized behind a mutex. A
//! pipeline is built once at startup and shared by all requests.

use crate::artifact::{ArtifactError, LazyModel, LoadedModel};
use crate::classifier::{self, ClassifierError};
use crate::composer;
use crate::config::Config;
use crate::labels::Emotion;
use crate::localizer::{self, Localizer, LocalizerError, ScrfdLocalizer};
use crate::normalizer;
use crate::snapshot::{self, SnapshotError};
use image::RgbImage;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Client sent an undecodable snapshot.
    #[error("invalid snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
    /// The classifier artifact never loaded; every request fails the same
    /// way until the artifact is fixed.
    #[error("emotion model unavailable: {0}")]
    ModelUnavailable(Arc<ArtifactError>),
    /// Inference failed for this request; the shared handle is unaffected.
    #[error("inference failed: {0}")]
    Inference(#[from] ClassifierError),
}

impl PipelineError {
    /// True for errors caused by the caller's input (4xx-style); everything
    /// else is a service-side condition (5xx-style).
    pub fn is_client_error(&self) -> bool {
        matches!(self, PipelineError::Snapshot(_))
    }
}

/// One probability entry, keyed by label.
#[derive(Debug, Clone, Serialize)]
pub struct LabelScore {
    pub label: Emotion,
    pub probability: f32,
}

/// The full result of one detection request.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub emotion: Emotion,
    pub confidence: f32,
    /// All label probabilities in training index order.
    pub all_probabilities: Vec<LabelScore>,
    pub face_found: bool,
    /// The companion's opening message, disclaimers included.
    pub message: String,
}

/// The shared, long-lived detection pipeline.
pub struct EmotionPipeline {
    localizer: Mutex<Box<dyn Localizer>>,
    model: LazyModel,
}

impl EmotionPipeline {
    pub fn new(localizer: Box<dyn Localizer>, model: LazyModel) -> Self {
        Self {
            localizer: Mutex::new(localizer),
            model,
        }
    }

    /// Build the production pipeline: SCRFD localizer plus a lazy classifier
    /// handle. Fails only when the face detection model is unusable; the
    /// classifier artifact is resolved on first prediction.
    pub fn from_config(config: &Config) -> Result<Self, LocalizerError> {
        let scrfd = ScrfdLocalizer::load(&config.detector_path)?;
        Ok(Self::new(
            Box::new(scrfd),
            LazyModel::new(config.artifact_path.clone()),
        ))
    }

    /// Force the classifier load now instead of on first prediction.
    pub fn warm_up(&self) -> Result<Arc<LoadedModel>, Arc<ArtifactError>> {
        self.model.get()
    }

    /// Run the full pipeline on a base64 snapshot (data-URI prefix allowed).
    pub fn detect_base64(&self, payload: &str) -> Result<Detection, PipelineError> {
        let image = snapshot::decode_base64_image(payload)?;
        self.detect_image(&image)
    }

    /// Run the full pipeline on an already-decoded RGB image.
    pub fn detect_image(&self, image: &RgbImage) -> Result<Detection, PipelineError> {
        let model = self.model.get().map_err(PipelineError::ModelUnavailable)?;

        let located = {
            // A poisoned lock only means a previous panic mid-inference; the
            // localizer holds no state worth protecting across that.
            let mut guard = self
                .localizer
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            localizer::locate_or_fallback(guard.as_mut(), image)
        };

        let tensor = normalizer::normalize(&located.region);
        let prediction = classifier::predict(&model.net, &tensor)?;

        let message = composer::compose(
            prediction.emotion,
            prediction.confidence,
            located.face_found,
        );

        tracing::info!(
            emotion = %prediction.emotion,
            confidence = prediction.confidence,
            face_found = located.face_found,
            "detection complete"
        );

        Ok(Detection {
            emotion: prediction.emotion,
            confidence: prediction.confidence,
            all_probabilities: Emotion::ALL
                .iter()
                .zip(prediction.probabilities.iter())
                .map(|(&label, &probability)| LabelScore { label, probability })
                .collect(),
            face_found: located.face_found,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::NO_FACE_DISCLAIMER;
    use crate::labels::NUM_EMOTIONS;
    use crate::localizer::LocateOutcome;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use image::Rgb;
    use std::io::Cursor;
    use std::path::Path;

    struct NoFaceLocalizer;

    impl Localizer for NoFaceLocalizer {
        fn locate(&mut self, _image: &RgbImage) -> LocateOutcome {
            LocateOutcome::NoFace
        }
    }

    /// An artifact with no usable tensors; loads into an untrained net.
    fn write_empty_artifact(path: &Path) {
        let none: Vec<(String, safetensors::tensor::TensorView<'_>)> = Vec::new();
        let data = safetensors::serialize(none, &None).unwrap();
        std::fs::write(path, data).unwrap();
    }

    fn pipeline_with_artifact(dir: &Path) -> EmotionPipeline {
        let artifact = dir.join("emotion_cnn_fixed.safetensors");
        write_empty_artifact(&artifact);
        EmotionPipeline::new(Box::new(NoFaceLocalizer), LazyModel::new(artifact))
    }

    #[test]
    fn test_gray_frame_roundtrip_without_face() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with_artifact(dir.path());

        let frame = RgbImage::from_pixel(100, 100, Rgb([128, 128, 128]));
        let detection = pipeline.detect_image(&frame).unwrap();

        assert!(!detection.face_found);
        assert_eq!(detection.all_probabilities.len(), NUM_EMOTIONS);

        let sum: f32 = detection
            .all_probabilities
            .iter()
            .map(|s| s.probability)
            .sum();
        assert!((sum - 1.0).abs() < 1e-3, "sum = {sum}");

        assert!(detection.message.contains(NO_FACE_DISCLAIMER));
        // Uniform 1/7 confidence is below the 0.5 threshold too.
        assert!(detection.message.contains("Confidence"));
    }

    #[test]
    fn test_probabilities_follow_label_order() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with_artifact(dir.path());

        let frame = RgbImage::from_pixel(64, 48, Rgb([10, 200, 90]));
        let detection = pipeline.detect_image(&frame).unwrap();

        let labels: Vec<Emotion> = detection
            .all_probabilities
            .iter()
            .map(|s| s.label)
            .collect();
        assert_eq!(labels, Emotion::ALL.to_vec());
    }

    #[test]
    fn test_base64_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with_artifact(dir.path());

        let frame = RgbImage::from_pixel(32, 32, Rgb([90, 90, 90]));
        let mut buf = Cursor::new(Vec::new());
        frame.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        let payload = format!("data:image/png;base64,{}", BASE64.encode(buf.into_inner()));

        let detection = pipeline.detect_base64(&payload).unwrap();
        assert!(!detection.face_found);
    }

    #[test]
    fn test_malformed_snapshot_is_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with_artifact(dir.path());

        let err = pipeline.detect_base64("@@@ not base64 @@@").unwrap_err();
        assert!(err.is_client_error());
        assert!(matches!(err, PipelineError::Snapshot(_)));
    }

    #[test]
    fn test_missing_artifact_reports_unavailable_consistently() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = EmotionPipeline::new(
            Box::new(NoFaceLocalizer),
            LazyModel::new(dir.path().join("nowhere_fixed.safetensors")),
        );

        let frame = RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]));
        for _ in 0..3 {
            let err = pipeline.detect_image(&frame).unwrap_err();
            assert!(!err.is_client_error());
            assert!(matches!(err, PipelineError::ModelUnavailable(_)));
        }
    }

    #[test]
    fn test_warm_up_surfaces_artifact_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = EmotionPipeline::new(
            Box::new(NoFaceLocalizer),
            LazyModel::new(dir.path().join("nowhere_fixed.safetensors")),
        );

        assert!(pipeline.warm_up().is_err());
    }
}
