//! moodlens-core — facial-emotion detection pipeline.
//!
//! Turns one base64 webcam snapshot into a labeled emotion with a composed
//! companion message. Face localization runs SCRFD via ONNX Runtime with a
//! deterministic center-crop fallback; classification runs a fixed 3-block
//! convolutional network whose topology is rebuilt from code and whose
//! weights are injected best-effort, by name, from a serialized artifact.

pub mod artifact;
pub mod classifier;
pub mod composer;
pub mod config;
pub mod labels;
pub mod localizer;
pub mod network;
pub mod normalizer;
pub mod pipeline;
pub mod region;
pub mod snapshot;

pub use artifact::{ArtifactError, InjectionReport, LazyModel, LoadedModel};
pub use classifier::Prediction;
pub use config::Config;
pub use labels::{Emotion, NUM_EMOTIONS};
pub use localizer::{LocateOutcome, Localizer, ScrfdLocalizer};
pub use network::EmotionNet;
pub use pipeline::{Detection, EmotionPipeline, PipelineError};
pub use region::{CropRect, RelativeBox};
