//! Classifier artifact loading: best-effort weight injection by name.
//!
//! Loading is two-phase. First the topology is rebuilt from code
//! ([`EmotionNet::untrained`]), then each expected parameter is looked up by
//! name in the safetensors artifact and copied in only when dtype and shape
//! match. Mismatches are skipped and reported, never fatal: a partially
//! injected model is a deliberate degraded-but-functional state. Only a
//! missing artifact file is fatal.

use crate::network::EmotionNet;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Suffix distinguishing the repaired artifact from the original export.
const FIXED_STEM_SUFFIX: &str = "_fixed";

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("model artifact not found at {primary} (fallback {fallback} also missing)")]
    NotFound { primary: String, fallback: String },
    #[error("failed to read artifact {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed artifact {path}: {reason}")]
    Malformed { path: String, reason: String },
}

/// Why a parameter kept its default instead of an artifact value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingFromArtifact,
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    WrongDtype { found: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedParam {
    pub name: String,
    pub reason: SkipReason,
}

/// Per-parameter outcome of weight injection, so degraded loads are
/// observable instead of silent.
#[derive(Debug, Clone, Serialize)]
pub struct InjectionReport {
    pub artifact_path: PathBuf,
    pub matched: Vec<String>,
    pub skipped: Vec<SkippedParam>,
}

impl InjectionReport {
    /// True when every expected parameter came from the artifact.
    pub fn is_fully_matched(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// A loaded classifier with the report of how it was assembled.
#[derive(Debug)]
pub struct LoadedModel {
    pub net: EmotionNet,
    pub report: InjectionReport,
}

/// Resolve the artifact path: primary first, then the conventional fallback
/// obtained by stripping the `_fixed` stem suffix.
fn resolve_artifact_path(primary: &Path) -> Result<PathBuf, ArtifactError> {
    if primary.exists() {
        return Ok(primary.to_path_buf());
    }

    let fallback = fallback_path(primary);
    if fallback != primary && fallback.exists() {
        tracing::warn!(
            primary = %primary.display(),
            fallback = %fallback.display(),
            "primary artifact missing, using fallback"
        );
        return Ok(fallback);
    }

    Err(ArtifactError::NotFound {
        primary: primary.display().to_string(),
        fallback: fallback.display().to_string(),
    })
}

/// `emotion_cnn_fixed.safetensors` → `emotion_cnn.safetensors`. Paths whose
/// stem does not carry the suffix map to themselves.
fn fallback_path(primary: &Path) -> PathBuf {
    let stem = primary.file_stem().and_then(|s| s.to_str());
    let ext = primary.extension().and_then(|s| s.to_str());

    match (stem, ext) {
        (Some(stem), Some(ext)) => match stem.strip_suffix(FIXED_STEM_SUFFIX) {
            Some(bare) => primary.with_file_name(format!("{bare}.{ext}")),
            None => primary.to_path_buf(),
        },
        _ => primary.to_path_buf(),
    }
}

/// Load the classifier from an artifact: rebuild topology, inject matching
/// weights, return the handle with its injection report.
///
/// Fatal only when no artifact file exists or the file cannot be parsed at
/// all; every per-tensor problem degrades to a skip.
pub fn load_from_path(primary: &Path) -> Result<LoadedModel, ArtifactError> {
    let path = resolve_artifact_path(primary)?;

    tracing::info!(path = %path.display(), "loading emotion classifier (rebuild topology + inject weights)");

    let bytes = std::fs::read(&path).map_err(|source| ArtifactError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let tensors = SafeTensors::deserialize(&bytes).map_err(|e| ArtifactError::Malformed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut net = EmotionNet::untrained();
    let report = inject_weights(&mut net, &tensors, &path);

    if report.is_fully_matched() {
        tracing::info!(
            matched = report.matched.len(),
            "classifier weights fully injected"
        );
    } else {
        tracing::warn!(
            matched = report.matched.len(),
            skipped = report.skipped.len(),
            "classifier loaded with partial weights; mismatched layers keep defaults"
        );
    }

    Ok(LoadedModel { net, report })
}

fn inject_weights(net: &mut EmotionNet, tensors: &SafeTensors<'_>, path: &Path) -> InjectionReport {
    let mut matched = Vec::new();
    let mut skipped = Vec::new();

    for (name, mut view) in net.named_parameters() {
        match tensors.tensor(&name) {
            Err(_) => {
                tracing::warn!(param = %name, "not present in artifact; keeping default");
                skipped.push(SkippedParam {
                    name,
                    reason: SkipReason::MissingFromArtifact,
                });
            }
            Ok(tensor) => {
                if tensor.dtype() != Dtype::F32 {
                    tracing::warn!(param = %name, dtype = ?tensor.dtype(), "unexpected dtype; keeping default");
                    skipped.push(SkippedParam {
                        name,
                        reason: SkipReason::WrongDtype {
                            found: format!("{:?}", tensor.dtype()),
                        },
                    });
                } else if tensor.shape() != view.shape() {
                    tracing::warn!(
                        param = %name,
                        expected = ?view.shape(),
                        found = ?tensor.shape(),
                        "shape mismatch; keeping default"
                    );
                    skipped.push(SkippedParam {
                        reason: SkipReason::ShapeMismatch {
                            expected: view.shape().to_vec(),
                            found: tensor.shape().to_vec(),
                        },
                        name,
                    });
                } else {
                    copy_f32(&tensor, view.as_slice_mut());
                    matched.push(name);
                }
            }
        }
    }

    InjectionReport {
        artifact_path: path.to_path_buf(),
        matched,
        skipped,
    }
}

/// Copy little-endian f32 tensor data into the destination parameter.
fn copy_f32(tensor: &TensorView<'_>, dst: Option<&mut [f32]>) {
    let Some(dst) = dst else {
        // Parameters are owned standard-layout arrays; this cannot happen.
        return;
    };
    for (dst, chunk) in dst.iter_mut().zip(tensor.data().chunks_exact(4)) {
        *dst = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
}

/// Lazily-initialized, once-guarded owner of the loaded classifier.
///
/// The first caller performs the reconstruct-and-inject sequence; everyone
/// else observes the finished handle. Load failures are cached too, so every
/// later prediction reports the same unavailability instead of retrying disk
/// I/O per request.
pub struct LazyModel {
    artifact_path: PathBuf,
    slot: OnceLock<Result<Arc<LoadedModel>, Arc<ArtifactError>>>,
}

impl LazyModel {
    pub fn new(artifact_path: impl Into<PathBuf>) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            slot: OnceLock::new(),
        }
    }

    /// The loaded model, loading it on first use.
    pub fn get(&self) -> Result<Arc<LoadedModel>, Arc<ArtifactError>> {
        self.slot
            .get_or_init(|| {
                load_from_path(&self.artifact_path)
                    .map(Arc::new)
                    .map_err(Arc::new)
            })
            .clone()
    }

    /// Whether a load attempt (successful or not) has already happened.
    pub fn is_initialized(&self) -> bool {
        self.slot.get().is_some()
    }
}
