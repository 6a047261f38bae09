//! Face localization with a guaranteed-usable fallback.
//!
//! The SCRFD (Sample and Computation Redistribution for Efficient Face
//! Detection) model runs via ONNX Runtime with 3-stride anchor-free decoding
//! and NMS post-processing. Localization never fails the request: any
//! detector error, empty result, or degenerate crop maps deterministically
//! to the centered-square fallback.

use crate::region::{self, CropRect, RelativeBox};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum LocalizerError {
    #[error("face detection model not found: {0} — download SCRFD (det_10g.onnx) and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Typed outcome of one localization attempt.
///
/// All three variants map to a usable crop: `Face` through margin expansion,
/// the other two through the center-crop fallback. Detector errors are
/// carried for logging but never surfaced to the caller.
#[derive(Debug)]
pub enum LocateOutcome {
    Face(RelativeBox),
    NoFace,
    DetectorError(LocalizerError),
}

/// Strategy seam for face localization, so the pipeline can be exercised
/// without an ONNX model on disk.
pub trait Localizer: Send {
    fn locate(&mut self, image: &RgbImage) -> LocateOutcome;
}

/// A face region ready for normalization.
pub struct LocatedFace {
    pub region: RgbImage,
    pub face_found: bool,
}

/// Localize a face and crop it, falling back to the largest centered square
/// when detection yields nothing usable. Always produces a non-empty region.
pub fn locate_or_fallback(localizer: &mut dyn Localizer, image: &RgbImage) -> LocatedFace {
    let (width, height) = image.dimensions();

    match localizer.locate(image) {
        LocateOutcome::Face(bbox) => match region::expand_with_margin(&bbox, width, height) {
            Some(rect) => {
                tracing::debug!(?rect, confidence = bbox.confidence, "face crop");
                LocatedFace {
                    region: region::crop(image, &rect),
                    face_found: true,
                }
            }
            None => {
                tracing::warn!(?bbox, "detected box collapsed after clamping; using center crop");
                fallback(image, width, height)
            }
        },
        LocateOutcome::NoFace => {
            tracing::debug!("no face detected; using center crop");
            fallback(image, width, height)
        }
        LocateOutcome::DetectorError(err) => {
            tracing::warn!(error = %err, "face detector failed; using center crop");
            fallback(image, width, height)
        }
    }
}

fn fallback(image: &RgbImage, width: u32, height: u32) -> LocatedFace {
    let rect: CropRect = region::center_square(width, height);
    LocatedFace {
        region: region::crop(image, &rect),
        face_found: false,
    }
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// Pixel-space detection in original-frame coordinates, pre-NMS.
#[derive(Debug, Clone)]
struct PixelDetection {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    confidence: f32,
}

/// SCRFD-based face localizer.
pub struct ScrfdLocalizer {
    session: Session,
    input_height: usize,
    input_width: usize,
    /// Per-stride output indices [(score, bbox)] for strides [8, 16, 32].
    /// Discovered by name at load time; falls back to positional ordering.
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdLocalizer {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, LocalizerError> {
        if !model_path.exists() {
            return Err(LocalizerError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();
        let num_outputs = output_names.len();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        // 3 strides × score/bbox; landmark outputs, if present, are ignored.
        if num_outputs < 6 {
            return Err(LocalizerError::InferenceFailed(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {num_outputs}"
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            input_height: SCRFD_INPUT_SIZE,
            input_width: SCRFD_INPUT_SIZE,
            stride_indices,
        })
    }

    /// Detect faces, returning relative bounding boxes sorted by confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<RelativeBox>, LocalizerError> {
        let (img_w, img_h) = image.dimensions();
        let (input, letterbox) = self.preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| LocalizerError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| LocalizerError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            let dets = decode_stride(
                scores,
                bboxes,
                stride,
                self.input_width,
                self.input_height,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            );
            all_detections.extend(dets);
        }

        let mut kept = nms(all_detections, SCRFD_NMS_THRESHOLD);
        kept.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(kept
            .into_iter()
            .map(|d| RelativeBox {
                x: d.x / img_w as f32,
                y: d.y / img_h as f32,
                width: d.width / img_w as f32,
                height: d.height / img_h as f32,
                confidence: d.confidence,
            })
            .collect())
    }

    /// Preprocess an RGB image into a NCHW float tensor with letterbox padding.
    fn preprocess(&self, image: &RgbImage) -> (Array4<f32>, LetterboxInfo) {
        let (width, height) = image.dimensions();

        // Compute letterbox scale (fit within input_width × input_height)
        let scale_w = self.input_width as f32 / width as f32;
        let scale_h = self.input_height as f32 / height as f32;
        let scale = scale_w.min(scale_h);

        let new_w = ((width as f32 * scale).round() as u32).max(1);
        let new_h = ((height as f32 * scale).round() as u32).max(1);
        let pad_x = (self.input_width as f32 - new_w as f32) / 2.0;
        let pad_y = (self.input_height as f32 - new_h as f32) / 2.0;

        let letterbox = LetterboxInfo { scale, pad_x, pad_y };

        let resized =
            image::imageops::resize(image, new_w, new_h, image::imageops::FilterType::Triangle);

        // Zeros are already the normalized pad value: (SCRFD_MEAN - SCRFD_MEAN) / SCRFD_STD.
        let mut tensor =
            Array4::<f32>::zeros((1, 3, self.input_height, self.input_width));

        let pad_x_start = pad_x.floor() as usize;
        let pad_y_start = pad_y.floor() as usize;

        for (x, y, pixel) in resized.enumerate_pixels() {
            let ty = pad_y_start + y as usize;
            let tx = pad_x_start + x as usize;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        (tensor, letterbox)
    }
}

impl Localizer for ScrfdLocalizer {
    fn locate(&mut self, image: &RgbImage) -> LocateOutcome {
        match self.detect(image) {
            Ok(boxes) => match boxes.into_iter().next() {
                Some(best) => LocateOutcome::Face(best),
                None => LocateOutcome::NoFace,
            },
            Err(err) => LocateOutcome::DetectorError(err),
        }
    }
}

/// Discover output tensor ordering by name.
///
/// SCRFD models may export tensors with named outputs ("score_8", "bbox_16",
/// ...) or generic numeric names. If the named pattern is detected, maps them
/// to stride slots. Otherwise falls back to the standard positional ordering:
///   [0-2] = scores (strides 8, 16, 32)
///   [3-5] = bboxes (strides 8, 16, 32)
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named = SCRFD_STRIDES
        .iter()
        .all(|&stride| find("score", stride).is_some() && find("bbox", stride).is_some());

    if named {
        tracing::info!("SCRFD: using name-based output tensor mapping");
        std::array::from_fn(|i| {
            let stride = SCRFD_STRIDES[i];
            (find("score", stride).unwrap(), find("bbox", stride).unwrap())
        })
    } else {
        tracing::info!(
            ?names,
            "SCRFD: output names not recognized, using positional mapping [0-2]=scores, [3-5]=bboxes"
        );
        [(0, 3), (1, 4), (2, 5)]
    }
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    input_width: usize,
    input_height: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<PixelDetection> {
    let grid_h = input_height / stride;
    let grid_w = input_width / stride;
    let num_anchors = grid_h * grid_w * SCRFD_ANCHORS_PER_CELL;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let cy = (anchor_idx / grid_w) as f32;
        let cx = (anchor_idx % grid_w) as f32;

        let anchor_cx = cx * stride as f32;
        let anchor_cy = cy * stride as f32;

        // Decode bbox: [x1_offset, y1_offset, x2_offset, y2_offset] * stride
        let bbox_off = idx * 4;
        if bbox_off + 3 >= bboxes.len() {
            continue;
        }
        let x1 = anchor_cx - bboxes[bbox_off] * stride as f32;
        let y1 = anchor_cy - bboxes[bbox_off + 1] * stride as f32;
        let x2 = anchor_cx + bboxes[bbox_off + 2] * stride as f32;
        let y2 = anchor_cy + bboxes[bbox_off + 3] * stride as f32;

        // Map from letterboxed space to original frame space
        let orig_x1 = (x1 - letterbox.pad_x) / letterbox.scale;
        let orig_y1 = (y1 - letterbox.pad_y) / letterbox.scale;
        let orig_x2 = (x2 - letterbox.pad_x) / letterbox.scale;
        let orig_y2 = (y2 - letterbox.pad_y) / letterbox.scale;

        detections.push(PixelDetection {
            x: orig_x1,
            y: orig_y1,
            width: orig_x2 - orig_x1,
            height: orig_y2 - orig_y1,
            confidence: score,
        });
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<PixelDetection>, iou_threshold: f32) -> Vec<PixelDetection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            if iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Compute Intersection-over-Union between two detections.
fn iou(a: &PixelDetection, b: &PixelDetection) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_w = (x2 - x1).max(0.0);
    let inter_h = (y2 - y1).max(0.0);
    let inter_area = inter_w * inter_h;

    let area_a = a.width * a.height;
    let area_b = b.width * b.height;
    let union_area = area_a + area_b - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_det(x: f32, y: f32, w: f32, h: f32, conf: f32) -> PixelDetection {
        PixelDetection {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
        }
    }

    /// Always reports the given relative box.
    struct FixedBoxLocalizer(RelativeBox);

    impl Localizer for FixedBoxLocalizer {
        fn locate(&mut self, _image: &RgbImage) -> LocateOutcome {
            LocateOutcome::Face(self.0.clone())
        }
    }

    /// Never finds a face.
    struct NoFaceLocalizer;

    impl Localizer for NoFaceLocalizer {
        fn locate(&mut self, _image: &RgbImage) -> LocateOutcome {
            LocateOutcome::NoFace
        }
    }

    /// Simulates a detector crash.
    struct FailingLocalizer;

    impl Localizer for FailingLocalizer {
        fn locate(&mut self, _image: &RgbImage) -> LocateOutcome {
            LocateOutcome::DetectorError(LocalizerError::InferenceFailed(
                "synthetic failure".into(),
            ))
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_det(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = make_det(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_det(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_det(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_det(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        let expected = 50.0 / 150.0;
        assert!((iou(&a, &b) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_det(0.0, 0.0, 100.0, 100.0, 0.9),
            make_det(5.0, 5.0, 100.0, 100.0, 0.8),
            make_det(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        let result = nms(vec![], 0.4);
        assert!(result.is_empty());
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32", "bbox_8", "bbox_16", "bbox_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_discover_output_indices_shuffled_named() {
        let names: Vec<String> = [
            "bbox_8", "score_8", "bbox_16", "score_16", "bbox_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(1, 0), (3, 2), (5, 4)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        // Generic numeric names from the exporter fall back to positional.
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_letterbox_coordinate_roundtrip() {
        let width = 320.0f32;
        let height = 240.0f32;
        let scale = (640.0 / width).min(640.0 / height);
        let new_w = (width * scale).round();
        let new_h = (height * scale).round();
        let letterbox = LetterboxInfo {
            scale,
            pad_x: (640.0 - new_w) / 2.0,
            pad_y: (640.0 - new_h) / 2.0,
        };

        let orig_x = 100.0f32;
        let orig_y = 50.0f32;
        let boxed_x = orig_x * scale + letterbox.pad_x;
        let boxed_y = orig_y * scale + letterbox.pad_y;

        let recovered_x = (boxed_x - letterbox.pad_x) / letterbox.scale;
        let recovered_y = (boxed_y - letterbox.pad_y) / letterbox.scale;

        assert!((recovered_x - orig_x).abs() < 0.1);
        assert!((recovered_y - orig_y).abs() < 0.1);
    }

    #[test]
    fn test_fallback_when_no_face() {
        let image = RgbImage::new(640, 480);
        let located = locate_or_fallback(&mut NoFaceLocalizer, &image);
        assert!(!located.face_found);
        // Exact centered square of side min(width, height).
        assert_eq!(located.region.dimensions(), (480, 480));
    }

    #[test]
    fn test_fallback_when_detector_fails() {
        let image = RgbImage::new(300, 500);
        let located = locate_or_fallback(&mut FailingLocalizer, &image);
        assert!(!located.face_found);
        assert_eq!(located.region.dimensions(), (300, 300));
    }

    #[test]
    fn test_fallback_when_box_collapses() {
        // Detection entirely outside the frame collapses after clamping.
        let bbox = RelativeBox {
            x: 1.5,
            y: 0.2,
            width: 0.2,
            height: 0.2,
            confidence: 0.8,
        };
        let image = RgbImage::new(200, 200);
        let located = locate_or_fallback(&mut FixedBoxLocalizer(bbox), &image);
        assert!(!located.face_found);
        assert_eq!(located.region.dimensions(), (200, 200));
    }

    #[test]
    fn test_detected_face_is_cropped_within_bounds() {
        let bbox = RelativeBox {
            x: 0.25,
            y: 0.25,
            width: 0.5,
            height: 0.5,
            confidence: 0.95,
        };
        let image = RgbImage::new(400, 400);
        let located = locate_or_fallback(&mut FixedBoxLocalizer(bbox), &image);
        assert!(located.face_found);
        let (w, h) = located.region.dimensions();
        assert!(w > 0 && h > 0);
        assert!(w <= 400 && h <= 400);
    }
}
