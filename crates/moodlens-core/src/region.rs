//! Crop-region geometry: margin expansion and the center-crop fallback.
//!
//! All functions here are pure; the invariant they uphold is that any rect
//! handed to [`crop`] lies fully inside the image and has positive area.

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Fraction of the smaller detected-box side added as margin on every side.
pub const CROP_MARGIN_FRACTION: f32 = 0.2;

/// A detected face box in fraction-of-image coordinates, as produced by the
/// localizer. May extend slightly past [0, 1] for faces at the frame edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelativeBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// A pixel-space crop rectangle, guaranteed in-bounds with positive area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Convert a relative box to pixels, expand every side by
/// [`CROP_MARGIN_FRACTION`] of the smaller box side, and clamp to image
/// bounds.
///
/// Returns `None` when the clamped rect collapses to zero size on either
/// axis (box entirely outside the frame, or degenerate detection); callers
/// must fall back to [`center_square`]. A sliver-thin rect of at least one
/// pixel per axis is accepted.
pub fn expand_with_margin(bbox: &RelativeBox, img_w: u32, img_h: u32) -> Option<CropRect> {
    let w = img_w as i64;
    let h = img_h as i64;

    // Truncate toward zero, matching how the box was produced at training time.
    let mut x = (bbox.x * img_w as f32) as i64;
    let mut y = (bbox.y * img_h as f32) as i64;
    let mut fw = (bbox.width * img_w as f32) as i64;
    let mut fh = (bbox.height * img_h as f32) as i64;

    let margin = (CROP_MARGIN_FRACTION * fw.min(fh) as f32) as i64;

    x = (x - margin).max(0);
    y = (y - margin).max(0);
    fw = (fw + 2 * margin).min(w - x);
    fh = (fh + 2 * margin).min(h - y);

    if fw <= 0 || fh <= 0 {
        return None;
    }

    Some(CropRect {
        x: x as u32,
        y: y as u32,
        width: fw as u32,
        height: fh as u32,
    })
}

/// The largest centered square that fits inside the image.
///
/// Deterministic fallback region used whenever face localization does not
/// yield a usable crop.
pub fn center_square(img_w: u32, img_h: u32) -> CropRect {
    let size = img_w.min(img_h);
    CropRect {
        x: (img_w - size) / 2,
        y: (img_h - size) / 2,
        width: size,
        height: size,
    }
}

/// Extract the rect from the image. The rect must already be clamped.
pub fn crop(image: &RgbImage, rect: &CropRect) -> RgbImage {
    image::imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relative(x: f32, y: f32, w: f32, h: f32) -> RelativeBox {
        RelativeBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_center_square_landscape() {
        let rect = center_square(640, 480);
        assert_eq!(rect, CropRect { x: 80, y: 0, width: 480, height: 480 });
    }

    #[test]
    fn test_center_square_portrait() {
        let rect = center_square(300, 500);
        assert_eq!(rect, CropRect { x: 0, y: 100, width: 300, height: 300 });
    }

    #[test]
    fn test_center_square_already_square() {
        let rect = center_square(100, 100);
        assert_eq!(rect, CropRect { x: 0, y: 0, width: 100, height: 100 });
    }

    #[test]
    fn test_expand_interior_box() {
        // 100x100 box at (200, 200) in a 1000x1000 image: margin = 20px.
        let rect = expand_with_margin(&relative(0.2, 0.2, 0.1, 0.1), 1000, 1000).unwrap();
        assert_eq!(rect, CropRect { x: 180, y: 180, width: 140, height: 140 });
    }

    #[test]
    fn test_expand_clamps_at_origin() {
        // Box touching the top-left corner: margin cannot go negative.
        let rect = expand_with_margin(&relative(0.0, 0.0, 0.1, 0.1), 1000, 1000).unwrap();
        assert_eq!(rect.x, 0);
        assert_eq!(rect.y, 0);
        // Only the far sides gain margin beyond the original box.
        assert_eq!(rect.width, 140);
        assert_eq!(rect.height, 140);
    }

    #[test]
    fn test_expand_clamps_at_far_edge() {
        // Box hugging the bottom-right corner.
        let rect = expand_with_margin(&relative(0.9, 0.9, 0.1, 0.1), 1000, 1000).unwrap();
        assert!(rect.x + rect.width <= 1000);
        assert!(rect.y + rect.height <= 1000);
        assert_eq!(rect.x, 880);
        assert_eq!(rect.width, 120);
    }

    #[test]
    fn test_expand_never_exceeds_bounds() {
        let boxes = [
            relative(-0.1, -0.1, 0.5, 0.5),
            relative(0.7, 0.1, 0.6, 0.3),
            relative(0.45, 0.45, 0.1, 0.1),
        ];
        for bbox in &boxes {
            let rect = expand_with_margin(bbox, 640, 480).unwrap();
            assert!(rect.x + rect.width <= 640, "{rect:?}");
            assert!(rect.y + rect.height <= 480, "{rect:?}");
            assert!(rect.width > 0 && rect.height > 0, "{rect:?}");
        }
    }

    #[test]
    fn test_expand_rejects_box_outside_frame() {
        assert_eq!(expand_with_margin(&relative(1.2, 0.3, 0.2, 0.2), 640, 480), None);
    }

    #[test]
    fn test_expand_rejects_zero_size_box() {
        assert_eq!(expand_with_margin(&relative(0.5, 0.5, 0.0, 0.0), 640, 480), None);
    }

    #[test]
    fn test_expand_accepts_sliver_crop() {
        // One pixel wide but non-zero area: accepted, not a fallback trigger.
        let rect = expand_with_margin(&relative(0.5, 0.1, 1.0 / 640.0, 0.5), 640, 480).unwrap();
        assert!(rect.width >= 1);
        assert!(rect.height >= 1);
    }

    #[test]
    fn test_crop_dimensions() {
        let image = RgbImage::new(640, 480);
        let region = crop(&image, &center_square(640, 480));
        assert_eq!(region.dimensions(), (480, 480));
    }
}
