//! Region normalization for the classifier.
//!
//! Crop decisions are already final by the time a region arrives here; this
//! only resizes, rescales and batches. The classifier was trained on RGB
//! input and regions are RGB throughout the pipeline, so no channel swap is
//! needed.

use crate::network::{INPUT_CHANNELS, INPUT_SIZE};
use image::RgbImage;
use ndarray::Array4;

/// Resize to the fixed square edge, rescale u8 pixels to [0, 1] f32, and add
/// a batch dimension of one. Output layout is NHWC.
pub fn normalize(region: &RgbImage) -> Array4<f32> {
    let resized = image::imageops::resize(
        region,
        INPUT_SIZE as u32,
        INPUT_SIZE as u32,
        image::imageops::FilterType::Triangle,
    );

    let mut tensor = Array4::zeros((1, INPUT_SIZE, INPUT_SIZE, INPUT_CHANNELS));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..INPUT_CHANNELS {
            tensor[[0, y as usize, x as usize, c]] = pixel[c] as f32 / 255.0;
        }
    }

    tensor
}
