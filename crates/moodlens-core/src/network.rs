//! The fixed emotion classifier topology, reconstructed purely from code.
//!
//! Three conv(3×3, same padding) + batchnorm + relu + maxpool(2×2) blocks
//! with 64/64/32 filters, then flatten, dense(128, relu) + batchnorm, and a
//! 7-way softmax head. Dropout layers exist only at training time and are
//! identity here. Rebuilding the topology in code sidesteps the broken shape
//! metadata embedded in legacy serialized artifacts; only the numeric
//! weights come from the artifact, bound by name.

use crate::labels::NUM_EMOTIONS;
use ndarray::{Array1, Array2, Array3, Array4, ArrayView3, ArrayViewMutD, Axis};

// --- Topology constants (must match the training script exactly) ---
pub const INPUT_SIZE: usize = 100;
pub const INPUT_CHANNELS: usize = 3;
const CONV_KERNEL: usize = 3;
const CONV_FILTERS: [usize; 3] = [64, 64, 32];
const DENSE_UNITS: usize = 128;
const BATCHNORM_EPSILON: f32 = 1e-3;
/// Spatial size after three 2×2 pools: 100 → 50 → 25 → 12.
const POOLED_SIZE: usize = 12;
pub const FLATTEN_SIZE: usize = POOLED_SIZE * POOLED_SIZE * CONV_FILTERS[2];

/// A convolution layer with kernel stored HWIO, the layout the training
/// framework serialized.
#[derive(Debug)]
struct Conv2d {
    kernel: Array4<f32>, // (kh, kw, in, out)
    bias: Array1<f32>,
}

impl Conv2d {
    fn zeroed(in_channels: usize, out_channels: usize) -> Self {
        Self {
            kernel: Array4::zeros((CONV_KERNEL, CONV_KERNEL, in_channels, out_channels)),
            bias: Array1::zeros(out_channels),
        }
    }
}

/// Inference-mode batch normalization over the channel axis.
#[derive(Debug)]
struct BatchNorm {
    gamma: Array1<f32>,
    beta: Array1<f32>,
    moving_mean: Array1<f32>,
    moving_variance: Array1<f32>,
}

impl BatchNorm {
    /// Identity statistics: gamma 1, beta 0, mean 0, variance 1.
    fn identity(channels: usize) -> Self {
        Self {
            gamma: Array1::ones(channels),
            beta: Array1::zeros(channels),
            moving_mean: Array1::zeros(channels),
            moving_variance: Array1::ones(channels),
        }
    }

    fn scale_shift(&self, channel: usize) -> (f32, f32) {
        let scale =
            self.gamma[channel] / (self.moving_variance[channel] + BATCHNORM_EPSILON).sqrt();
        let shift = self.beta[channel] - self.moving_mean[channel] * scale;
        (scale, shift)
    }
}

#[derive(Debug)]
struct Dense {
    kernel: Array2<f32>, // (in, out)
    bias: Array1<f32>,
}

impl Dense {
    fn zeroed(inputs: usize, outputs: usize) -> Self {
        Self {
            kernel: Array2::zeros((inputs, outputs)),
            bias: Array1::zeros(outputs),
        }
    }
}

#[derive(Debug)]
struct ConvBlock {
    conv: Conv2d,
    norm: BatchNorm,
}

/// The reconstructed classifier, ready for weight injection and inference.
///
/// Immutable after loading; shared read-only across concurrent predictions.
#[derive(Debug)]
pub struct EmotionNet {
    blocks: [ConvBlock; 3],
    dense: Dense,
    dense_norm: BatchNorm,
    head: Dense,
}

impl EmotionNet {
    /// Build the topology with default weights: zeroed kernels and identity
    /// batchnorm statistics. A net with no injected weights produces a flat
    /// 1/7 softmax, the same signature the diagnostics look for in a
    /// corrupted artifact.
    pub fn untrained() -> Self {
        let block = |in_channels: usize, filters: usize| ConvBlock {
            conv: Conv2d::zeroed(in_channels, filters),
            norm: BatchNorm::identity(filters),
        };
        let blocks = [
            block(INPUT_CHANNELS, CONV_FILTERS[0]),
            block(CONV_FILTERS[0], CONV_FILTERS[1]),
            block(CONV_FILTERS[1], CONV_FILTERS[2]),
        ];

        Self {
            blocks,
            dense: Dense::zeroed(FLATTEN_SIZE, DENSE_UNITS),
            dense_norm: BatchNorm::identity(DENSE_UNITS),
            head: Dense::zeroed(DENSE_UNITS, NUM_EMOTIONS),
        }
    }

    /// Every weight tensor with its artifact name, in topology order.
    ///
    /// Names follow the training framework's sequential scheme: the first
    /// layer of a kind is unsuffixed, later ones get `_1`, `_2`, ... The
    /// dense-block batchnorm is therefore `batch_normalization_3`.
    pub(crate) fn named_parameters(&mut self) -> Vec<(String, ArrayViewMutD<'_, f32>)> {
        let mut params: Vec<(String, ArrayViewMutD<'_, f32>)> = Vec::new();

        for (i, block) in self.blocks.iter_mut().enumerate() {
            let conv = layer_name("conv2d", i);
            let norm = layer_name("batch_normalization", i);
            params.push((format!("{conv}/kernel"), block.conv.kernel.view_mut().into_dyn()));
            params.push((format!("{conv}/bias"), block.conv.bias.view_mut().into_dyn()));
            params.push((format!("{norm}/gamma"), block.norm.gamma.view_mut().into_dyn()));
            params.push((format!("{norm}/beta"), block.norm.beta.view_mut().into_dyn()));
            params.push((
                format!("{norm}/moving_mean"),
                block.norm.moving_mean.view_mut().into_dyn(),
            ));
            params.push((
                format!("{norm}/moving_variance"),
                block.norm.moving_variance.view_mut().into_dyn(),
            ));
        }

        params.push(("dense/kernel".into(), self.dense.kernel.view_mut().into_dyn()));
        params.push(("dense/bias".into(), self.dense.bias.view_mut().into_dyn()));

        let norm = layer_name("batch_normalization", 3);
        params.push((format!("{norm}/gamma"), self.dense_norm.gamma.view_mut().into_dyn()));
        params.push((format!("{norm}/beta"), self.dense_norm.beta.view_mut().into_dyn()));
        params.push((
            format!("{norm}/moving_mean"),
            self.dense_norm.moving_mean.view_mut().into_dyn(),
        ));
        params.push((
            format!("{norm}/moving_variance"),
            self.dense_norm.moving_variance.view_mut().into_dyn(),
        ));

        params.push(("dense_1/kernel".into(), self.head.kernel.view_mut().into_dyn()));
        params.push(("dense_1/bias".into(), self.head.bias.view_mut().into_dyn()));

        params
    }

    /// Run the forward pass over a NHWC batch, returning one probability row
    /// per batch element. Inference mode only: no gradients, no dropout, no
    /// statistics updates.
    pub fn forward(&self, batch: &Array4<f32>) -> Array2<f32> {
        let n = batch.shape()[0];
        let mut out = Array2::zeros((n, NUM_EMOTIONS));
        for i in 0..n {
            let probs = self.forward_single(batch.index_axis(Axis(0), i));
            out.row_mut(i).assign(&probs);
        }
        out
    }

    fn forward_single(&self, image: ArrayView3<'_, f32>) -> Array1<f32> {
        let mut x = image.to_owned();
        for block in &self.blocks {
            x = conv2d_same(x.view(), &block.conv.kernel, &block.conv.bias);
            batch_norm_channels(&mut x, &block.norm);
            x.mapv_inplace(|v| v.max(0.0));
            x = max_pool_2x2(x.view());
        }

        let flat = Array1::from_iter(x.iter().copied());
        let mut hidden = flat.dot(&self.dense.kernel) + &self.dense.bias;
        hidden.mapv_inplace(|v| v.max(0.0));
        batch_norm_features(&mut hidden, &self.dense_norm);

        let logits = hidden.dot(&self.head.kernel) + &self.head.bias;
        softmax(logits)
    }

    /// Mean/std/min/max of the first conv kernel. A near-zero std is the
    /// signature of an artifact whose trained weights never made it into the
    /// file.
    pub fn first_conv_stats(&self) -> WeightStats {
        WeightStats::of(self.blocks[0].conv.kernel.iter().copied())
    }
}

/// Summary statistics over one weight tensor.
#[derive(Debug, Clone, Copy)]
pub struct WeightStats {
    pub mean: f32,
    pub std: f32,
    pub min: f32,
    pub max: f32,
}

impl WeightStats {
    fn of(values: impl IntoIterator<Item = f32>) -> Self {
        let mut count = 0u64;
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;

        for v in values {
            count += 1;
            sum += v as f64;
            sum_sq += v as f64 * v as f64;
            min = min.min(v);
            max = max.max(v);
        }

        if count == 0 {
            return WeightStats { mean: 0.0, std: 0.0, min: 0.0, max: 0.0 };
        }

        let mean = sum / count as f64;
        let var = (sum_sq / count as f64 - mean * mean).max(0.0);
        WeightStats {
            mean: mean as f32,
            std: var.sqrt() as f32,
            min,
            max,
        }
    }
}

fn layer_name(base: &str, index: usize) -> String {
    if index == 0 {
        base.to_string()
    } else {
        format!("{base}_{index}")
    }
}

/// 3×3 convolution with "same" padding and stride 1 over an HWC tensor.
fn conv2d_same(input: ArrayView3<'_, f32>, kernel: &Array4<f32>, bias: &Array1<f32>) -> Array3<f32> {
    let (h, w, cin) = input.dim();
    let (kh, kw, _, cout) = kernel.dim();
    let pad_h = kh / 2;
    let pad_w = kw / 2;

    let mut out = Array3::zeros((h, w, cout));

    for y in 0..h {
        for x in 0..w {
            for oc in 0..cout {
                let mut acc = bias[oc];
                for ky in 0..kh {
                    let sy = y + ky;
                    if sy < pad_h || sy - pad_h >= h {
                        continue;
                    }
                    let sy = sy - pad_h;
                    for kx in 0..kw {
                        let sx = x + kx;
                        if sx < pad_w || sx - pad_w >= w {
                            continue;
                        }
                        let sx = sx - pad_w;
                        for ic in 0..cin {
                            acc += input[[sy, sx, ic]] * kernel[[ky, kx, ic, oc]];
                        }
                    }
                }
                out[[y, x, oc]] = acc;
            }
        }
    }

    out
}

/// Apply moving-statistics batchnorm over the channel (last) axis.
fn batch_norm_channels(x: &mut Array3<f32>, norm: &BatchNorm) {
    let channels = x.dim().2;
    for c in 0..channels {
        let (scale, shift) = norm.scale_shift(c);
        x.index_axis_mut(Axis(2), c)
            .mapv_inplace(|v| v * scale + shift);
    }
}

/// Apply moving-statistics batchnorm over a feature vector.
fn batch_norm_features(x: &mut Array1<f32>, norm: &BatchNorm) {
    for c in 0..x.len() {
        let (scale, shift) = norm.scale_shift(c);
        x[c] = x[c] * scale + shift;
    }
}

/// 2×2 max pooling with stride 2; trailing odd rows/columns are dropped.
fn max_pool_2x2(x: ArrayView3<'_, f32>) -> Array3<f32> {
    let (h, w, c) = x.dim();
    let (oh, ow) = (h / 2, w / 2);
    let mut out = Array3::zeros((oh, ow, c));

    for y in 0..oh {
        for xx in 0..ow {
            for ch in 0..c {
                let m = x[[2 * y, 2 * xx, ch]]
                    .max(x[[2 * y, 2 * xx + 1, ch]])
                    .max(x[[2 * y + 1, 2 * xx, ch]])
                    .max(x[[2 * y + 1, 2 * xx + 1, ch]]);
                out[[y, xx, ch]] = m;
            }
        }
    }

    out
}

/// Numerically stable softmax. Output always sums to 1.
fn softmax(mut logits: Array1<f32>) -> Array1<f32> {
    let max = logits.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    logits.mapv_inplace(|v| (v - max).exp());
    let sum = logits.sum();
    logits.mapv_inplace(|v| v / sum);
    logits
}
