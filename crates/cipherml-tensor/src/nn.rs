//! Spatial Kernels - Convolution and Pooling
//!
//! 2-D convolution and window pooling over `[batch, channels, height, width]`
//! tensors. The kernels are generic over `Element`, so the same loops serve
//! floating evaluation and the centered integer arithmetic of quantized
//! execution. Padding always contributes zero.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use rayon::prelude::*;

use crate::dtype::Element;
use crate::error::{TensorError, TensorResult};
use crate::tensor::Tensor;

// =============================================================================
// Parameters
// =============================================================================

/// Static attributes of a 2-D convolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Conv2dParams {
    /// Stride along height and width.
    pub strides: [usize; 2],
    /// Padding as `[top, left, bottom, right]`.
    pub pads: [usize; 4],
    /// Dilation along height and width.
    pub dilations: [usize; 2],
    /// Number of channel groups.
    pub group: usize,
}

impl Default for Conv2dParams {
    fn default() -> Self {
        Self {
            strides: [1, 1],
            pads: [0; 4],
            dilations: [1, 1],
            group: 1,
        }
    }
}

/// Static attributes of a 2-D pooling window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pool2dParams {
    /// Window height and width.
    pub kernel: [usize; 2],
    /// Stride along height and width.
    pub strides: [usize; 2],
    /// Padding as `[top, left, bottom, right]`.
    pub pads: [usize; 4],
    /// Whether padded positions count towards the averaging divisor.
    pub count_include_pad: bool,
}

impl Pool2dParams {
    /// Square window with stride equal to the window size.
    #[must_use]
    pub fn square(size: usize) -> Self {
        Self {
            kernel: [size, size],
            strides: [size, size],
            pads: [0; 4],
            count_include_pad: false,
        }
    }
}

fn output_extent(
    input: usize,
    pad_begin: usize,
    pad_end: usize,
    window: usize,
    stride: usize,
) -> TensorResult<usize> {
    let padded = input + pad_begin + pad_end;
    if stride == 0 || window == 0 || padded < window {
        return Err(TensorError::invalid_operation(format!(
            "window {window} with stride {stride} does not fit padded extent {padded}"
        )));
    }
    Ok((padded - window) / stride + 1)
}

fn require_4d<T: Element>(tensor: &Tensor<T>, what: &str) -> TensorResult<[usize; 4]> {
    match *tensor.shape() {
        [n, c, h, w] => Ok([n, c, h, w]),
        _ => Err(TensorError::invalid_operation(format!(
            "{what} must be 4-D [N, C, H, W], got {:?}",
            tensor.shape()
        ))),
    }
}

// =============================================================================
// Convolution
// =============================================================================

/// Grouped 2-D convolution.
///
/// `input` is `[N, C, H, W]`, `weight` is `[M, C / group, KH, KW]` and the
/// optional `bias` holds `M` values.
pub fn conv2d<T: Element>(
    input: &Tensor<T>,
    weight: &Tensor<T>,
    bias: Option<&Tensor<T>>,
    params: &Conv2dParams,
) -> TensorResult<Tensor<T>> {
    let [batch, in_c, in_h, in_w] = require_4d(input, "conv input")?;
    let [out_c, c_per_group, k_h, k_w] = require_4d(weight, "conv weight")?;
    let group = params.group;

    if group == 0 || in_c != c_per_group * group || out_c % group != 0 {
        return Err(TensorError::invalid_operation(format!(
            "conv channels do not divide into {group} groups: input {in_c}, weight {:?}",
            weight.shape()
        )));
    }
    if let Some(b) = bias {
        if b.numel() != out_c {
            return Err(TensorError::shape_mismatch(&[out_c], b.shape()));
        }
    }

    if k_h == 0 || k_w == 0 {
        return Err(TensorError::invalid_operation(format!(
            "conv kernel must be non-empty, got {k_h}x{k_w}"
        )));
    }

    let [d_h, d_w] = params.dilations;
    let [s_h, s_w] = params.strides;
    let [p_top, p_left, p_bottom, p_right] = params.pads;
    let span_h = d_h * (k_h - 1) + 1;
    let span_w = d_w * (k_w - 1) + 1;
    let out_h = output_extent(in_h, p_top, p_bottom, span_h, s_h)?;
    let out_w = output_extent(in_w, p_left, p_right, span_w, s_w)?;
    let m_per_group = out_c / group;

    let x = input.data();
    let w = weight.data();
    let mut out = vec![T::zero(); batch * out_c * out_h * out_w];

    // One plane per (batch, output channel).
    out.par_chunks_mut(out_h * out_w)
        .enumerate()
        .for_each(|(plane, out_plane)| {
            let n = plane / out_c;
            let m = plane % out_c;
            let g = m / m_per_group;
            let init = bias.map_or_else(T::zero, |b| b.data()[m]);
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let mut acc = init;
                    for ic in 0..c_per_group {
                        let c = g * c_per_group + ic;
                        for kh in 0..k_h {
                            let ih = (oh * s_h + kh * d_h) as isize - p_top as isize;
                            if ih < 0 || ih >= in_h as isize {
                                continue;
                            }
                            for kw in 0..k_w {
                                let iw = (ow * s_w + kw * d_w) as isize - p_left as isize;
                                if iw < 0 || iw >= in_w as isize {
                                    continue;
                                }
                                let xi = ((n * in_c + c) * in_h + ih as usize) * in_w + iw as usize;
                                let wi = ((m * c_per_group + ic) * k_h + kh) * k_w + kw;
                                acc = acc + x[xi] * w[wi];
                            }
                        }
                    }
                    out_plane[oh * out_w + ow] = acc;
                }
            }
        });

    Tensor::from_vec(out, &[batch, out_c, out_h, out_w])
}

// =============================================================================
// Pooling
// =============================================================================

/// Window sums of a 2-D pooling together with the divisor of each output
/// position (`out_h * out_w` entries, shared by every batch and channel).
pub fn pool2d_sum<T: Element>(
    input: &Tensor<T>,
    params: &Pool2dParams,
) -> TensorResult<(Tensor<T>, Vec<usize>)> {
    let [batch, channels, in_h, in_w] = require_4d(input, "pool input")?;
    let [k_h, k_w] = params.kernel;
    let [s_h, s_w] = params.strides;
    let [p_top, p_left, p_bottom, p_right] = params.pads;
    let out_h = output_extent(in_h, p_top, p_bottom, k_h, s_h)?;
    let out_w = output_extent(in_w, p_left, p_right, k_w, s_w)?;

    let window = |o: usize, stride: usize, pad: usize, extent: usize, k: usize| {
        let start = (o * stride) as isize - pad as isize;
        let lo = start.max(0) as usize;
        let hi = ((start + k as isize).max(0) as usize).min(extent);
        lo..hi.max(lo)
    };

    let counts: Vec<usize> = (0..out_h * out_w)
        .map(|pos| {
            if params.count_include_pad {
                k_h * k_w
            } else {
                let rows = window(pos / out_w, s_h, p_top, in_h, k_h).len();
                let cols = window(pos % out_w, s_w, p_left, in_w, k_w).len();
                rows * cols
            }
        })
        .collect();

    let x = input.data();
    let mut out = vec![T::zero(); batch * channels * out_h * out_w];
    out.par_chunks_mut(out_h * out_w)
        .enumerate()
        .for_each(|(plane, out_plane)| {
            let base = plane * in_h * in_w;
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let mut acc = T::zero();
                    for ih in window(oh, s_h, p_top, in_h, k_h) {
                        for iw in window(ow, s_w, p_left, in_w, k_w) {
                            acc = acc + x[base + ih * in_w + iw];
                        }
                    }
                    out_plane[oh * out_w + ow] = acc;
                }
            }
        });

    Ok((Tensor::from_vec(out, &[batch, channels, out_h, out_w])?, counts))
}

/// Floating average pooling.
pub fn avg_pool2d(input: &Tensor<f64>, params: &Pool2dParams) -> TensorResult<Tensor<f64>> {
    let (sums, counts) = pool2d_sum(input, params)?;
    let plane = counts.len();
    let data = sums
        .data()
        .iter()
        .enumerate()
        .map(|(i, &s)| s / counts[i % plane].max(1) as f64)
        .collect();
    Tensor::from_vec(data, sums.shape())
}

// =============================================================================
// Tests
// =============================================================================
