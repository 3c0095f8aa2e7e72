//! Affine Quantization Parameters
//!
//! A real value `x` is represented by an integer `q` through
//! `x ≈ scale * (q - zero_point)`, with `q` clamped into the range implied by
//! the bit width and signedness. Parameters are derived per tensor from an
//! observed `[min, max]` range.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use cipherml_tensor::Tensor;
use tracing::debug;

use crate::error::{QuantError, QuantResult};

// =============================================================================
// Constants
// =============================================================================

/// Largest bit width accepted for quantized tensors.
pub const MAX_N_BITS: u32 = 16;

/// Ranges narrower than this are treated as a single value.
pub const STABILITY_CONST: f64 = 1e-6;

/// Widest integer a stored parameter set may describe.
const MAX_STORAGE_BITS: u32 = 62;

// =============================================================================
// QuantParams
// =============================================================================

/// Per-tensor affine quantization parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantParams {
    /// Real value of one integer step. Always positive.
    pub scale: f64,
    /// Integer representing real zero.
    pub zero_point: i64,
    /// Bit width of the representable range.
    pub n_bits: u32,
    /// Whether the representable range is signed.
    pub is_signed: bool,
}

impl QuantParams {
    /// Creates parameters, validating scale and bit width.
    pub fn new(scale: f64, zero_point: i64, n_bits: u32, is_signed: bool) -> QuantResult<Self> {
        if n_bits == 0 || n_bits > MAX_STORAGE_BITS {
            return Err(QuantError::InvalidBitWidth {
                n_bits,
                max: MAX_STORAGE_BITS,
            });
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(QuantError::CalibrationError(format!(
                "scale must be positive and finite, got {scale}"
            )));
        }
        Ok(Self {
            scale,
            zero_point,
            n_bits,
            is_signed,
        })
    }

    /// Derives parameters mapping `[min, max]` onto the full integer range.
    ///
    /// A range narrower than [`STABILITY_CONST`] holds a single value; it gets
    /// a scale equal to its magnitude (or 1 for zero) and a zero point that
    /// keeps the value exactly representable.
    pub fn from_range(min: f64, max: f64, n_bits: u32, is_signed: bool) -> QuantResult<Self> {
        if n_bits == 0 || n_bits > MAX_N_BITS {
            return Err(QuantError::InvalidBitWidth {
                n_bits,
                max: MAX_N_BITS,
            });
        }
        if !(min.is_finite() && max.is_finite()) || min > max {
            return Err(QuantError::CalibrationError(format!(
                "invalid calibration range [{min}, {max}]"
            )));
        }

        let (qmin, qmax) = int_range(n_bits, is_signed);
        if max - min < STABILITY_CONST {
            let value = max;
            if value.abs() < STABILITY_CONST {
                debug!(value, "degenerate range at zero, using unit scale");
                return Self::new(1.0, 0, n_bits, is_signed);
            }
            let step: i64 = if value > 0.0 { 1 } else { -1 };
            let zero_point = if (qmin..=qmax).contains(&step) {
                0
            } else if step > 0 {
                qmax - 1
            } else {
                qmin + 1
            };
            debug!(value, zero_point, "degenerate range, scale set to magnitude");
            return Self::new(value.abs(), zero_point, n_bits, is_signed);
        }

        let scale = (max - min) / ((qmax - qmin) as f64);
        let zero_point = qmin - (min / scale).round() as i64;
        Self::new(scale, zero_point, n_bits, is_signed)
    }

    /// Smallest representable integer.
    pub fn qmin(&self) -> i64 {
        int_range(self.n_bits, self.is_signed).0
    }

    /// Largest representable integer.
    pub fn qmax(&self) -> i64 {
        int_range(self.n_bits, self.is_signed).1
    }

    /// Quantizes one real value.
    pub fn quantize_value(&self, x: f64) -> i64 {
        let q = (x / self.scale).round() + self.zero_point as f64;
        self.clamp_real(q)
    }

    /// Dequantizes one integer.
    pub fn dequantize_value(&self, q: i64) -> f64 {
        self.scale * (q - self.zero_point) as f64
    }

    /// Rounds `real` (already in integer units of this scale), adds the zero
    /// point and clamps.
    pub fn requantize(&self, real: f64) -> i64 {
        self.clamp_real(real.round() + self.zero_point as f64)
    }

    /// Quantizes a tensor.
    pub fn quantize(&self, values: &Tensor<f64>) -> Tensor<i64> {
        let params = *self;
        values.map(move |x| params.quantize_value(x))
    }

    /// Dequantizes a tensor.
    pub fn dequantize(&self, values: &Tensor<i64>) -> Tensor<f64> {
        let params = *self;
        values.map(move |q| params.dequantize_value(q))
    }

    fn clamp_real(&self, q: f64) -> i64 {
        let (qmin, qmax) = int_range(self.n_bits, self.is_signed);
        // NaN falls through to qmin.
        if q >= qmax as f64 {
            qmax
        } else if q >= qmin as f64 {
            q as i64
        } else {
            qmin
        }
    }
}

/// Representable `(min, max)` for a bit width and signedness.
pub fn int_range(n_bits: u32, is_signed: bool) -> (i64, i64) {
    if is_signed {
        (-(1i64 << (n_bits - 1)), (1i64 << (n_bits - 1)) - 1)
    } else {
        (0, (1i64 << n_bits) - 1)
    }
}

/// Bits needed to hold every integer in `[min, max]`.
///
/// Non-negative ranges are measured unsigned, others in two's complement.
pub fn integer_bit_width(min: i64, max: i64) -> u32 {
    fn bits(v: i64) -> u32 {
        64 - (v as u64).leading_zeros()
    }
    if min >= 0 {
        bits(max).max(1)
    } else {
        let magnitude = max.max(0).max(-(min + 1));
        bits(magnitude) + 1
    }
}

// =============================================================================
// QuantizedArray
// =============================================================================

/// Integer tensor together with the parameters that give it meaning.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedArray {
    /// Quantized integers.
    pub values: Tensor<i64>,
    /// Parameters mapping them back to reals.
    pub params: QuantParams,
}

impl QuantizedArray {
    /// Quantizes a tensor with parameters calibrated on its own range.
    pub fn from_float(values: &Tensor<f64>, n_bits: u32, is_signed: bool) -> QuantResult<Self> {
        let (min, max) = match (values.min(), values.max()) {
            (Some(min), Some(max)) => (min, max),
            _ => {
                return Err(QuantError::CalibrationError(
                    "cannot calibrate an empty tensor".to_string(),
                ))
            }
        };
        let params = QuantParams::from_range(min, max, n_bits, is_signed)?;
        Ok(Self::with_params(values, params))
    }

    /// Quantizes a tensor with given parameters.
    pub fn with_params(values: &Tensor<f64>, params: QuantParams) -> Self {
        Self {
            values: params.quantize(values),
            params,
        }
    }

    /// Returns the real values this array approximates.
    pub fn dequantize(&self) -> Tensor<f64> {
        self.params.dequantize(&self.values)
    }

    /// Re-expresses the same real values under other parameters.
    pub fn requantize(&self, params: QuantParams) -> Self {
        let ratio = self.params.scale / params.scale;
        let zp = self.params.zero_point;
        Self {
            values: self
                .values
                .map(move |q| params.requantize((q - zp) as f64 * ratio)),
            params,
        }
    }

    /// Returns `values - zero_point`.
    pub fn centered(&self) -> Tensor<i64> {
        let zp = self.params.zero_point;
        self.values.map(move |q| q - zp)
    }
}

// =============================================================================
// Tests
// =============================================================================
