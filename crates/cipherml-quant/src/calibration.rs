//! Calibration for Quantization
//!
//! Per-tensor range observation. A `CalibrationData` records the `[min, max]`
//! of a sample tensor and turns it into affine parameters.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use cipherml_tensor::Tensor;

use crate::error::{QuantError, QuantResult};
use crate::qparams::QuantParams;

// =============================================================================
// Calibration Data
// =============================================================================

/// Range observed over the sample values of one tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationData {
    /// Minimum value seen.
    pub min: f64,
    /// Maximum value seen.
    pub max: f64,
}

impl CalibrationData {
    /// Observes the range of a sample tensor.
    pub fn new(tensor: &Tensor<f64>) -> QuantResult<Self> {
        let data = tensor.data();
        if data.is_empty() {
            return Err(QuantError::CalibrationError(
                "cannot calibrate an empty tensor".to_string(),
            ));
        }
        if let Some(bad) = data.iter().find(|v| !v.is_finite()) {
            return Err(QuantError::CalibrationError(format!(
                "calibration value {bad} is not finite"
            )));
        }

        Ok(Self {
            min: data.iter().copied().fold(f64::INFINITY, f64::min),
            max: data.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }

    /// Affine parameters covering the observed range.
    pub fn quant_params(&self, n_bits: u32, is_signed: bool) -> QuantResult<QuantParams> {
        QuantParams::from_range(self.min, self.max, n_bits, is_signed)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observed_range() {
        let t = Tensor::from_vec(vec![3.0, -1.0, 4.0, 2.0], &[2, 2]).unwrap();
        let cal = CalibrationData::new(&t).unwrap();
        assert_eq!(cal.min, -1.0);
        assert_eq!(cal.max, 4.0);
    }

    #[test]
    fn test_rejects_bad_samples() {
        assert!(CalibrationData::new(&Tensor::zeros(&[0])).is_err());
        let nan = Tensor::from_vec(vec![1.0, f64::NAN], &[2]).unwrap();
        assert!(CalibrationData::new(&nan).is_err());
        let inf = Tensor::from_vec(vec![f64::INFINITY], &[1]).unwrap();
        assert!(CalibrationData::new(&inf).is_err());
    }

    #[test]
    fn test_quant_params() {
        let t = Tensor::from_vec(vec![-1.0, 1.0], &[2]).unwrap();
        let params = CalibrationData::new(&t).unwrap().quant_params(8, true).unwrap();
        assert_eq!(params.quantize_value(-1.0), -128);
        assert_eq!(params.quantize_value(1.0), 127);
    }
}
