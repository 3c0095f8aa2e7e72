//! Data Types - CipherML Element Types
//!
//! Tensors in CipherML hold one of two families of values: real numbers
//! (`f64`, `f32`) for floating evaluation and calibration, and integers
//! (`i64`, `i32`) for quantized execution. The `Element` trait captures the
//! arithmetic both families share so the same kernels (broadcasting, matmul,
//! convolution) run in either domain.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use core::fmt::Debug;

use num_traits::{Num, NumCast};

// =============================================================================
// DType Enum
// =============================================================================

/// Runtime representation of tensor element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit floating point.
    F32,
    /// 64-bit floating point.
    F64,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
}

impl DType {
    /// Returns true for floating point element types.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Returns the name of this element type.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::I32 => "i32",
            Self::I64 => "i64",
        }
    }
}

// =============================================================================
// Element Trait
// =============================================================================

/// Trait for values that can be stored in a tensor.
pub trait Element:
    Copy + Debug + Default + PartialOrd + Num + NumCast + Send + Sync + 'static
{
    /// The runtime dtype for this element type.
    const DTYPE: DType;

    /// Smaller of two values. NaN is treated as missing.
    #[must_use]
    fn min_of(self, other: Self) -> Self {
        if other < self {
            other
        } else {
            self
        }
    }

    /// Larger of two values.
    #[must_use]
    fn max_of(self, other: Self) -> Self {
        if other > self {
            other
        } else {
            self
        }
    }
}

macro_rules! impl_element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;
        }
    };
}

impl_element!(f32, DType::F32);
impl_element!(f64, DType::F64);
impl_element!(i32, DType::I32);
impl_element!(i64, DType::I64);

// =============================================================================
// Tests
// =============================================================================
