//! Tensor - Owned N-Dimensional Array
//!
//! `Tensor<T>` is an immutable-by-convention, contiguous, row-major array.
//! Every operation returns a new tensor; nothing is shared or mutated in
//! place, which is what lets graph values be produced once and read many
//! times during folding and calibration.
//!
//! Floating tensors (`Tensor<f64>`) carry real values through graph
//! evaluation. Integer tensors (`Tensor<i64>`) carry quantized values through
//! the integer kernels. Both use the same broadcasting and matmul code.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use rayon::prelude::*;
use smallvec::SmallVec;

use crate::dtype::Element;
use crate::error::{TensorError, TensorResult};
use crate::shape::{
    broadcast_shape, broadcast_strides, contiguous_strides, flatten_shape, numel, permute_shape,
    reshape, unravel_index, Shape,
};

// =============================================================================
// Tensor Struct
// =============================================================================

/// An owned n-dimensional array.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T: Element> {
    data: Vec<T>,
    shape: Shape,
}

impl<T: Element> Tensor<T> {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Creates a tensor from a data vector and a shape.
    pub fn from_vec(data: Vec<T>, shape: &[usize]) -> TensorResult<Self> {
        if data.len() != numel(shape) {
            return Err(TensorError::shape_mismatch(shape, &[data.len()]));
        }
        Ok(Self {
            data,
            shape: SmallVec::from_slice(shape),
        })
    }

    /// Creates a 0-dimensional tensor holding one value.
    #[must_use]
    pub fn scalar(value: T) -> Self {
        Self {
            data: vec![value],
            shape: Shape::new(),
        }
    }

    /// Creates a tensor filled with `value`.
    #[must_use]
    pub fn full(shape: &[usize], value: T) -> Self {
        Self {
            data: vec![value; numel(shape)],
            shape: SmallVec::from_slice(shape),
        }
    }

    /// Creates a tensor filled with zeros.
    #[must_use]
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, T::zero())
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Returns the shape of the tensor.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Returns the total number of elements.
    #[must_use]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the tensor is 0-dimensional.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    /// Returns the elements in row-major order.
    #[must_use]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Copies the elements into a vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.data.clone()
    }

    /// Consumes the tensor and returns its elements.
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Returns the element at a multi-dimensional index.
    pub fn get(&self, indices: &[usize]) -> TensorResult<T> {
        if indices.len() != self.ndim() || indices.iter().zip(self.shape.iter()).any(|(i, d)| i >= d)
        {
            return Err(TensorError::invalid_operation(format!(
                "index {indices:?} out of bounds for shape {:?}",
                self.shape.as_slice()
            )));
        }
        let strides = contiguous_strides(&self.shape);
        let offset: usize = indices.iter().zip(strides.iter()).map(|(i, s)| i * s).sum();
        Ok(self.data[offset])
    }

    /// Returns the single element of a one-element tensor.
    pub fn item(&self) -> TensorResult<T> {
        match self.data.as_slice() {
            [value] => Ok(*value),
            _ => Err(TensorError::invalid_operation(format!(
                "item() requires exactly one element, tensor has shape {:?}",
                self.shape.as_slice()
            ))),
        }
    }

    // =========================================================================
    // Reductions
    // =========================================================================

    /// Smallest element, or `None` for an empty tensor.
    #[must_use]
    pub fn min(&self) -> Option<T> {
        self.data.iter().copied().reduce(Element::min_of)
    }

    /// Largest element, or `None` for an empty tensor.
    #[must_use]
    pub fn max(&self) -> Option<T> {
        self.data.iter().copied().reduce(Element::max_of)
    }

    // =========================================================================
    // Elementwise
    // =========================================================================

    /// Applies `f` to every element.
    #[must_use]
    pub fn map<U: Element>(&self, f: impl Fn(T) -> U + Sync + Send) -> Tensor<U> {
        Tensor {
            data: self.data.par_iter().map(|&x| f(x)).collect(),
            shape: self.shape.clone(),
        }
    }

    /// Applies `f` pairwise with NumPy broadcasting.
    pub fn zip_map<U: Element, V: Element>(
        &self,
        other: &Tensor<U>,
        f: impl Fn(T, U) -> V + Sync + Send,
    ) -> TensorResult<Tensor<V>> {
        if self.shape == other.shape {
            let data = self
                .data
                .par_iter()
                .zip(other.data.par_iter())
                .map(|(&a, &b)| f(a, b))
                .collect();
            return Ok(Tensor {
                data,
                shape: self.shape.clone(),
            });
        }

        let out_shape = broadcast_shape(&self.shape, &other.shape)?;
        let lhs_strides = broadcast_strides(&self.shape, &out_shape);
        let rhs_strides = broadcast_strides(&other.shape, &out_shape);
        let data = (0..numel(&out_shape))
            .into_par_iter()
            .map(|linear| {
                let index = unravel_index(linear, &out_shape);
                let a: usize = index.iter().zip(lhs_strides.iter()).map(|(i, s)| i * s).sum();
                let b: usize = index.iter().zip(rhs_strides.iter()).map(|(i, s)| i * s).sum();
                f(self.data[a], other.data[b])
            })
            .collect();
        Ok(Tensor {
            data,
            shape: out_shape,
        })
    }

    /// Elementwise addition with broadcasting.
    pub fn add(&self, other: &Self) -> TensorResult<Self> {
        self.zip_map(other, |a, b| a + b)
    }

    /// Elementwise subtraction with broadcasting.
    pub fn sub(&self, other: &Self) -> TensorResult<Self> {
        self.zip_map(other, |a, b| a - b)
    }

    /// Elementwise multiplication with broadcasting.
    pub fn mul(&self, other: &Self) -> TensorResult<Self> {
        self.zip_map(other, |a, b| a * b)
    }

    /// Elementwise division with broadcasting.
    pub fn div(&self, other: &Self) -> TensorResult<Self> {
        self.zip_map(other, |a, b| a / b)
    }

    /// Converts every element to another element type.
    pub fn cast<U: Element>(&self) -> TensorResult<Tensor<U>> {
        let data = self
            .data
            .iter()
            .map(|&x| {
                U::from(x).ok_or_else(|| {
                    TensorError::invalid_operation(format!(
                        "cannot represent {x:?} as {}",
                        U::DTYPE.name()
                    ))
                })
            })
            .collect::<TensorResult<Vec<U>>>()?;
        Ok(Tensor {
            data,
            shape: self.shape.clone(),
        })
    }

    // =========================================================================
    // Linear Algebra
    // =========================================================================

    /// Matrix product following NumPy `matmul` rules.
    ///
    /// A 1-D left operand is treated as a row vector and a 1-D right operand
    /// as a column vector; the added dimension is removed from the result.
    /// A 2-D right operand is shared across every batch of the left operand,
    /// otherwise batch dimensions must match exactly.
    pub fn matmul(&self, other: &Self) -> TensorResult<Self> {
        if self.ndim() == 0 || other.ndim() == 0 {
            return Err(TensorError::invalid_operation(
                "matmul requires at least 1-D operands",
            ));
        }

        let lhs_vector = self.ndim() == 1;
        let rhs_vector = other.ndim() == 1;
        let lhs_shape: Shape = if lhs_vector {
            SmallVec::from_slice(&[1, self.shape[0]])
        } else {
            self.shape.clone()
        };
        let rhs_shape: Shape = if rhs_vector {
            SmallVec::from_slice(&[other.shape[0], 1])
        } else {
            other.shape.clone()
        };

        let m = lhs_shape[lhs_shape.len() - 2];
        let k = lhs_shape[lhs_shape.len() - 1];
        let k2 = rhs_shape[rhs_shape.len() - 2];
        let n = rhs_shape[rhs_shape.len() - 1];
        if k != k2 {
            return Err(TensorError::invalid_operation(format!(
                "matmul inner dimensions must match: {k} vs {k2}"
            )));
        }

        let lhs_batch = &lhs_shape[..lhs_shape.len() - 2];
        let rhs_batch = &rhs_shape[..rhs_shape.len() - 2];
        let shared_rhs = rhs_batch.is_empty();
        if !shared_rhs && lhs_batch != rhs_batch {
            return Err(TensorError::invalid_operation(format!(
                "matmul batch dimensions must match: {lhs_batch:?} vs {rhs_batch:?}"
            )));
        }

        let batch = numel(lhs_batch);
        let mut out = vec![T::zero(); batch * m * n];
        out.par_chunks_mut(n.max(1))
            .enumerate()
            .for_each(|(row, out_row)| {
                let b = row / m.max(1);
                let a_row = &self.data[row * k..(row + 1) * k];
                let rhs = if shared_rhs {
                    &other.data[..k * n]
                } else {
                    &other.data[b * k * n..(b + 1) * k * n]
                };
                for (j, slot) in out_row.iter_mut().enumerate() {
                    let mut acc = T::zero();
                    for (p, &a) in a_row.iter().enumerate() {
                        acc = acc + a * rhs[p * n + j];
                    }
                    *slot = acc;
                }
            });

        let mut out_shape: Shape = SmallVec::from_slice(lhs_batch);
        if !lhs_vector {
            out_shape.push(m);
        }
        if !rhs_vector {
            out_shape.push(n);
        }
        Self::from_vec(out, &out_shape)
    }

    // =========================================================================
    // Layout
    // =========================================================================

    /// Permutes dimensions. An empty permutation reverses them.
    pub fn transpose(&self, perm: &[usize]) -> TensorResult<Self> {
        let (out_shape, perm) = permute_shape(&self.shape, perm)?;
        let in_strides = contiguous_strides(&self.shape);
        let permuted_strides: Vec<usize> = perm.iter().map(|&p| in_strides[p]).collect();
        let data = (0..self.numel())
            .map(|linear| {
                let index = unravel_index(linear, &out_shape);
                let offset: usize = index
                    .iter()
                    .zip(permuted_strides.iter())
                    .map(|(i, s)| i * s)
                    .sum();
                self.data[offset]
            })
            .collect();
        Ok(Self {
            data,
            shape: out_shape,
        })
    }

    /// Swaps the two dimensions of a matrix.
    pub fn t(&self) -> TensorResult<Self> {
        if self.ndim() != 2 {
            return Err(TensorError::invalid_operation(format!(
                "t() requires a 2-D tensor, got shape {:?}",
                self.shape.as_slice()
            )));
        }
        self.transpose(&[1, 0])
    }

    /// Reshapes the tensor; see [`crate::shape::reshape`] for `-1`/`0`.
    pub fn reshape(&self, shape: &[i64]) -> TensorResult<Self> {
        let new_shape = reshape(&self.shape, shape)?;
        Ok(Self {
            data: self.data.clone(),
            shape: new_shape,
        })
    }

    /// Flattens into a matrix around `axis`.
    pub fn flatten(&self, axis: i64) -> TensorResult<Self> {
        let new_shape = flatten_shape(&self.shape, axis)?;
        Ok(Self {
            data: self.data.clone(),
            shape: new_shape,
        })
    }
}

impl<T: Element> From<T> for Tensor<T> {
    fn from(value: T) -> Self {
        Self::scalar(value)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec() {
        let t = Tensor::<f64>::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t.numel(), 6);
        assert_eq!(t.get(&[1, 2]).unwrap(), 6.0);
        assert!(Tensor::<f64>::from_vec(vec![1.0], &[2]).is_err());
    }

    #[test]
    fn test_scalar() {
        let t = Tensor::scalar(7i64);
        assert!(t.is_scalar());
        assert_eq!(t.item().unwrap(), 7);
    }

    #[test]
    fn test_broadcast_add() {
        let a = Tensor::<f64>::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let b = Tensor::<f64>::from_vec(vec![10.0, 20.0], &[2]).unwrap();
        let c = a.add(&b).unwrap();
        assert_eq!(c.data(), &[11.0, 22.0, 13.0, 24.0]);

        let s = Tensor::scalar(1.0);
        assert_eq!(a.sub(&s).unwrap().data(), &[0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_min_max() {
        let t = Tensor::<i64>::from_vec(vec![3, -4, 9, 0], &[4]).unwrap();
        assert_eq!(t.min(), Some(-4));
        assert_eq!(t.max(), Some(9));
    }

    #[test]
    fn test_matmul_2d() {
        let a = Tensor::<i64>::from_vec(vec![1, 2, 3, 4, 5, 6], &[2, 3]).unwrap();
        let b = Tensor::<i64>::from_vec(vec![7, 8, 9, 10, 11, 12], &[3, 2]).unwrap();
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), &[2, 2]);
        assert_eq!(c.data(), &[58, 64, 139, 154]);
    }

    #[test]
    fn test_matmul_vector_and_batch() {
        let v = Tensor::<f64>::from_vec(vec![1.0, 1.0], &[2]).unwrap();
        let m = Tensor::<f64>::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let out = v.matmul(&m).unwrap();
        assert_eq!(out.shape(), &[2]);
        assert_eq!(out.data(), &[4.0, 6.0]);

        let batched = Tensor::<f64>::from_vec(vec![1.0, 0.0, 0.0, 1.0], &[2, 1, 2]).unwrap();
        let out = batched.matmul(&m).unwrap();
        assert_eq!(out.shape(), &[2, 1, 2]);
        assert_eq!(out.data(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_matmul_mismatch() {
        let a = Tensor::<f64>::zeros(&[2, 3]);
        let b = Tensor::<f64>::zeros(&[2, 3]);
        assert!(a.matmul(&b).is_err());
    }

    #[test]
    fn test_transpose() {
        let t = Tensor::<i64>::from_vec(vec![1, 2, 3, 4, 5, 6], &[2, 3]).unwrap();
        let tt = t.t().unwrap();
        assert_eq!(tt.shape(), &[3, 2]);
        assert_eq!(tt.data(), &[1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn test_reshape_and_flatten() {
        let t = Tensor::<f64>::zeros(&[2, 3, 4]);
        assert_eq!(t.reshape(&[-1, 4]).unwrap().shape(), &[6, 4]);
        assert_eq!(t.flatten(1).unwrap().shape(), &[2, 12]);
    }

    #[test]
    fn test_cast() {
        let t = Tensor::<f64>::from_vec(vec![1.0, -2.0], &[2]).unwrap();
        let i: Tensor<i64> = t.cast().unwrap();
        assert_eq!(i.data(), &[1, -2]);
        assert!(Tensor::scalar(f64::NAN).cast::<i64>().is_err());
    }
}
