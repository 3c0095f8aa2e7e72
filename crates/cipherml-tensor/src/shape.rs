//! Shape Utilities - Dimension Bookkeeping
//!
//! Shapes, strides and the broadcasting rules used by every elementwise
//! kernel. Tensors in CipherML are always contiguous and row-major, so
//! strides are plain element counts.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use smallvec::SmallVec;

use crate::error::{TensorError, TensorResult};

// =============================================================================
// Type Aliases
// =============================================================================

/// Shape type - dimensions of a tensor.
/// Inline storage for up to 6 dimensions.
pub type Shape = SmallVec<[usize; 6]>;

/// Strides type - element step per dimension.
pub type Strides = SmallVec<[usize; 6]>;

// =============================================================================
// Shape Utilities
// =============================================================================

/// Total number of elements described by a shape. A 0-d shape holds one.
#[must_use]
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Row-major strides for a shape.
#[must_use]
pub fn contiguous_strides(shape: &[usize]) -> Strides {
    let mut strides: Strides = SmallVec::from_elem(0, shape.len());
    let mut stride = 1usize;
    for (slot, &dim) in strides.iter_mut().zip(shape.iter()).rev() {
        *slot = stride;
        stride *= dim;
    }
    strides
}

/// Converts a linear index to multi-dimensional indices.
#[must_use]
pub fn unravel_index(mut linear: usize, shape: &[usize]) -> Vec<usize> {
    let mut indices = vec![0; shape.len()];
    for (i, &dim) in shape.iter().enumerate().rev() {
        indices[i] = linear % dim;
        linear /= dim;
    }
    indices
}

// =============================================================================
// Broadcasting
// =============================================================================

/// Computes the broadcast shape of two shapes.
///
/// Shapes are aligned from the right; a dimension is compatible if equal to
/// the other or equal to 1, and missing dimensions count as 1.
pub fn broadcast_shape(shape1: &[usize], shape2: &[usize]) -> TensorResult<Shape> {
    let ndim = shape1.len().max(shape2.len());
    let mut result = Shape::with_capacity(ndim);

    for i in 0..ndim {
        let d1 = dim_from_right(shape1, i);
        let d2 = dim_from_right(shape2, i);
        match (d1, d2) {
            _ if d1 == d2 => result.push(d1),
            (1, _) => result.push(d2),
            (_, 1) => result.push(d1),
            _ => return Err(TensorError::broadcast(shape1, shape2)),
        }
    }

    result.reverse();
    Ok(result)
}

fn dim_from_right(shape: &[usize], i: usize) -> usize {
    if i < shape.len() {
        shape[shape.len() - 1 - i]
    } else {
        1
    }
}

/// Strides that read a tensor of `shape` as if it had `target_shape`.
///
/// Broadcast dimensions get stride 0. `target_shape` must be the result of
/// `broadcast_shape` involving `shape`.
#[must_use]
pub fn broadcast_strides(shape: &[usize], target_shape: &[usize]) -> Strides {
    let own = contiguous_strides(shape);
    let offset = target_shape.len() - shape.len();
    target_shape
        .iter()
        .enumerate()
        .map(|(i, &target)| {
            if i < offset {
                0
            } else if shape[i - offset] == 1 && target != 1 {
                0
            } else {
                own[i - offset]
            }
        })
        .collect()
}

// =============================================================================
// Shape Manipulation
// =============================================================================

/// Resolves a reshape target against an existing shape.
///
/// A `-1` entry is inferred from the element count and a `0` entry copies
/// the corresponding input dimension.
pub fn reshape(old_shape: &[usize], new_shape: &[i64]) -> TensorResult<Shape> {
    let old_numel = numel(old_shape);
    let mut result = Shape::with_capacity(new_shape.len());
    let mut infer_idx = None;
    let mut known = 1usize;

    for (i, &dim) in new_shape.iter().enumerate() {
        match dim {
            -1 => {
                if infer_idx.replace(i).is_some() {
                    return Err(TensorError::invalid_operation(
                        "reshape accepts at most one -1 dimension",
                    ));
                }
                result.push(1);
            }
            0 => {
                let copied = *old_shape.get(i).ok_or(TensorError::InvalidDimension {
                    index: i as i64,
                    ndim: old_shape.len(),
                })?;
                known *= copied;
                result.push(copied);
            }
            d if d > 0 => {
                known *= d as usize;
                result.push(d as usize);
            }
            _ => {
                return Err(TensorError::invalid_operation(format!(
                    "invalid reshape dimension {dim}"
                )))
            }
        }
    }

    if let Some(idx) = infer_idx {
        if known == 0 || old_numel % known != 0 {
            return Err(TensorError::invalid_operation(format!(
                "cannot infer reshape dimension for {old_shape:?} -> {new_shape:?}"
            )));
        }
        result[idx] = old_numel / known;
    } else if known != old_numel {
        return Err(TensorError::shape_mismatch(old_shape, &result));
    }

    Ok(result)
}

/// Shape produced by flattening everything before `axis` into the first
/// dimension and everything from `axis` on into the second.
pub fn flatten_shape(shape: &[usize], axis: i64) -> TensorResult<Shape> {
    let ndim = shape.len();
    let axis = if axis < 0 { axis + ndim as i64 } else { axis };
    if axis < 0 || axis > ndim as i64 {
        return Err(TensorError::InvalidDimension { index: axis, ndim });
    }
    let axis = axis as usize;
    Ok(SmallVec::from_slice(&[
        numel(&shape[..axis]),
        numel(&shape[axis..]),
    ]))
}

/// Validates a permutation and returns the permuted shape.
///
/// An empty permutation reverses the dimensions.
pub fn permute_shape(shape: &[usize], perm: &[usize]) -> TensorResult<(Shape, Vec<usize>)> {
    let ndim = shape.len();
    let perm: Vec<usize> = if perm.is_empty() {
        (0..ndim).rev().collect()
    } else {
        perm.to_vec()
    };
    if perm.len() != ndim {
        return Err(TensorError::invalid_operation(format!(
            "permutation {perm:?} does not match rank {ndim}"
        )));
    }
    let mut seen = vec![false; ndim];
    for &p in &perm {
        if p >= ndim || std::mem::replace(&mut seen[p], true) {
            return Err(TensorError::invalid_operation(format!(
                "invalid permutation {perm:?}"
            )));
        }
    }
    let permuted = perm.iter().map(|&p| shape[p]).collect();
    Ok((permuted, perm))
}

// =============================================================================
// Validation
// =============================================================================

/// Normalizes a dimension index, supporting negative indexing.
pub fn normalize_dim(dim: i64, ndim: usize) -> TensorResult<usize> {
    let normalized = if dim < 0 { dim + ndim as i64 } else { dim };
    if normalized < 0 || normalized >= ndim as i64 {
        return Err(TensorError::InvalidDimension { index: dim, ndim });
    }
    Ok(normalized as usize)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numel() {
        assert_eq!(numel(&[2, 3, 4]), 24);
        assert_eq!(numel(&[]), 1);
    }

    #[test]
    fn test_contiguous_strides() {
        assert_eq!(contiguous_strides(&[2, 3, 4]).as_slice(), &[12, 4, 1]);
        assert!(contiguous_strides(&[]).is_empty());
    }

    #[test]
    fn test_unravel_index() {
        assert_eq!(unravel_index(23, &[2, 3, 4]), vec![1, 2, 3]);
        assert_eq!(unravel_index(4, &[2, 3]), vec![1, 1]);
    }

    #[test]
    fn test_broadcast_shape() {
        assert_eq!(broadcast_shape(&[2, 3], &[3]).unwrap().as_slice(), &[2, 3]);
        assert_eq!(
            broadcast_shape(&[4, 1, 5], &[3, 1]).unwrap().as_slice(),
            &[4, 3, 5]
        );
        assert_eq!(broadcast_shape(&[], &[2]).unwrap().as_slice(), &[2]);
        assert!(broadcast_shape(&[2, 3], &[4]).is_err());
    }

    #[test]
    fn test_broadcast_strides() {
        assert_eq!(broadcast_strides(&[3], &[2, 3]).as_slice(), &[0, 1]);
        assert_eq!(broadcast_strides(&[2, 1], &[2, 4]).as_slice(), &[1, 0]);
    }

    #[test]
    fn test_reshape() {
        assert_eq!(reshape(&[2, 3, 4], &[6, -1]).unwrap().as_slice(), &[6, 4]);
        assert_eq!(reshape(&[2, 3, 4], &[0, -1]).unwrap().as_slice(), &[2, 12]);
        assert!(reshape(&[2, 3], &[4, -1]).is_err());
        assert!(reshape(&[2, 3], &[-1, -1]).is_err());
        assert!(reshape(&[2, 3], &[5]).is_err());
    }

    #[test]
    fn test_flatten_shape() {
        assert_eq!(flatten_shape(&[2, 3, 4], 1).unwrap().as_slice(), &[2, 12]);
        assert_eq!(flatten_shape(&[2, 3, 4], 0).unwrap().as_slice(), &[1, 24]);
        assert_eq!(flatten_shape(&[2, 3, 4], -1).unwrap().as_slice(), &[6, 4]);
    }

    #[test]
    fn test_permute_shape() {
        let (shape, perm) = permute_shape(&[2, 3, 4], &[2, 0, 1]).unwrap();
        assert_eq!(shape.as_slice(), &[4, 2, 3]);
        assert_eq!(perm, vec![2, 0, 1]);
        let (shape, _) = permute_shape(&[2, 3], &[]).unwrap();
        assert_eq!(shape.as_slice(), &[3, 2]);
        assert!(permute_shape(&[2, 3], &[0, 0]).is_err());
    }

    #[test]
    fn test_normalize_dim() {
        assert_eq!(normalize_dim(-1, 3).unwrap(), 2);
        assert!(normalize_dim(3, 3).is_err());
    }
}
