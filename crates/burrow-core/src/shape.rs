use std::fmt;

// Shape — N-dimensional shape representation
//
// A Shape describes the size of each dimension of a tensor:
//   - Scalar: Shape([])          — 0 dimensions, 1 element
//   - Vector: Shape([5])         — 1 dimension, 5 elements
//   - Matrix: Shape([3, 4])      — 2 dimensions, 12 elements
//
// Placeholders and state slots carry a Shape that is fixed when the plan is
// built; every later execution or state replacement is checked against it.

/// N-dimensional shape of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Create a new shape from a vector of dimension sizes.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// The dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions (0 for scalar, 1 for vector, 2 for matrix, etc.).
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements. A scalar shape [] has 1 element; any
    /// zero-sized dimension gives 0.
    ///
    /// Assumes the count fits in `usize`; use [`Shape::checked_elem_count`]
    /// for shapes that did not come from an existing tensor.
    pub fn elem_count(&self) -> usize {
        self.0.iter().product::<usize>()
    }

    /// Total number of elements, or `None` if it overflows `usize`.
    pub fn checked_elem_count(&self) -> Option<usize> {
        self.0.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    /// Contiguous (row-major) strides for this shape.
    ///
    /// For shape [2, 3, 4], strides are [12, 4, 1].
    pub fn stride_contiguous(&self) -> Vec<usize> {
        let mut strides = vec![0usize; self.rank()];
        if self.rank() > 0 {
            strides[self.rank() - 1] = 1;
            for i in (0..self.rank() - 1).rev() {
                strides[i] = strides[i + 1] * self.0[i + 1];
            }
        }
        strides
    }

    /// The shape with the dimensions in `dims` set to 1 (reductions with keep_dim).
    pub fn keep_dims(&self, dims: &[usize]) -> Shape {
        let mut out = self.0.clone();
        for &d in dims {
            if d < out.len() {
                out[d] = 1;
            }
        }
        Shape(out)
    }

    /// The shape with the dimensions in `dims` removed.
    pub fn drop_dims(&self, dims: &[usize]) -> Shape {
        Shape(
            self.0
                .iter()
                .enumerate()
                .filter(|(i, _)| !dims.contains(i))
                .map(|(_, &d)| d)
                .collect(),
        )
    }

    /// Resolve a reshape request that may contain one `-1` wildcard.
    ///
    /// `[-1, 4]` against 12 elements gives `[3, 4]`. Two wildcards, a
    /// wildcard next to a zero-sized dimension, or a size that does not
    /// divide evenly are ambiguous.
    pub fn resolve_reshape(&self, request: &[isize]) -> crate::Result<Shape> {
        let total = self.elem_count();
        let mut wildcard = None;
        let mut known = 1usize;
        for (i, &d) in request.iter().enumerate() {
            if d == -1 {
                if wildcard.is_some() {
                    return Err(crate::Error::AmbiguousShape {
                        reason: format!("reshape {:?} has more than one -1", request),
                    });
                }
                wildcard = Some(i);
            } else if d < 0 {
                return Err(crate::Error::AmbiguousShape {
                    reason: format!("reshape {:?} has negative dimension {}", request, d),
                });
            } else {
                known = known.checked_mul(d as usize).ok_or_else(|| {
                    crate::Error::ElementCountOverflow {
                        shape: Shape(request.iter().map(|&d| d.max(0) as usize).collect()),
                    }
                })?;
            }
        }

        let mut dims: Vec<usize> = request.iter().map(|&d| d.max(0) as usize).collect();
        match wildcard {
            Some(i) => {
                if known == 0 || total % known != 0 {
                    return Err(crate::Error::AmbiguousShape {
                        reason: format!(
                            "cannot infer -1 in reshape {:?} from {} elements",
                            request, total
                        ),
                    });
                }
                dims[i] = total / known;
            }
            None => {
                if known != total {
                    return Err(crate::Error::ReshapeElementMismatch {
                        src: total,
                        dst: known,
                        dst_shape: Shape(dims),
                    });
                }
            }
        }
        Ok(Shape(dims))
    }

    // Broadcasting

    /// Compute the broadcast output shape from two input shapes.
    ///
    /// NumPy-style rules: align from the right, dimensions are compatible if
    /// equal or one of them is 1, missing leading dimensions count as 1.
    ///
    ///   [3, 4] and [4]     → [3, 4]
    ///   [2, 1] and [1, 3]  → [2, 3]
    ///   [3] and [4]        → Error
    pub fn broadcast_shape(lhs: &Shape, rhs: &Shape) -> crate::Result<Shape> {
        let l = lhs.dims();
        let r = rhs.dims();
        let max_rank = l.len().max(r.len());
        let mut result = Vec::with_capacity(max_rank);

        for i in 0..max_rank {
            let ld = if i < l.len() { l[l.len() - 1 - i] } else { 1 };
            let rd = if i < r.len() { r[r.len() - 1 - i] } else { 1 };

            if ld == rd {
                result.push(ld);
            } else if ld == 1 {
                result.push(rd);
            } else if rd == 1 {
                result.push(ld);
            } else {
                return Err(crate::Error::msg(format!(
                    "shapes {:?} and {:?} are not broadcast-compatible (dim {} from right: {} vs {})",
                    l, r, i, ld, rd
                )));
            }
        }

        result.reverse();
        Ok(Shape::new(result))
    }

    /// Strides that read this shape as if it were broadcast to `target`.
    ///
    /// Dimensions of size 1 that are expanded, and missing leading
    /// dimensions, get stride 0.
    pub fn broadcast_strides(&self, target: &Shape) -> Vec<usize> {
        let self_dims = self.dims();
        let target_dims = target.dims();
        let self_strides = self.stride_contiguous();

        let mut result = vec![0usize; target_dims.len()];
        let offset = target_dims.len() - self_dims.len();

        for i in 0..self_dims.len() {
            if self_dims[i] == target_dims[i + offset] {
                result[i + offset] = self_strides[i];
            }
        }
        result
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl From<()> for Shape {
    /// Scalar shape (0 dimensions).
    fn from(_: ()) -> Self {
        Shape(vec![])
    }
}

impl From<usize> for Shape {
    /// 1-D shape.
    fn from(d: usize) -> Self {
        Shape(vec![d])
    }
}

impl From<(usize,)> for Shape {
    fn from((d0,): (usize,)) -> Self {
        Shape(vec![d0])
    }
}

impl From<(usize, usize)> for Shape {
    fn from((d0, d1): (usize, usize)) -> Self {
        Shape(vec![d0, d1])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((d0, d1, d2): (usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2])
    }
}

impl From<(usize, usize, usize, usize)> for Shape {
    fn from((d0, d1, d2, d3): (usize, usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2, d3])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

impl From<&Shape> for Shape {
    fn from(s: &Shape) -> Self {
        s.clone()
    }
}

/// Row-major walk over every index of `shape`, returning `Σ index[d] * strides[d]`
/// for each position.
///
/// With contiguous strides this is the identity; with broadcast strides it
/// maps output positions to source positions; with a permuted stride vector
/// it implements transpose.
pub fn strided_offsets(shape: &Shape, strides: &[usize]) -> Vec<usize> {
    let n = shape.elem_count();
    let dims = shape.dims();
    let mut out = Vec::with_capacity(n);
    if n == 0 {
        return out;
    }
    let mut index = vec![0usize; dims.len()];
    let mut offset = 0usize;
    for _ in 0..n {
        out.push(offset);
        // Increment the multi-index from the innermost dimension.
        for d in (0..dims.len()).rev() {
            index[d] += 1;
            offset += strides[d];
            if index[d] < dims[d] {
                break;
            }
            offset -= strides[d] * index[d];
            index[d] = 0;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_shape() {
        let s = Shape::from(());
        assert_eq!(s.rank(), 0);
        assert_eq!(s.elem_count(), 1);
        assert_eq!(s.stride_contiguous(), Vec::<usize>::new());
    }

    #[test]
    fn test_zero_sized_shape() {
        assert_eq!(Shape::from((0, 4)).elem_count(), 0);
    }

    #[test]
    fn test_3d_strides() {
        let s = Shape::from((2, 3, 4));
        assert_eq!(s.stride_contiguous(), vec![12, 4, 1]);
        assert_eq!(s.elem_count(), 24);
    }

    #[test]
    fn test_checked_elem_count() {
        assert_eq!(Shape::from((3, 4)).checked_elem_count(), Some(12));
        assert_eq!(Shape::from(()).checked_elem_count(), Some(1));
        let huge = Shape::from((1usize << 33, 1usize << 33, 1usize << 33));
        assert_eq!(huge.checked_elem_count(), None);

        let s = Shape::from(4);
        let big = 1isize << 40;
        assert!(matches!(
            s.resolve_reshape(&[big, big, -1]),
            Err(crate::Error::ElementCountOverflow { .. })
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Shape::from((3, 4))), "[3, 4]");
    }

    #[test]
    fn test_resolve_reshape_wildcard() {
        let s = Shape::from((2, 6));
        assert_eq!(s.resolve_reshape(&[-1, 4]).unwrap(), Shape::from((3, 4)));
        assert_eq!(s.resolve_reshape(&[12]).unwrap(), Shape::from(12));
    }

    #[test]
    fn test_resolve_reshape_ambiguous() {
        let s = Shape::from((2, 6));
        assert!(matches!(
            s.resolve_reshape(&[-1, -1]),
            Err(crate::Error::AmbiguousShape { .. })
        ));
        assert!(matches!(
            s.resolve_reshape(&[-1, 5]),
            Err(crate::Error::AmbiguousShape { .. })
        ));
        assert!(matches!(
            s.resolve_reshape(&[5, 2]),
            Err(crate::Error::ReshapeElementMismatch { .. })
        ));
    }

    #[test]
    fn test_broadcast_shape() {
        let a = Shape::from((2, 1));
        let b = Shape::from((1, 3));
        assert_eq!(Shape::broadcast_shape(&a, &b).unwrap(), Shape::from((2, 3)));
        assert!(Shape::broadcast_shape(&Shape::from(3), &Shape::from(4)).is_err());
    }

    #[test]
    fn test_strided_offsets_broadcast_row() {
        let row = Shape::from(3);
        let target = Shape::from((2, 3));
        let offsets = strided_offsets(&target, &row.broadcast_strides(&target));
        assert_eq!(offsets, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_strided_offsets_transpose() {
        // [2, 3] read as its transpose [3, 2]
        let offsets = strided_offsets(&Shape::from((3, 2)), &[1, 3]);
        assert_eq!(offsets, vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn test_keep_and_drop_dims() {
        let s = Shape::from((2, 3, 4));
        assert_eq!(s.keep_dims(&[1]), Shape::from((2, 1, 4)));
        assert_eq!(s.drop_dims(&[0, 2]), Shape::from(3));
    }
}
