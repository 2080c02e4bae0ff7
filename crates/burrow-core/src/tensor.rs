use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dtype::{DType, WithDType};
use crate::error::{Error, Result};
use crate::shape::Shape;

// Tensor — Concrete values flowing in and out of plans
//
// A Tensor is an immutable, contiguous n-dimensional array. It is the value
// type of the eager executor, of plan inputs and outputs, of state slots and
// of literals embedded in the IR.
//
// MEMORY MODEL:
//
//   The data lives behind an Arc, so cloning a Tensor is O(1). State reads,
//   plan clones and tape entries all share the same buffers.
//
// PRECISION:
//
//   Elements are held as f64 but are rounded to the tensor's DType when the
//   tensor is built (see DType::round). Two tensors are equal when shape,
//   dtype and the bit pattern of every element agree.

/// Unique identifier for a tensor. The eager executor's tape keys on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(u64);

impl TensorId {
    /// Generate a new unique tensor ID (uses a global atomic counter).
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        TensorId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

struct TensorInner {
    id: TensorId,
    shape: Shape,
    dtype: DType,
    data: Vec<f64>,
}

/// An immutable n-dimensional array.
///
/// # Example
/// ```
/// use burrow_core::{DType, Tensor};
///
/// let a = Tensor::from_f64_slice(&[1.0, 2.0, 3.0, 4.0], (2, 2), DType::F32)?;
/// assert_eq!(a.dims(), &[2, 2]);
/// # Ok::<(), burrow_core::Error>(())
/// ```
#[derive(Clone)]
pub struct Tensor {
    inner: Arc<TensorInner>,
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tensor(id={}, shape={}, dtype={})",
            self.inner.id.0, self.inner.shape, self.inner.dtype,
        )
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.shape() == other.shape()
            && self.dtype() == other.dtype()
            && self
                .inner
                .data
                .iter()
                .zip(other.inner.data.iter())
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Tensor {
    // Constructors

    /// Build a tensor from f64 values, rounding each to `dtype`.
    pub fn from_f64_slice(data: &[f64], shape: impl Into<Shape>, dtype: DType) -> Result<Self> {
        Self::from_vec(data.to_vec(), shape, dtype)
    }

    /// Build a tensor taking ownership of `data`, rounding each value to `dtype`.
    pub fn from_vec(mut data: Vec<f64>, shape: impl Into<Shape>, dtype: DType) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                expected: shape.elem_count(),
                got: data.len(),
                shape,
            });
        }
        if let Some(v) = data.iter().find(|v| !dtype.holds_exactly(**v)) {
            return Err(Error::IntegerOutOfRange {
                value: v.to_string(),
                dtype,
            });
        }
        if dtype != DType::F64 {
            for v in data.iter_mut() {
                *v = dtype.round(*v);
            }
        }
        Ok(Tensor {
            inner: Arc::new(TensorInner {
                id: TensorId::new(),
                shape,
                dtype,
                data,
            }),
        })
    }

    /// Build a tensor from a typed slice; the dtype follows `T`.
    pub fn from_slice<T: WithDType>(data: &[T], shape: impl Into<Shape>) -> Result<Self> {
        let values = data
            .iter()
            .map(|v| {
                v.to_f64_exact().ok_or_else(|| Error::IntegerOutOfRange {
                    value: format!("{:?}", v),
                    dtype: T::DTYPE,
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        Self::from_vec(values, shape, T::DTYPE)
    }

    /// A rank-0 tensor.
    pub fn scalar(value: f64, dtype: DType) -> Self {
        Tensor {
            inner: Arc::new(TensorInner {
                id: TensorId::new(),
                shape: Shape::from(()),
                dtype,
                data: vec![dtype.round(value)],
            }),
        }
    }

    /// A tensor filled with `value`.
    pub fn full(shape: impl Into<Shape>, value: f64, dtype: DType) -> Self {
        let shape = shape.into();
        let data = vec![dtype.round(value); shape.elem_count()];
        Tensor {
            inner: Arc::new(TensorInner {
                id: TensorId::new(),
                shape,
                dtype,
                data,
            }),
        }
    }

    pub fn zeros(shape: impl Into<Shape>, dtype: DType) -> Self {
        Self::full(shape, 0.0, dtype)
    }

    pub fn ones(shape: impl Into<Shape>, dtype: DType) -> Self {
        Self::full(shape, 1.0, dtype)
    }

    /// Uniform values in `[low, high)` from a seeded generator.
    pub fn rand_uniform(
        shape: impl Into<Shape>,
        low: f64,
        high: f64,
        dtype: DType,
        seed: u64,
    ) -> Result<Self> {
        let shape = shape.into();
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..shape.elem_count())
            .map(|_| rng.gen_range(low..high))
            .collect();
        Self::from_vec(data, shape, dtype)
    }

    /// Standard-normal values from a seeded generator (Box-Muller).
    pub fn rand_normal(shape: impl Into<Shape>, dtype: DType, seed: u64) -> Result<Self> {
        let shape = shape.into();
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..shape.elem_count())
            .map(|_| {
                let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
                let u2: f64 = rng.gen();
                (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
            })
            .collect();
        Self::from_vec(data, shape, dtype)
    }

    // Accessors

    pub fn id(&self) -> TensorId {
        self.inner.id
    }

    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    /// The dimensions as a slice (shortcut for shape().dims()).
    pub fn dims(&self) -> &[usize] {
        self.inner.shape.dims()
    }

    pub fn rank(&self) -> usize {
        self.inner.shape.rank()
    }

    pub fn elem_count(&self) -> usize {
        self.inner.data.len()
    }

    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    /// Element values in row-major order.
    pub fn values(&self) -> &[f64] {
        &self.inner.data
    }

    /// Copy the element values out.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.inner.data.clone()
    }

    /// Element values converted to f32 (useful for comparisons in tests).
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.inner.data.iter().map(|&v| v as f32).collect()
    }

    /// The single value of a one-element tensor.
    pub fn to_scalar(&self) -> Result<f64> {
        if self.elem_count() != 1 {
            return Err(Error::msg(format!(
                "not a scalar: tensor has shape {}",
                self.shape()
            )));
        }
        Ok(self.inner.data[0])
    }

    /// The same values viewed under another shape with equal element count.
    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if shape.elem_count() != self.elem_count() {
            return Err(Error::ReshapeElementMismatch {
                src: self.elem_count(),
                dst: shape.elem_count(),
                dst_shape: shape,
            });
        }
        Ok(Tensor {
            inner: Arc::new(TensorInner {
                id: TensorId::new(),
                shape,
                dtype: self.dtype(),
                data: self.inner.data.clone(),
            }),
        })
    }

    /// Whether `other` has the same shape and dtype.
    pub fn same_spec(&self, other: &Tensor) -> bool {
        self.shape() == other.shape() && self.dtype() == other.dtype()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_rounds_to_dtype() {
        let t = Tensor::from_f64_slice(&[4.2, 7.3], 2, DType::F32).unwrap();
        assert_eq!(t.values(), &[4.2f32 as f64, 7.3f32 as f64]);
        assert_eq!(t.to_f32_vec(), vec![4.2f32, 7.3f32]);
    }

    #[test]
    fn test_element_count_checked() {
        let err = Tensor::from_f64_slice(&[1.0, 2.0, 3.0], (2, 2), DType::F32).unwrap_err();
        assert!(matches!(err, Error::ElementCountMismatch { .. }));
    }

    #[test]
    fn test_equality_is_bitwise() {
        let a = Tensor::from_f64_slice(&[0.0, f64::NAN], 2, DType::F64).unwrap();
        let b = Tensor::from_f64_slice(&[0.0, f64::NAN], 2, DType::F64).unwrap();
        let c = Tensor::from_f64_slice(&[-0.0, f64::NAN], 2, DType::F64).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_seeded_random_is_reproducible() {
        let a = Tensor::rand_normal((4, 4), DType::F32, 7).unwrap();
        let b = Tensor::rand_normal((4, 4), DType::F32, 7).unwrap();
        let c = Tensor::rand_normal((4, 4), DType::F32, 8).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_i64_values_are_exact_or_rejected() {
        let edge = (1i64 << 53) - 1;
        let t = Tensor::from_slice(&[edge, -edge, 0], 3).unwrap();
        assert_eq!(t.values()[0] as i64, edge);
        assert_eq!(t.values()[1] as i64, -edge);

        let err = Tensor::from_slice(&[(1i64 << 53) + 1], 1).unwrap_err();
        assert!(matches!(err, Error::IntegerOutOfRange { dtype: DType::I64, .. }));
        let err = Tensor::from_f64_slice(&[1e18], 1, DType::I64).unwrap_err();
        assert!(matches!(err, Error::IntegerOutOfRange { .. }));
        // other dtypes keep saturating
        let u = Tensor::from_f64_slice(&[1e18], 1, DType::U8).unwrap();
        assert_eq!(u.values(), &[255.0]);
    }

    #[test]
    fn test_scalar() {
        let s = Tensor::scalar(0.005, DType::F32);
        assert_eq!(s.rank(), 0);
        assert_eq!(s.to_scalar().unwrap(), 0.005f32 as f64);
    }
}
