// Shape and dtype inference for primitives
//
// Given the shapes and dtypes of a primitive's operands, compute the shape
// and dtype of its result, or the error the primitive would raise. Backends
// call this before running a kernel; plan validation calls it to check every
// recorded operation without evaluating anything.

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::primitive::{Primitive, ReduceOp};
use crate::shape::Shape;

/// Reduction dims with the "empty means all" convention expanded, sorted and
/// deduplicated. Fails on any dim outside `rank`.
pub fn reduce_dims(dims: &[usize], rank: usize) -> Result<Vec<usize>> {
    if dims.is_empty() {
        return Ok((0..rank).collect());
    }
    let mut out = dims.to_vec();
    out.sort_unstable();
    out.dedup();
    if let Some(&d) = out.iter().find(|&&d| d >= rank) {
        return Err(Error::DimOutOfRange { dim: d, rank });
    }
    Ok(out)
}

fn check_dim(dim: usize, shape: &Shape) -> Result<()> {
    if dim >= shape.rank() {
        return Err(Error::DimOutOfRange {
            dim,
            rank: shape.rank(),
        });
    }
    Ok(())
}

fn same_dtype(lhs: DType, rhs: DType) -> Result<()> {
    if lhs != rhs {
        return Err(Error::DTypeMismatch {
            expected: lhs,
            got: rhs,
        });
    }
    Ok(())
}

fn checked_count(shape: &Shape) -> Result<usize> {
    shape
        .checked_elem_count()
        .ok_or_else(|| Error::ElementCountOverflow {
            shape: shape.clone(),
        })
}

/// Infer the result `(shape, dtype)` of `primitive` applied to `args`.
pub fn infer(primitive: &Primitive, args: &[(&Shape, DType)]) -> Result<(Shape, DType)> {
    if args.len() != primitive.arity() {
        return Err(Error::msg(format!(
            "{} takes {} operand(s), got {}",
            primitive.name(),
            primitive.arity(),
            args.len()
        )));
    }
    let (shape, dtype) = args[0];

    match primitive {
        Primitive::Unary(_) | Primitive::Powf { .. } => Ok((shape.clone(), dtype)),

        Primitive::Binary(_) => {
            let (rhs, rhs_dtype) = args[1];
            same_dtype(dtype, rhs_dtype)?;
            Ok((Shape::broadcast_shape(shape, rhs)?, dtype))
        }

        Primitive::Compare(_) => {
            let (rhs, rhs_dtype) = args[1];
            same_dtype(dtype, rhs_dtype)?;
            Ok((Shape::broadcast_shape(shape, rhs)?, DType::U8))
        }

        Primitive::Reduce { op, dims, keep_dim } => {
            if op.is_arg() && dims.len() != 1 {
                return Err(Error::msg(format!(
                    "{} reduces exactly one dimension, got {:?}",
                    op.name(),
                    dims
                )));
            }
            let dims = reduce_dims(dims, shape.rank())?;
            let out_shape = if *keep_dim {
                shape.keep_dims(&dims)
            } else {
                shape.drop_dims(&dims)
            };
            let out_dtype = match op {
                ReduceOp::ArgMax | ReduceOp::ArgMin => DType::I64,
                _ => dtype,
            };
            Ok((out_shape, out_dtype))
        }

        Primitive::Matmul => {
            let (rhs, rhs_dtype) = args[1];
            same_dtype(dtype, rhs_dtype)?;
            matmul_shape(shape, rhs).map(|s| (s, dtype))
        }

        Primitive::Transpose { dim0, dim1 } => {
            check_dim(*dim0, shape)?;
            check_dim(*dim1, shape)?;
            let mut dims = shape.dims().to_vec();
            dims.swap(*dim0, *dim1);
            Ok((Shape::new(dims), dtype))
        }

        Primitive::Reshape { shape: target } => {
            let dst = checked_count(target)?;
            let src = checked_count(shape)?;
            if dst != src {
                return Err(Error::ReshapeElementMismatch {
                    src,
                    dst,
                    dst_shape: target.clone(),
                });
            }
            Ok((target.clone(), dtype))
        }

        Primitive::BroadcastTo { shape: target } => {
            checked_count(target)?;
            let out = Shape::broadcast_shape(shape, target)?;
            if &out != target {
                return Err(Error::ShapeMismatch {
                    expected: target.clone(),
                    got: shape.clone(),
                });
            }
            Ok((out, dtype))
        }

        Primitive::Softmax { dim } | Primitive::LogSoftmax { dim } => {
            check_dim(*dim, shape)?;
            if !dtype.is_float() {
                return Err(Error::msg(format!(
                    "{} requires a float tensor, got {}",
                    primitive.name(),
                    dtype
                )));
            }
            Ok((shape.clone(), dtype))
        }

        Primitive::Cast { dtype: to } => Ok((shape.clone(), *to)),
    }
}

/// Result shape of `lhs @ rhs` over the last two dimensions.
///
/// Leading (batch) dimensions must be equal, or `rhs` must be a plain
/// matrix shared across the batch.
pub fn matmul_shape(lhs: &Shape, rhs: &Shape) -> Result<Shape> {
    let (l, r) = (lhs.dims(), rhs.dims());
    if l.len() < 2 {
        return Err(Error::RankMismatch {
            expected: 2,
            got: l.len(),
        });
    }
    if r.len() < 2 {
        return Err(Error::RankMismatch {
            expected: 2,
            got: r.len(),
        });
    }
    let (m, k1) = (l[l.len() - 2], l[l.len() - 1]);
    let (k2, n) = (r[r.len() - 2], r[r.len() - 1]);
    if k1 != k2 {
        return Err(Error::MatmulShapeMismatch { m, k1, k2, n });
    }
    let lb = &l[..l.len() - 2];
    let rb = &r[..r.len() - 2];
    if !rb.is_empty() && lb != rb {
        return Err(Error::ShapeMismatch {
            expected: lhs.clone(),
            got: rhs.clone(),
        });
    }
    let mut out = lb.to_vec();
    out.push(m);
    out.push(n);
    Ok(Shape::new(out))
}
