// CPU Backend — Reference evaluator for every burrow primitive
//
// CpuBackend implements `burrow_core::Backend` on the host. It is what the
// tracer evaluates against while recording, what plan replay runs on by
// default, and what the eager executor uses in tests.
//
// ARCHITECTURE:
// - Every call first runs `infer` to get the output shape and dtype, so a
//   bad operand surfaces as the same error whether it comes from a live
//   trace, a replay, or plan validation
// - Kernels (kernels.rs) compute in f64 over contiguous buffers
// - The result is rounded to the output dtype when the Tensor is built, so
//   an f32 add is bit-identical to adding two f32 values
// - Matmul and large element-wise ops run on rayon's thread pool
//
// USAGE:
//   let cpu = CpuBackend;
//   let y = cpu.eval(&Primitive::Unary(UnaryOp::Abs), &[&x])?;

mod kernels;

use burrow_core::backend::Backend;
use burrow_core::error::Result;
use burrow_core::infer::{infer, reduce_dims};
use burrow_core::primitive::Primitive;
use burrow_core::tensor::Tensor;

/// The host backend. Stateless; share it freely.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn eval(&self, primitive: &Primitive, args: &[&Tensor]) -> Result<Tensor> {
        let specs: Vec<_> = args.iter().map(|t| (t.shape(), t.dtype())).collect();
        let (out_shape, out_dtype) = infer(primitive, &specs)?;
        let x = args[0];

        let data = match primitive {
            Primitive::Unary(op) => kernels::unary(*op, x.values()),

            Primitive::Binary(op) => {
                let y = args[1];
                kernels::binary(
                    *op,
                    x.values(),
                    x.shape(),
                    y.values(),
                    y.shape(),
                    &out_shape,
                )
            }

            Primitive::Compare(op) => {
                let y = args[1];
                kernels::compare(
                    *op,
                    x.values(),
                    x.shape(),
                    y.values(),
                    y.shape(),
                    &out_shape,
                )
            }

            Primitive::Reduce { op, dims, .. } => {
                let dims = reduce_dims(dims, x.rank())?;
                kernels::reduce(*op, x.values(), x.shape(), &dims)
            }

            Primitive::Matmul => {
                let y = args[1];
                kernels::matmul(x.values(), x.shape(), y.values(), y.shape())
            }

            Primitive::Transpose { dim0, dim1 } => {
                kernels::transpose(x.values(), x.shape(), *dim0, *dim1)
            }

            Primitive::Reshape { .. } | Primitive::Cast { .. } => x.to_f64_vec(),

            Primitive::BroadcastTo { shape } => kernels::broadcast(x.values(), x.shape(), shape),

            Primitive::Softmax { dim } => kernels::softmax(x.values(), x.shape(), *dim, false),

            Primitive::LogSoftmax { dim } => kernels::softmax(x.values(), x.shape(), *dim, true),

            Primitive::Powf { exponent } => kernels::powf(x.values(), *exponent),
        };

        log::trace!("cpu: {} -> {} {}", primitive, out_shape, out_dtype);
        Tensor::from_vec(data, out_shape, out_dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::primitive::{BinaryOp, CmpOp, ReduceOp, UnaryOp};
    use burrow_core::{DType, Error, Shape};

    fn t(data: &[f64], shape: impl Into<Shape>) -> Tensor {
        Tensor::from_f64_slice(data, shape, DType::F32).unwrap()
    }

    #[test]
    fn test_f32_add_is_exact() {
        let a = t(&[0.1, 0.2], 2);
        let b = t(&[0.2, 0.7], 2);
        let c = CpuBackend
            .eval(&Primitive::Binary(BinaryOp::Add), &[&a, &b])
            .unwrap();
        assert_eq!(c.to_f32_vec(), vec![0.1f32 + 0.2f32, 0.2f32 + 0.7f32]);
    }

    #[test]
    fn test_compare_returns_u8_mask() {
        let a = t(&[1.0, -1.0, 0.0], 3);
        let zero = Tensor::scalar(0.0, DType::F32);
        let m = CpuBackend
            .eval(&Primitive::Compare(CmpOp::Gt), &[&a, &zero])
            .unwrap();
        assert_eq!(m.dtype(), DType::U8);
        assert_eq!(m.to_f64_vec(), vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_argmax_outputs_i64() {
        let a = t(&[0.1, 0.9, 0.5, 0.3], (2, 2));
        let idx = CpuBackend
            .eval(
                &Primitive::Reduce {
                    op: ReduceOp::ArgMax,
                    dims: vec![1],
                    keep_dim: false,
                },
                &[&a],
            )
            .unwrap();
        assert_eq!(idx.dtype(), DType::I64);
        assert_eq!(idx.dims(), &[2]);
        assert_eq!(idx.to_f64_vec(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_cast_requantizes() {
        let a = Tensor::from_f64_slice(&[1.7, -2.5], 2, DType::F64).unwrap();
        let c = CpuBackend
            .eval(&Primitive::Cast { dtype: DType::I64 }, &[&a])
            .unwrap();
        assert_eq!(c.to_f64_vec(), vec![1.0, -2.0]);
    }

    #[test]
    fn test_bad_operands_error_instead_of_panicking() {
        let a = t(&[1.0, 2.0], 2);
        let err = CpuBackend
            .eval(&Primitive::Unary(UnaryOp::Abs), &[&a, &a])
            .unwrap_err();
        assert!(matches!(err, Error::Msg(_)));

        let err = CpuBackend
            .eval(&Primitive::Matmul, &[&a, &a])
            .unwrap_err();
        assert!(matches!(err, Error::RankMismatch { .. }));
    }
}
