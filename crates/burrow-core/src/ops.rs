// Ops — The interface a traced function is written against
//
// A plan's function body is ordinary Rust code generic over `O: Ops`. It
// never touches kernels directly; every tensor operation goes through
// `Ops::apply`. That is what lets the same function body run three ways:
//
//   Eager<B>      — evaluate immediately on a backend (values are Tensors)
//   Recorder      — evaluate on a backend AND record each primitive into a
//                   plan (values are symbols that remember where they came
//                   from); lives in the `burrow` crate
//   plan replay   — not an Ops at all; the executor walks recorded ops
//
// Every implementation keeps a tape of the primitives it applied. The tape is
// what reverse-mode differentiation (`Ops::grad`) walks; gradient
// computations are themselves applied through `Ops`, so under a Recorder the
// backward pass lands in the plan as ordinary operations.

use std::fmt;

use crate::backend::Backend;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::primitive::{BinaryOp, CmpOp, Primitive, ReduceOp, UnaryOp};
use crate::shape::Shape;
use crate::tensor::Tensor;

/// A value an [`Ops`] implementation hands back to the traced function.
pub trait TensorLike: Clone + fmt::Debug {
    /// Identity of this value within its Ops context.
    fn value_id(&self) -> u64;

    fn shape(&self) -> &Shape;

    fn dtype(&self) -> DType;

    fn dims(&self) -> &[usize] {
        self.shape().dims()
    }

    fn rank(&self) -> usize {
        self.shape().rank()
    }
}

impl TensorLike for Tensor {
    fn value_id(&self) -> u64 {
        self.id().as_u64()
    }

    fn shape(&self) -> &Shape {
        Tensor::shape(self)
    }

    fn dtype(&self) -> DType {
        Tensor::dtype(self)
    }
}

/// One applied primitive: its operands and its result.
#[derive(Debug, Clone)]
pub struct TapeEntry<V> {
    pub primitive: Primitive,
    pub args: Vec<V>,
    pub output: V,
}

/// Tensor operations available to a traced function.
///
/// Implementors provide [`apply`](Ops::apply), [`literal`](Ops::literal) and
/// [`tape`](Ops::tape); everything else is a convenience layered on those.
pub trait Ops {
    type Value: TensorLike;

    /// Apply one primitive.
    fn apply(&mut self, primitive: Primitive, args: &[&Self::Value]) -> Result<Self::Value>;

    /// Bring a concrete tensor in as a value (a constant).
    fn literal(&mut self, tensor: Tensor) -> Result<Self::Value>;

    /// The primitives applied so far, in order.
    fn tape(&self) -> &[TapeEntry<Self::Value>];

    //  Named commands

    /// Apply a primitive by name, as in `ops.call("torch.abs", &[&x])`.
    ///
    /// Fails with [`Error::UnsupportedOperation`] when the name does not map
    /// to a parameterless primitive.
    fn call(&mut self, command: &str, args: &[&Self::Value]) -> Result<Self::Value> {
        let primitive =
            Primitive::from_command(command).ok_or_else(|| Error::UnsupportedOperation {
                op: command.to_string(),
            })?;
        self.apply(primitive, args)
    }

    //  Element-wise

    fn unary(&mut self, op: UnaryOp, x: &Self::Value) -> Result<Self::Value> {
        self.apply(Primitive::Unary(op), &[x])
    }

    fn binary(&mut self, op: BinaryOp, a: &Self::Value, b: &Self::Value) -> Result<Self::Value> {
        self.apply(Primitive::Binary(op), &[a, b])
    }

    fn compare(&mut self, op: CmpOp, a: &Self::Value, b: &Self::Value) -> Result<Self::Value> {
        self.apply(Primitive::Compare(op), &[a, b])
    }

    fn neg(&mut self, x: &Self::Value) -> Result<Self::Value> {
        self.unary(UnaryOp::Neg, x)
    }

    fn abs(&mut self, x: &Self::Value) -> Result<Self::Value> {
        self.unary(UnaryOp::Abs, x)
    }

    fn sign(&mut self, x: &Self::Value) -> Result<Self::Value> {
        self.unary(UnaryOp::Sign, x)
    }

    fn exp(&mut self, x: &Self::Value) -> Result<Self::Value> {
        self.unary(UnaryOp::Exp, x)
    }

    fn log(&mut self, x: &Self::Value) -> Result<Self::Value> {
        self.unary(UnaryOp::Log, x)
    }

    fn sqrt(&mut self, x: &Self::Value) -> Result<Self::Value> {
        self.unary(UnaryOp::Sqrt, x)
    }

    fn relu(&mut self, x: &Self::Value) -> Result<Self::Value> {
        self.unary(UnaryOp::Relu, x)
    }

    fn sigmoid(&mut self, x: &Self::Value) -> Result<Self::Value> {
        self.unary(UnaryOp::Sigmoid, x)
    }

    fn tanh(&mut self, x: &Self::Value) -> Result<Self::Value> {
        self.unary(UnaryOp::Tanh, x)
    }

    fn square(&mut self, x: &Self::Value) -> Result<Self::Value> {
        self.unary(UnaryOp::Square, x)
    }

    fn add(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value> {
        self.binary(BinaryOp::Add, a, b)
    }

    fn sub(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value> {
        self.binary(BinaryOp::Sub, a, b)
    }

    fn mul(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value> {
        self.binary(BinaryOp::Mul, a, b)
    }

    fn div(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value> {
        self.binary(BinaryOp::Div, a, b)
    }

    fn eq(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value> {
        self.compare(CmpOp::Eq, a, b)
    }

    fn gt(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value> {
        self.compare(CmpOp::Gt, a, b)
    }

    fn lt(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value> {
        self.compare(CmpOp::Lt, a, b)
    }

    fn powf(&mut self, x: &Self::Value, exponent: f64) -> Result<Self::Value> {
        self.apply(Primitive::Powf { exponent }, &[x])
    }

    fn cast(&mut self, x: &Self::Value, dtype: DType) -> Result<Self::Value> {
        self.apply(Primitive::Cast { dtype }, &[x])
    }

    //  Constants

    /// A rank-0 constant.
    fn scalar(&mut self, value: f64, dtype: DType) -> Result<Self::Value> {
        self.literal(Tensor::scalar(value, dtype))
    }

    /// `x + value`, with `value` taken in `x`'s dtype.
    fn add_scalar(&mut self, x: &Self::Value, value: f64) -> Result<Self::Value> {
        let s = self.scalar(value, x.dtype())?;
        self.add(x, &s)
    }

    /// `x * value`, with `value` taken in `x`'s dtype.
    fn mul_scalar(&mut self, x: &Self::Value, value: f64) -> Result<Self::Value> {
        let s = self.scalar(value, x.dtype())?;
        self.mul(x, &s)
    }

    //  Shape

    fn matmul(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value> {
        self.apply(Primitive::Matmul, &[a, b])
    }

    fn transpose(&mut self, x: &Self::Value, dim0: usize, dim1: usize) -> Result<Self::Value> {
        self.apply(Primitive::Transpose { dim0, dim1 }, &[x])
    }

    /// Swap the last two dimensions.
    fn t(&mut self, x: &Self::Value) -> Result<Self::Value> {
        let rank = x.rank();
        if rank < 2 {
            return Err(Error::RankMismatch {
                expected: 2,
                got: rank,
            });
        }
        self.transpose(x, rank - 2, rank - 1)
    }

    /// Reshape with at most one `-1` wildcard. A request that cannot be
    /// resolved fails with [`Error::AmbiguousShape`].
    fn reshape(&mut self, x: &Self::Value, dims: &[isize]) -> Result<Self::Value> {
        let shape = x.shape().resolve_reshape(dims)?;
        self.reshape_to(x, &shape)
    }

    fn reshape_to(&mut self, x: &Self::Value, shape: &Shape) -> Result<Self::Value> {
        self.apply(
            Primitive::Reshape {
                shape: shape.clone(),
            },
            &[x],
        )
    }

    fn broadcast_to(&mut self, x: &Self::Value, shape: &Shape) -> Result<Self::Value> {
        self.apply(
            Primitive::BroadcastTo {
                shape: shape.clone(),
            },
            &[x],
        )
    }

    //  Reductions

    fn reduce(
        &mut self,
        op: ReduceOp,
        x: &Self::Value,
        dims: &[usize],
        keep_dim: bool,
    ) -> Result<Self::Value> {
        self.apply(
            Primitive::Reduce {
                op,
                dims: dims.to_vec(),
                keep_dim,
            },
            &[x],
        )
    }

    fn sum(&mut self, x: &Self::Value, dims: &[usize], keep_dim: bool) -> Result<Self::Value> {
        self.reduce(ReduceOp::Sum, x, dims, keep_dim)
    }

    /// Sum of every element, as a scalar.
    fn sum_all(&mut self, x: &Self::Value) -> Result<Self::Value> {
        self.reduce(ReduceOp::Sum, x, &[], false)
    }

    fn mean(&mut self, x: &Self::Value, dims: &[usize], keep_dim: bool) -> Result<Self::Value> {
        self.reduce(ReduceOp::Mean, x, dims, keep_dim)
    }

    fn mean_all(&mut self, x: &Self::Value) -> Result<Self::Value> {
        self.reduce(ReduceOp::Mean, x, &[], false)
    }

    fn max(&mut self, x: &Self::Value, dims: &[usize], keep_dim: bool) -> Result<Self::Value> {
        self.reduce(ReduceOp::Max, x, dims, keep_dim)
    }

    fn max_all(&mut self, x: &Self::Value) -> Result<Self::Value> {
        self.reduce(ReduceOp::Max, x, &[], false)
    }

    fn min(&mut self, x: &Self::Value, dims: &[usize], keep_dim: bool) -> Result<Self::Value> {
        self.reduce(ReduceOp::Min, x, dims, keep_dim)
    }

    fn argmax(&mut self, x: &Self::Value, dim: usize, keep_dim: bool) -> Result<Self::Value> {
        self.reduce(ReduceOp::ArgMax, x, &[dim], keep_dim)
    }

    fn argmin(&mut self, x: &Self::Value, dim: usize, keep_dim: bool) -> Result<Self::Value> {
        self.reduce(ReduceOp::ArgMin, x, &[dim], keep_dim)
    }

    fn softmax(&mut self, x: &Self::Value, dim: usize) -> Result<Self::Value> {
        self.apply(Primitive::Softmax { dim }, &[x])
    }

    fn log_softmax(&mut self, x: &Self::Value, dim: usize) -> Result<Self::Value> {
        self.apply(Primitive::LogSoftmax { dim }, &[x])
    }

    //  Autograd

    /// Gradients of the one-element `loss` with respect to each of `wrt`.
    ///
    /// Values `loss` does not depend on get a zero gradient.
    fn grad(&mut self, loss: &Self::Value, wrt: &[&Self::Value]) -> Result<Vec<Self::Value>> {
        crate::backprop::grad(self, loss, wrt)
    }
}

// Eager — run a function body immediately
//
// The Ops implementation for plain computation: each primitive is evaluated
// on the backend as soon as it is applied. The tape makes `grad` work; call
// `clear_tape` between independent computations to release the tensors it
// holds.

/// Immediate-mode [`Ops`] over a backend.
pub struct Eager<B: Backend> {
    backend: B,
    tape: Vec<TapeEntry<Tensor>>,
}

impl<B: Backend> Eager<B> {
    pub fn new(backend: B) -> Self {
        Eager {
            backend,
            tape: Vec::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Forget every recorded primitive.
    pub fn clear_tape(&mut self) {
        self.tape.clear();
    }
}

impl<B: Backend> Ops for Eager<B> {
    type Value = Tensor;

    fn apply(&mut self, primitive: Primitive, args: &[&Tensor]) -> Result<Tensor> {
        let output = self.backend.eval(&primitive, args)?;
        self.tape.push(TapeEntry {
            primitive,
            args: args.iter().map(|t| (*t).clone()).collect(),
            output: output.clone(),
        });
        Ok(output)
    }

    fn literal(&mut self, tensor: Tensor) -> Result<Tensor> {
        Ok(tensor)
    }

    fn tape(&self) -> &[TapeEntry<Tensor>] {
        &self.tape
    }
}
