use std::fmt;

use crate::error::Result;
use crate::primitive::Primitive;
use crate::tensor::Tensor;

// Backend — Abstraction over whatever evaluates primitives
//
// Tracing, eager execution and plan replay all bottom out in the same call:
// "evaluate this primitive on these concrete tensors". The Backend trait is
// that call. The reference implementation is `burrow_cpu::CpuBackend`; a
// backend that only supports part of the vocabulary returns
// `Error::UnsupportedOperation` for the rest.
//
// Backends are shared by reference across threads (one backend can serve many
// concurrent plan executions), hence Send + Sync and `&self` receivers.

/// Evaluates primitives on concrete tensors.
pub trait Backend: Send + Sync + fmt::Debug {
    /// A short name for logs ("cpu").
    fn name(&self) -> &'static str;

    /// Evaluate `primitive` on `args`, producing a new tensor.
    ///
    /// Implementations must fail, not panic, on operands the primitive does
    /// not accept (see [`crate::infer::infer`]).
    fn eval(&self, primitive: &Primitive, args: &[&Tensor]) -> Result<Tensor>;
}

impl<B: Backend + ?Sized> Backend for &B {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn eval(&self, primitive: &Primitive, args: &[&Tensor]) -> Result<Tensor> {
        (**self).eval(primitive, args)
    }
}
