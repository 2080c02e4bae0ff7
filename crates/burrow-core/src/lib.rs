//! # burrow-core
//!
//! Tensor values, the primitive vocabulary and the execution traits shared by
//! every burrow crate.
//!
//! This crate provides:
//! - [`Tensor`] — immutable n-dimensional array, the value type of plans
//! - [`Shape`] / [`DType`] — shapes and element types
//! - [`Primitive`] — the closed set of operations a plan may contain
//! - [`Backend`] trait — something that evaluates primitives
//! - [`Ops`] trait — what a traced function is written against, with the
//!   [`Eager`] implementation and tape-based autograd ([`Ops::grad`])
//! - [`Error`] — the single error type of the pipeline

pub mod backend;
pub mod backprop;
pub mod dtype;
pub mod error;
pub mod infer;
pub mod ops;
pub mod primitive;
pub mod shape;
pub mod tensor;

pub use backend::Backend;
pub use dtype::{DType, WithDType};
pub use error::{Error, Result};
pub use ops::{Eager, Ops, TapeEntry, TensorLike};
pub use primitive::{BinaryOp, CmpOp, Primitive, ReduceOp, UnaryOp};
pub use shape::Shape;
pub use tensor::{Tensor, TensorId};
