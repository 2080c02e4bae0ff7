//! # Burrow
//!
//! Trace a tensor function once into a portable computation plan, then
//! replay it, translate it to another runtime's source code, or ship it as a
//! compact binary envelope.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use burrow::prelude::*;
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `burrow-core` | Tensor, Shape, DType, Primitive vocabulary, Backend and Ops traits, gradients |
//! | `burrow-cpu` | CPU backend: the reference primitive executor, rayon matmul |
//! | `burrow` | Placeholders and state, tracer, plans and replay, translator, codec |
//!
//! ## Modules
//!
//! - [`placeholder`] — Placeholder, PlaceholderId, Operand
//! - [`state`] — ordered persistent slots with atomic replace
//! - [`trace`] — PlanFn, PlanBuilder, the recording executor
//! - [`plan`] — the Plan IR and its validation
//! - [`exec`] — replay with last-use freeing
//! - [`translate`] — Native, TfJs and Torch dialects, TranslationCache
//! - [`codec`] — binary envelope, tensor codec, base64

/// Re-export core types.
pub use burrow_core::{
    Backend, BinaryOp, CmpOp, DType, Eager, Error, Ops, Primitive, ReduceOp, Result, Shape,
    TapeEntry, Tensor, TensorId, TensorLike, UnaryOp, WithDType,
};

/// Re-export CPU backend.
pub use burrow_cpu::CpuBackend;

/// Placeholders — named, shaped, typed symbolic values.
pub mod placeholder;

/// State — persistent slots carried across executions.
pub mod state;

/// Plan — the traced IR.
pub mod plan;

/// Tracer — record a function into a Plan.
pub mod trace;

/// Replay — execute a Plan on concrete inputs.
pub mod exec;

/// Translator — render a Plan for another runtime.
pub mod translate;

/// Codec — Plan to and from a binary envelope.
pub mod codec;

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::codec::{Codec, CodecConfig};
    pub use crate::exec::Execution;
    pub use crate::placeholder::{Operand, Placeholder, PlaceholderId};
    pub use crate::plan::{OpRecord, Plan};
    pub use crate::state::State;
    pub use crate::trace::{build, FnOutput, PlanBuilder, PlanFn, Recorder, Symbol};
    pub use crate::translate::{
        translate, translate_with, Target, TranslateConfig, Translation, TranslationCache,
    };
    pub use crate::{CpuBackend, DType, Eager, Error, Ops, Result, Shape, Tensor, TensorLike};
}
