use crate::shape::Shape;

/// All errors that can occur within burrow.
///
/// One enum covers the whole pipeline so every failure reaches the caller as
/// a distinguishable kind: declaration, tracing, state, translation and
/// envelope errors, plus the arithmetic errors raised by the executor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // ── Tensor arithmetic ──
    /// Shape mismatch between two tensors (e.g., trying to add [2,3] + [4,5]).
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Operation requires a specific rank (number of dimensions).
    #[error("rank mismatch: expected rank {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },

    /// DType mismatch between tensors in a binary operation.
    #[error("dtype mismatch: expected {expected:?}, got {got:?}")]
    DTypeMismatch {
        expected: crate::DType,
        got: crate::DType,
    },

    /// Dimension index out of range for the tensor's rank.
    #[error("dimension out of range: dim {dim} for tensor with {rank} dimensions")]
    DimOutOfRange { dim: usize, rank: usize },

    /// Element count mismatch when creating from a vec.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Matrix multiplication dimension mismatch.
    #[error("matmul shape mismatch: [{m}x{k1}] @ [{k2}x{n}], inner dims must match")]
    MatmulShapeMismatch {
        m: usize,
        k1: usize,
        k2: usize,
        n: usize,
    },

    /// Cannot reshape because element counts differ.
    #[error(
        "cannot reshape: source has {src} elements, target shape {dst_shape} has {dst} elements"
    )]
    ReshapeElementMismatch {
        src: usize,
        dst: usize,
        dst_shape: Shape,
    },

    /// A shape's element count does not fit in `usize`.
    #[error("element count of shape {shape} overflows")]
    ElementCountOverflow { shape: Shape },

    /// A value has no exact representation in the tensor's dtype.
    #[error("value {value} is out of the exact range of {dtype}")]
    IntegerOutOfRange { value: String, dtype: crate::DType },

    /// A shape could not be inferred unambiguously (e.g. two `-1` in a reshape).
    #[error("ambiguous shape: {reason}")]
    AmbiguousShape { reason: String },

    // ── Declarations ──
    /// A placeholder name was declared twice in the same plan.
    #[error("duplicate placeholder name '{name}'")]
    DuplicateName { name: String },

    /// A placeholder name is empty or otherwise unusable.
    #[error("invalid placeholder name '{name}'")]
    InvalidName { name: String },

    // ── Tracing ──
    /// The traced function asked for an operation the IR has no primitive for.
    #[error("unsupported operation '{op}': no IR primitive")]
    UnsupportedOperation { op: String },

    /// Tracing stopped before a plan could be produced.
    #[error("tracing aborted: {reason}")]
    TracingAborted { reason: String },

    /// A value that does not belong to the plan being traced or replayed.
    #[error("undeclared symbol {id}")]
    UndeclaredSymbol { id: u64 },

    // ── State and call sites ──
    /// Replacement state does not match the declared slots.
    #[error("state shape mismatch: {0}")]
    StateShapeMismatch(String),

    /// Concrete inputs do not match the plan's declared input placeholders.
    #[error("input mismatch: {0}")]
    InputMismatch(String),

    // ── Translation ──
    /// A primitive has no equivalent in the requested dialect.
    #[error("target '{target}' has no mapping for '{op}'")]
    UnsupportedTargetOperation { target: &'static str, op: String },

    // ── Envelope ──
    /// The byte sequence is not a well-formed envelope.
    #[error("corrupt envelope: {0}")]
    CorruptEnvelope(String),

    /// The envelope was written by a newer schema than this decoder knows.
    #[error("unsupported schema version {found} (this build reads up to {supported})")]
    UnsupportedSchemaVersion { found: u64, supported: u64 },

    /// A required field is absent, or has the wrong wire type.
    #[error("schema field mismatch: {message}.{field}")]
    SchemaFieldMismatch {
        message: &'static str,
        field: &'static str,
    },

    /// The envelope could not be built (size limit or allocation failure).
    #[error("envelope construction failed: {0}")]
    EnvelopeConstruction(String),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }
}

/// Convenience Result type used throughout burrow.
pub type Result<T> = std::result::Result<T, Error>;

/// Early return with a formatted [`Error::Msg`].
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
