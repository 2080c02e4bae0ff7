use std::fmt;

// DType — Element types a plan can declare
//
// Every placeholder, state slot and literal carries a DType. The executor
// stores element values as f64 internally, but every value is rounded to the
// precision of its DType on construction, so a tensor's values are always
// exactly representable in its declared type. That is what lets the tensor
// codec write them back out bit-exactly.
//
//   F16  — 16-bit IEEE half float
//   BF16 — 16-bit brain float
//   F32  — 32-bit float, the default
//   F64  — 64-bit float
//   U8   — unsigned byte; comparison masks use it
//   U32  — unsigned 32-bit int
//   I64  — signed 64-bit int; arg-reductions produce it
//
// I64 RANGE:
//
//   An i64 tensor holds integers in [-(2^53 - 1), 2^53 - 1]. Every integer
//   there has an exact f64, and so does any sum or product that leaves it:
//   a result that would round lands on 2^53 or beyond and is caught. Building
//   a tensor from a value outside the range is an IntegerOutOfRange error,
//   never a silent rounding.

/// Largest integer magnitude an i64 tensor element may hold (2^53 - 1).
pub const MAX_EXACT_INT: i64 = (1 << 53) - 1;

/// Enum of all supported element data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F16,
    BF16,
    F32,
    F64,
    U8,
    U32,
    I64,
}

impl DType {
    /// Every dtype, in tag order.
    pub const ALL: [DType; 7] = [
        DType::F16,
        DType::BF16,
        DType::F32,
        DType::F64,
        DType::U8,
        DType::U32,
        DType::I64,
    ];

    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F16 => 2,
            DType::BF16 => 2,
            DType::F32 => 4,
            DType::F64 => 8,
            DType::U8 => 1,
            DType::U32 => 4,
            DType::I64 => 8,
        }
    }

    /// Whether this dtype is a floating-point type (gradients only flow through these).
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32 | DType::F64)
    }

    /// Round `v` to the nearest value representable in this dtype.
    ///
    /// Integer types truncate toward zero and saturate at their bounds
    /// (for I64, the exact range ±2^53); NaN becomes zero for them.
    pub fn round(&self, v: f64) -> f64 {
        match self {
            DType::F16 => half::f16::from_f64(v).to_f64(),
            DType::BF16 => half::bf16::from_f64(v).to_f64(),
            DType::F32 => v as f32 as f64,
            DType::F64 => v,
            DType::U8 => v as u8 as f64,
            DType::U32 => v as u32 as f64,
            DType::I64 => (v as i64).clamp(-MAX_EXACT_INT, MAX_EXACT_INT) as f64,
        }
    }

    /// Whether `v`, once truncated to this dtype, is held exactly.
    ///
    /// Only I64 can fail: its elements are limited to ±(2^53 - 1). Narrower types
    /// saturate instead.
    pub fn holds_exactly(&self, v: f64) -> bool {
        match self {
            DType::I64 => v.is_nan() || (v as i64).unsigned_abs() <= MAX_EXACT_INT as u64,
            _ => true,
        }
    }

    /// Stable numeric tag used by the envelope.
    pub fn tag(&self) -> u32 {
        match self {
            DType::F16 => 1,
            DType::BF16 => 2,
            DType::F32 => 3,
            DType::F64 => 4,
            DType::U8 => 5,
            DType::U32 => 6,
            DType::I64 => 7,
        }
    }

    /// Inverse of [`DType::tag`].
    pub fn from_tag(tag: u32) -> Option<DType> {
        DType::ALL.iter().copied().find(|d| d.tag() == tag)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::U8 => "u8",
            DType::U32 => "u32",
            DType::I64 => "i64",
        };
        write!(f, "{}", s)
    }
}

// WithDType — bridges Rust element types to DType
//
// Lets callers build tensors from typed slices:
//
//   Tensor::from_slice(&[1.0f32, 2.0], 2)?   // DType::F32

/// Trait implemented by Rust types that can be stored in a tensor.
pub trait WithDType: Copy + Send + Sync + 'static + num_traits::NumCast + fmt::Debug {
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    /// Convert this value to f64.
    fn to_f64(self) -> f64;

    /// Convert to f64 only if the result is exact.
    fn to_f64_exact(self) -> Option<f64> {
        Some(self.to_f64())
    }
}

impl WithDType for f32 {
    const DTYPE: DType = DType::F32;
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl WithDType for f64 {
    const DTYPE: DType = DType::F64;
    fn to_f64(self) -> f64 {
        self
    }
}

impl WithDType for half::f16 {
    const DTYPE: DType = DType::F16;
    fn to_f64(self) -> f64 {
        half::f16::to_f64(self)
    }
}

impl WithDType for half::bf16 {
    const DTYPE: DType = DType::BF16;
    fn to_f64(self) -> f64 {
        half::bf16::to_f64(self)
    }
}

impl WithDType for u8 {
    const DTYPE: DType = DType::U8;
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl WithDType for u32 {
    const DTYPE: DType = DType::U32;
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl WithDType for i64 {
    const DTYPE: DType = DType::I64;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn to_f64_exact(self) -> Option<f64> {
        (self.unsigned_abs() <= MAX_EXACT_INT as u64).then_some(self as f64)
    }
}
