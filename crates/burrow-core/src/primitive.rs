// Primitive — The closed vocabulary of traceable operations
//
// Every operation a traced function performs is one of these. The tracer
// records them, the executor evaluates them, the translator maps each one to
// a target dialect, and the envelope gives each a stable opcode. Adding a
// dialect means adding mappings for this list; it never changes the list.
//
// The small enums (UnaryOp, BinaryOp, ...) group variants that share one
// kernel shape, the same way the executor's dispatch groups them.

use std::fmt;

use crate::dtype::DType;
use crate::shape::Shape;

/// Element-wise binary operations (NumPy broadcasting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Element-wise unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Abs,
    Sign,
    Exp,
    Log,
    Sqrt,
    Relu,
    Sigmoid,
    Tanh,
    Square,
}

/// Reduction operations along dimension(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Sum,
    Mean,
    Max,
    Min,
    ArgMax,
    ArgMin,
}

/// Comparison operations (produce u8 masks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl UnaryOp {
    pub const ALL: [UnaryOp; 10] = [
        UnaryOp::Neg,
        UnaryOp::Abs,
        UnaryOp::Sign,
        UnaryOp::Exp,
        UnaryOp::Log,
        UnaryOp::Sqrt,
        UnaryOp::Relu,
        UnaryOp::Sigmoid,
        UnaryOp::Tanh,
        UnaryOp::Square,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Abs => "abs",
            UnaryOp::Sign => "sign",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Relu => "relu",
            UnaryOp::Sigmoid => "sigmoid",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Square => "square",
        }
    }
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 4] = [BinaryOp::Add, BinaryOp::Sub, BinaryOp::Mul, BinaryOp::Div];

    pub fn name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
        }
    }
}

impl CmpOp {
    pub const ALL: [CmpOp; 6] = [CmpOp::Eq, CmpOp::Ne, CmpOp::Gt, CmpOp::Ge, CmpOp::Lt, CmpOp::Le];

    pub fn name(&self) -> &'static str {
        match self {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Gt => "gt",
            CmpOp::Ge => "ge",
            CmpOp::Lt => "lt",
            CmpOp::Le => "le",
        }
    }
}

impl ReduceOp {
    pub fn name(&self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Mean => "mean",
            ReduceOp::Max => "max",
            ReduceOp::Min => "min",
            ReduceOp::ArgMax => "argmax",
            ReduceOp::ArgMin => "argmin",
        }
    }

    /// Arg-reductions return indices and take exactly one dimension.
    pub fn is_arg(&self) -> bool {
        matches!(self, ReduceOp::ArgMax | ReduceOp::ArgMin)
    }
}

/// One traceable operation, with its static parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Unary(UnaryOp),
    Binary(BinaryOp),
    Compare(CmpOp),
    /// Reduce over `dims` (all dimensions when empty).
    Reduce {
        op: ReduceOp,
        dims: Vec<usize>,
        keep_dim: bool,
    },
    /// Matrix product over the last two dimensions.
    Matmul,
    Transpose {
        dim0: usize,
        dim1: usize,
    },
    Reshape {
        shape: Shape,
    },
    BroadcastTo {
        shape: Shape,
    },
    Softmax {
        dim: usize,
    },
    LogSoftmax {
        dim: usize,
    },
    Powf {
        exponent: f64,
    },
    Cast {
        dtype: DType,
    },
}

impl Primitive {
    /// Canonical lowercase name, without parameters.
    pub fn name(&self) -> &'static str {
        match self {
            Primitive::Unary(op) => op.name(),
            Primitive::Binary(op) => op.name(),
            Primitive::Compare(op) => op.name(),
            Primitive::Reduce { op, .. } => op.name(),
            Primitive::Matmul => "matmul",
            Primitive::Transpose { .. } => "transpose",
            Primitive::Reshape { .. } => "reshape",
            Primitive::BroadcastTo { .. } => "broadcast_to",
            Primitive::Softmax { .. } => "softmax",
            Primitive::LogSoftmax { .. } => "log_softmax",
            Primitive::Powf { .. } => "powf",
            Primitive::Cast { .. } => "cast",
        }
    }

    /// Number of tensor operands this primitive takes.
    pub fn arity(&self) -> usize {
        match self {
            Primitive::Binary(_) | Primitive::Compare(_) | Primitive::Matmul => 2,
            _ => 1,
        }
    }

    /// Resolve a command name as written by a traced function.
    ///
    /// Accepts the canonical name and the spellings used by the dialects the
    /// translator emits: `"abs"`, `"torch.abs"`, `"tf.matMul"`,
    /// `"torch.nn.functional.relu"`. Only parameterless primitives can be
    /// named this way.
    pub fn from_command(command: &str) -> Option<Primitive> {
        let base = command.rsplit('.').next().unwrap_or(command);
        let normalized: String = base
            .chars()
            .filter(|c| *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        let prim = match normalized.as_str() {
            "neg" | "negative" => Primitive::Unary(UnaryOp::Neg),
            "abs" => Primitive::Unary(UnaryOp::Abs),
            "sign" => Primitive::Unary(UnaryOp::Sign),
            "exp" => Primitive::Unary(UnaryOp::Exp),
            "log" => Primitive::Unary(UnaryOp::Log),
            "sqrt" => Primitive::Unary(UnaryOp::Sqrt),
            "relu" => Primitive::Unary(UnaryOp::Relu),
            "sigmoid" => Primitive::Unary(UnaryOp::Sigmoid),
            "tanh" => Primitive::Unary(UnaryOp::Tanh),
            "square" => Primitive::Unary(UnaryOp::Square),
            "add" => Primitive::Binary(BinaryOp::Add),
            "sub" | "subtract" => Primitive::Binary(BinaryOp::Sub),
            "mul" | "multiply" => Primitive::Binary(BinaryOp::Mul),
            "div" | "divide" => Primitive::Binary(BinaryOp::Div),
            "eq" | "equal" => Primitive::Compare(CmpOp::Eq),
            "ne" | "notequal" => Primitive::Compare(CmpOp::Ne),
            "gt" | "greater" => Primitive::Compare(CmpOp::Gt),
            "ge" | "greaterequal" => Primitive::Compare(CmpOp::Ge),
            "lt" | "less" => Primitive::Compare(CmpOp::Lt),
            "le" | "lessequal" => Primitive::Compare(CmpOp::Le),
            "matmul" | "mm" => Primitive::Matmul,
            _ => return None,
        };
        Some(prim)
    }

    /// Whether gradients flow through this primitive.
    pub fn is_differentiable(&self) -> bool {
        match self {
            Primitive::Compare(_) | Primitive::Unary(UnaryOp::Sign) => false,
            Primitive::Reduce { op, .. } => !op.is_arg(),
            _ => true,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Reduce { dims, keep_dim, .. } => {
                write!(f, "{}[dims={:?}, keep_dim={}]", self.name(), dims, keep_dim)
            }
            Primitive::Transpose { dim0, dim1 } => write!(f, "transpose[{}, {}]", dim0, dim1),
            Primitive::Reshape { shape } => write!(f, "reshape[{}]", shape),
            Primitive::BroadcastTo { shape } => write!(f, "broadcast_to[{}]", shape),
            Primitive::Softmax { dim } | Primitive::LogSoftmax { dim } => {
                write!(f, "{}[dim={}]", self.name(), dim)
            }
            Primitive::Powf { exponent } => write!(f, "powf[{:?}]", exponent),
            Primitive::Cast { dtype } => write!(f, "cast[{}]", dtype),
            _ => write!(f, "{}", self.name()),
        }
    }
}
