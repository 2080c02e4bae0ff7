// TensorFlow.js dialect
//
// Emits one JavaScript function over the global `tf` namespace. Parameters
// are the plan inputs followed by the state slots; the function returns the
// output array, or `{ outputs, state }` when the plan replaces its state.
//
// DTYPES: tfjs only has float32, int32 and bool. u32 and i64 map to int32
// and u8 masks map to bool. A cast or literal of f16, bf16 or f64 fails for
// this target. Softmax and log-softmax only exist over the last axis.
//
// Integer division: tf.div floors int32 operands while the executor
// truncates toward zero, so it is emitted as floorDiv plus a correction of
// one when the remainder is non-zero and the operand signs differ. Division
// of bool (u8) tensors has no mapping.

use std::collections::HashMap;

use burrow_core::{BinaryOp, CmpOp, DType, Primitive, ReduceOp, Result, Shape, Tensor, UnaryOp};

use super::{
    dims_list, format_number, sanitize_symbol, unsupported, CodeWriter, Target, TranslateConfig,
    VarNames,
};
use crate::placeholder::{Operand, PlaceholderId};
use crate::plan::{operand_spec, OpRecord, Plan};

const RESERVED: &[&str] = &[
    "arguments", "await", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "do", "else", "enum", "eval", "export", "extends", "false", "finally",
    "for", "function", "if", "implements", "import", "in", "instanceof", "interface", "let", "new",
    "null", "package", "private", "protected", "public", "return", "static", "super", "switch",
    "this", "throw", "true", "try", "typeof", "undefined", "var", "void", "while", "with", "yield",
    "Infinity", "NaN", "tf",
];

pub(crate) fn emit(plan: &Plan, config: &TranslateConfig) -> Result<String> {
    let names = VarNames::new(plan, RESERVED);
    let specs = plan.specs();
    let mut function = sanitize_symbol(config.function_name.as_deref().unwrap_or(plan.name()));
    if RESERVED.contains(&function.as_str()) {
        function.push('_');
    }

    let mut params = Vec::new();
    for p in plan.inputs().iter().chain(plan.state().slots()) {
        params.push(names.get(p.id)?.to_string());
    }

    let mut w = CodeWriter::new(config.indent);
    w.line(&format!("function {}({}) {{", function, params.join(", ")));
    w.indent();
    for op in plan.ops() {
        let expr = op_expr(op, &names, &specs)?;
        let mut line = format!("const {} = {};", names.get(op.output.id)?, expr);
        if config.shape_comments {
            line.push_str(&format!("  // {} {}", op.output.shape, op.output.dtype));
        }
        w.line(&line);
    }

    let outputs = operand_list(plan.outputs(), &names)?;
    match plan.state_outputs() {
        Some(updates) => {
            let state = operand_list(updates, &names)?;
            w.line(&format!("return {{ outputs: [{}], state: [{}] }};", outputs, state));
        }
        None => w.line(&format!("return [{}];", outputs)),
    }
    w.dedent();
    w.line("}");
    Ok(w.finish())
}

fn op_expr(
    op: &OpRecord,
    names: &VarNames,
    specs: &HashMap<PlaceholderId, (Shape, DType)>,
) -> Result<String> {
    let args = op
        .inputs
        .iter()
        .map(|o| operand(o, names))
        .collect::<Result<Vec<String>>>()?;
    let rank = op
        .inputs
        .first()
        .and_then(|o| operand_spec(specs, o))
        .map(|(shape, _)| shape.rank())
        .unwrap_or(0);

    let expr = match &op.primitive {
        Primitive::Unary(u) => format!("tf.{}({})", unary(*u), args[0]),
        Primitive::Binary(BinaryOp::Div) if !op.output.dtype.is_float() => {
            if op.output.dtype == DType::U8 {
                return Err(unsupported(Target::TfJs, "div of u8 tensors"));
            }
            trunc_div(&args[0], &args[1])
        }
        Primitive::Binary(b) => format!("tf.{}({}, {})", binary(*b), args[0], args[1]),
        Primitive::Compare(c) => format!("tf.{}({}, {})", compare(*c), args[0], args[1]),
        Primitive::Reduce { op: r, dims, keep_dim } if r.is_arg() => {
            let call = if *r == ReduceOp::ArgMax { "argMax" } else { "argMin" };
            let dim = dims.first().copied().unwrap_or(0);
            let inner = format!("tf.{}({}, {})", call, args[0], dim);
            if *keep_dim {
                format!("tf.expandDims({}, {})", inner, dim)
            } else {
                inner
            }
        }
        Primitive::Reduce { op: r, dims, keep_dim } => {
            let call = match r {
                ReduceOp::Sum => "sum",
                ReduceOp::Mean => "mean",
                ReduceOp::Max => "max",
                _ => "min",
            };
            format!(
                "tf.{}({}, [{}], {})",
                call,
                args[0],
                axes(dims, rank),
                keep_dim
            )
        }
        Primitive::Matmul => format!("tf.matMul({}, {})", args[0], args[1]),
        Primitive::Transpose { dim0, dim1 } => {
            let mut perm: Vec<usize> = (0..rank).collect();
            perm.swap(*dim0, *dim1);
            let perm: Vec<String> = perm.iter().map(|d| d.to_string()).collect();
            format!("tf.transpose({}, [{}])", args[0], perm.join(", "))
        }
        Primitive::Reshape { shape } => format!("tf.reshape({}, [{}])", args[0], dims_list(shape)),
        Primitive::BroadcastTo { shape } => {
            format!("tf.broadcastTo({}, [{}])", args[0], dims_list(shape))
        }
        Primitive::Softmax { dim } | Primitive::LogSoftmax { dim } => {
            if dim + 1 != rank {
                return Err(unsupported(
                    Target::TfJs,
                    format!("{} over axis {} of a rank-{} tensor", op.primitive.name(), dim, rank),
                ));
            }
            let call = match op.primitive {
                Primitive::Softmax { .. } => "softmax",
                _ => "logSoftmax",
            };
            format!("tf.{}({})", call, args[0])
        }
        Primitive::Powf { exponent } => {
            format!("tf.pow({}, {})", args[0], js_number(*exponent, DType::F64))
        }
        Primitive::Cast { dtype } => format!("tf.cast({}, '{}')", args[0], tf_dtype(*dtype)?),
    };
    Ok(expr)
}

fn unary(op: UnaryOp) -> &'static str {
    match op {
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

fn binary(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "add",
        BinaryOp::Sub => "sub",
        BinaryOp::Mul => "mul",
        BinaryOp::Div => "div",
    }
}

/// Integer division rounding toward zero.
fn trunc_div(a: &str, b: &str) -> String {
    format!(
        "tf.add(tf.floorDiv({a}, {b}), tf.cast(tf.logicalAnd(tf.notEqual(tf.mod({a}, {b}), 0), \
         tf.notEqual(tf.less({a}, 0), tf.less({b}, 0))), 'int32'))",
        a = a,
        b = b
    )
}

fn compare(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "equal",
        CmpOp::Ne => "notEqual",
        CmpOp::Gt => "greater",
        CmpOp::Ge => "greaterEqual",
        CmpOp::Lt => "less",
        CmpOp::Le => "lessEqual",
    }
}

/// Explicit reduction axes; an empty list means every axis.
fn axes(dims: &[usize], rank: usize) -> String {
    let all: Vec<usize>;
    let dims = if dims.is_empty() {
        all = (0..rank).collect();
        &all
    } else {
        dims
    };
    dims.iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn tf_dtype(dtype: DType) -> Result<&'static str> {
    match dtype {
        DType::F32 => Ok("float32"),
        DType::U32 | DType::I64 => Ok("int32"),
        DType::U8 => Ok("bool"),
        other => Err(unsupported(Target::TfJs, format!("{} tensors", other))),
    }
}

fn operand(o: &Operand, names: &VarNames) -> Result<String> {
    match o {
        Operand::Ref(id) => Ok(names.get(*id)?.to_string()),
        Operand::Literal(t) => literal(t),
    }
}

fn operand_list(operands: &[Operand], names: &VarNames) -> Result<String> {
    Ok(operands
        .iter()
        .map(|o| operand(o, names))
        .collect::<Result<Vec<_>>>()?
        .join(", "))
}

fn literal(t: &Tensor) -> Result<String> {
    let dtype = tf_dtype(t.dtype())?;
    let values: Vec<String> = t.values().iter().map(|v| js_number(*v, t.dtype())).collect();
    if t.rank() == 0 {
        return Ok(format!("tf.scalar({}, '{}')", values.join(""), dtype));
    }
    Ok(format!(
        "tf.tensor([{}], [{}], '{}')",
        values.join(", "),
        dims_list(t.shape()),
        dtype
    ))
}

fn js_number(v: f64, dtype: DType) -> String {
    if dtype == DType::U8 {
        return if v != 0.0 { "true" } else { "false" }.to_string();
    }
    if v.is_nan() {
        return "NaN".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    format_number(v, dtype)
}
