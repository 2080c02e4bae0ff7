// PyTorch dialect
//
// Emits `import torch` and one Python function. Parameters are the plan
// inputs followed by the state slots; the function returns the output list,
// or `(outputs, state)` when the plan replaces its state.
//
// Comparison masks are converted to uint8 to match the executor, and integer
// division truncates toward zero. u32 has no stable torch dtype and is
// rejected.

use std::collections::HashMap;

use burrow_core::{BinaryOp, CmpOp, DType, Primitive, ReduceOp, Result, Shape, Tensor, UnaryOp};

use super::{
    dims_list, format_number, sanitize_symbol, unsupported, CodeWriter, Target, TranslateConfig,
    VarNames,
};
use crate::placeholder::{Operand, PlaceholderId};
use crate::plan::{operand_spec, OpRecord, Plan};

const RESERVED: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield", "torch",
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

    let mut w = CodeWriter::new(config.indent.max(1));
    w.line("import torch");
    w.line("");
    w.line("");
    w.line(&format!("def {}({}):", function, params.join(", ")));
    w.indent();
    for op in plan.ops() {
        let expr = op_expr(op, &names, &specs)?;
        let mut line = format!("{} = {}", names.get(op.output.id)?, expr);
        if config.shape_comments {
            line.push_str(&format!("  # {} {}", op.output.shape, op.output.dtype));
        }
        w.line(&line);
    }

    let outputs = operand_list(plan.outputs(), &names)?;
    match plan.state_outputs() {
        Some(updates) => {
            let state = operand_list(updates, &names)?;
            w.line(&format!("return [{}], [{}]", outputs, state));
        }
        None => w.line(&format!("return [{}]", outputs)),
    }
    w.dedent();
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
        Primitive::Unary(u) => format!("torch.{}({})", unary(*u), args[0]),
        Primitive::Binary(BinaryOp::Div) if !op.output.dtype.is_float() => {
            format!("torch.div({}, {}, rounding_mode='trunc')", args[0], args[1])
        }
        Primitive::Binary(b) => format!("torch.{}({}, {})", binary(*b), args[0], args[1]),
        Primitive::Compare(c) => format!(
            "torch.{}({}, {}).to(torch.uint8)",
            compare(*c),
            args[0],
            args[1]
        ),
        Primitive::Reduce { op: r, dims, keep_dim } if r.is_arg() => {
            let call = if *r == ReduceOp::ArgMax { "argmax" } else { "argmin" };
            let dim = dims.first().copied().unwrap_or(0);
            format!("torch.{}({}, dim={}, keepdim={})", call, args[0], dim, py_bool(*keep_dim))
        }
        Primitive::Reduce { op: r, dims, keep_dim } => {
            let call = match r {
                ReduceOp::Sum => "sum",
                ReduceOp::Mean => "mean",
                ReduceOp::Max => "amax",
                _ => "amin",
            };
            let all: Vec<usize> = (0..rank).collect();
            let dims = if dims.is_empty() { &all } else { dims };
            let dims: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
            format!(
                "torch.{}({}, dim=[{}], keepdim={})",
                call,
                args[0],
                dims.join(", "),
                py_bool(*keep_dim)
            )
        }
        Primitive::Matmul => format!("torch.matmul({}, {})", args[0], args[1]),
        Primitive::Transpose { dim0, dim1 } => {
            format!("torch.transpose({}, {}, {})", args[0], dim0, dim1)
        }
        Primitive::Reshape { shape } => {
            format!("torch.reshape({}, [{}])", args[0], dims_list(shape))
        }
        Primitive::BroadcastTo { shape } => {
            format!("torch.broadcast_to({}, [{}])", args[0], dims_list(shape))
        }
        Primitive::Softmax { dim } => format!("torch.softmax({}, dim={})", args[0], dim),
        Primitive::LogSoftmax { dim } => format!("torch.log_softmax({}, dim={})", args[0], dim),
        Primitive::Powf { exponent } => {
            format!("torch.pow({}, {})", args[0], py_number(*exponent, DType::F64))
        }
        Primitive::Cast { dtype } => format!("{}.to({})", args[0], torch_dtype(*dtype)?),
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

fn compare(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "eq",
        CmpOp::Ne => "ne",
        CmpOp::Gt => "gt",
        CmpOp::Ge => "ge",
        CmpOp::Lt => "lt",
        CmpOp::Le => "le",
    }
}

fn py_bool(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

fn torch_dtype(dtype: DType) -> Result<&'static str> {
    match dtype {
        DType::F16 => Ok("torch.float16"),
        DType::BF16 => Ok("torch.bfloat16"),
        DType::F32 => Ok("torch.float32"),
        DType::F64 => Ok("torch.float64"),
        DType::U8 => Ok("torch.uint8"),
        DType::I64 => Ok("torch.int64"),
        DType::U32 => Err(unsupported(Target::Torch, "u32 tensors")),
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
    let dtype = torch_dtype(t.dtype())?;
    let values: Vec<String> = t.values().iter().map(|v| py_number(*v, t.dtype())).collect();
    if t.rank() == 0 {
        return Ok(format!("torch.tensor({}, dtype={})", values.join(""), dtype));
    }
    Ok(format!(
        "torch.tensor([{}], dtype={}).reshape([{}])",
        values.join(", "),
        dtype,
        dims_list(t.shape())
    ))
}

fn py_number(v: f64, dtype: DType) -> String {
    if v.is_nan() {
        return "float('nan')".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "float('inf')" } else { "float('-inf')" }.to_string();
    }
    format_number(v, dtype)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_py_number_specials() {
        assert_eq!(py_number(f64::NAN, DType::F32), "float('nan')");
        assert_eq!(py_number(f64::INFINITY, DType::F64), "float('inf')");
        assert_eq!(py_number(-2.0, DType::I64), "-2");
    }

    #[test]
    fn test_literal_keeps_shape() {
        let t = Tensor::from_f64_slice(&[1.0, 2.0, 3.0, 4.0], (2, 2), DType::F32).unwrap();
        assert_eq!(
            literal(&t).unwrap(),
            "torch.tensor([1.0, 2.0, 3.0, 4.0], dtype=torch.float32).reshape([2, 2])"
        );
        assert!(literal(&Tensor::scalar(1.0, DType::U32)).is_err());
    }
}
