use burrow_core::Tensor;

use super::{format_number, CodeWriter, TranslateConfig};
use crate::placeholder::{Operand, Placeholder};
use crate::plan::Plan;

/// Render the canonical IR as text.
///
/// ```text
/// plan "abs_shift"
///   input %0 x: [2, 2] f32
///   %1 = add(%0, const f32[2]{4.2, 7.3}): [2, 2] f32
///   %2 = abs(%1): [2, 2] f32
///   return %2
/// ```
///
/// Literals are written in full, so two plans have the same listing exactly
/// when they have the same IR. State values are not part of the listing.
pub fn listing(plan: &Plan, config: &TranslateConfig) -> String {
    let mut w = CodeWriter::new(config.indent);
    let name = config.function_name.as_deref().unwrap_or(plan.name());
    w.line(&format!("plan {:?}", name));
    w.indent();

    if let Some(description) = plan.description() {
        w.line(&format!("description {:?}", description));
    }
    if !plan.tags().is_empty() {
        let tags: Vec<String> = plan.tags().iter().map(|t| format!("{:?}", t)).collect();
        w.line(&format!("tags {}", tags.join(", ")));
    }
    for p in plan.inputs() {
        w.line(&format!("input {}", declaration(p)));
    }
    for p in plan.state().slots() {
        w.line(&format!("state {}", declaration(p)));
    }
    for op in plan.ops() {
        let args: Vec<String> = op.inputs.iter().map(operand).collect();
        w.line(&format!(
            "{} = {}({}): {} {}",
            op.output.id,
            op.primitive,
            args.join(", "),
            op.output.shape,
            op.output.dtype
        ));
    }

    let outputs: Vec<String> = plan.outputs().iter().map(operand).collect();
    w.line(&format!("return {}", outputs.join(", ")));
    if let Some(updates) = plan.state_outputs() {
        for (slot, value) in plan.state().slots().iter().zip(updates) {
            w.line(&format!("update {} <- {}", slot.id, operand(value)));
        }
    }
    w.finish()
}

fn declaration(p: &Placeholder) -> String {
    match &p.name {
        Some(name) => format!("{} {}: {} {}", p.id, name, p.shape, p.dtype),
        None => format!("{}: {} {}", p.id, p.shape, p.dtype),
    }
}

fn operand(o: &Operand) -> String {
    match o {
        Operand::Ref(id) => id.to_string(),
        Operand::Literal(t) => literal(t),
    }
}

fn literal(t: &Tensor) -> String {
    let values: Vec<String> = t
        .values()
        .iter()
        .map(|v| format_number(*v, t.dtype()))
        .collect();
    format!("const {}{}{{{}}}", t.dtype(), t.shape(), values.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::DType;

    #[test]
    fn test_literal_rendering() {
        let t = Tensor::from_f64_slice(&[4.2, 7.3], 2, DType::F32).unwrap();
        assert_eq!(literal(&t), "const f32[2]{4.2, 7.3}");
        let s = Tensor::scalar(3.0, DType::I64);
        assert_eq!(literal(&s), "const i64[]{3}");
    }
}
