// Plan — The traced artifact
//
// A Plan is the straight-line IR of one traced function:
//
//   inputs          per-call placeholders, in declared order
//   state           persistent slots with their current values
//   ops             one OpRecord per primitive call, in trace order
//   outputs         what the function returned
//   state_outputs   replacement state values, when the function returned any
//
// plus descriptive metadata (name, description, tags).
//
// INVARIANTS (checked by `validate`):
//
//   - every placeholder id is unique
//   - an operation only references inputs, state slots, or outputs of
//     operations recorded before it (trace order is a topological order)
//   - every operation's recorded output shape/dtype is what its primitive
//     yields for its operands
//   - state outputs, when present, match the slots one to one
//
// The Plan holds only the canonical IR. Translated renderings live in a side
// table (see translate::TranslationCache) and never touch it. The only part
// of a Plan that changes after build is the State's values.

use std::collections::{HashMap, HashSet};
use std::fmt;

use burrow_core::infer::infer;
use burrow_core::{DType, Error, Primitive, Result, Shape};

use crate::placeholder::{Operand, Placeholder, PlaceholderId};
use crate::state::State;

/// One recorded primitive call.
#[derive(Debug, Clone, PartialEq)]
pub struct OpRecord {
    pub primitive: Primitive,
    pub inputs: Vec<Operand>,
    pub output: Placeholder,
}

/// A traced, replayable, translatable, serializable computation.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    name: String,
    description: Option<String>,
    tags: Vec<String>,
    inputs: Vec<Placeholder>,
    state: State,
    ops: Vec<OpRecord>,
    outputs: Vec<Operand>,
    state_outputs: Option<Vec<Operand>>,
}

/// Everything a Plan is made of; used by the tracer and the codec.
#[derive(Debug, Clone)]
pub(crate) struct PlanParts {
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub inputs: Vec<Placeholder>,
    pub state: State,
    pub ops: Vec<OpRecord>,
    pub outputs: Vec<Operand>,
    pub state_outputs: Option<Vec<Operand>>,
}

impl Plan {
    /// Assemble and validate.
    pub(crate) fn from_parts(parts: PlanParts) -> Result<Self> {
        let plan = Plan {
            name: parts.name,
            description: parts.description,
            tags: parts.tags,
            inputs: parts.inputs,
            state: parts.state,
            ops: parts.ops,
            outputs: parts.outputs,
            state_outputs: parts.state_outputs,
        };
        plan.validate()?;
        Ok(plan)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn inputs(&self) -> &[Placeholder] {
        &self.inputs
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// The plan's state, for `replace`. The IR itself stays immutable.
    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    pub fn ops(&self) -> &[OpRecord] {
        &self.ops
    }

    pub fn outputs(&self) -> &[Operand] {
        &self.outputs
    }

    pub fn state_outputs(&self) -> Option<&[Operand]> {
        self.state_outputs.as_deref()
    }

    /// Whether executing the plan yields replacement state.
    pub fn updates_state(&self) -> bool {
        self.state_outputs.is_some()
    }

    pub fn input_shapes(&self) -> Vec<Shape> {
        self.inputs.iter().map(|p| p.shape.clone()).collect()
    }

    pub fn output_shapes(&self) -> Vec<Shape> {
        let specs = self.specs();
        self.outputs
            .iter()
            .filter_map(|o| operand_spec(&specs, o).map(|(s, _)| s))
            .collect()
    }

    /// Shape and dtype of every placeholder in the plan, keyed by id.
    pub(crate) fn specs(&self) -> HashMap<PlaceholderId, (Shape, DType)> {
        self.inputs
            .iter()
            .chain(self.state.slots())
            .chain(self.ops.iter().map(|op| &op.output))
            .map(|p| (p.id, (p.shape.clone(), p.dtype)))
            .collect()
    }

    /// Find a placeholder (input, slot or op output) by id.
    pub fn placeholder(&self, id: PlaceholderId) -> Option<&Placeholder> {
        self.inputs
            .iter()
            .chain(self.state.slots())
            .chain(self.ops.iter().map(|op| &op.output))
            .find(|p| p.id == id)
    }

    /// Check the structural invariants listed at the top of this module.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for p in self.inputs.iter().chain(self.state.slots()) {
            if let Some(name) = &p.name {
                crate::placeholder::check_name(name)?;
                if !names.insert(name.as_str()) {
                    return Err(Error::DuplicateName { name: name.clone() });
                }
            }
        }

        let mut known: HashMap<PlaceholderId, (Shape, DType)> = HashMap::new();
        for p in self.inputs.iter().chain(self.state.slots()) {
            if !ids.insert(p.id) {
                return Err(Error::msg(format!("placeholder id {} declared twice", p.id)));
            }
            known.insert(p.id, (p.shape.clone(), p.dtype));
        }

        for (i, op) in self.ops.iter().enumerate() {
            let mut args = Vec::with_capacity(op.inputs.len());
            for operand in &op.inputs {
                match operand_spec(&known, operand) {
                    Some(spec) => args.push(spec),
                    None => {
                        return Err(Error::UndeclaredSymbol {
                            id: operand.as_ref_id().map(|id| id.0 as u64).unwrap_or(0),
                        })
                    }
                }
            }
            let arg_refs: Vec<(&Shape, DType)> = args.iter().map(|(s, d)| (s, *d)).collect();
            let (shape, dtype) = infer(&op.primitive, &arg_refs).map_err(|e| {
                Error::msg(format!("operation {} ({}): {}", i, op.primitive, e))
            })?;
            if shape != op.output.shape {
                return Err(Error::ShapeMismatch {
                    expected: shape,
                    got: op.output.shape.clone(),
                });
            }
            if dtype != op.output.dtype {
                return Err(Error::DTypeMismatch {
                    expected: dtype,
                    got: op.output.dtype,
                });
            }
            if !ids.insert(op.output.id) {
                return Err(Error::msg(format!(
                    "placeholder id {} declared twice",
                    op.output.id
                )));
            }
            known.insert(op.output.id, (shape, dtype));
        }

        for operand in &self.outputs {
            if operand_spec(&known, operand).is_none() {
                return Err(Error::UndeclaredSymbol {
                    id: operand.as_ref_id().map(|id| id.0 as u64).unwrap_or(0),
                });
            }
        }

        if let Some(state_outputs) = &self.state_outputs {
            if state_outputs.len() != self.state.len() {
                return Err(Error::StateShapeMismatch(format!(
                    "plan returns {} state value(s) for {} slot(s)",
                    state_outputs.len(),
                    self.state.len()
                )));
            }
            for (slot, operand) in self.state.slots().iter().zip(state_outputs) {
                match operand_spec(&known, operand) {
                    Some((shape, dtype)) if shape == slot.shape && dtype == slot.dtype => {}
                    Some((shape, dtype)) => {
                        return Err(Error::StateShapeMismatch(format!(
                            "slot {} updated with {} {}",
                            slot.describe(),
                            shape,
                            dtype
                        )))
                    }
                    None => {
                        return Err(Error::UndeclaredSymbol {
                            id: operand.as_ref_id().map(|id| id.0 as u64).unwrap_or(0),
                        })
                    }
                }
            }
        }
        Ok(())
    }
}

/// Shape and dtype of an operand, if it refers to something in `specs`.
pub(crate) fn operand_spec(
    specs: &HashMap<PlaceholderId, (Shape, DType)>,
    operand: &Operand,
) -> Option<(Shape, DType)> {
    match operand {
        Operand::Ref(id) => specs.get(id).cloned(),
        Operand::Literal(t) => Some((t.shape().clone(), t.dtype())),
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::translate::native::listing(
            self,
            &crate::translate::TranslateConfig::default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::UnaryOp;

    fn spec(id: u32) -> Placeholder {
        Placeholder::new(PlaceholderId(id), None, Shape::from(2), DType::F32)
    }

    fn neg(arg: u32, out: u32) -> OpRecord {
        OpRecord {
            primitive: Primitive::Unary(UnaryOp::Neg),
            inputs: vec![Operand::Ref(PlaceholderId(arg))],
            output: spec(out),
        }
    }

    fn parts(ops: Vec<OpRecord>, output: u32) -> PlanParts {
        PlanParts {
            name: "p".to_string(),
            description: None,
            tags: Vec::new(),
            inputs: vec![spec(0)],
            state: State::empty(),
            ops,
            outputs: vec![Operand::Ref(PlaceholderId(output))],
            state_outputs: None,
        }
    }

    #[test]
    fn test_valid_chain() {
        let plan = Plan::from_parts(parts(vec![neg(0, 1), neg(1, 2)], 2)).unwrap();
        assert_eq!(plan.ops().len(), 2);
    }

    #[test]
    fn test_forward_reference_rejected() {
        // %1 reads %2 before the operation producing it
        let err = Plan::from_parts(parts(vec![neg(2, 1), neg(0, 2)], 1)).unwrap_err();
        assert!(matches!(err, Error::UndeclaredSymbol { id: 2 }));
    }

    #[test]
    fn test_undeclared_reference_rejected() {
        let err = Plan::from_parts(parts(vec![neg(9, 1)], 1)).unwrap_err();
        assert!(matches!(err, Error::UndeclaredSymbol { id: 9 }));

        let err = Plan::from_parts(parts(vec![neg(0, 1)], 7)).unwrap_err();
        assert!(matches!(err, Error::UndeclaredSymbol { id: 7 }));
    }

    #[test]
    fn test_self_reference_rejected() {
        let err = Plan::from_parts(parts(vec![neg(1, 1)], 1)).unwrap_err();
        assert!(matches!(err, Error::UndeclaredSymbol { id: 1 }));
    }
}
