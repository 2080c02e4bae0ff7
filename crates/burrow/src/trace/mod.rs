// Tracer — Turn a function over `Ops` into a Plan
//
// The function to trace implements PlanFn: one generic method that receives
// an Ops implementation, the input values and the state values. `build`
// calls it exactly once with a Recorder, so every primitive the function
// applies becomes an OpRecord, in call order, and whatever it returns becomes
// the plan's outputs (and replacement state, if it returns any).
//
// The example inputs only fix the input placeholders' shapes and dtypes and
// feed the concrete evaluation that propagates shapes through the trace.
// They are never baked into the plan.
//
// LIMITATION: tracing follows one concrete execution. A function that
// branches on tensor *values* (rather than shapes) is captured with only the
// branch the example inputs took. Traced functions must not do that.

mod recorder;

pub use recorder::{Recorder, Symbol};

use std::collections::HashSet;

use burrow_core::{Backend, DType, Error, Ops, Result, Shape, Tensor};
use burrow_cpu::CpuBackend;

use crate::placeholder::{check_name, Operand, Placeholder, PlaceholderId};
use crate::plan::{Plan, PlanParts};
use crate::state::State;

/// What a traced function returns: its outputs and, optionally, new values
/// for every state slot (in slot order).
#[derive(Debug, Clone)]
pub struct FnOutput<V> {
    pub outputs: Vec<V>,
    pub state: Option<Vec<V>>,
}

impl<V> FnOutput<V> {
    pub fn new(outputs: Vec<V>) -> Self {
        FnOutput {
            outputs,
            state: None,
        }
    }

    /// Also return replacement state values.
    pub fn with_state(mut self, state: Vec<V>) -> Self {
        self.state = Some(state);
        self
    }
}

/// A function that can be traced into a Plan (and run eagerly).
///
/// ```ignore
/// struct AbsShift;
///
/// impl PlanFn for AbsShift {
///     fn call<O: Ops>(&self, ops: &mut O, inputs: &[O::Value], state: &[O::Value])
///         -> Result<FnOutput<O::Value>>
///     {
///         let y = ops.add(&inputs[0], &state[0])?;
///         Ok(FnOutput::new(vec![ops.abs(&y)?]))
///     }
/// }
/// ```
pub trait PlanFn {
    fn call<O: Ops>(
        &self,
        ops: &mut O,
        inputs: &[O::Value],
        state: &[O::Value],
    ) -> Result<FnOutput<O::Value>>;
}

/// Declares inputs and metadata, then traces a function into a Plan.
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    name: String,
    description: Option<String>,
    tags: Vec<String>,
    inputs: Vec<Placeholder>,
}

impl PlanBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        PlanBuilder {
            name: name.into(),
            description: None,
            tags: Vec::new(),
            inputs: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Declare the next call-time input.
    ///
    /// Fails with [`Error::DuplicateName`] if `name` is already declared, and
    /// with [`Error::InvalidName`] if it is empty or contains whitespace.
    pub fn declare_input(
        &mut self,
        name: impl Into<String>,
        shape: impl Into<Shape>,
        dtype: DType,
    ) -> Result<Placeholder> {
        let name = name.into();
        check_name(&name)?;
        if self.inputs.iter().any(|p| p.name.as_deref() == Some(name.as_str())) {
            return Err(Error::DuplicateName { name });
        }
        let placeholder = Placeholder::new(
            PlaceholderId(self.inputs.len() as u32),
            Some(name),
            shape.into(),
            dtype,
        );
        self.inputs.push(placeholder.clone());
        Ok(placeholder)
    }

    /// Trace `f` on the CPU backend.
    pub fn build<F: PlanFn>(&self, f: &F, example_inputs: &[Tensor], state: &State) -> Result<Plan> {
        self.build_with(&CpuBackend, f, example_inputs, state)
    }

    /// Trace `f`, evaluating concretely on `backend`.
    ///
    /// Each call is an independent trace: nothing recorded by an earlier
    /// call leaks into this one. On any error no plan is produced.
    pub fn build_with<B: Backend, F: PlanFn>(
        &self,
        backend: &B,
        f: &F,
        example_inputs: &[Tensor],
        state: &State,
    ) -> Result<Plan> {
        let inputs = self.bind_inputs(example_inputs)?;
        let mut state = state.clone();
        state.rebind(inputs.len() as u32);
        check_state_names(&inputs, &state)?;

        let first_op_id = (inputs.len() + state.len()) as u32;
        let mut recorder = Recorder::new(backend, first_op_id);
        let input_syms: Vec<Symbol> = inputs
            .iter()
            .zip(example_inputs)
            .map(|(p, t)| recorder.bind(p, t.clone()))
            .collect();
        let state_syms: Vec<Symbol> = state
            .slots()
            .iter()
            .zip(state.read())
            .map(|(p, t)| recorder.bind(p, t))
            .collect();

        let result = f
            .call(&mut recorder, &input_syms, &state_syms)
            .map_err(|e| match e {
                Error::AmbiguousShape { reason } => Error::TracingAborted { reason },
                other => other,
            })?;

        let outputs = result
            .outputs
            .iter()
            .map(|s| recorder.check_owned(s).map(|_| s.operand().clone()))
            .collect::<Result<Vec<Operand>>>()?;
        let state_outputs = match &result.state {
            Some(values) => Some(
                values
                    .iter()
                    .map(|s| recorder.check_owned(s).map(|_| s.operand().clone()))
                    .collect::<Result<Vec<Operand>>>()?,
            ),
            None => None,
        };

        let ops = recorder.into_records();
        log::debug!(
            "traced plan '{}': {} input(s), {} state slot(s), {} op(s), {} output(s)",
            self.name,
            inputs.len(),
            state.len(),
            ops.len(),
            outputs.len()
        );

        Plan::from_parts(PlanParts {
            name: self.name.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            inputs,
            state,
            ops,
            outputs,
            state_outputs,
        })
    }

    /// Input placeholders for this trace: the declared ones (checked against
    /// the examples), or ones inferred from the examples.
    fn bind_inputs(&self, examples: &[Tensor]) -> Result<Vec<Placeholder>> {
        if self.inputs.is_empty() {
            return Ok(examples
                .iter()
                .enumerate()
                .map(|(i, t)| {
                    Placeholder::new(
                        PlaceholderId(i as u32),
                        Some(format!("input_{}", i)),
                        t.shape().clone(),
                        t.dtype(),
                    )
                })
                .collect());
        }
        if examples.len() != self.inputs.len() {
            return Err(Error::InputMismatch(format!(
                "{} input(s) declared, {} example(s) given",
                self.inputs.len(),
                examples.len()
            )));
        }
        for (p, t) in self.inputs.iter().zip(examples) {
            if !p.accepts(t) {
                return Err(Error::InputMismatch(format!(
                    "example for {} is {} {}",
                    p.describe(),
                    t.shape(),
                    t.dtype()
                )));
            }
        }
        Ok(self.inputs.clone())
    }
}

fn check_state_names(inputs: &[Placeholder], state: &State) -> Result<()> {
    let mut seen: HashSet<&str> = inputs.iter().filter_map(|p| p.name.as_deref()).collect();
    for slot in state.slots() {
        if let Some(name) = slot.name.as_deref() {
            if !seen.insert(name) {
                return Err(Error::DuplicateName {
                    name: name.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Trace `f` with inputs inferred from the examples.
pub fn build<F: PlanFn>(
    name: impl Into<String>,
    f: &F,
    example_inputs: &[Tensor],
    state: &State,
) -> Result<Plan> {
    PlanBuilder::new(name).build(f, example_inputs, state)
}
