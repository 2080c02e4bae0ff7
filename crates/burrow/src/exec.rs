// Replay — Execute a Plan on concrete inputs
//
// Walks the recorded operations in trace order, evaluating each on a
// Backend. Replay never consults translated text; it always runs the
// canonical IR on the native primitive executor.
//
// MEMORY PLANNING:
//
//   Before running, replay computes each value's last consumer. Once an
//   operation has run, any operand whose last use it was is dropped, so peak
//   memory follows the live set rather than the whole trace. Plan outputs
//   and state outputs are pinned until the end.
//
// STATE:
//
//   `execute` reads the plan's state but never writes it. The caller decides
//   whether to adopt the returned state (`Plan::step` does both at once).

use std::collections::HashMap;

use burrow_core::{Backend, Error, Result, Tensor};
use burrow_cpu::CpuBackend;

use crate::placeholder::{Operand, PlaceholderId};
use crate::plan::Plan;

/// The result of one plan execution.
#[derive(Debug, Clone)]
pub struct Execution {
    /// The plan's outputs, in declared order.
    pub outputs: Vec<Tensor>,
    /// Replacement state values, when the plan produces them.
    pub state: Option<Vec<Tensor>>,
}

impl Execution {
    /// The first (or only) output.
    pub fn output(&self) -> Option<&Tensor> {
        self.outputs.first()
    }
}

impl Plan {
    /// Execute on the CPU backend with the plan's current state.
    pub fn execute(&self, inputs: &[Tensor]) -> Result<Execution> {
        self.execute_with(&CpuBackend, inputs)
    }

    /// Execute on `backend` with the plan's current state.
    pub fn execute_with<B: Backend>(&self, backend: &B, inputs: &[Tensor]) -> Result<Execution> {
        let state = self.state().read();
        self.execute_with_state(backend, inputs, &state)
    }

    /// Execute on `backend` with explicitly supplied state values.
    pub fn execute_with_state<B: Backend>(
        &self,
        backend: &B,
        inputs: &[Tensor],
        state: &[Tensor],
    ) -> Result<Execution> {
        self.check_inputs(inputs)?;
        self.check_state(state)?;

        let last_use = self.last_uses();
        let mut values: HashMap<PlaceholderId, Tensor> = HashMap::new();
        for (p, t) in self.inputs().iter().zip(inputs) {
            values.insert(p.id, t.clone());
        }
        for (p, t) in self.state().slots().iter().zip(state) {
            values.insert(p.id, t.clone());
        }

        let mut peak = values.len();
        for (i, op) in self.ops().iter().enumerate() {
            let args = op
                .inputs
                .iter()
                .map(|operand| resolve(&values, operand))
                .collect::<Result<Vec<Tensor>>>()?;
            let arg_refs: Vec<&Tensor> = args.iter().collect();
            let out = backend.eval(&op.primitive, &arg_refs)?;
            log::trace!("replay: {} = {}", op.output.id, op.primitive);
            values.insert(op.output.id, out);

            for operand in &op.inputs {
                if let Operand::Ref(id) = operand {
                    if last_use.get(id) == Some(&i) {
                        values.remove(id);
                    }
                }
            }
            peak = peak.max(values.len());
        }

        let outputs = self
            .outputs()
            .iter()
            .map(|o| resolve(&values, o))
            .collect::<Result<Vec<_>>>()?;
        let state = match self.state_outputs() {
            Some(operands) => Some(
                operands
                    .iter()
                    .map(|o| resolve(&values, o))
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };
        log::debug!(
            "executed plan '{}' on {}: {} op(s), peak {} live value(s)",
            self.name(),
            backend.name(),
            self.ops().len(),
            peak
        );
        Ok(Execution { outputs, state })
    }

    /// Execute with the current state, then adopt the returned state.
    ///
    /// If the state replacement fails, the previous state is kept.
    pub fn step(&mut self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let Execution { outputs, state } = self.execute(inputs)?;
        if let Some(state) = state {
            self.state_mut().replace(state)?;
        }
        Ok(outputs)
    }

    fn check_inputs(&self, inputs: &[Tensor]) -> Result<()> {
        if inputs.len() != self.inputs().len() {
            return Err(Error::InputMismatch(format!(
                "plan '{}' takes {} input(s), got {}",
                self.name(),
                self.inputs().len(),
                inputs.len()
            )));
        }
        for (p, t) in self.inputs().iter().zip(inputs) {
            if !p.accepts(t) {
                return Err(Error::InputMismatch(format!(
                    "input {} got {} {}",
                    p.describe(),
                    t.shape(),
                    t.dtype()
                )));
            }
        }
        Ok(())
    }

    fn check_state(&self, state: &[Tensor]) -> Result<()> {
        let slots = self.state().slots();
        if state.len() != slots.len() {
            return Err(Error::StateShapeMismatch(format!(
                "plan '{}' has {} state slot(s), got {} value(s)",
                self.name(),
                slots.len(),
                state.len()
            )));
        }
        for (p, t) in slots.iter().zip(state) {
            if !p.accepts(t) {
                return Err(Error::StateShapeMismatch(format!(
                    "slot {} got {} {}",
                    p.describe(),
                    t.shape(),
                    t.dtype()
                )));
            }
        }
        Ok(())
    }

    /// Index of the last operation reading each placeholder. Values that the
    /// plan returns never appear, so they are never freed early.
    fn last_uses(&self) -> HashMap<PlaceholderId, usize> {
        let mut last = HashMap::new();
        for (i, op) in self.ops().iter().enumerate() {
            for id in op.inputs.iter().filter_map(Operand::as_ref_id) {
                last.insert(id, i);
            }
        }
        let pinned = self
            .outputs()
            .iter()
            .chain(self.state_outputs().unwrap_or(&[]))
            .filter_map(Operand::as_ref_id);
        for id in pinned {
            last.remove(&id);
        }
        last
    }
}

fn resolve(values: &HashMap<PlaceholderId, Tensor>, operand: &Operand) -> Result<Tensor> {
    match operand {
        Operand::Ref(id) => values.get(id).cloned().ok_or(Error::UndeclaredSymbol {
            id: id.0 as u64,
        }),
        Operand::Literal(t) => Ok(t.clone()),
    }
}
