// State — Ordered persistent slots carried across plan executions
//
// A State is the plan's model parameters (or counters, or anything else that
// survives one execution). Slot count, order, shapes and dtypes are fixed
// when the State is declared; later replacements must match them exactly.
//
// ORDER:
//
//   Slot order is the order the caller declared, full stop. Nothing here
//   walks nested structures to discover parameters. A traced function
//   receives the state values in slot order and, if it updates them,
//   returns replacements in the same order.
//
// SYNCHRONIZATION:
//
//   `read` takes &self and `replace` takes &mut self, so the borrow checker
//   already prevents unsynchronized concurrent use. Callers that share one
//   State between workers wrap it in a lock of their choosing.

use std::collections::HashSet;

use burrow_core::{Error, Result, Tensor};

use crate::placeholder::{check_name, Placeholder, PlaceholderId};

/// Ordered persistent slots and their current values.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    slots: Vec<Placeholder>,
    values: Vec<Tensor>,
}

impl State {
    /// Declare unnamed slots, capturing shape and dtype from `initial`.
    pub fn new(initial: Vec<Tensor>) -> Self {
        let slots = initial
            .iter()
            .enumerate()
            .map(|(i, t)| {
                Placeholder::new(PlaceholderId(i as u32), None, t.shape().clone(), t.dtype())
            })
            .collect();
        State {
            slots,
            values: initial,
        }
    }

    /// Declare named slots. Names must be valid and unique.
    pub fn named<S: Into<String>>(initial: Vec<(S, Tensor)>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut slots = Vec::with_capacity(initial.len());
        let mut values = Vec::with_capacity(initial.len());
        for (i, (name, t)) in initial.into_iter().enumerate() {
            let name = name.into();
            check_name(&name)?;
            if !seen.insert(name.clone()) {
                return Err(Error::DuplicateName { name });
            }
            slots.push(Placeholder::new(
                PlaceholderId(i as u32),
                Some(name),
                t.shape().clone(),
                t.dtype(),
            ));
            values.push(t);
        }
        Ok(State { slots, values })
    }

    /// A State with no slots.
    pub fn empty() -> Self {
        State {
            slots: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Build from decoded parts, checking every value against its slot.
    pub(crate) fn from_parts(slots: Vec<Placeholder>, values: Vec<Tensor>) -> Result<Self> {
        check_values(&slots, &values)?;
        Ok(State { slots, values })
    }

    /// The declared slots, in order.
    pub fn slots(&self) -> &[Placeholder] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current values in slot order. Tensors are shared, not copied.
    pub fn read(&self) -> Vec<Tensor> {
        self.values.clone()
    }

    /// Current value of one slot.
    pub fn get(&self, index: usize) -> Option<&Tensor> {
        self.values.get(index)
    }

    /// Replace every slot value at once.
    ///
    /// All replacements are checked before any is stored; on error the
    /// previous values are untouched.
    pub fn replace(&mut self, values: Vec<Tensor>) -> Result<()> {
        check_values(&self.slots, &values)?;
        self.values = values;
        log::debug!("state: replaced {} slot(s)", self.slots.len());
        Ok(())
    }

    /// Renumber the slots to start at `first`.
    pub(crate) fn rebind(&mut self, first: u32) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.id = PlaceholderId(first + i as u32);
        }
    }
}

impl Default for State {
    fn default() -> Self {
        State::empty()
    }
}

fn check_values(slots: &[Placeholder], values: &[Tensor]) -> Result<()> {
    if values.len() != slots.len() {
        return Err(Error::StateShapeMismatch(format!(
            "expected {} slot value(s), got {}",
            slots.len(),
            values.len()
        )));
    }
    for (i, (slot, value)) in slots.iter().zip(values).enumerate() {
        if !slot.accepts(value) {
            return Err(Error::StateShapeMismatch(format!(
                "slot {} is {}, got {} {}",
                i,
                slot.describe(),
                value.shape(),
                value.dtype()
            )));
        }
    }
    Ok(())
}
