use std::sync::atomic::{AtomicU64, Ordering};

use burrow_core::{
    Backend, DType, Error, Ops, Primitive, Result, Shape, TapeEntry, Tensor, TensorLike,
};

use crate::placeholder::{Operand, Placeholder, PlaceholderId};
use crate::plan::OpRecord;

// Recorder — the recording Ops implementation
//
// While a function is being traced, every value it handles is a Symbol: the
// concrete tensor the backend computed for the example inputs, plus the
// operand that names it in the plan under construction. Each `apply`
// evaluates the primitive concretely (so shapes and dtypes propagate exactly
// as they will at replay time) and appends one tape entry.
//
// A Recorder lives for one `build` call. Symbols carry the id of the trace
// that made them, so a symbol smuggled in from another trace is rejected
// rather than silently wired into the wrong graph.

/// Values with ids at or above this are literals, not placeholders.
const LITERAL_BASE: u64 = 1 << 63;

fn next_trace_id() -> u64 {
    static TRACES: AtomicU64 = AtomicU64::new(1);
    TRACES.fetch_add(1, Ordering::Relaxed)
}

/// A traced value.
#[derive(Debug, Clone)]
pub struct Symbol {
    trace_id: u64,
    operand: Operand,
    value: Tensor,
    value_id: u64,
}

impl Symbol {
    /// The concrete value computed for the example inputs.
    pub fn value(&self) -> &Tensor {
        &self.value
    }

    /// How the plan refers to this value.
    pub fn operand(&self) -> &Operand {
        &self.operand
    }
}

impl TensorLike for Symbol {
    fn value_id(&self) -> u64 {
        self.value_id
    }

    fn shape(&self) -> &Shape {
        self.value.shape()
    }

    fn dtype(&self) -> DType {
        self.value.dtype()
    }
}

/// Records primitive calls while evaluating them on a backend.
pub struct Recorder<'b, B: Backend> {
    backend: &'b B,
    trace_id: u64,
    first_op_id: u32,
    next_id: u32,
    next_literal: u64,
    tape: Vec<TapeEntry<Symbol>>,
}

impl<'b, B: Backend> Recorder<'b, B> {
    /// A fresh trace whose first operation output gets id `first_op_id`.
    pub(crate) fn new(backend: &'b B, first_op_id: u32) -> Self {
        Recorder {
            backend,
            trace_id: next_trace_id(),
            first_op_id,
            next_id: first_op_id,
            next_literal: LITERAL_BASE,
            tape: Vec::new(),
        }
    }

    /// Symbol standing in for a declared input or state slot.
    pub(crate) fn bind(&self, placeholder: &Placeholder, value: Tensor) -> Symbol {
        Symbol {
            trace_id: self.trace_id,
            operand: Operand::Ref(placeholder.id),
            value,
            value_id: placeholder.id.0 as u64,
        }
    }

    /// Fail unless `symbol` was produced by this trace.
    pub(crate) fn check_owned(&self, symbol: &Symbol) -> Result<()> {
        if symbol.trace_id != self.trace_id {
            return Err(Error::UndeclaredSymbol {
                id: symbol.value_id,
            });
        }
        Ok(())
    }

    /// The recorded operations, in trace order.
    pub(crate) fn into_records(self) -> Vec<OpRecord> {
        let first = self.first_op_id;
        self.tape
            .into_iter()
            .enumerate()
            .map(|(i, entry)| {
                let id = PlaceholderId(first + i as u32);
                OpRecord {
                    primitive: entry.primitive,
                    inputs: entry.args.into_iter().map(|s| s.operand).collect(),
                    output: Placeholder::new(
                        id,
                        None,
                        entry.output.value.shape().clone(),
                        entry.output.value.dtype(),
                    ),
                }
            })
            .collect()
    }
}

impl<'b, B: Backend> Ops for Recorder<'b, B> {
    type Value = Symbol;

    fn apply(&mut self, primitive: Primitive, args: &[&Symbol]) -> Result<Symbol> {
        for arg in args {
            self.check_owned(arg)?;
        }
        let values: Vec<&Tensor> = args.iter().map(|s| &s.value).collect();
        let value = self.backend.eval(&primitive, &values)?;

        let id = PlaceholderId(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or_else(|| Error::TracingAborted {
                reason: "too many operations for one plan".to_string(),
            })?;
        log::trace!(
            "trace {}: {} = {} -> {} {}",
            self.trace_id,
            id,
            primitive,
            value.shape(),
            value.dtype()
        );

        let output = Symbol {
            trace_id: self.trace_id,
            operand: Operand::Ref(id),
            value,
            value_id: id.0 as u64,
        };
        self.tape.push(TapeEntry {
            primitive,
            args: args.iter().map(|s| (*s).clone()).collect(),
            output: output.clone(),
        });
        Ok(output)
    }

    fn literal(&mut self, tensor: Tensor) -> Result<Symbol> {
        let value_id = self.next_literal;
        self.next_literal += 1;
        Ok(Symbol {
            trace_id: self.trace_id,
            operand: Operand::Literal(tensor.clone()),
            value: tensor,
            value_id,
        })
    }

    fn tape(&self) -> &[TapeEntry<Symbol>] {
        &self.tape
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_cpu::CpuBackend;

    fn input(recorder: &Recorder<'_, CpuBackend>) -> Symbol {
        let p = Placeholder::new(PlaceholderId(0), Some("x".into()), Shape::from(2), DType::F32);
        recorder.bind(&p, Tensor::ones(2, DType::F32))
    }

    #[test]
    fn test_symbol_from_another_trace_is_rejected() {
        let a = Recorder::new(&CpuBackend, 1);
        let mut b = Recorder::new(&CpuBackend, 1);
        let foreign = input(&a);
        let err = b.abs(&foreign).unwrap_err();
        assert!(matches!(err, Error::UndeclaredSymbol { id: 0 }));
        assert!(b.tape().is_empty());
    }

    #[test]
    fn test_records_get_dense_ids() {
        let mut r = Recorder::new(&CpuBackend, 1);
        let x = input(&r);
        let y = r.neg(&x).unwrap();
        let c = r.scalar(2.0, DType::F32).unwrap();
        let z = r.mul(&y, &c).unwrap();
        assert_eq!(z.operand(), &Operand::Ref(PlaceholderId(2)));
        assert!(c.value_id() >= LITERAL_BASE);

        let records = r.into_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].output.id, PlaceholderId(1));
        assert_eq!(records[1].inputs[0], Operand::Ref(PlaceholderId(1)));
        assert!(matches!(records[1].inputs[1], Operand::Literal(_)));
    }
}
