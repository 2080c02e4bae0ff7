// Backpropagation — Reverse-mode automatic differentiation over a tape
//
// HOW IT WORKS:
//
//   1. Every Ops implementation records the primitives it applies, in order,
//      on its tape. The tape is already a topological order: each entry's
//      operands were produced by earlier entries (or are inputs/literals).
//
//   2. grad() snapshots the tape, seeds grad(loss) = 1, and walks the
//      snapshot in reverse. For each entry whose output has a gradient, it
//      applies the chain rule and accumulates the contributions into the
//      operands' gradients.
//
//   3. Every gradient computation goes back through Ops. Under eager
//      execution that computes numbers; under tracing it records the
//      backward pass into the plan like any other operation.
//
// PRUNING:
//
//   Before the walk, a forward pass marks which values depend on any of the
//   `wrt` values. Contributions are only computed for operands on such a
//   path, so a traced training step does not carry backward operations for
//   its data inputs.
//
// GRADIENT RULES (g = upstream gradient, y = entry output):
//
//   Add:         ga += g,            gb += g
//   Sub:         ga += g,            gb += -g
//   Mul:         ga += g * b,        gb += g * a
//   Div:         ga += g / b,        gb += -(g * y) / b
//   Matmul:      ga += g @ bᵀ,       gb += aᵀ @ g
//   Abs:         g * sign(x)         Exp:      g * y
//   Log:         g / x               Sqrt:     0.5 * g / y
//   Relu:        g * (x > 0)         Sigmoid:  g * y * (1 - y)
//   Tanh:        g * (1 - y²)        Square:   g * 2x
//   Sum / Mean:  broadcast g back (Mean divides by the reduced count)
//   Max / Min:   g routed to every position equal to the extremum
//   Softmax:     y * (g - Σ g·y)     LogSoftmax: g - exp(y) * Σ g
//   Powf:        g * n * x^(n-1)
//   Reshape, Transpose, BroadcastTo and Cast map g back to the operand.
//
// Binary gradients are reduced back to the operand's shape when the forward
// op broadcast it (see sum_to).
//
// ACCUMULATION: a value used by several entries receives the sum of their
// contributions.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::infer::reduce_dims;
use crate::ops::{Ops, TapeEntry, TensorLike};
use crate::primitive::{BinaryOp, Primitive, ReduceOp, UnaryOp};
use crate::shape::Shape;
use crate::tensor::Tensor;

/// Gradients of the one-element `loss` with respect to each of `wrt`.
pub fn grad<O: Ops + ?Sized>(
    ops: &mut O,
    loss: &O::Value,
    wrt: &[&O::Value],
) -> Result<Vec<O::Value>> {
    if loss.shape().elem_count() != 1 {
        return Err(Error::msg(format!(
            "grad requires a one-element loss, got shape {}",
            loss.shape()
        )));
    }
    if !loss.dtype().is_float() {
        return Err(Error::msg(format!(
            "grad requires a float loss, got {}",
            loss.dtype()
        )));
    }

    let tape: Vec<TapeEntry<O::Value>> = ops.tape().to_vec();
    let on_path = dependents(&tape, wrt);
    log::debug!(
        "backprop: {} tape entries, {} on a path from {} wrt value(s)",
        tape.len(),
        on_path.len(),
        wrt.len()
    );

    let mut grads: HashMap<u64, O::Value> = HashMap::new();
    let seed = ops.literal(Tensor::ones(loss.shape(), loss.dtype()))?;
    grads.insert(loss.value_id(), seed);

    for entry in tape.iter().rev() {
        let g = match grads.get(&entry.output.value_id()) {
            Some(g) => g.clone(),
            None => continue,
        };
        if !entry.primitive.is_differentiable() {
            continue;
        }
        let needs: Vec<bool> = entry
            .args
            .iter()
            .map(|a| a.dtype().is_float() && on_path.contains(&a.value_id()))
            .collect();
        if !needs.iter().any(|n| *n) {
            continue;
        }
        let contributions = local_grads(ops, entry, &g, &needs)?;
        for (arg, contribution) in entry.args.iter().zip(contributions) {
            if let Some(c) = contribution {
                accumulate(ops, &mut grads, arg, c)?;
            }
        }
    }

    wrt.iter()
        .map(|w| match grads.get(&w.value_id()) {
            Some(g) => Ok(g.clone()),
            None => ops.literal(Tensor::zeros(w.shape(), w.dtype())),
        })
        .collect()
}

/// Ids of every value that depends on one of `wrt`, the `wrt` values included.
fn dependents<V: TensorLike>(tape: &[TapeEntry<V>], wrt: &[&V]) -> HashSet<u64> {
    let mut set: HashSet<u64> = wrt.iter().map(|w| w.value_id()).collect();
    for entry in tape {
        if entry.args.iter().any(|a| set.contains(&a.value_id())) {
            set.insert(entry.output.value_id());
        }
    }
    set
}

fn accumulate<O: Ops + ?Sized>(
    ops: &mut O,
    grads: &mut HashMap<u64, O::Value>,
    arg: &O::Value,
    contribution: O::Value,
) -> Result<()> {
    let id = arg.value_id();
    let updated = match grads.get(&id) {
        Some(existing) => ops.add(existing, &contribution)?,
        None => contribution,
    };
    grads.insert(id, updated);
    Ok(())
}

/// Sum a broadcast gradient back down to `target`.
///
/// Dimensions the forward op expanded (size 1 in `target`, or missing on the
/// left) are summed with keep_dim, then the result is reshaped to `target`.
fn sum_to<O: Ops + ?Sized>(ops: &mut O, g: &O::Value, target: &Shape) -> Result<O::Value> {
    if g.shape() == target {
        return Ok(g.clone());
    }
    let grad_dims = g.dims().to_vec();
    let target_dims = target.dims();
    let offset = grad_dims.len() - target_dims.len();
    let mut padded = vec![1usize; grad_dims.len()];
    padded[offset..].copy_from_slice(target_dims);

    let dims: Vec<usize> = (0..grad_dims.len())
        .filter(|&d| padded[d] == 1 && grad_dims[d] != 1)
        .collect();
    let summed = if dims.is_empty() {
        g.clone()
    } else {
        ops.sum(g, &dims, true)?
    };
    reshape_if_needed(ops, &summed, target)
}

fn reshape_if_needed<O: Ops + ?Sized>(
    ops: &mut O,
    v: &O::Value,
    shape: &Shape,
) -> Result<O::Value> {
    if v.shape() == shape {
        Ok(v.clone())
    } else {
        ops.reshape_to(v, shape)
    }
}

/// Per-operand contributions of one tape entry. `None` where the operand
/// needs no gradient.
fn local_grads<O: Ops + ?Sized>(
    ops: &mut O,
    entry: &TapeEntry<O::Value>,
    g: &O::Value,
    needs: &[bool],
) -> Result<Vec<Option<O::Value>>> {
    let x = &entry.args[0];
    let y = &entry.output;
    let mut out: Vec<Option<O::Value>> = vec![None; entry.args.len()];

    match &entry.primitive {
        Primitive::Binary(op) => {
            let b = &entry.args[1];
            if needs[0] {
                let ga = match op {
                    BinaryOp::Add | BinaryOp::Sub => g.clone(),
                    BinaryOp::Mul => ops.mul(g, b)?,
                    BinaryOp::Div => ops.div(g, b)?,
                };
                out[0] = Some(sum_to(ops, &ga, x.shape())?);
            }
            if needs[1] {
                let gb = match op {
                    BinaryOp::Add => g.clone(),
                    BinaryOp::Sub => ops.neg(g)?,
                    BinaryOp::Mul => ops.mul(g, x)?,
                    BinaryOp::Div => {
                        let gy = ops.mul(g, y)?;
                        let q = ops.div(&gy, b)?;
                        ops.neg(&q)?
                    }
                };
                out[1] = Some(sum_to(ops, &gb, b.shape())?);
            }
        }

        Primitive::Unary(op) => {
            let gx = match op {
                UnaryOp::Neg => ops.neg(g)?,
                UnaryOp::Abs => {
                    let s = ops.sign(x)?;
                    ops.mul(g, &s)?
                }
                UnaryOp::Exp => ops.mul(g, y)?,
                UnaryOp::Log => ops.div(g, x)?,
                UnaryOp::Sqrt => {
                    let half = ops.mul_scalar(g, 0.5)?;
                    ops.div(&half, y)?
                }
                UnaryOp::Relu => {
                    let zero = ops.scalar(0.0, x.dtype())?;
                    let mask = ops.gt(x, &zero)?;
                    let mask = ops.cast(&mask, x.dtype())?;
                    ops.mul(g, &mask)?
                }
                UnaryOp::Sigmoid => {
                    let one = ops.scalar(1.0, y.dtype())?;
                    let one_minus = ops.sub(&one, y)?;
                    let gy = ops.mul(g, y)?;
                    ops.mul(&gy, &one_minus)?
                }
                UnaryOp::Tanh => {
                    let one = ops.scalar(1.0, y.dtype())?;
                    let y2 = ops.square(y)?;
                    let d = ops.sub(&one, &y2)?;
                    ops.mul(g, &d)?
                }
                UnaryOp::Square => {
                    let two_x = ops.mul_scalar(x, 2.0)?;
                    ops.mul(g, &two_x)?
                }
                UnaryOp::Sign => return Ok(out),
            };
            out[0] = Some(gx);
        }

        Primitive::Reduce { op, dims, .. } => {
            let dims = reduce_dims(dims, x.rank())?;
            let keep_shape = x.shape().keep_dims(&dims);
            let g_keep = reshape_if_needed(ops, g, &keep_shape)?;
            let gx = match op {
                ReduceOp::Sum => ops.broadcast_to(&g_keep, x.shape())?,
                ReduceOp::Mean => {
                    let count: usize = dims.iter().map(|&d| x.dims()[d]).product();
                    let spread = ops.broadcast_to(&g_keep, x.shape())?;
                    ops.mul_scalar(&spread, 1.0 / count.max(1) as f64)?
                }
                ReduceOp::Max | ReduceOp::Min => {
                    let y_keep = reshape_if_needed(ops, y, &keep_shape)?;
                    let hit = ops.eq(x, &y_keep)?;
                    let mask = ops.cast(&hit, x.dtype())?;
                    ops.mul(&mask, &g_keep)?
                }
                ReduceOp::ArgMax | ReduceOp::ArgMin => return Ok(out),
            };
            out[0] = Some(gx);
        }

        Primitive::Matmul => {
            let b = &entry.args[1];
            if needs[0] {
                let bt = ops.t(b)?;
                let ga = ops.matmul(g, &bt)?;
                out[0] = Some(sum_to(ops, &ga, x.shape())?);
            }
            if needs[1] {
                let at = ops.t(x)?;
                let gb = ops.matmul(&at, g)?;
                out[1] = Some(sum_to(ops, &gb, b.shape())?);
            }
        }

        Primitive::Transpose { dim0, dim1 } => {
            out[0] = Some(ops.transpose(g, *dim0, *dim1)?);
        }

        Primitive::Reshape { .. } => {
            out[0] = Some(ops.reshape_to(g, x.shape())?);
        }

        Primitive::BroadcastTo { .. } => {
            out[0] = Some(sum_to(ops, g, x.shape())?);
        }

        Primitive::Softmax { dim } => {
            let gy = ops.mul(g, y)?;
            let s = ops.sum(&gy, &[*dim], true)?;
            let d = ops.sub(g, &s)?;
            out[0] = Some(ops.mul(y, &d)?);
        }

        Primitive::LogSoftmax { dim } => {
            let p = ops.exp(y)?;
            let s = ops.sum(g, &[*dim], true)?;
            let ps = ops.mul(&p, &s)?;
            out[0] = Some(ops.sub(g, &ps)?);
        }

        Primitive::Powf { exponent } => {
            let p = ops.powf(x, exponent - 1.0)?;
            let scaled = ops.mul_scalar(&p, *exponent)?;
            out[0] = Some(ops.mul(g, &scaled)?);
        }

        Primitive::Cast { .. } => {
            out[0] = Some(ops.cast(g, x.dtype())?);
        }

        Primitive::Compare(_) => {}
    }

    Ok(out)
}
