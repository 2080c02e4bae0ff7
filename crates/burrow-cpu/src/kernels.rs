// CPU kernels
//
// Plain functions over row-major f64 buffers. Shapes arrive already checked
// by `burrow_core::infer::infer`; the kernels only compute. Results are
// rounded to the output dtype by the caller when it builds the Tensor.
//
// Broadcasting, transposition and reductions all go through
// `strided_offsets`: walk one shape in row-major order and read (or write)
// another buffer through a stride vector that has zeros on the expanded
// dimensions.

use rayon::prelude::*;

use burrow_core::primitive::{BinaryOp, CmpOp, ReduceOp, UnaryOp};
use burrow_core::shape::{strided_offsets, Shape};

/// Element count above which element-wise kernels go parallel.
const PAR_THRESHOLD: usize = 1 << 14;

fn map_elems(data: &[f64], f: impl Fn(f64) -> f64 + Sync + Send) -> Vec<f64> {
    if data.len() >= PAR_THRESHOLD {
        data.par_iter().map(|&v| f(v)).collect()
    } else {
        data.iter().map(|&v| f(v)).collect()
    }
}

fn sign(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        v
    }
}

pub fn unary(op: UnaryOp, data: &[f64]) -> Vec<f64> {
    match op {
        UnaryOp::Neg => map_elems(data, |v| -v),
        UnaryOp::Abs => map_elems(data, f64::abs),
        UnaryOp::Sign => map_elems(data, sign),
        UnaryOp::Exp => map_elems(data, f64::exp),
        UnaryOp::Log => map_elems(data, f64::ln),
        UnaryOp::Sqrt => map_elems(data, f64::sqrt),
        UnaryOp::Relu => map_elems(data, |v| if v > 0.0 { v } else { 0.0 }),
        UnaryOp::Sigmoid => map_elems(data, |v| 1.0 / (1.0 + (-v).exp())),
        UnaryOp::Tanh => map_elems(data, f64::tanh),
        UnaryOp::Square => map_elems(data, |v| v * v),
    }
}

pub fn powf(data: &[f64], exponent: f64) -> Vec<f64> {
    map_elems(data, |v| v.powf(exponent))
}

/// Read `data` (of shape `src`) as if broadcast to `target`.
pub fn broadcast(data: &[f64], src: &Shape, target: &Shape) -> Vec<f64> {
    if src == target {
        return data.to_vec();
    }
    strided_offsets(target, &src.broadcast_strides(target))
        .into_iter()
        .map(|i| data[i])
        .collect()
}

fn zip_broadcast(
    lhs: &[f64],
    lhs_shape: &Shape,
    rhs: &[f64],
    rhs_shape: &Shape,
    out_shape: &Shape,
    f: impl Fn(f64, f64) -> f64,
) -> Vec<f64> {
    if lhs_shape == rhs_shape {
        return lhs.iter().zip(rhs).map(|(&a, &b)| f(a, b)).collect();
    }
    let lo = strided_offsets(out_shape, &lhs_shape.broadcast_strides(out_shape));
    let ro = strided_offsets(out_shape, &rhs_shape.broadcast_strides(out_shape));
    lo.into_iter()
        .zip(ro)
        .map(|(i, j)| f(lhs[i], rhs[j]))
        .collect()
}

pub fn binary(
    op: BinaryOp,
    lhs: &[f64],
    lhs_shape: &Shape,
    rhs: &[f64],
    rhs_shape: &Shape,
    out_shape: &Shape,
) -> Vec<f64> {
    let f: fn(f64, f64) -> f64 = match op {
        BinaryOp::Add => |a: f64, b: f64| a + b,
        BinaryOp::Sub => |a: f64, b: f64| a - b,
        BinaryOp::Mul => |a: f64, b: f64| a * b,
        BinaryOp::Div => |a: f64, b: f64| a / b,
    };
    zip_broadcast(lhs, lhs_shape, rhs, rhs_shape, out_shape, f)
}

pub fn compare(
    op: CmpOp,
    lhs: &[f64],
    lhs_shape: &Shape,
    rhs: &[f64],
    rhs_shape: &Shape,
    out_shape: &Shape,
) -> Vec<f64> {
    let f: fn(f64, f64) -> bool = match op {
        CmpOp::Eq => |a: f64, b: f64| a == b,
        CmpOp::Ne => |a: f64, b: f64| a != b,
        CmpOp::Gt => |a: f64, b: f64| a > b,
        CmpOp::Ge => |a: f64, b: f64| a >= b,
        CmpOp::Lt => |a: f64, b: f64| a < b,
        CmpOp::Le => |a: f64, b: f64| a <= b,
    };
    zip_broadcast(lhs, lhs_shape, rhs, rhs_shape, out_shape, |a, b| {
        if f(a, b) {
            1.0
        } else {
            0.0
        }
    })
}

/// Reduce `data` over `dims` (already expanded and sorted). The result is
/// laid out in the keep-dim shape, which has the same element order as the
/// dropped-dim shape.
pub fn reduce(op: ReduceOp, data: &[f64], shape: &Shape, dims: &[usize]) -> Vec<f64> {
    let keep = shape.keep_dims(dims);
    let mut out_strides = keep.stride_contiguous();
    for &d in dims {
        out_strides[d] = 0;
    }
    let targets = strided_offsets(shape, &out_strides);
    let out_len = keep.elem_count();

    match op {
        ReduceOp::Sum | ReduceOp::Mean => {
            let mut acc = vec![0.0f64; out_len];
            for (&t, &v) in targets.iter().zip(data) {
                acc[t] += v;
            }
            if op == ReduceOp::Mean {
                let count: usize = dims.iter().map(|&d| shape.dims()[d]).product();
                let count = count as f64;
                for v in acc.iter_mut() {
                    *v /= count;
                }
            }
            acc
        }
        ReduceOp::Max | ReduceOp::Min => {
            let init = if op == ReduceOp::Max {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            };
            let better: fn(f64, f64) -> bool = if op == ReduceOp::Max {
                |v, best| v > best
            } else {
                |v, best| v < best
            };
            let mut acc = vec![init; out_len];
            for (&t, &v) in targets.iter().zip(data) {
                if better(v, acc[t]) {
                    acc[t] = v;
                }
            }
            acc
        }
        ReduceOp::ArgMax | ReduceOp::ArgMin => {
            // Exactly one reduced dim; the first extremum wins.
            let dim = dims[0];
            let stride = shape.stride_contiguous()[dim];
            let size = shape.dims()[dim];
            let better: fn(f64, f64) -> bool = if op == ReduceOp::ArgMax {
                |v, best| v > best
            } else {
                |v, best| v < best
            };
            let mut best: Vec<Option<f64>> = vec![None; out_len];
            let mut idx = vec![0.0f64; out_len];
            for (pos, (&t, &v)) in targets.iter().zip(data).enumerate() {
                let along = (pos / stride) % size;
                match best[t] {
                    Some(b) if !better(v, b) => {}
                    _ => {
                        best[t] = Some(v);
                        idx[t] = along as f64;
                    }
                }
            }
            idx
        }
    }
}

/// Batched matrix product over the last two dims. `rhs` is either batched
/// like `lhs` or a single matrix shared by every batch.
pub fn matmul(lhs: &[f64], lhs_shape: &Shape, rhs: &[f64], rhs_shape: &Shape) -> Vec<f64> {
    let l = lhs_shape.dims();
    let r = rhs_shape.dims();
    let (m, k) = (l[l.len() - 2], l[l.len() - 1]);
    let n = r[r.len() - 1];
    let batch: usize = l[..l.len() - 2].iter().product();
    let rhs_batched = r.len() > 2;

    let mut out = vec![0.0f64; batch * m * n];
    if out.is_empty() {
        return out;
    }
    out.par_chunks_mut(n).enumerate().for_each(|(row, dst)| {
        let b = row / m;
        let i = row % m;
        let a_row = &lhs[b * m * k + i * k..b * m * k + (i + 1) * k];
        let b_base = if rhs_batched { b * k * n } else { 0 };
        for (j, d) in dst.iter_mut().enumerate() {
            let mut acc = 0.0f64;
            for (p, &a) in a_row.iter().enumerate() {
                acc += a * rhs[b_base + p * n + j];
            }
            *d = acc;
        }
    });
    out
}

/// Swap two dims, producing a contiguous buffer of the transposed shape.
pub fn transpose(data: &[f64], shape: &Shape, dim0: usize, dim1: usize) -> Vec<f64> {
    let mut dims = shape.dims().to_vec();
    let mut strides = shape.stride_contiguous();
    dims.swap(dim0, dim1);
    strides.swap(dim0, dim1);
    strided_offsets(&Shape::new(dims), &strides)
        .into_iter()
        .map(|i| data[i])
        .collect()
}

/// Numerically stable softmax (or log-softmax) along `dim`.
pub fn softmax(data: &[f64], shape: &Shape, dim: usize, log: bool) -> Vec<f64> {
    let dims = shape.dims();
    let outer: usize = dims[..dim].iter().product();
    let size = dims[dim];
    let inner: usize = dims[dim + 1..].iter().product();
    let mut out = vec![0.0f64; data.len()];

    for o in 0..outer {
        for i in 0..inner {
            let at = |j: usize| o * size * inner + j * inner + i;
            let max = (0..size)
                .map(|j| data[at(j)])
                .fold(f64::NEG_INFINITY, f64::max);
            let sum: f64 = (0..size).map(|j| (data[at(j)] - max).exp()).sum();
            for j in 0..size {
                let shifted = data[at(j)] - max;
                out[at(j)] = if log {
                    shifted - sum.ln()
                } else {
                    shifted.exp() / sum
                };
            }
        }
    }
    out
}
