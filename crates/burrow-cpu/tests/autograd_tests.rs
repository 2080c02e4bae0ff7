// Autograd Tests — Tape gradients under eager execution vs. finite differences

use burrow_core::{DType, Eager, Ops, Shape, Tensor};
use burrow_cpu::CpuBackend;

// Helpers

fn eager() -> Eager<CpuBackend> {
    Eager::new(CpuBackend)
}

fn t64(data: &[f64], shape: impl Into<Shape>) -> Tensor {
    Tensor::from_f64_slice(data, shape, DType::F64).unwrap()
}

fn assert_close(a: &[f64], b: &[f64], tol: f64) {
    assert_eq!(
        a.len(),
        b.len(),
        "length mismatch: {} vs {}",
        a.len(),
        b.len()
    );
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        assert!(
            (x - y).abs() < tol,
            "elem {}: {} vs {} (tol={})",
            i,
            x,
            y,
            tol
        );
    }
}

/// Central-difference gradient of `f` at `x` (f64 throughout).
fn numeric_grad(f: impl Fn(&Tensor) -> f64, x: &Tensor) -> Vec<f64> {
    let eps = 1e-6;
    let base = x.to_f64_vec();
    (0..base.len())
        .map(|i| {
            let mut plus = base.clone();
            let mut minus = base.clone();
            plus[i] += eps;
            minus[i] -= eps;
            let fp = f(&t64(&plus, x.shape()));
            let fm = f(&t64(&minus, x.shape()));
            (fp - fm) / (2.0 * eps)
        })
        .collect()
}

/// Check d(loss)/dx for a scalar loss built by `body`.
fn check_grad(body: fn(&mut Eager<CpuBackend>, &Tensor) -> Tensor, x: &Tensor) {
    let mut ops = eager();
    let loss = body(&mut ops, x);
    let g = ops.grad(&loss, &[x]).unwrap().remove(0);
    assert_eq!(g.shape(), x.shape());

    let numeric = numeric_grad(
        |xv| {
            let mut ops = eager();
            body(&mut ops, xv).to_scalar().unwrap()
        },
        x,
    );
    assert_close(&g.to_f64_vec(), &numeric, 1e-5);
}

// Element-wise rules

#[test]
fn test_grad_unary_chain() {
    let x = t64(&[0.3, 1.2, 2.5, 0.8], (2, 2));
    check_grad(
        |ops, x| {
            let a = ops.exp(x).unwrap();
            let b = ops.sqrt(&a).unwrap();
            let c = ops.log(&b).unwrap();
            let d = ops.tanh(&c).unwrap();
            let e = ops.sigmoid(&d).unwrap();
            ops.sum_all(&e).unwrap()
        },
        &x,
    );
}

#[test]
fn test_grad_abs_square_relu() {
    let x = t64(&[-1.5, 0.5, 2.0, -0.25], 4);
    check_grad(
        |ops, x| {
            let a = ops.abs(x).unwrap();
            let b = ops.square(x).unwrap();
            let r = ops.relu(x).unwrap();
            let s = ops.add(&a, &b).unwrap();
            let s = ops.add(&s, &r).unwrap();
            ops.sum_all(&s).unwrap()
        },
        &x,
    );
}

#[test]
fn test_grad_div_and_powf() {
    let x = t64(&[1.5, 2.0, 3.0], 3);
    check_grad(
        |ops, x| {
            let p = ops.powf(x, 3.0).unwrap();
            let one = ops.scalar(1.0, DType::F64).unwrap();
            let inv = ops.div(&one, x).unwrap();
            let s = ops.sub(&p, &inv).unwrap();
            ops.sum_all(&s).unwrap()
        },
        &x,
    );
}

// Broadcasting and reductions

#[test]
fn test_grad_broadcast_operand_is_reduced() {
    // x: [3] is broadcast against a [2, 3] constant
    let x = t64(&[0.5, -1.0, 2.0], 3);
    check_grad(
        |ops, x| {
            let m = ops
                .literal(t64(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3)))
                .unwrap();
            let p = ops.mul(&m, x).unwrap();
            ops.sum_all(&p).unwrap()
        },
        &x,
    );

    let mut ops = eager();
    let m = t64(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3));
    let p = ops.mul(&m, &x).unwrap();
    let loss = ops.sum_all(&p).unwrap();
    let g = ops.grad(&loss, &[&x]).unwrap().remove(0);
    assert_eq!(g.to_f64_vec(), vec![5.0, 7.0, 9.0]);
}

#[test]
fn test_grad_mean_and_max() {
    let x = t64(&[1.0, 4.0, 2.0, 3.0, 0.5, 0.25], (2, 3));
    check_grad(
        |ops, x| {
            let m = ops.mean(x, &[1], false).unwrap();
            let mx = ops.max(x, &[1], true).unwrap();
            let a = ops.sum_all(&m).unwrap();
            let b = ops.sum_all(&mx).unwrap();
            ops.add(&a, &b).unwrap()
        },
        &x,
    );
}

#[test]
fn test_grad_log_softmax_cross_entropy() {
    let x = t64(&[0.2, -0.4, 1.1, 0.0, 0.3, -2.0], (2, 3));
    check_grad(
        |ops, x| {
            let y = ops
                .literal(t64(&[0.0, 0.0, 1.0, 1.0, 0.0, 0.0], (2, 3)))
                .unwrap();
            let lp = ops.log_softmax(x, 1).unwrap();
            let prod = ops.mul(&y, &lp).unwrap();
            let s = ops.sum_all(&prod).unwrap();
            ops.neg(&s).unwrap()
        },
        &x,
    );
}

#[test]
fn test_grad_softmax() {
    let x = t64(&[0.2, -0.4, 1.1, 0.0], (2, 2));
    check_grad(
        |ops, x| {
            let w = ops.literal(t64(&[1.0, 2.0, 3.0, 4.0], (2, 2))).unwrap();
            let p = ops.softmax(x, 0).unwrap();
            let q = ops.mul(&p, &w).unwrap();
            ops.sum_all(&q).unwrap()
        },
        &x,
    );
}

// Linear algebra and shape ops

#[test]
fn test_grad_matmul_both_sides() {
    let a = t64(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3));
    let b = t64(&[0.5, -1.0, 1.5, 2.0, -0.5, 1.0], (3, 2));

    let mut ops = eager();
    let c = ops.matmul(&a, &b).unwrap();
    let loss = ops.sum_all(&c).unwrap();
    let grads = ops.grad(&loss, &[&a, &b]).unwrap();

    // d(sum(A@B))/dA = 1 @ Bᵀ, d/dB = Aᵀ @ 1
    assert_close(
        &grads[0].to_f64_vec(),
        &[-0.5, 3.5, 0.5, -0.5, 3.5, 0.5],
        1e-12,
    );
    assert_close(
        &grads[1].to_f64_vec(),
        &[5.0, 5.0, 7.0, 7.0, 9.0, 9.0],
        1e-12,
    );
}

#[test]
fn test_grad_reshape_transpose_broadcast_to() {
    let x = t64(&[1.0, -2.0, 0.5, 3.0], 4);
    check_grad(
        |ops, x| {
            let r = ops.reshape(x, &[2, -1]).unwrap();
            let t = ops.transpose(&r, 0, 1).unwrap();
            let b = ops.broadcast_to(&t, &Shape::from((3, 2, 2))).unwrap();
            let w = ops.square(&b).unwrap();
            ops.sum_all(&w).unwrap()
        },
        &x,
    );
}

// Accumulation and stop-gradient

#[test]
fn test_grad_accumulates_over_uses() {
    let x = t64(&[3.0], 1);
    let mut ops = eager();
    let y = ops.mul(&x, &x).unwrap();
    let loss = ops.sum_all(&y).unwrap();
    let g = ops.grad(&loss, &[&x]).unwrap().remove(0);
    assert_eq!(g.to_f64_vec(), vec![6.0]);
}

#[test]
fn test_grad_unrelated_value_is_zero() {
    let x = t64(&[1.0, 2.0], 2);
    let z = t64(&[5.0, 5.0], 2);
    let mut ops = eager();
    let loss = ops.sum_all(&x).unwrap();
    let grads = ops.grad(&loss, &[&x, &z]).unwrap();
    assert_eq!(grads[0].to_f64_vec(), vec![1.0, 1.0]);
    assert_eq!(grads[1].to_f64_vec(), vec![0.0, 0.0]);
}

#[test]
fn test_grad_stops_at_comparisons() {
    let x = t64(&[1.0, -1.0], 2);
    let mut ops = eager();
    let zero = ops.scalar(0.0, DType::F64).unwrap();
    let mask = ops.gt(&x, &zero).unwrap();
    let mask = ops.cast(&mask, DType::F64).unwrap();
    let loss = ops.sum_all(&mask).unwrap();
    let g = ops.grad(&loss, &[&x]).unwrap().remove(0);
    assert_eq!(g.to_f64_vec(), vec![0.0, 0.0]);
}

#[test]
fn test_grad_requires_scalar_loss() {
    let x = t64(&[1.0, 2.0], 2);
    let mut ops = eager();
    let y = ops.exp(&x).unwrap();
    assert!(ops.grad(&y, &[&x]).is_err());
}

#[test]
fn test_unknown_command_is_unsupported() {
    let x = t64(&[1.0], 1);
    let mut ops = eager();
    let err = ops.call("torch.fft.rfft", &[&x]).unwrap_err();
    assert!(matches!(
        err,
        burrow_core::Error::UnsupportedOperation { .. }
    ));
    let y = ops.call("torch.abs", &[&x]).unwrap();
    assert_eq!(y.to_f64_vec(), vec![1.0]);
}
