// Replay tests — executing traced plans on concrete inputs

use std::sync::{Arc, RwLock};
use std::thread;

use burrow::prelude::*;
use proptest::prelude::*;

fn t32(data: &[f64], shape: impl Into<Shape>) -> Tensor {
    Tensor::from_f64_slice(data, shape, DType::F32).unwrap()
}

/// Run `f` directly on the CPU backend, without tracing.
fn eager<F: PlanFn>(f: &F, inputs: &[Tensor], state: &State) -> FnOutput<Tensor> {
    let mut ops = Eager::new(CpuBackend);
    f.call(&mut ops, inputs, &state.read()).unwrap()
}

struct AbsShift;

impl PlanFn for AbsShift {
    fn call<O: Ops>(
        &self,
        ops: &mut O,
        inputs: &[O::Value],
        state: &[O::Value],
    ) -> Result<FnOutput<O::Value>> {
        let y = ops.add(&inputs[0], &state[0])?;
        Ok(FnOutput::new(vec![ops.abs(&y)?]))
    }
}

// Intermediates with several consumers, and an output that is also consumed.
struct Reuse;

impl PlanFn for Reuse {
    fn call<O: Ops>(
        &self,
        ops: &mut O,
        inputs: &[O::Value],
        _state: &[O::Value],
    ) -> Result<FnOutput<O::Value>> {
        let x = &inputs[0];
        let a = ops.exp(x)?;
        let b = ops.mul(&a, x)?;
        let c = ops.add(&b, &a)?;
        let d = ops.sum(&c, &[1], false)?;
        let e = ops.softmax(&c, 1)?;
        let f = ops.sub(&e, &a)?;
        Ok(FnOutput::new(vec![c, d, f]))
    }
}

// Counter: output the current count, then increment it.
struct Counter;

impl PlanFn for Counter {
    fn call<O: Ops>(
        &self,
        ops: &mut O,
        inputs: &[O::Value],
        state: &[O::Value],
    ) -> Result<FnOutput<O::Value>> {
        let out = ops.add(&inputs[0], &state[0])?;
        let next = ops.add_scalar(&state[0], 1.0)?;
        Ok(FnOutput::new(vec![out]).with_state(vec![next]))
    }
}

// s0 - s1; zero whenever both slots hold the same value.
struct SlotDiff;

impl PlanFn for SlotDiff {
    fn call<O: Ops>(
        &self,
        ops: &mut O,
        _inputs: &[O::Value],
        state: &[O::Value],
    ) -> Result<FnOutput<O::Value>> {
        Ok(FnOutput::new(vec![ops.sub(&state[0], &state[1])?]))
    }
}

fn shift_state() -> State {
    State::new(vec![t32(&[4.2, 7.3], 2)])
}

// Results

#[test]
fn test_execute_matches_eager() {
    let x = t32(&[1.0, -2.0, 3.0, -4.0], (2, 2));
    let plan = build("abs_shift", &AbsShift, &[x.clone()], &shift_state()).unwrap();
    let replayed = plan.execute(&[x.clone()]).unwrap();
    let direct = eager(&AbsShift, &[x], &shift_state());
    assert_eq!(replayed.outputs, direct.outputs);
    assert!(replayed.state.is_none());
}

#[test]
fn test_last_use_freeing_keeps_results() {
    let x = Tensor::rand_normal((3, 4), DType::F32, 7).unwrap();
    let plan = build("reuse", &Reuse, &[x.clone()], &State::empty()).unwrap();

    let y = Tensor::rand_normal((3, 4), DType::F32, 8).unwrap();
    let replayed = plan.execute(&[y.clone()]).unwrap();
    let direct = eager(&Reuse, &[y], &State::empty());
    assert_eq!(replayed.outputs.len(), 3);
    assert_eq!(replayed.outputs, direct.outputs);
    assert_eq!(replayed.outputs[1].dims(), &[3]);
}

#[test]
fn test_execute_with_explicit_state() {
    let x = t32(&[1.0, -2.0, 3.0, -4.0], (2, 2));
    let plan = build("abs_shift", &AbsShift, &[x.clone()], &shift_state()).unwrap();
    let other = vec![t32(&[-1.0, -1.0], 2)];
    let out = plan.execute_with_state(&CpuBackend, &[x], &other).unwrap();
    assert_eq!(out.outputs[0].to_f32_vec(), vec![0.0, 3.0, 2.0, 5.0]);
    // the plan's own state is untouched
    assert_eq!(plan.state().get(0).unwrap().to_f32_vec(), vec![4.2f32, 7.3]);
}

// Call-site validation

#[test]
fn test_wrong_inputs_rejected() {
    let x = t32(&[1.0, -2.0, 3.0, -4.0], (2, 2));
    let plan = build("abs_shift", &AbsShift, &[x.clone()], &shift_state()).unwrap();

    let err = plan.execute(&[]).unwrap_err();
    assert!(matches!(err, Error::InputMismatch(_)));
    let err = plan.execute(&[x.clone(), x]).unwrap_err();
    assert!(matches!(err, Error::InputMismatch(_)));
    let err = plan.execute(&[t32(&[1.0, 2.0], 2)]).unwrap_err();
    assert!(matches!(err, Error::InputMismatch(_)));
    let f64_input = Tensor::zeros((2, 2), DType::F64);
    let err = plan.execute(&[f64_input]).unwrap_err();
    assert!(matches!(err, Error::InputMismatch(_)));
}

#[test]
fn test_wrong_state_rejected() {
    let x = t32(&[1.0, -2.0, 3.0, -4.0], (2, 2));
    let plan = build("abs_shift", &AbsShift, &[x.clone()], &shift_state()).unwrap();
    let err = plan
        .execute_with_state(&CpuBackend, &[x], &[t32(&[1.0, 2.0, 3.0], 3)])
        .unwrap_err();
    assert!(matches!(err, Error::StateShapeMismatch(_)));
}

// State

#[test]
fn test_step_adopts_returned_state() {
    let state = State::new(vec![Tensor::zeros(2, DType::F32)]);
    let x = Tensor::zeros(2, DType::F32);
    let mut plan = build("counter", &Counter, &[x.clone()], &state).unwrap();
    assert!(plan.updates_state());

    for expected in 0..3 {
        let out = plan.step(&[x.clone()]).unwrap();
        assert_eq!(out[0].to_f32_vec(), vec![expected as f32; 2]);
    }
    assert_eq!(plan.state().get(0).unwrap().to_f32_vec(), vec![3.0, 3.0]);

    // execute alone never writes state
    let out = plan.execute(&[x]).unwrap();
    assert_eq!(out.state.unwrap()[0].to_f32_vec(), vec![4.0, 4.0]);
    assert_eq!(plan.state().get(0).unwrap().to_f32_vec(), vec![3.0, 3.0]);
}

#[test]
fn test_failed_replace_keeps_previous_state() {
    let mut state = State::new(vec![t32(&[1.0, 2.0], 2), t32(&[3.0], 1)]);
    let before = state.read();
    let err = state
        .replace(vec![t32(&[9.0, 9.0], 2), t32(&[9.0, 9.0], 2)])
        .unwrap_err();
    assert!(matches!(err, Error::StateShapeMismatch(_)));
    assert_eq!(state.read(), before);

    let err = state.replace(vec![t32(&[9.0, 9.0], 2)]).unwrap_err();
    assert!(matches!(err, Error::StateShapeMismatch(_)));
    assert_eq!(state.read(), before);
}

#[test]
fn test_concurrent_readers_never_see_partial_replace() {
    let state = State::new(vec![Tensor::zeros(2, DType::F32), Tensor::zeros(2, DType::F32)]);
    let plan = build("slot_diff", &SlotDiff, &[], &state).unwrap();
    let plan = Arc::new(RwLock::new(plan));

    let writer = {
        let plan = Arc::clone(&plan);
        thread::spawn(move || {
            for k in 1..=200 {
                let v = Tensor::full(2, k as f64, DType::F32);
                plan.write()
                    .unwrap()
                    .state_mut()
                    .replace(vec![v.clone(), v])
                    .unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let plan = Arc::clone(&plan);
            thread::spawn(move || {
                for _ in 0..200 {
                    let guard = plan.read().unwrap();
                    let values = guard.state().read();
                    assert_eq!(values[0], values[1]);
                    let out = guard.execute(&[]).unwrap();
                    assert_eq!(out.outputs[0].to_f32_vec(), vec![0.0, 0.0]);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
    let last = plan.read().unwrap().state().read();
    assert_eq!(last[0].to_f32_vec(), vec![200.0, 200.0]);
}

// Properties

proptest! {
    #[test]
    fn test_abs_shift_matches_f32_arithmetic(
        a in proptest::collection::vec(-1.0e6f32..1.0e6f32, 4),
    ) {
        let x = Tensor::from_slice(&a, (2, 2)).unwrap();
        let plan = build("abs_shift", &AbsShift, &[x.clone()], &shift_state()).unwrap();
        let out = plan.execute(&[x]).unwrap().outputs[0].to_f32_vec();

        let b = [4.2f32, 7.3];
        let expected: Vec<f32> = a
            .iter()
            .enumerate()
            .map(|(i, v)| (v + b[i % 2]).abs())
            .collect();
        prop_assert_eq!(out, expected);
    }
}
