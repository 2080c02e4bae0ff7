// Translator tests — rendering plans for other runtimes

use std::sync::Arc;

use burrow::prelude::*;
use burrow::translate::fingerprint;

fn t32(data: &[f64], shape: impl Into<Shape>) -> Tensor {
    Tensor::from_f64_slice(data, shape, DType::F32).unwrap()
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

struct Softmax(usize);

impl PlanFn for Softmax {
    fn call<O: Ops>(
        &self,
        ops: &mut O,
        inputs: &[O::Value],
        _state: &[O::Value],
    ) -> Result<FnOutput<O::Value>> {
        Ok(FnOutput::new(vec![ops.softmax(&inputs[0], self.0)?]))
    }
}

struct CastTo(DType);

impl PlanFn for CastTo {
    fn call<O: Ops>(
        &self,
        ops: &mut O,
        inputs: &[O::Value],
        _state: &[O::Value],
    ) -> Result<FnOutput<O::Value>> {
        Ok(FnOutput::new(vec![ops.cast(&inputs[0], self.0)?]))
    }
}

struct IntDiv;

impl PlanFn for IntDiv {
    fn call<O: Ops>(
        &self,
        ops: &mut O,
        inputs: &[O::Value],
        _state: &[O::Value],
    ) -> Result<FnOutput<O::Value>> {
        Ok(FnOutput::new(vec![ops.div(&inputs[0], &inputs[1])?]))
    }
}

// Row predictions kept as a column, plus a decayed weight for the next call.
struct Classify;

impl PlanFn for Classify {
    fn call<O: Ops>(
        &self,
        ops: &mut O,
        inputs: &[O::Value],
        state: &[O::Value],
    ) -> Result<FnOutput<O::Value>> {
        let logits = ops.matmul(&inputs[0], &state[0])?;
        let pred = ops.argmax(&logits, 1, true)?;
        let total = ops.sum(&logits, &[], false)?;
        let next = ops.mul_scalar(&state[0], 0.5)?;
        Ok(FnOutput::new(vec![pred, total]).with_state(vec![next]))
    }
}

fn abs_shift_plan() -> Plan {
    let mut builder = PlanBuilder::new("abs_shift");
    builder.declare_input("x", (2, 2), DType::F32).unwrap();
    let state = State::named(vec![("shift", t32(&[4.2, 7.3], 2))]).unwrap();
    let x = t32(&[1.0, -2.0, 3.0, -4.0], (2, 2));
    builder.build(&AbsShift, &[x], &state).unwrap()
}

fn classify_plan() -> Plan {
    let w = Tensor::rand_normal((3, 4), DType::F32, 1).unwrap();
    let state = State::named(vec![("w", w)]).unwrap();
    let x = Tensor::rand_normal((5, 3), DType::F32, 2).unwrap();
    build("classify", &Classify, &[x], &state).unwrap()
}

#[test]
fn test_tfjs_abs_shift() {
    let out = translate(&abs_shift_plan(), Target::TfJs).unwrap();
    assert_eq!(out.target, Target::TfJs);
    assert_eq!(
        out.source,
        "function abs_shift(x, shift) {\n  const t2 = tf.add(x, shift);\n  const t3 = tf.abs(t2);\n  return [t3];\n}\n"
    );
}

#[test]
fn test_torch_abs_shift() {
    let config = TranslateConfig::default().with_indent(4);
    let out = translate_with(&abs_shift_plan(), Target::Torch, &config).unwrap();
    assert_eq!(
        out.source,
        "import torch\n\n\ndef abs_shift(x, shift):\n    t2 = torch.add(x, shift)\n    t3 = torch.abs(t2)\n    return [t3]\n"
    );
}

#[test]
fn test_translation_is_deterministic() {
    for target in Target::ALL {
        let a = translate(&classify_plan(), target).unwrap();
        let b = translate(&classify_plan(), target).unwrap();
        assert_eq!(a, b, "{} output differs between runs", target);
    }
}

#[test]
fn test_state_outputs_are_returned() {
    let plan = classify_plan();
    let js = translate(&plan, Target::TfJs).unwrap().source;
    assert!(js.contains("tf.expandDims(tf.argMax(t2, 1), 1)"));
    assert!(js.contains("tf.sum(t2, [0, 1], false)"));
    assert!(js.contains("return { outputs: [t3, t4], state: [t5] };"));

    let py = translate(&plan, Target::Torch).unwrap().source;
    assert!(py.contains("torch.argmax(t2, dim=1, keepdim=True)"));
    assert!(py.contains("torch.sum(t2, dim=[0, 1], keepdim=False)"));
    assert!(py.contains("torch.mul(w, torch.tensor(0.5, dtype=torch.float32))"));
    assert!(py.contains("return [t3, t4], [t5]"));
}

#[test]
fn test_function_name_and_shape_comments() {
    let config = TranslateConfig::default()
        .with_function_name("forward")
        .with_shape_comments(true);
    let js = translate_with(&abs_shift_plan(), Target::TfJs, &config)
        .unwrap()
        .source;
    assert!(js.starts_with("function forward(x, shift) {"));
    assert!(js.contains("const t3 = tf.abs(t2);  // [2, 2] f32"));
}

#[test]
fn test_native_target_is_the_listing() {
    let plan = abs_shift_plan();
    let native = translate(&plan, Target::Native).unwrap();
    assert_eq!(native.source, plan.to_string());
}

// Unsupported operators

#[test]
fn test_tfjs_rejects_f64_cast_only_for_that_target() {
    let x = t32(&[1.0, 2.0], 2);
    let plan = build("widen", &CastTo(DType::F64), &[x], &State::empty()).unwrap();

    let err = translate(&plan, Target::TfJs).unwrap_err();
    assert!(matches!(
        err,
        Error::UnsupportedTargetOperation { target: "tfjs", .. }
    ));
    let py = translate(&plan, Target::Torch).unwrap().source;
    assert!(py.contains("t1 = input_0.to(torch.float64)"));
    // the plan itself is unaffected
    assert_eq!(plan.execute(&[t32(&[1.0, 2.0], 2)]).unwrap().outputs[0].dtype(), DType::F64);
}

#[test]
fn test_torch_rejects_u32() {
    let x = t32(&[1.0, 2.0], 2);
    let plan = build("narrow", &CastTo(DType::U32), &[x], &State::empty()).unwrap();
    let err = translate(&plan, Target::Torch).unwrap_err();
    assert!(matches!(
        err,
        Error::UnsupportedTargetOperation { target: "torch", .. }
    ));
    let js = translate(&plan, Target::TfJs).unwrap().source;
    assert!(js.contains("tf.cast(input_0, 'int32')"));
}

#[test]
fn test_tfjs_softmax_only_on_last_axis() {
    let x = Tensor::rand_normal((2, 3), DType::F32, 3).unwrap();
    let first = build("sm0", &Softmax(0), &[x.clone()], &State::empty()).unwrap();
    let last = build("sm1", &Softmax(1), &[x], &State::empty()).unwrap();

    assert!(matches!(
        translate(&first, Target::TfJs),
        Err(Error::UnsupportedTargetOperation { .. })
    ));
    assert!(translate(&last, Target::TfJs)
        .unwrap()
        .source
        .contains("tf.softmax(input_0)"));
    assert!(translate(&first, Target::Torch)
        .unwrap()
        .source
        .contains("torch.softmax(input_0, dim=0)"));
}

#[test]
fn test_integer_division_truncates_in_every_dialect() {
    let mut a = Vec::new();
    let mut b = Vec::new();
    for x in -9i64..=9 {
        for y in [-4i64, -3, -2, 2, 3, 4] {
            a.push(x);
            b.push(y);
        }
    }
    let n = a.len();
    let a = Tensor::from_slice(&a, n).unwrap();
    let b = Tensor::from_slice(&b, n).unwrap();
    let plan = build("int_div", &IntDiv, &[a.clone(), b.clone()], &State::empty()).unwrap();
    let replayed = plan.execute(&[a.clone(), b.clone()]).unwrap().outputs[0].to_f64_vec();

    // the rule the tfjs text spells out: floorDiv, plus one when the
    // remainder is non-zero and the operand signs differ
    for ((x, y), q) in a.values().iter().zip(b.values()).zip(&replayed) {
        let floor = (x / y).floor();
        let rem = x - y * floor;
        let fix = if rem != 0.0 && (*x < 0.0) != (*y < 0.0) { 1.0 } else { 0.0 };
        assert_eq!(floor + fix, *q, "{} / {}", x, y);
    }
    assert_eq!(replayed[0], 2.0); // -9 / -4

    let js = translate(&plan, Target::TfJs).unwrap().source;
    assert!(js.contains("tf.floorDiv(input_0, input_1)"));
    assert!(js.contains("tf.notEqual(tf.less(input_0, 0), tf.less(input_1, 0))"));
    assert!(!js.contains("tf.div("));

    let py = translate(&plan, Target::Torch).unwrap().source;
    assert!(py.contains("torch.div(input_0, input_1, rounding_mode='trunc')"));
}

#[test]
fn test_tfjs_rejects_u8_division() {
    let m = Tensor::from_slice(&[1u8, 0], 2).unwrap();
    let plan = build("mask_div", &IntDiv, &[m.clone(), m], &State::empty()).unwrap();
    assert!(matches!(
        translate(&plan, Target::TfJs),
        Err(Error::UnsupportedTargetOperation { target: "tfjs", .. })
    ));
}

// Cache

#[test]
fn test_cache_reuses_translations() {
    let cache = TranslationCache::new();
    let config = TranslateConfig::default();
    let plan = abs_shift_plan();

    let a = cache.get_or_translate(&plan, Target::TfJs, &config).unwrap();
    let b = cache
        .get_or_translate(&abs_shift_plan(), Target::TfJs, &config)
        .unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(cache.len(), 1);

    cache.get_or_translate(&plan, Target::Torch, &config).unwrap();
    let wide = config.clone().with_indent(4);
    cache.get_or_translate(&plan, Target::Torch, &wide).unwrap();
    assert_eq!(cache.len(), 3);
}

#[test]
fn test_cache_does_not_keep_failures() {
    let cache = TranslationCache::default();
    let x = t32(&[1.0, 2.0], 2);
    let plan = build("widen", &CastTo(DType::F64), &[x], &State::empty()).unwrap();
    assert!(cache
        .get_or_translate(&plan, Target::TfJs, &TranslateConfig::default())
        .is_err());
    assert!(cache.is_empty());
}

#[test]
fn test_fingerprint_ignores_state_values() {
    let plan = abs_shift_plan();
    let mut updated = plan.clone();
    updated
        .state_mut()
        .replace(vec![t32(&[0.0, 0.0], 2)])
        .unwrap();
    assert_eq!(fingerprint(&plan), fingerprint(&updated));
    assert_ne!(fingerprint(&plan), fingerprint(&classify_plan()));
}
