// Envelope schema, version 1
//
// Field numbers are part of the format: never renumber, only add.
//
//   Envelope     1 version   2 plan        3 translation
//   Plan         1 name      2 inputs*     3 state      4 ops*
//                5 outputs*  6 state_outputs*           7 has_state_outputs
//                8 tags*     9 description
//   Placeholder  1 id        2 name        3 dims       4 dtype
//   State        1 slots*    2 values*
//   Operation    1 primitive 2 inputs*     3 output
//   Primitive    1 opcode    2 dims        3 keep_dim   5 exponent  6 dtype
//   Operand      1 ref       2 literal
//   Translation  1 target    2 source
//
//   (* repeated)
//
// Primitive opcodes are grouped by kind:
//
//   1-10   unary     neg abs sign exp log sqrt relu sigmoid tanh square
//   20-23  binary    add sub mul div
//   30-35  compare   eq ne gt ge lt le
//   40-45  reduce    sum mean max min argmax argmin
//   50-57  shape     matmul transpose reshape broadcast_to softmax
//                    log_softmax powf cast
//
// Decoders skip fields they do not know. A known field with the wrong wire
// type, or a missing required field, is a SchemaFieldMismatch.

use burrow_core::{
    BinaryOp, CmpOp, DType, Error, Primitive, ReduceOp, Result, Shape, Tensor, UnaryOp,
};

use super::tensor::{decode_tensor, encode_tensor};
use super::wire::{PbDecoder, PbEncoder, FIXED64, LEN, VARINT};
use crate::placeholder::{Operand, Placeholder, PlaceholderId};
use crate::plan::{OpRecord, Plan, PlanParts};
use crate::state::State;
use crate::translate::{Target, Translation};

fn expect_wire(found: u32, wanted: u32, message: &'static str, field: &'static str) -> Result<()> {
    if found != wanted {
        return Err(Error::SchemaFieldMismatch { message, field });
    }
    Ok(())
}

fn required<T>(value: Option<T>, message: &'static str, field: &'static str) -> Result<T> {
    value.ok_or(Error::SchemaFieldMismatch { message, field })
}

fn to_u32(v: u64, what: &str) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::CorruptEnvelope(format!("{} {} out of range", what, v)))
}

fn to_usizes(values: Vec<u64>) -> Result<Vec<usize>> {
    values
        .into_iter()
        .map(|v| {
            usize::try_from(v)
                .map_err(|_| Error::CorruptEnvelope(format!("dimension {} out of range", v)))
        })
        .collect()
}

/// A decoded shape; its element count must fit in `usize`.
fn to_shape(dims: Vec<usize>) -> Result<Shape> {
    let shape = Shape::from(dims);
    if shape.checked_elem_count().is_none() {
        return Err(Error::CorruptEnvelope(format!(
            "element count of shape {} overflows",
            shape
        )));
    }
    Ok(shape)
}

fn decode_dtype(tag: u64) -> Result<DType> {
    u32::try_from(tag)
        .ok()
        .and_then(DType::from_tag)
        .ok_or_else(|| Error::CorruptEnvelope(format!("unknown dtype tag {}", tag)))
}

// Plan

pub(crate) fn encode_plan(plan: &Plan) -> PbEncoder {
    let mut enc = PbEncoder::new();
    enc.write_string_field(1, plan.name());
    for p in plan.inputs() {
        enc.write_message_field(2, &encode_placeholder(p));
    }
    enc.write_message_field(3, &encode_state(plan.state()));
    for op in plan.ops() {
        enc.write_message_field(4, &encode_op(op));
    }
    for o in plan.outputs() {
        enc.write_message_field(5, &encode_operand(o));
    }
    if let Some(updates) = plan.state_outputs() {
        for o in updates {
            enc.write_message_field(6, &encode_operand(o));
        }
        enc.write_bool_field(7, true);
    }
    for tag in plan.tags() {
        enc.write_string_field(8, tag);
    }
    if let Some(description) = plan.description() {
        enc.write_string_field(9, description);
    }
    enc
}

pub(crate) fn decode_plan(data: &[u8]) -> Result<Plan> {
    const MSG: &str = "Plan";
    let mut dec = PbDecoder::new(data);
    let mut name = None;
    let mut inputs = Vec::new();
    let mut state = None;
    let mut ops = Vec::new();
    let mut outputs = Vec::new();
    let mut state_outputs = Vec::new();
    let mut has_state_outputs = false;
    let mut tags = Vec::new();
    let mut description = None;

    while dec.remaining() > 0 {
        let (field, wire) = dec.read_tag()?;
        match field {
            1 => {
                expect_wire(wire, LEN, MSG, "name")?;
                name = Some(dec.read_string()?);
            }
            2 => {
                expect_wire(wire, LEN, MSG, "inputs")?;
                inputs.push(decode_placeholder(dec.read_bytes()?)?);
            }
            3 => {
                expect_wire(wire, LEN, MSG, "state")?;
                state = Some(decode_state(dec.read_bytes()?)?);
            }
            4 => {
                expect_wire(wire, LEN, MSG, "ops")?;
                ops.push(decode_op(dec.read_bytes()?)?);
            }
            5 => {
                expect_wire(wire, LEN, MSG, "outputs")?;
                outputs.push(decode_operand(dec.read_bytes()?)?);
            }
            6 => {
                expect_wire(wire, LEN, MSG, "state_outputs")?;
                state_outputs.push(decode_operand(dec.read_bytes()?)?);
            }
            7 => {
                expect_wire(wire, VARINT, MSG, "has_state_outputs")?;
                has_state_outputs = dec.read_varint()? != 0;
            }
            8 => {
                expect_wire(wire, LEN, MSG, "tags")?;
                tags.push(dec.read_string()?);
            }
            9 => {
                expect_wire(wire, LEN, MSG, "description")?;
                description = Some(dec.read_string()?);
            }
            _ => dec.skip_field(wire)?,
        }
    }

    let parts = PlanParts {
        name: required(name, MSG, "name")?,
        description,
        tags,
        inputs,
        state: state.unwrap_or_default(),
        ops,
        outputs,
        state_outputs: if has_state_outputs || !state_outputs.is_empty() {
            Some(state_outputs)
        } else {
            None
        },
    };
    Plan::from_parts(parts).map_err(|e| Error::CorruptEnvelope(format!("invalid plan: {}", e)))
}

// Placeholder

fn encode_placeholder(p: &Placeholder) -> PbEncoder {
    let mut enc = PbEncoder::new();
    enc.write_varint_field(1, p.id.0 as u64);
    if let Some(name) = &p.name {
        enc.write_string_field(2, name);
    }
    let dims: Vec<u64> = p.shape.dims().iter().map(|d| *d as u64).collect();
    enc.write_packed_field(3, &dims);
    enc.write_varint_field(4, p.dtype.tag() as u64);
    enc
}

fn decode_placeholder(data: &[u8]) -> Result<Placeholder> {
    const MSG: &str = "Placeholder";
    let mut dec = PbDecoder::new(data);
    let mut id = None;
    let mut name = None;
    let mut dims = Vec::new();
    let mut dtype = None;
    while dec.remaining() > 0 {
        let (field, wire) = dec.read_tag()?;
        match field {
            1 => {
                expect_wire(wire, VARINT, MSG, "id")?;
                id = Some(to_u32(dec.read_varint()?, "placeholder id")?);
            }
            2 => {
                expect_wire(wire, LEN, MSG, "name")?;
                name = Some(dec.read_string()?);
            }
            3 => dims.extend(to_usizes(dec.read_packed(wire)?)?),
            4 => {
                expect_wire(wire, VARINT, MSG, "dtype")?;
                dtype = Some(decode_dtype(dec.read_varint()?)?);
            }
            _ => dec.skip_field(wire)?,
        }
    }
    Ok(Placeholder::new(
        PlaceholderId(required(id, MSG, "id")?),
        name,
        to_shape(dims)?,
        required(dtype, MSG, "dtype")?,
    ))
}

// State

fn encode_state(state: &State) -> PbEncoder {
    let mut enc = PbEncoder::new();
    for slot in state.slots() {
        enc.write_message_field(1, &encode_placeholder(slot));
    }
    for value in state.read() {
        enc.write_message_field(2, &encode_tensor(&value));
    }
    enc
}

fn decode_state(data: &[u8]) -> Result<State> {
    const MSG: &str = "State";
    let mut dec = PbDecoder::new(data);
    let mut slots = Vec::new();
    let mut values = Vec::new();
    while dec.remaining() > 0 {
        let (field, wire) = dec.read_tag()?;
        match field {
            1 => {
                expect_wire(wire, LEN, MSG, "slots")?;
                slots.push(decode_placeholder(dec.read_bytes()?)?);
            }
            2 => {
                expect_wire(wire, LEN, MSG, "values")?;
                values.push(decode_tensor(dec.read_bytes()?)?);
            }
            _ => dec.skip_field(wire)?,
        }
    }
    State::from_parts(slots, values)
        .map_err(|e| Error::CorruptEnvelope(format!("invalid state: {}", e)))
}

// Operation

fn encode_op(op: &OpRecord) -> PbEncoder {
    let mut enc = PbEncoder::new();
    enc.write_message_field(1, &encode_primitive(&op.primitive));
    for o in &op.inputs {
        enc.write_message_field(2, &encode_operand(o));
    }
    enc.write_message_field(3, &encode_placeholder(&op.output));
    enc
}

fn decode_op(data: &[u8]) -> Result<OpRecord> {
    const MSG: &str = "Operation";
    let mut dec = PbDecoder::new(data);
    let mut primitive = None;
    let mut inputs = Vec::new();
    let mut output = None;
    while dec.remaining() > 0 {
        let (field, wire) = dec.read_tag()?;
        match field {
            1 => {
                expect_wire(wire, LEN, MSG, "primitive")?;
                primitive = Some(decode_primitive(dec.read_bytes()?)?);
            }
            2 => {
                expect_wire(wire, LEN, MSG, "inputs")?;
                inputs.push(decode_operand(dec.read_bytes()?)?);
            }
            3 => {
                expect_wire(wire, LEN, MSG, "output")?;
                output = Some(decode_placeholder(dec.read_bytes()?)?);
            }
            _ => dec.skip_field(wire)?,
        }
    }
    Ok(OpRecord {
        primitive: required(primitive, MSG, "primitive")?,
        inputs,
        output: required(output, MSG, "output")?,
    })
}

// Operand

fn encode_operand(o: &Operand) -> PbEncoder {
    let mut enc = PbEncoder::new();
    match o {
        Operand::Ref(id) => enc.write_varint_field(1, id.0 as u64),
        Operand::Literal(t) => enc.write_message_field(2, &encode_tensor(t)),
    }
    enc
}

fn decode_operand(data: &[u8]) -> Result<Operand> {
    const MSG: &str = "Operand";
    let mut dec = PbDecoder::new(data);
    let mut operand = None;
    while dec.remaining() > 0 {
        let (field, wire) = dec.read_tag()?;
        match field {
            1 => {
                expect_wire(wire, VARINT, MSG, "ref")?;
                operand = Some(Operand::Ref(PlaceholderId(to_u32(
                    dec.read_varint()?,
                    "placeholder id",
                )?)));
            }
            2 => {
                expect_wire(wire, LEN, MSG, "literal")?;
                operand = Some(Operand::Literal(decode_tensor(dec.read_bytes()?)?));
            }
            _ => dec.skip_field(wire)?,
        }
    }
    required(operand, MSG, "ref")
}

// Primitive

const UNARY_BASE: u32 = 1;
const BINARY_BASE: u32 = 20;
const CMP_BASE: u32 = 30;
const REDUCE_BASE: u32 = 40;
const OP_MATMUL: u32 = 50;
const OP_TRANSPOSE: u32 = 51;
const OP_RESHAPE: u32 = 52;
const OP_BROADCAST_TO: u32 = 53;
const OP_SOFTMAX: u32 = 54;
const OP_LOG_SOFTMAX: u32 = 55;
const OP_POWF: u32 = 56;
const OP_CAST: u32 = 57;

const REDUCE_OPS: [ReduceOp; 6] = [
    ReduceOp::Sum,
    ReduceOp::Mean,
    ReduceOp::Max,
    ReduceOp::Min,
    ReduceOp::ArgMax,
    ReduceOp::ArgMin,
];

fn index_of<T: PartialEq>(all: &[T], item: &T) -> u32 {
    all.iter().position(|x| x == item).unwrap_or(0) as u32
}

pub(crate) fn opcode(p: &Primitive) -> u32 {
    match p {
        Primitive::Unary(op) => UNARY_BASE + index_of(&UnaryOp::ALL, op),
        Primitive::Binary(op) => BINARY_BASE + index_of(&BinaryOp::ALL, op),
        Primitive::Compare(op) => CMP_BASE + index_of(&CmpOp::ALL, op),
        Primitive::Reduce { op, .. } => REDUCE_BASE + index_of(&REDUCE_OPS, op),
        Primitive::Matmul => OP_MATMUL,
        Primitive::Transpose { .. } => OP_TRANSPOSE,
        Primitive::Reshape { .. } => OP_RESHAPE,
        Primitive::BroadcastTo { .. } => OP_BROADCAST_TO,
        Primitive::Softmax { .. } => OP_SOFTMAX,
        Primitive::LogSoftmax { .. } => OP_LOG_SOFTMAX,
        Primitive::Powf { .. } => OP_POWF,
        Primitive::Cast { .. } => OP_CAST,
    }
}

fn encode_primitive(p: &Primitive) -> PbEncoder {
    let mut enc = PbEncoder::new();
    enc.write_varint_field(1, opcode(p) as u64);
    let dims: Vec<u64> = match p {
        Primitive::Reduce { dims, .. } => dims.iter().map(|d| *d as u64).collect(),
        Primitive::Transpose { dim0, dim1 } => vec![*dim0 as u64, *dim1 as u64],
        Primitive::Reshape { shape } | Primitive::BroadcastTo { shape } => {
            shape.dims().iter().map(|d| *d as u64).collect()
        }
        Primitive::Softmax { dim } | Primitive::LogSoftmax { dim } => vec![*dim as u64],
        _ => Vec::new(),
    };
    enc.write_packed_field(2, &dims);
    match p {
        Primitive::Reduce { keep_dim, .. } => enc.write_bool_field(3, *keep_dim),
        Primitive::Powf { exponent } => enc.write_double_field(5, *exponent),
        Primitive::Cast { dtype } => enc.write_varint_field(6, dtype.tag() as u64),
        _ => {}
    }
    enc
}

fn decode_primitive(data: &[u8]) -> Result<Primitive> {
    const MSG: &str = "Primitive";
    let mut dec = PbDecoder::new(data);
    let mut code = None;
    let mut dims = Vec::new();
    let mut keep_dim = false;
    let mut exponent = None;
    let mut dtype = None;
    while dec.remaining() > 0 {
        let (field, wire) = dec.read_tag()?;
        match field {
            1 => {
                expect_wire(wire, VARINT, MSG, "opcode")?;
                code = Some(dec.read_varint()?);
            }
            2 => dims.extend(to_usizes(dec.read_packed(wire)?)?),
            3 => {
                expect_wire(wire, VARINT, MSG, "keep_dim")?;
                keep_dim = dec.read_varint()? != 0;
            }
            5 => {
                expect_wire(wire, FIXED64, MSG, "exponent")?;
                exponent = Some(dec.read_double()?);
            }
            6 => {
                expect_wire(wire, VARINT, MSG, "dtype")?;
                dtype = Some(decode_dtype(dec.read_varint()?)?);
            }
            _ => dec.skip_field(wire)?,
        }
    }

    let code = to_u32(required(code, MSG, "opcode")?, "opcode")?;
    let single = |dims: &[usize]| -> Result<usize> {
        match dims {
            [d] => Ok(*d),
            _ => Err(Error::SchemaFieldMismatch {
                message: MSG,
                field: "dims",
            }),
        }
    };
    let primitive = match code {
        c if (UNARY_BASE..UNARY_BASE + 10).contains(&c) => {
            Primitive::Unary(UnaryOp::ALL[(c - UNARY_BASE) as usize])
        }
        c if (BINARY_BASE..BINARY_BASE + 4).contains(&c) => {
            Primitive::Binary(BinaryOp::ALL[(c - BINARY_BASE) as usize])
        }
        c if (CMP_BASE..CMP_BASE + 6).contains(&c) => {
            Primitive::Compare(CmpOp::ALL[(c - CMP_BASE) as usize])
        }
        c if (REDUCE_BASE..REDUCE_BASE + 6).contains(&c) => Primitive::Reduce {
            op: REDUCE_OPS[(c - REDUCE_BASE) as usize],
            dims,
            keep_dim,
        },
        OP_MATMUL => Primitive::Matmul,
        OP_TRANSPOSE => match dims.as_slice() {
            [dim0, dim1] => Primitive::Transpose {
                dim0: *dim0,
                dim1: *dim1,
            },
            _ => {
                return Err(Error::SchemaFieldMismatch {
                    message: MSG,
                    field: "dims",
                })
            }
        },
        OP_RESHAPE => Primitive::Reshape {
            shape: to_shape(dims)?,
        },
        OP_BROADCAST_TO => Primitive::BroadcastTo {
            shape: to_shape(dims)?,
        },
        OP_SOFTMAX => Primitive::Softmax { dim: single(&dims)? },
        OP_LOG_SOFTMAX => Primitive::LogSoftmax { dim: single(&dims)? },
        OP_POWF => Primitive::Powf {
            exponent: required(exponent, MSG, "exponent")?,
        },
        OP_CAST => Primitive::Cast {
            dtype: required(dtype, MSG, "dtype")?,
        },
        other => return Err(Error::CorruptEnvelope(format!("unknown opcode {}", other))),
    };
    Ok(primitive)
}

// Translation

pub(crate) fn encode_translation(t: &Translation) -> PbEncoder {
    let mut enc = PbEncoder::new();
    enc.write_varint_field(1, t.target.tag() as u64);
    enc.write_string_field(2, &t.source);
    enc
}

pub(crate) fn decode_translation(data: &[u8]) -> Result<Translation> {
    const MSG: &str = "Translation";
    let mut dec = PbDecoder::new(data);
    let mut target = None;
    let mut source = None;
    while dec.remaining() > 0 {
        let (field, wire) = dec.read_tag()?;
        match field {
            1 => {
                expect_wire(wire, VARINT, MSG, "target")?;
                let tag = dec.read_varint()?;
                let found = u32::try_from(tag).ok().and_then(Target::from_tag);
                target = Some(found.ok_or_else(|| {
                    Error::CorruptEnvelope(format!("unknown translation target {}", tag))
                })?);
            }
            2 => {
                expect_wire(wire, LEN, MSG, "source")?;
                source = Some(dec.read_string()?);
            }
            _ => dec.skip_field(wire)?,
        }
    }
    Ok(Translation {
        target: required(target, MSG, "target")?,
        source: required(source, MSG, "source")?,
    })
}
