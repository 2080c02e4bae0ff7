// Tensor message
//
//   1  dtype   varint (DType::tag)
//   2  dims    packed varints; absent for rank 0
//   3  data    little-endian elements at the dtype's native width
//
// Values are stored at their declared width, so a decoded tensor is
// bit-identical to the encoded one.

use burrow_core::{DType, Error, Result, Shape, Tensor, WithDType};

use super::wire::{PbDecoder, PbEncoder, LEN, VARINT};

pub(crate) fn encode_tensor(t: &Tensor) -> PbEncoder {
    let mut enc = PbEncoder::new();
    enc.write_varint_field(1, t.dtype().tag() as u64);
    let dims: Vec<u64> = t.dims().iter().map(|d| *d as u64).collect();
    enc.write_packed_field(2, &dims);
    enc.write_bytes_field(3, &to_le_bytes(t.values(), t.dtype()));
    enc
}

pub(crate) fn decode_tensor(data: &[u8]) -> Result<Tensor> {
    let mut dec = PbDecoder::new(data);
    let mut dtype = None;
    let mut dims = Vec::new();
    let mut raw: Option<&[u8]> = None;
    while dec.remaining() > 0 {
        let (field, wire_type) = dec.read_tag()?;
        match (field, wire_type) {
            (1, VARINT) => {
                let tag = dec.read_varint()?;
                let found = u32::try_from(tag).ok().and_then(DType::from_tag);
                dtype = Some(found.ok_or_else(|| {
                    Error::CorruptEnvelope(format!("unknown dtype tag {}", tag))
                })?);
            }
            (2, VARINT) | (2, LEN) => {
                for d in dec.read_packed(wire_type)? {
                    dims.push(usize::try_from(d).map_err(|_| {
                        Error::CorruptEnvelope(format!("dimension {} out of range", d))
                    })?);
                }
            }
            (3, LEN) => raw = Some(dec.read_bytes()?),
            (1, _) | (2, _) | (3, _) => {
                return Err(Error::SchemaFieldMismatch {
                    message: "Tensor",
                    field: field_name(field),
                })
            }
            _ => dec.skip_field(wire_type)?,
        }
    }

    let dtype = dtype.ok_or(Error::SchemaFieldMismatch {
        message: "Tensor",
        field: "dtype",
    })?;
    let raw = raw.ok_or(Error::SchemaFieldMismatch {
        message: "Tensor",
        field: "data",
    })?;
    let count = dims
        .iter()
        .try_fold(1usize, |acc, d| acc.checked_mul(*d))
        .ok_or_else(|| Error::CorruptEnvelope("tensor element count overflows".to_string()))?;
    let expected = count.checked_mul(dtype.size_in_bytes());
    if expected != Some(raw.len()) {
        return Err(Error::CorruptEnvelope(format!(
            "tensor {:?} {} needs {} data byte(s), found {}",
            dims,
            dtype,
            count.saturating_mul(dtype.size_in_bytes()),
            raw.len()
        )));
    }

    let values = from_le_bytes(raw, dtype, count)?;
    Tensor::from_vec(values, Shape::from(dims), dtype)
}

fn field_name(field: u32) -> &'static str {
    match field {
        1 => "dtype",
        2 => "dims",
        _ => "data",
    }
}

fn to_le_bytes(values: &[f64], dtype: DType) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * dtype.size_in_bytes());
    for &v in values {
        match dtype {
            DType::F16 => out.extend_from_slice(&half::f16::from_f64(v).to_bits().to_le_bytes()),
            DType::BF16 => out.extend_from_slice(&half::bf16::from_f64(v).to_bits().to_le_bytes()),
            DType::F32 => out.extend_from_slice(&(v as f32).to_le_bytes()),
            DType::F64 => out.extend_from_slice(&v.to_le_bytes()),
            DType::U8 => out.push(v as u8),
            DType::U32 => out.extend_from_slice(&(v as u32).to_le_bytes()),
            DType::I64 => out.extend_from_slice(&(v as i64).to_le_bytes()),
        }
    }
    out
}

fn from_le_bytes(raw: &[u8], dtype: DType, count: usize) -> Result<Vec<f64>> {
    let mut values = Vec::new();
    values.try_reserve_exact(count).map_err(|e| {
        Error::EnvelopeConstruction(format!("cannot allocate {} element(s): {}", count, e))
    })?;
    for chunk in raw.chunks_exact(dtype.size_in_bytes()) {
        let v = match dtype {
            DType::F16 => half::f16::from_bits(u16::from_le_bytes([chunk[0], chunk[1]])).to_f64(),
            DType::BF16 => {
                half::bf16::from_bits(u16::from_le_bytes([chunk[0], chunk[1]])).to_f64()
            }
            DType::F32 => f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
            DType::F64 => f64::from_le_bytes([
                chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
            ]),
            DType::U8 => chunk[0] as f64,
            DType::U32 => u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
            DType::I64 => {
                let i = i64::from_le_bytes([
                    chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
                ]);
                i.to_f64_exact().ok_or_else(|| {
                    Error::CorruptEnvelope(format!("i64 element {} is out of range", i))
                })?
            }
        };
        values.push(v);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(t: &Tensor) -> Tensor {
        decode_tensor(&encode_tensor(t).into_bytes()).unwrap()
    }

    #[test]
    fn test_tensor_bits_preserved() {
        let t = Tensor::from_f64_slice(&[0.1, -0.0, f64::INFINITY, 3.5], (2, 2), DType::F32).unwrap();
        assert_eq!(roundtrip(&t), t);
        let h = Tensor::from_f64_slice(&[0.1, 65504.0], 2, DType::F16).unwrap();
        assert_eq!(roundtrip(&h), h);
        let i = Tensor::from_f64_slice(&[-7.0, 1e15], 2, DType::I64).unwrap();
        assert_eq!(roundtrip(&i), i);
    }

    #[test]
    fn test_scalar_and_empty() {
        let s = Tensor::scalar(2.5, DType::BF16);
        assert_eq!(roundtrip(&s).dims(), &[] as &[usize]);
        let e = Tensor::zeros((0, 3), DType::U8);
        let back = roundtrip(&e);
        assert_eq!(back.dims(), &[0, 3]);
        assert_eq!(back.elem_count(), 0);
    }

    #[test]
    fn test_data_length_checked() {
        let mut enc = PbEncoder::new();
        enc.write_varint_field(1, DType::F32.tag() as u64);
        enc.write_packed_field(2, &[3]);
        enc.write_bytes_field(3, &[0u8; 8]);
        let err = decode_tensor(&enc.into_bytes()).unwrap_err();
        assert!(matches!(err, Error::CorruptEnvelope(_)));
    }

    #[test]
    fn test_i64_extremes() {
        let edge = (1i64 << 53) - 1;
        let t = Tensor::from_slice(&[edge, -edge], 2).unwrap();
        let back = roundtrip(&t);
        assert_eq!(back, t);
        assert_eq!(back.values()[0] as i64, edge);

        let mut raw = Vec::new();
        raw.extend_from_slice(&((1i64 << 53) + 1).to_le_bytes());
        let mut enc = PbEncoder::new();
        enc.write_varint_field(1, DType::I64.tag() as u64);
        enc.write_packed_field(2, &[1]);
        enc.write_bytes_field(3, &raw);
        let err = decode_tensor(&enc.into_bytes()).unwrap_err();
        assert!(matches!(err, Error::CorruptEnvelope(_)));
    }

    #[test]
    fn test_missing_dtype() {
        let mut enc = PbEncoder::new();
        enc.write_bytes_field(3, &[]);
        let err = decode_tensor(&enc.into_bytes()).unwrap_err();
        assert!(matches!(
            err,
            Error::SchemaFieldMismatch {
                field: "dtype",
                ..
            }
        ));
    }
}
