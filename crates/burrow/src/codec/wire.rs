// Minimal protobuf wire format
//
// Only the wire types the envelope uses:
//
//   0  varint             (ids, dims, tags, flags)
//   1  fixed64            (f64 parameters)
//   2  length-delimited   (strings, bytes, nested messages)
//
// Fixed32 (5) is never written but can be skipped, so envelopes from a
// future schema with extra fields still decode.
//
// REFERENCE: https://protobuf.dev/programming-guides/encoding/

use burrow_core::{Error, Result};

pub(crate) const VARINT: u32 = 0;
pub(crate) const FIXED64: u32 = 1;
pub(crate) const LEN: u32 = 2;
pub(crate) const FIXED32: u32 = 5;

fn corrupt(reason: &str) -> Error {
    Error::CorruptEnvelope(reason.to_string())
}

pub(crate) struct PbEncoder {
    buf: Vec<u8>,
}

impl PbEncoder {
    pub(crate) fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub(crate) fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn write_varint(&mut self, mut val: u64) {
        loop {
            let byte = (val & 0x7F) as u8;
            val >>= 7;
            if val == 0 {
                self.buf.push(byte);
                break;
            } else {
                self.buf.push(byte | 0x80);
            }
        }
    }

    /// Field tag: `field_number << 3 | wire_type`.
    fn write_tag(&mut self, field: u32, wire_type: u32) {
        self.write_varint(((field as u64) << 3) | wire_type as u64);
    }

    pub(crate) fn write_varint_field(&mut self, field: u32, val: u64) {
        self.write_tag(field, VARINT);
        self.write_varint(val);
    }

    pub(crate) fn write_bool_field(&mut self, field: u32, val: bool) {
        self.write_varint_field(field, val as u64);
    }

    pub(crate) fn write_double_field(&mut self, field: u32, val: f64) {
        self.write_tag(field, FIXED64);
        self.buf.extend_from_slice(&val.to_bits().to_le_bytes());
    }

    pub(crate) fn write_bytes_field(&mut self, field: u32, data: &[u8]) {
        self.write_tag(field, LEN);
        self.write_varint(data.len() as u64);
        self.buf.extend_from_slice(data);
    }

    pub(crate) fn write_string_field(&mut self, field: u32, val: &str) {
        self.write_bytes_field(field, val.as_bytes());
    }

    pub(crate) fn write_message_field(&mut self, field: u32, encoder: &PbEncoder) {
        self.write_bytes_field(field, &encoder.buf);
    }

    /// Repeated varints as one packed field. Empty lists write nothing.
    pub(crate) fn write_packed_field(&mut self, field: u32, values: &[u64]) {
        if values.is_empty() {
            return;
        }
        let mut packed = PbEncoder::new();
        for v in values {
            packed.write_varint(*v);
        }
        self.write_message_field(field, &packed);
    }
}

pub(crate) struct PbDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PbDecoder<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub(crate) fn read_varint(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or_else(|| corrupt("unexpected end of data"))?;
            self.pos += 1;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift > 63 {
                return Err(corrupt("varint too long"));
            }
        }
        Ok(result)
    }

    pub(crate) fn read_tag(&mut self) -> Result<(u32, u32)> {
        let val = self.read_varint()?;
        let field = u32::try_from(val >> 3).map_err(|_| corrupt("field number out of range"))?;
        let wire_type = (val & 0x7) as u32;
        Ok((field, wire_type))
    }

    pub(crate) fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| corrupt("length out of range"))?;
        if len > self.remaining() {
            return Err(corrupt("length-delimited field exceeds data"));
        }
        let result = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(result)
    }

    pub(crate) fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| corrupt("invalid UTF-8 string"))
    }

    pub(crate) fn read_double(&mut self) -> Result<f64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_bits(u64::from_le_bytes(raw)))
    }

    /// A packed field of varints (or a single unpacked one).
    pub(crate) fn read_packed(&mut self, wire_type: u32) -> Result<Vec<u64>> {
        match wire_type {
            VARINT => Ok(vec![self.read_varint()?]),
            LEN => {
                let mut sub = PbDecoder::new(self.read_bytes()?);
                let mut values = Vec::new();
                while sub.remaining() > 0 {
                    values.push(sub.read_varint()?);
                }
                Ok(values)
            }
            _ => Err(corrupt("packed field has the wrong wire type")),
        }
    }

    pub(crate) fn skip_field(&mut self, wire_type: u32) -> Result<()> {
        match wire_type {
            VARINT => {
                self.read_varint()?;
            }
            FIXED64 => {
                self.take(8)?;
            }
            LEN => {
                self.read_bytes()?;
            }
            FIXED32 => {
                self.take(4)?;
            }
            _ => return Err(corrupt(&format!("unsupported wire type {}", wire_type))),
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(corrupt("fixed-width field exceeds data"));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }
}
