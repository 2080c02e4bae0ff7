// Codec — Plan <-> binary envelope
//
// LAYOUT:
//
//   "BPLN"                magic, 4 raw bytes
//   field 1  version      varint, always first
//   field 2  plan         Plan message (IR, state values, metadata)
//   field 3  translation  optional Translation message
//
// The version is checked before anything else is decoded, so an envelope
// from a newer schema fails with UnsupportedSchemaVersion rather than some
// unrelated error from a field it happens to trip over. Within a version,
// schema evolution is additive: new fields get new numbers and older
// decoders skip them.
//
// Decoding is all-or-nothing: the decoded parts are assembled and validated
// as a Plan before anything is returned. A structurally invalid plan is a
// CorruptEnvelope.
//
// The translation rides alongside the plan as opaque text. Decoding never
// re-translates it and replay never reads it.

mod schema;
mod tensor;
mod wire;

use base64::Engine;
use burrow_core::{Error, Result};

use crate::plan::Plan;
use crate::translate::Translation;
use schema::{decode_plan, decode_translation, encode_plan, encode_translation};
use wire::{PbDecoder, PbEncoder, LEN, VARINT};

/// Envelope magic prefix.
pub const MAGIC: &[u8; 4] = b"BPLN";

/// The schema version this build writes, and the newest it reads.
pub const SCHEMA_VERSION: u64 = 1;

/// Envelope size limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecConfig {
    /// Largest envelope `encode` will produce and `decode` will accept.
    pub max_envelope_bytes: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_envelope_bytes: 1 << 30,
        }
    }
}

impl CodecConfig {
    pub fn with_max_envelope_bytes(mut self, n: usize) -> Self {
        self.max_envelope_bytes = n;
        self
    }
}

/// Encoder/decoder for plan envelopes.
#[derive(Debug, Clone, Default)]
pub struct Codec {
    config: CodecConfig,
}

impl Codec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn encode(&self, plan: &Plan) -> Result<Vec<u8>> {
        self.encode_envelope(plan, None)
    }

    /// Encode with a translation riding alongside the plan.
    pub fn encode_with_translation(&self, plan: &Plan, translation: &Translation) -> Result<Vec<u8>> {
        self.encode_envelope(plan, Some(translation))
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Plan> {
        self.decode_envelope(bytes).map(|(plan, _)| plan)
    }

    /// Decode the plan and the translation it carries, if any.
    pub fn decode_envelope(&self, bytes: &[u8]) -> Result<(Plan, Option<Translation>)> {
        if bytes.len() > self.config.max_envelope_bytes {
            return Err(Error::CorruptEnvelope(format!(
                "envelope of {} bytes exceeds the {} byte limit",
                bytes.len(),
                self.config.max_envelope_bytes
            )));
        }
        let body = bytes
            .strip_prefix(MAGIC.as_slice())
            .ok_or_else(|| Error::CorruptEnvelope("missing BPLN magic".to_string()))?;

        let mut dec = PbDecoder::new(body);
        if dec.remaining() == 0 {
            return Err(Error::SchemaFieldMismatch {
                message: "Envelope",
                field: "version",
            });
        }
        match dec.read_tag()? {
            (1, VARINT) => {}
            _ => {
                return Err(Error::SchemaFieldMismatch {
                    message: "Envelope",
                    field: "version",
                })
            }
        }
        let version = dec.read_varint()?;
        if version == 0 {
            return Err(Error::CorruptEnvelope(
                "schema version 0 was never written".to_string(),
            ));
        }
        if version > SCHEMA_VERSION {
            return Err(Error::UnsupportedSchemaVersion {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }

        let mut plan = None;
        let mut translation = None;
        while dec.remaining() > 0 {
            let (field, wire) = dec.read_tag()?;
            match (field, wire) {
                (2, LEN) => plan = Some(decode_plan(dec.read_bytes()?)?),
                (3, LEN) => translation = Some(decode_translation(dec.read_bytes()?)?),
                (2, _) => {
                    return Err(Error::SchemaFieldMismatch {
                        message: "Envelope",
                        field: "plan",
                    })
                }
                (3, _) => {
                    return Err(Error::SchemaFieldMismatch {
                        message: "Envelope",
                        field: "translation",
                    })
                }
                _ => dec.skip_field(wire)?,
            }
        }
        let plan = plan.ok_or(Error::SchemaFieldMismatch {
            message: "Envelope",
            field: "plan",
        })?;
        log::debug!(
            "decoded plan '{}' from {} byte envelope ({} op(s), translation: {})",
            plan.name(),
            bytes.len(),
            plan.ops().len(),
            translation
                .as_ref()
                .map(|t: &Translation| t.target.name())
                .unwrap_or("none")
        );
        Ok((plan, translation))
    }

    /// Encode and wrap in standard base64 for text-only channels.
    pub fn encode_base64(&self, plan: &Plan) -> Result<String> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.encode(plan)?))
    }

    pub fn decode_base64(&self, text: &str) -> Result<Plan> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(text.trim())
            .map_err(|e| Error::CorruptEnvelope(format!("invalid base64: {}", e)))?;
        self.decode(&bytes)
    }

    fn encode_envelope(&self, plan: &Plan, translation: Option<&Translation>) -> Result<Vec<u8>> {
        let mut enc = PbEncoder::new();
        enc.write_raw(MAGIC);
        enc.write_varint_field(1, SCHEMA_VERSION);
        enc.write_message_field(2, &encode_plan(plan));
        if let Some(t) = translation {
            enc.write_message_field(3, &encode_translation(t));
        }
        let bytes = enc.into_bytes();
        if bytes.len() > self.config.max_envelope_bytes {
            return Err(Error::EnvelopeConstruction(format!(
                "envelope of {} bytes exceeds the {} byte limit",
                bytes.len(),
                self.config.max_envelope_bytes
            )));
        }
        log::debug!(
            "encoded plan '{}' into {} byte envelope",
            plan.name(),
            bytes.len()
        );
        Ok(bytes)
    }
}

/// Encode with the default config.
pub fn encode(plan: &Plan) -> Result<Vec<u8>> {
    Codec::default().encode(plan)
}

/// Decode with the default config.
pub fn decode(bytes: &[u8]) -> Result<Plan> {
    Codec::default().decode(bytes)
}

pub fn encode_base64(plan: &Plan) -> Result<String> {
    Codec::default().encode_base64(plan)
}

pub fn decode_base64(text: &str) -> Result<Plan> {
    Codec::default().decode_base64(text)
}
