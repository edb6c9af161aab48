//! COSE_Sign1 envelope handling.
//!
//! The NSM emits attestation documents as a tagged COSE_Sign1 structure:
//! `18([protected: bstr, unprotected: map, payload: bstr, signature: bstr])`.
//! Some producers strip the semantic tag, so an untagged input gets the tag
//! marker prepended before decoding.

use std::ops::Range;

use ciborium::Value;
use coset::{AsCborValue, CoseSign1};
use serde::{Deserialize, Serialize};

use crate::cbor;
use crate::error::{AttestError, Result};

/// CBOR tag assigned to COSE_Sign1.
pub const COSE_SIGN1_TAG: u64 = 18;

/// Initial byte of a CBOR item carrying tag 18 (major type 6, value 18).
const COSE_SIGN1_TAG_MARKER: u8 = 0xD2;

/// Head of a definite-length array of four items.
const ARRAY_OF_FOUR: u8 = 0x84;

/// Head of an empty map.
const EMPTY_MAP: u8 = 0xA0;

/// The four fields of a COSE_Sign1 envelope, retained verbatim.
#[derive(Clone, Debug)]
pub struct CoseEnvelope {
    /// The input with the tag marker in front, exactly as signed.
    tagged: Vec<u8>,
    /// Where the encoded unprotected header sits in `tagged`.
    unprotected_span: Range<usize>,
    protected: Vec<u8>,
    unprotected: Vec<(Value, Value)>,
    payload: Vec<u8>,
    signature: Vec<u8>,
    sign1: CoseSign1,
}

impl CoseEnvelope {
    /// Decode `raw` as a (possibly untagged) COSE_Sign1 envelope.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let tagged = with_tag_marker(raw);
        let value = cbor::decode(&tagged)?;

        let body = match value {
            Value::Tag(COSE_SIGN1_TAG, inner) => *inner,
            Value::Tag(tag, _) => return Err(AttestError::UnsupportedCborTag(tag)),
            other => {
                return Err(AttestError::InvalidCoseStructure(format!(
                    "expected tagged COSE_Sign1, found {}",
                    kind(&other)
                )));
            }
        };

        let items = match body {
            Value::Array(items) => items,
            Value::Tag(COSE_SIGN1_TAG, _) => {
                return Err(AttestError::InvalidCoseStructure("nested COSE_Sign1 tag".to_string()));
            }
            // Some other COSE type wrapped in the tag marker.
            Value::Tag(tag, _) => return Err(AttestError::UnsupportedCborTag(tag)),
            other => {
                return Err(AttestError::InvalidCoseStructure(format!(
                    "expected a 4 element array, found {}",
                    kind(&other)
                )));
            }
        };
        if items.len() != 4 {
            return Err(AttestError::InvalidCoseStructure(format!(
                "expected a 4 element array, found {} elements",
                items.len()
            )));
        }

        let protected = element_bytes(&items[0], "protected header")?.to_vec();
        let unprotected = items[1].as_map().cloned().ok_or_else(|| {
            AttestError::InvalidCoseStructure(format!(
                "unprotected header must be a map, found {}",
                kind(&items[1])
            ))
        })?;
        let payload = element_bytes(&items[2], "payload")?.to_vec();
        let signature = element_bytes(&items[3], "signature")?.to_vec();
        let unprotected_span = item_spans(&tagged)?[1].clone();

        let sign1 = CoseSign1::from_cbor_value(Value::Array(items))
            .map_err(|e| AttestError::InvalidCoseStructure(e.to_string()))?;

        Ok(Self {
            tagged,
            unprotected_span,
            protected,
            unprotected,
            payload,
            signature,
            sign1,
        })
    }

    pub fn protected_header(&self) -> &[u8] {
        &self.protected
    }

    pub fn unprotected_header(&self) -> &[(Value, Value)] {
        &self.unprotected
    }

    /// The unprotected header map as it was encoded on the wire.
    pub fn unprotected_header_bytes(&self) -> &[u8] {
        &self.tagged[self.unprotected_span.clone()]
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Algorithm declared in the protected header, if any.
    pub fn algorithm(&self) -> Option<&coset::Algorithm> {
        self.sign1.protected.header.alg.as_ref()
    }

    /// The `Sig_structure` the signer covered: `["Signature1", protected, h'', payload]`.
    pub fn sig_structure(&self) -> Vec<u8> {
        self.sign1.tbs_data(b"")
    }

    pub(crate) fn sign1(&self) -> &CoseSign1 {
        &self.sign1
    }

    /// Hex view of the four raw fields.
    pub fn raw_fields_hex(&self) -> RawFieldsHex {
        let unprotected = if self.unprotected.is_empty() {
            String::new()
        } else {
            hex::encode(self.unprotected_header_bytes())
        };
        RawFieldsHex {
            protected_header: hex::encode(&self.protected),
            unprotected_header: unprotected,
            raw_payload: hex::encode(&self.payload),
            signature: hex::encode(&self.signature),
        }
    }

    /// The envelope as tagged COSE_Sign1 bytes, byte for byte as received.
    pub fn tagged_bytes(&self) -> &[u8] {
        &self.tagged
    }
}

/// The raw COSE envelope fields as lowercase hex, for verifiers that
/// recompute the signature independently. An empty unprotected header is
/// rendered as an empty string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFieldsHex {
    pub protected_header: String,
    pub unprotected_header: String,
    pub raw_payload: String,
    pub signature: String,
}

impl RawFieldsHex {
    /// Rebuild the tagged COSE_Sign1 bytes these fields were taken from.
    ///
    /// The unprotected header is inserted as given. The three byte strings
    /// get shortest-form heads, which is how the NSM encodes them.
    pub fn to_cose_bytes(&self) -> Result<Vec<u8>> {
        let unprotected = if self.unprotected_header.is_empty() {
            vec![EMPTY_MAP]
        } else {
            let bytes = decode_hex(&self.unprotected_header, "unprotected header")?;
            match cbor::decode(&bytes)? {
                Value::Map(_) => bytes,
                other => {
                    return Err(AttestError::InvalidCoseStructure(format!(
                        "unprotected header must be a map, found {}",
                        kind(&other)
                    )));
                }
            }
        };

        let mut out = vec![COSE_SIGN1_TAG_MARKER, ARRAY_OF_FOUR];
        out.extend(byte_string(decode_hex(&self.protected_header, "protected header")?)?);
        out.extend(unprotected);
        out.extend(byte_string(decode_hex(&self.raw_payload, "payload")?)?);
        out.extend(byte_string(decode_hex(&self.signature, "signature")?)?);
        Ok(out)
    }
}

fn byte_string(bytes: Vec<u8>) -> Result<Vec<u8>> {
    cbor::encode(&Value::Bytes(bytes))
}

fn with_tag_marker(raw: &[u8]) -> Vec<u8> {
    if raw.first() == Some(&COSE_SIGN1_TAG_MARKER) {
        return raw.to_vec();
    }
    let mut tagged = Vec::with_capacity(raw.len() + 1);
    tagged.push(COSE_SIGN1_TAG_MARKER);
    tagged.extend_from_slice(raw);
    tagged
}

/// Byte ranges of the four encoded envelope items inside `tagged`.
fn item_spans(tagged: &[u8]) -> Result<[Range<usize>; 4]> {
    // Past the tag marker and the array head.
    let mut offset = 1;
    let (major, _) = cbor::read_header(tagged, &mut offset)?;
    if major != 4 {
        return Err(AttestError::InvalidCoseStructure(format!(
            "expected an array head, found major type {major}"
        )));
    }

    let mut spans: [Range<usize>; 4] = Default::default();
    for span in &mut spans {
        let start = offset;
        offset += cbor::item_len(&tagged[start..])?;
        *span = start..offset;
    }
    Ok(spans)
}

fn element_bytes<'a>(value: &'a Value, what: &str) -> Result<&'a [u8]> {
    value.as_bytes().map(Vec::as_slice).ok_or_else(|| {
        AttestError::InvalidCoseStructure(format!(
            "{what} must be a byte string, found {}",
            kind(value)
        ))
    })
}

fn decode_hex(s: &str, what: &str) -> Result<Vec<u8>> {
    hex::decode(s).map_err(|e| AttestError::InvalidCoseStructure(format!("{what}: {e}")))
}

pub(crate) fn kind(value: &Value) -> &'static str {
    match value {
        Value::Integer(_) => "integer",
        Value::Bytes(_) => "byte string",
        Value::Float(_) => "float",
        Value::Text(_) => "text string",
        Value::Bool(_) => "bool",
        Value::Null => "null",
        Value::Tag(..) => "tag",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        _ => "unknown item",
    }
}
