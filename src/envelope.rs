//! Adapter for attestations delivered as `{ "attestation": "<base64>" }`.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{AttestError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationEnvelope {
    /// Standard base64 of the COSE_Sign1 bytes.
    pub attestation: String,
}

impl AttestationEnvelope {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| AttestError::InvalidEnvelope(e.to_string()))
    }

    pub fn from_bytes(raw: &[u8]) -> Self {
        Self {
            attestation: base64::engine::general_purpose::STANDARD.encode(raw),
        }
    }

    /// The decoded attestation bytes.
    pub fn decode(&self) -> Result<Vec<u8>> {
        decode_base64(&self.attestation)
    }
}

/// Decode standard base64, ignoring surrounding whitespace.
pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    Ok(base64::engine::general_purpose::STANDARD.decode(text.trim())?)
}
