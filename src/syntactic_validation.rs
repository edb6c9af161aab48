//! Per-field bounds checks for the attestation payload.
//!
//! Limits follow the NSM attestation document specification:
//! <https://github.com/aws/aws-nitro-enclaves-nsm-api/blob/main/docs/attestation_process.md#31-syntactical-validation>

use std::collections::BTreeMap;

use ciborium::Value;

use crate::cbor;
use crate::error::{AttestError, Result};
use crate::types::Digest;

const MAX_PCRS: usize = 32;
const PCR_LENGTHS: [usize; 3] = [32, 48, 64];
const MAX_CERT_LEN: usize = 1024;
const MAX_PUBLIC_KEY_LEN: usize = 1024;
const MAX_USER_DATA_LEN: usize = 512;
const MAX_NONCE_LEN: usize = 512;

/// Mandatory field
pub(crate) fn module_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(AttestError::InvalidModuleId);
    }
    Ok(())
}

/// Mandatory field
pub(crate) fn digest(name: &str) -> Result<Digest> {
    name.parse()
}

/// Mandatory field
pub(crate) fn timestamp(ms: u64) -> Result<()> {
    if ms == 0 {
        return Err(AttestError::InvalidTimestamp);
    }
    Ok(())
}

/// Mandatory field. Returns the registers keyed by index.
pub(crate) fn pcrs(entries: &[(Value, Value)]) -> Result<BTreeMap<u8, Vec<u8>>> {
    if entries.is_empty() || entries.len() > MAX_PCRS {
        return Err(AttestError::InvalidPcrCount(entries.len()));
    }

    let mut out = BTreeMap::new();
    for (key, value) in entries {
        let index = key
            .as_integer()
            .and_then(|i| u8::try_from(i).ok())
            .filter(|i| usize::from(*i) < MAX_PCRS)
            .ok_or_else(|| AttestError::InvalidPcrIndex(render_key(key)))?;

        let measurement = cbor::as_bytes(value, "pcrs")?;
        if !PCR_LENGTHS.contains(&measurement.len()) {
            return Err(AttestError::InvalidPcrLength {
                index,
                len: measurement.len(),
            });
        }
        if out.insert(index, measurement.to_vec()).is_some() {
            return Err(AttestError::DuplicateField(format!("pcrs[{index}]")));
        }
    }
    Ok(out)
}

/// Mandatory field. Entries are returned in received order.
pub(crate) fn cabundle(entries: &[Value]) -> Result<Vec<Vec<u8>>> {
    if entries.is_empty() {
        return Err(AttestError::EmptyCaBundle);
    }
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let der = cbor::as_bytes(entry, "cabundle")?;
            if der.is_empty() || der.len() > MAX_CERT_LEN {
                return Err(AttestError::InvalidCaBundleEntry {
                    index,
                    len: der.len(),
                });
            }
            Ok(der.to_vec())
        })
        .collect()
}

/// Mandatory field
pub(crate) fn certificate(der: &[u8]) -> Result<()> {
    if der.is_empty() {
        return Err(AttestError::EmptyCertificate);
    }
    Ok(())
}

/// Optional field
pub(crate) fn public_key(key: Option<&[u8]>) -> Result<()> {
    bounded(key, MAX_PUBLIC_KEY_LEN, AttestError::InvalidPublicKey)
}

/// Optional field
pub(crate) fn user_data(data: Option<&[u8]>) -> Result<()> {
    bounded(data, MAX_USER_DATA_LEN, AttestError::InvalidUserData)
}

/// Optional field
pub(crate) fn nonce(nonce: Option<&[u8]>) -> Result<()> {
    bounded(nonce, MAX_NONCE_LEN, AttestError::InvalidNonce)
}

fn bounded(field: Option<&[u8]>, max: usize, err: fn(usize) -> AttestError) -> Result<()> {
    match field {
        Some(bytes) if bytes.is_empty() || bytes.len() > max => Err(err(bytes.len())),
        _ => Ok(()),
    }
}

fn render_key(key: &Value) -> String {
    match key.as_integer() {
        Some(i) => i128::from(i).to_string(),
        None => format!("<{}>", crate::cose::kind(key)),
    }
}
