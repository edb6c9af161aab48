//! COSE_Sign1 signature verification against the leaf certificate key.

use p384::ecdsa::{signature::Verifier, Signature};
use tracing::debug;
use x509_cert::certificate::Version;

use crate::chain::ParsedCertificate;
use crate::cose::CoseEnvelope;
use crate::error::{AttestError, Result};
use crate::types::PublicKeyXY;

/// Length of a raw `r || s` P-384 signature.
const ES384_SIGNATURE_LEN: usize = 96;

/// Check that the envelope is signed by the key in `leaf`.
pub fn verify_document_signature(envelope: &CoseEnvelope, leaf: &ParsedCertificate) -> Result<()> {
    // Expect v3
    if leaf.certificate().tbs_certificate.version != Version::V3 {
        return Err(AttestError::InvalidEndEntityCert);
    }

    match envelope.algorithm() {
        Some(coset::Algorithm::Assigned(coset::iana::Algorithm::ES384)) => {}
        other => {
            return Err(AttestError::SignatureVerificationFailed(format!(
                "unsupported algorithm {other:?}, expected ES384"
            )));
        }
    }

    let key = leaf
        .verifying_key()
        .map_err(AttestError::SignatureVerificationFailed)?;

    envelope.sign1().verify_signature(b"", |sig, data| {
        if sig.len() != ES384_SIGNATURE_LEN {
            return Err(AttestError::SignatureVerificationFailed(format!(
                "signature is {} bytes, expected {ES384_SIGNATURE_LEN}",
                sig.len()
            )));
        }
        let sig = Signature::from_slice(sig)
            .map_err(|e| AttestError::SignatureVerificationFailed(e.to_string()))?;
        key.verify(data, &sig).map_err(|_| {
            AttestError::SignatureVerificationFailed("signature mismatch".to_string())
        })
    })?;

    debug!("COSE_Sign1 signature verified");
    Ok(())
}

/// The leaf key as raw affine coordinates.
pub fn leaf_public_key_xy(leaf: &ParsedCertificate) -> Result<PublicKeyXY> {
    let key = leaf
        .verifying_key()
        .map_err(AttestError::SignatureVerificationFailed)?;
    let point = key.to_encoded_point(false);
    match (point.x(), point.y()) {
        (Some(x), Some(y)) => Ok(PublicKeyXY {
            x: x.to_vec(),
            y: y.to_vec(),
        }),
        _ => Err(AttestError::SignatureVerificationFailed(
            "leaf key is the identity point".to_string(),
        )),
    }
}
