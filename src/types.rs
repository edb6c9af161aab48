//! Value types shared across the validator.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use sha2::Digest as _;

use crate::binding::InstanceBinding;
use crate::error::AttestError;

/// Digest algorithm declared by an attestation document. Nitro only emits
/// SHA-384.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Digest {
    #[serde(rename = "SHA384")]
    Sha384,
}

impl Digest {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sha384 => "SHA384",
        }
    }

    /// Output length in bytes.
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Sha384 => 48,
        }
    }

    /// Hash the concatenation of `parts`.
    pub fn hash(&self, parts: &[&[u8]]) -> Vec<u8> {
        match self {
            Self::Sha384 => {
                let mut hasher = sha2::Sha384::new();
                for part in parts {
                    hasher.update(part);
                }
                hasher.finalize().to_vec()
            }
        }
    }
}

impl FromStr for Digest {
    type Err = AttestError;

    // NSM digest names are upper case only.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SHA384" => Ok(Self::Sha384),
            other => Err(AttestError::InvalidDigest(other.to_string())),
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a PCR slot measures, per the Nitro Enclaves documentation.
pub fn pcr_description(index: u8) -> &'static str {
    match index {
        0 => "Enclave image file",
        1 => "Linux kernel and bootstrap",
        2 => "Application",
        3 => "IAM role assigned to the parent instance",
        4 => "Instance ID of the parent instance",
        8 => "Enclave image file signing certificate",
        _ => "<UNUSED>",
    }
}

/// Uncompressed P-384 point as raw affine coordinates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PublicKeyXY {
    #[serde(serialize_with = "hex::serialize")]
    pub x: Vec<u8>,
    #[serde(serialize_with = "hex::serialize")]
    pub y: Vec<u8>,
}

impl PublicKeyXY {
    /// `0x` followed by hex(x) and hex(y), the form on-chain verifiers take.
    pub fn to_hex_string(&self) -> String {
        format!("0x{}{}", hex::encode(&self.x), hex::encode(&self.y))
    }
}

impl fmt::Display for PublicKeyXY {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex_string())
    }
}

/// The identity a successfully validated document vouches for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerIdentity {
    /// The attested application key. Empty when the document carried none.
    #[serde(serialize_with = "hex::serialize")]
    pub public_key: Vec<u8>,
    /// Key of the leaf certificate that signed the document.
    pub signing_key: PublicKeyXY,
    pub module_id: String,
    pub timestamp: u64,
    #[serde(serialize_with = "opt_hex")]
    pub user_data: Option<Vec<u8>>,
    #[serde(serialize_with = "opt_hex")]
    pub nonce: Option<Vec<u8>>,
    pub instance_binding: InstanceBinding,
}

impl SignerIdentity {
    /// The attested key as text, when the producer stored a textual key.
    pub fn public_key_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.public_key).ok()
    }
}

/// Per-step outcome of validating a document that parsed cleanly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// The document as tagged COSE_Sign1 bytes.
    #[serde(serialize_with = "hex::serialize")]
    pub signed_attestation_bytes: Vec<u8>,
    pub public_key_xy: Option<PublicKeyXY>,
    pub instance_binding_ok: bool,
    pub chain_valid: bool,
    pub signature_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_error: Option<String>,
    pub instance_binding: InstanceBinding,
}

impl ValidationReport {
    /// True when the chain and the document signature both verified.
    pub fn is_trusted(&self) -> bool {
        self.chain_valid && self.signature_valid
    }
}

fn opt_hex<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn digest_parse_is_case_sensitive() {
        assert_eq!("SHA384".parse::<Digest>().unwrap(), Digest::Sha384);
        for bad in ["sha384", "SHA512", "SHA256", ""] {
            assert_eq!(
                bad.parse::<Digest>().unwrap_err(),
                AttestError::InvalidDigest(bad.to_string())
            );
        }
    }

    #[test]
    fn digest_hash_concatenates_parts() {
        let split = Digest::Sha384.hash(&[b"ab".as_slice(), b"c".as_slice()]);
        let whole = Digest::Sha384.hash(&[b"abc".as_slice()]);
        assert_eq!(split, whole);
        assert_eq!(
            whole,
            hex!("cb00753f45a35e8bb5a03d699ac65007272c32ab0eded1631a8b605a43ff5bed8086072ba1e7cc2358baeca134c825a7").to_vec()
        );
    }

    #[test]
    fn public_key_hex_string() {
        let key = PublicKeyXY {
            x: vec![0xab, 0x01],
            y: vec![0x02, 0xcd],
        };
        assert_eq!(key.to_hex_string(), "0xab0102cd");
    }

    #[test]
    fn pcr_descriptions() {
        assert_eq!(pcr_description(4), "Instance ID of the parent instance");
        assert_eq!(pcr_description(5), "<UNUSED>");
    }
}
