//! Fixtures shared by the integration tests.
#![allow(dead_code)]

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ciborium::Value;
use hex_literal::hex;
use nitro_attestation_validator::envelope::decode_base64;
use nitro_attestation_validator::{Digest, TrustedRoot};
use p384::ecdsa::{signature::Signer, Signature, SigningKey};

/// Private scalar of `test_leaf.der` and `test_leaf_expired.der`.
pub const LEAF_SCALAR: [u8; 48] = hex!(
    "fe3e85fe9b000fb96be32fc94cf7e42a74d8cbcca878e4853425be48b0d008907b72237aa8e93cec24bef51d7041912e"
);
pub const LEAF_X: [u8; 48] = hex!(
    "ac576abb5233cb85f6407da533db3480925520b6fe45cbad6af081a8c8373afd87443126ff332a1487e0eac5c7dac018"
);
pub const LEAF_Y: [u8; 48] = hex!(
    "699d3b185b0f9dc312b3717d2d7073431cfff2e3fcc9d40c7399654204128e795196d842674c9c0c9e7e85b8b56e272b"
);

/// `{1: -35}`, alg ES384.
pub const ES384_PROTECTED: [u8; 4] = hex!("a1013822");

pub const MODULE_ID: &str = "i-0123456789abcdef0-abcdef0123456789";
pub const INSTANCE_ID: &str = "i-0123456789abcdef0";

/// 2025-01-01T00:00:00Z, inside every synthetic certificate's window except
/// the expired leaf.
pub const IN_WINDOW_SECS: u64 = 1_735_689_600;

/// `timestamp` of the genuine sample document, in milliseconds.
pub const SAMPLE_TIMESTAMP_MS: u64 = 1_721_159_587_239;
pub const SAMPLE_MODULE_ID: &str = "i-059e862454f4a8d8f-enc0190a2f1964172e6";

pub fn data_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

pub fn read_data(name: &str) -> Vec<u8> {
    std::fs::read(data_path(name)).unwrap()
}

/// The genuine Nitro document as the NSM returned it (no leading tag).
pub fn sample_document() -> Vec<u8> {
    let text = String::from_utf8(read_data("nitro_attestation.b64")).unwrap();
    decode_base64(&text).unwrap()
}

pub fn sample_time() -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(SAMPLE_TIMESTAMP_MS)
}

pub fn in_window() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(IN_WINDOW_SECS)
}

pub fn aws_root() -> TrustedRoot {
    TrustedRoot::aws_nitro().unwrap()
}

pub fn test_root() -> TrustedRoot {
    TrustedRoot::from_der(&read_data("test_root.der")).unwrap()
}

pub fn other_root() -> TrustedRoot {
    TrustedRoot::from_der(&read_data("test_other_root.der")).unwrap()
}

/// The received-order bundle for the synthetic chain: root first.
pub fn test_cabundle() -> Vec<Vec<u8>> {
    vec![
        read_data("test_root.der"),
        read_data("test_intermediate_a.der"),
        read_data("test_intermediate_b.der"),
    ]
}

pub fn instance_pcr(instance_id: &str) -> Vec<u8> {
    Digest::Sha384.hash(&[&[0u8; 48][..], instance_id.as_bytes()])
}

/// Builds attestation documents signed by the synthetic leaf key.
#[derive(Clone)]
pub struct DocBuilder {
    fields: Vec<(String, Value)>,
    protected: Vec<u8>,
    signing_key: SigningKey,
}

impl DocBuilder {
    pub fn new() -> Self {
        let mut pcrs = vec![
            (Value::Integer(0.into()), Value::Bytes(vec![0x11; 48])),
            (Value::Integer(1.into()), Value::Bytes(vec![0x22; 48])),
            (Value::Integer(2.into()), Value::Bytes(vec![0x33; 48])),
        ];
        pcrs.push((Value::Integer(4.into()), Value::Bytes(instance_pcr(INSTANCE_ID))));

        let builder = Self {
            fields: Vec::new(),
            protected: ES384_PROTECTED.to_vec(),
            signing_key: SigningKey::from_slice(&LEAF_SCALAR).unwrap(),
        };
        builder
            .set("module_id", Value::Text(MODULE_ID.to_string()))
            .set("digest", Value::Text("SHA384".to_string()))
            .set("timestamp", Value::Integer((IN_WINDOW_SECS * 1000).into()))
            .set("pcrs", Value::Map(pcrs))
            .certificate(read_data("test_leaf.der"))
            .cabundle(test_cabundle())
            .set("public_key", Value::Bytes(b"0x04-test-signer".to_vec()))
            .set("user_data", Value::Bytes(vec![0xab; 32]))
            .set("nonce", Value::Null)
    }

    /// Insert or replace a payload field.
    pub fn set(mut self, name: &str, value: Value) -> Self {
        match self.fields.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((name.to_string(), value)),
        }
        self
    }

    pub fn remove(mut self, name: &str) -> Self {
        self.fields.retain(|(k, _)| k != name);
        self
    }

    pub fn certificate(self, der: Vec<u8>) -> Self {
        self.set("certificate", Value::Bytes(der))
    }

    pub fn cabundle(self, certs: Vec<Vec<u8>>) -> Self {
        self.set(
            "cabundle",
            Value::Array(certs.into_iter().map(Value::Bytes).collect()),
        )
    }

    /// PCRs `0..count`, each `len` bytes.
    pub fn pcrs(self, count: u64, len: usize) -> Self {
        let pcrs = (0..count)
            .map(|i| (Value::Integer(i.into()), Value::Bytes(vec![0x5a; len])))
            .collect();
        self.set("pcrs", Value::Map(pcrs))
    }

    pub fn protected(mut self, protected: &[u8]) -> Self {
        self.protected = protected.to_vec();
        self
    }

    pub fn signing_key(mut self, key: SigningKey) -> Self {
        self.signing_key = key;
        self
    }

    pub fn payload(&self) -> Vec<u8> {
        let map = Value::Map(
            self.fields
                .iter()
                .map(|(k, v)| (Value::Text(k.clone()), v.clone()))
                .collect(),
        );
        encode(&map)
    }

    /// Tagged COSE_Sign1 bytes.
    pub fn build(&self) -> Vec<u8> {
        self.sign_payload(self.payload())
    }

    /// Raw `r || s` signature over the `Sig_structure` for `payload`.
    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let sig_structure = Value::Array(vec![
            Value::Text("Signature1".to_string()),
            Value::Bytes(self.protected.clone()),
            Value::Bytes(Vec::new()),
            Value::Bytes(payload.to_vec()),
        ]);
        let signature: Signature = self.signing_key.sign(&encode(&sig_structure));
        signature.to_bytes().to_vec()
    }

    /// Sign an arbitrary payload with this builder's header and key.
    pub fn sign_payload(&self, payload: Vec<u8>) -> Vec<u8> {
        let signature = self.sign(&payload);
        let body = Value::Array(vec![
            Value::Bytes(self.protected.clone()),
            Value::Map(Vec::new()),
            Value::Bytes(payload),
            Value::Bytes(signature),
        ]);
        encode(&Value::Tag(18, Box::new(body)))
    }
}

pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).unwrap();
    out
}
