//! Decoding the attestation payload into a typed, validated record.
//!
//! To learn more about the attestation document fields see:
//! <https://github.com/aws/aws-nitro-enclaves-nsm-api/blob/main/docs/attestation_process.md#22-attestation-document-specification/>.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use tracing::debug;

use crate::binding::{self, InstanceBinding};
use crate::cbor::{self, FieldMap};
use crate::chain::{CertificateChain, ParsedCertificate};
use crate::cose::{self, CoseEnvelope, RawFieldsHex};
use crate::error::{AttestError, Result};
use crate::root::TrustedRoot;
use crate::signature;
use crate::syntactic_validation;
use crate::types::{pcr_description, Digest, PublicKeyXY};

/// A structurally valid attestation document.
///
/// Holding one says nothing about authenticity: the chain and signature are
/// checked by [`crate::validate_attestation`].
#[derive(Clone, Debug)]
pub struct AttestationDocument {
    module_id: String,
    digest: Digest,
    timestamp: u64,
    pcrs: BTreeMap<u8, Vec<u8>>,
    certificate: ParsedCertificate,
    /// Reverse of the received `cabundle`, i.e. leaf-ward first.
    cabundle: Vec<ParsedCertificate>,
    public_key: Option<Vec<u8>>,
    user_data: Option<Vec<u8>>,
    nonce: Option<Vec<u8>>,
    envelope: CoseEnvelope,
}

impl AttestationDocument {
    /// Decode and structurally validate `raw` COSE_Sign1 bytes. The leading
    /// CBOR tag may be omitted.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let envelope = CoseEnvelope::from_bytes(raw)?;

        let payload = cbor::decode(envelope.payload())
            .map_err(|e| AttestError::InvalidPayload(e.to_string()))?;
        let entries = payload.as_map().ok_or_else(|| {
            AttestError::InvalidPayload(format!("expected a map, found {}", cose::kind(&payload)))
        })?;
        let fields = FieldMap::new(entries)?;

        let module_id = fields.text("module_id")?;
        syntactic_validation::module_id(module_id)?;
        let digest = syntactic_validation::digest(fields.text("digest")?)?;
        let timestamp = fields.uint("timestamp")?;
        syntactic_validation::timestamp(timestamp)?;
        let pcrs = syntactic_validation::pcrs(fields.map("pcrs")?)?;
        let certificate = fields.bytes("certificate")?;
        syntactic_validation::certificate(certificate)?;
        let cabundle = syntactic_validation::cabundle(fields.array("cabundle")?)?;
        let public_key = fields.optional_bytes("public_key")?;
        syntactic_validation::public_key(public_key)?;
        let user_data = fields.optional_bytes("user_data")?;
        syntactic_validation::user_data(user_data)?;
        let nonce = fields.optional_bytes("nonce")?;
        syntactic_validation::nonce(nonce)?;

        // Certificates are only parsed once every bound above holds.
        let certificate = ParsedCertificate::from_der(certificate, "leaf")?;
        let cabundle = cabundle
            .iter()
            .enumerate()
            .rev()
            .map(|(i, der)| ParsedCertificate::from_der(der, &format!("cabundle[{i}]")))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            module_id,
            pcrs = pcrs.len(),
            cabundle = cabundle.len(),
            "parsed attestation document"
        );

        Ok(Self {
            module_id: module_id.to_string(),
            digest,
            timestamp,
            pcrs,
            certificate,
            cabundle,
            public_key: public_key.map(<[u8]>::to_vec),
            user_data: user_data.map(<[u8]>::to_vec),
            nonce: nonce.map(<[u8]>::to_vec),
            envelope,
        })
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn digest(&self) -> Digest {
        self.digest
    }

    /// Milliseconds since the unix epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn pcrs(&self) -> &BTreeMap<u8, Vec<u8>> {
        &self.pcrs
    }

    pub fn pcr(&self, index: u8) -> Option<&[u8]> {
        self.pcrs.get(&index).map(Vec::as_slice)
    }

    /// The leaf (attestation signer) certificate.
    pub fn certificate(&self) -> &ParsedCertificate {
        &self.certificate
    }

    /// Bundle certificates ordered leaf-ward first.
    pub fn cabundle(&self) -> &[ParsedCertificate] {
        &self.cabundle
    }

    pub fn public_key(&self) -> Option<&[u8]> {
        self.public_key.as_deref()
    }

    pub fn user_data(&self) -> Option<&[u8]> {
        self.user_data.as_deref()
    }

    pub fn nonce(&self) -> Option<&[u8]> {
        self.nonce.as_deref()
    }

    pub fn envelope(&self) -> &CoseEnvelope {
        &self.envelope
    }

    /// `[leaf] ++ reverse(cabundle) ++ [root]`.
    pub fn certificate_chain<'a>(&'a self, root: &'a TrustedRoot) -> CertificateChain<'a> {
        CertificateChain::new(&self.certificate, &self.cabundle, root.certificate())
    }

    /// The chain as hex DER, leaf first.
    pub fn certificate_chain_hex(&self, root: &TrustedRoot) -> Vec<String> {
        self.certificate_chain(root).to_hex()
    }

    /// Key of the leaf certificate as `(x, y)`.
    pub fn signing_key(&self) -> Result<PublicKeyXY> {
        signature::leaf_public_key_xy(&self.certificate)
    }

    pub fn raw_fields_hex(&self) -> RawFieldsHex {
        self.envelope.raw_fields_hex()
    }

    pub fn instance_binding(&self) -> InstanceBinding {
        binding::check_instance_binding(self)
    }
}

impl fmt::Display for AttestationDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Nitro Attestation Document for {}:", self.module_id)?;
        writeln!(f, "- Digest type: {}", self.digest)?;
        match x509_cert::der::DateTime::from_unix_duration(Duration::from_millis(self.timestamp)) {
            Ok(at) => writeln!(f, "- Timestamp: {at}")?,
            Err(_) => writeln!(f, "- Timestamp: {} ms", self.timestamp)?,
        }
        writeln!(f, "- PCR values:")?;
        for (index, value) in &self.pcrs {
            writeln!(
                f,
                "  - PCR[{index}] = {} # {}",
                hex::encode(value),
                pcr_description(*index)
            )?;
        }
        writeln!(f, "- Certificate issuer: {}", self.certificate.issuer())?;
        writeln!(f, "- Certificate subject: {}", self.certificate.subject())?;
        writeln!(f, "Optional fields:")?;
        writeln!(f, "- Public key: {}", optional_hex(self.public_key()))?;
        writeln!(f, "- User data: {}", optional_hex(self.user_data()))?;
        write!(f, "- Nonce: {}", optional_hex(self.nonce()))
    }
}

fn optional_hex(field: Option<&[u8]>) -> String {
    field.map_or_else(|| "<none>".to_string(), hex::encode)
}
