//! Logic for decoding and validating AWS Nitro Enclave attestation documents.
//!
//! A document is accepted only when it is structurally valid, its
//! certificate chain verifies up to a caller supplied [`TrustedRoot`], and
//! its COSE_Sign1 signature verifies under the leaf certificate key.
//!
//! ```no_run
//! use nitro_attestation_validator::{validate_attestation, TrustedRoot, ValidationOptions};
//!
//! # fn run(raw: &[u8]) -> Result<(), nitro_attestation_validator::AttestError> {
//! let root = TrustedRoot::aws_nitro()?;
//! let signer = validate_attestation(raw, &root, &ValidationOptions::default())?;
//! println!("attested key: {}", hex::encode(&signer.public_key));
//! # Ok(())
//! # }
//! ```

use std::time::SystemTime;

use tracing::{debug, info, warn};

pub mod binding;
mod cbor;
pub mod chain;
pub mod cose;
pub mod document;
pub mod envelope;
pub mod error;
pub mod root;
pub mod signature;
mod syntactic_validation;
pub mod types;

pub use binding::{BindingFailure, InstanceBinding};
pub use chain::{CertificateChain, ParsedCertificate};
pub use cose::{CoseEnvelope, RawFieldsHex};
pub use document::AttestationDocument;
pub use envelope::AttestationEnvelope;
pub use error::{AttestError, Result};
pub use root::{TrustedRoot, AWS_ROOT_CERT_PEM};
pub use types::{Digest, PublicKeyXY, SignerIdentity, ValidationReport};

/// Knobs for a single validation call.
#[derive(Clone, Debug)]
pub struct ValidationOptions {
    /// Check every certificate's validity window. Production callers must
    /// leave this on.
    pub check_expiration: bool,
    /// The time certificates must be valid at. `None` means the current time.
    pub current_time: Option<SystemTime>,
    /// Turn an instance-binding mismatch into a hard failure.
    pub enforce_instance_binding: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            check_expiration: true,
            current_time: None,
            enforce_instance_binding: false,
        }
    }
}

impl ValidationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time to use for certificate validity checking.
    pub const fn with_time(mut self, time: SystemTime) -> Self {
        self.current_time = Some(time);
        self
    }

    pub const fn skip_expiration(mut self) -> Self {
        self.check_expiration = false;
        self
    }

    pub const fn require_instance_binding(mut self) -> Self {
        self.enforce_instance_binding = true;
        self
    }

    fn now(&self) -> SystemTime {
        self.current_time.unwrap_or_else(SystemTime::now)
    }
}

/// Decode and structurally validate an attestation document.
///
/// WARNING: This will not verify the certificate chain or the signature and
/// should not be used directly in production; instead use
/// [`attestation_doc_from_der`] or [`validate_attestation`].
pub fn unsafe_attestation_doc_from_der(cose_sign1_der: &[u8]) -> Result<AttestationDocument> {
    AttestationDocument::from_bytes(cose_sign1_der)
}

/// Decode the document, verify the chain from its leaf certificate up to
/// `root`, and verify that the leaf key signed the COSE_Sign1 structure.
///
/// It is still up to the caller to check the PCRs and embedded data.
pub fn attestation_doc_from_der(
    cose_sign1_der: &[u8],
    root: &TrustedRoot,
    options: &ValidationOptions,
) -> Result<AttestationDocument> {
    let doc = unsafe_attestation_doc_from_der(cose_sign1_der)?;
    verify_document(&doc, root, options)?;
    Ok(doc)
}

/// Chain and signature checks for an already parsed document.
pub fn verify_document(
    doc: &AttestationDocument,
    root: &TrustedRoot,
    options: &ValidationOptions,
) -> Result<()> {
    if !options.check_expiration {
        warn!("certificate validity windows are not being checked");
    }
    doc.certificate_chain(root)
        .verify(options.now(), options.check_expiration)?;
    signature::verify_document_signature(doc.envelope(), doc.certificate())
}

/// Fully validate `raw` against `root` and return the identity it attests.
///
/// An absent `public_key` yields an empty key rather than an error. The
/// instance binding is reported in the result and only fails the call when
/// [`ValidationOptions::enforce_instance_binding`] is set.
pub fn validate_attestation(
    raw: &[u8],
    root: &TrustedRoot,
    options: &ValidationOptions,
) -> Result<SignerIdentity> {
    let doc = attestation_doc_from_der(raw, root, options)?;

    let instance_binding = doc.instance_binding();
    if options.enforce_instance_binding {
        if let Some(failure) = &instance_binding.failure {
            return Err(AttestError::InstanceBindingMismatch(failure.to_string()));
        }
    }

    info!(module_id = doc.module_id(), "attestation validated");
    Ok(SignerIdentity {
        public_key: doc.public_key().map(<[u8]>::to_vec).unwrap_or_default(),
        signing_key: doc.signing_key()?,
        module_id: doc.module_id().to_string(),
        timestamp: doc.timestamp(),
        user_data: doc.user_data().map(<[u8]>::to_vec),
        nonce: doc.nonce().map(<[u8]>::to_vec),
        instance_binding,
    })
}

/// Run every check and report each outcome instead of stopping at the first
/// failure. Documents that do not parse are still an error.
pub fn inspect_attestation(
    raw: &[u8],
    root: &TrustedRoot,
    options: &ValidationOptions,
) -> Result<ValidationReport> {
    let doc = unsafe_attestation_doc_from_der(raw)?;
    let now = options.now();

    let chain_error = doc
        .certificate_chain(root)
        .verify(now, options.check_expiration)
        .err()
        .map(|e| e.to_string());
    let signature_error = signature::verify_document_signature(doc.envelope(), doc.certificate())
        .err()
        .map(|e| e.to_string());
    let instance_binding = doc.instance_binding();

    for error in chain_error.iter().chain(signature_error.iter()) {
        warn!("{error}");
    }
    debug!(module_id = doc.module_id(), "attestation inspected");

    Ok(ValidationReport {
        signed_attestation_bytes: doc.envelope().tagged_bytes().to_vec(),
        public_key_xy: doc.signing_key().ok(),
        instance_binding_ok: instance_binding.holds(),
        chain_valid: chain_error.is_none(),
        signature_valid: signature_error.is_none(),
        chain_error,
        signature_error,
        instance_binding,
    })
}
