//! X.509 chain of trust from the attestation signer up to a trusted root.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use p384::ecdsa::{signature::Verifier, Signature, VerifyingKey};
use tracing::{debug, warn};
use x509_cert::der::{Decode, Encode};
use x509_cert::spki::ObjectIdentifier;
use x509_cert::Certificate;

use crate::error::{AttestError, Result};

/// `ecdsa-with-SHA384`, the only signature algorithm Nitro certificates use.
pub const ECDSA_WITH_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");

/// A decoded certificate together with the DER it came from.
#[derive(Clone, Debug)]
pub struct ParsedCertificate {
    der: Vec<u8>,
    cert: Certificate,
}

impl ParsedCertificate {
    /// Parse `der`. `which` names the certificate in error messages.
    pub fn from_der(der: &[u8], which: &str) -> Result<Self> {
        let cert = Certificate::from_der(der).map_err(|e| AttestError::CertificateParseError {
            which: which.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            der: der.to_vec(),
            cert,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn certificate(&self) -> &Certificate {
        &self.cert
    }

    pub fn subject(&self) -> String {
        self.cert.tbs_certificate.subject.to_string()
    }

    pub fn issuer(&self) -> String {
        self.cert.tbs_certificate.issuer.to_string()
    }

    /// Whether `now` (since the unix epoch) lies in `[notBefore, notAfter]`.
    pub fn is_valid_at(&self, now: Duration) -> bool {
        let validity = &self.cert.tbs_certificate.validity;
        validity.not_before.to_unix_duration() <= now
            && now <= validity.not_after.to_unix_duration()
    }

    fn check_validity(&self, now: Duration) -> Result<()> {
        if self.is_valid_at(now) {
            return Ok(());
        }
        let validity = &self.cert.tbs_certificate.validity;
        Err(AttestError::CertificateExpiredOrNotYetValid {
            subject: self.subject(),
            not_before: validity.not_before.to_string(),
            not_after: validity.not_after.to_string(),
            now: now.as_secs(),
        })
    }

    /// The P-384 key carried in this certificate's SubjectPublicKeyInfo.
    pub fn verifying_key(&self) -> Result<VerifyingKey, String> {
        let spki = &self.cert.tbs_certificate.subject_public_key_info;
        VerifyingKey::from_sec1_bytes(spki.subject_public_key.raw_bytes())
            .map_err(|_| "public key is not a P-384 point".to_string())
    }
}

/// Ordered view `[leaf, ..intermediates, root]` where each certificate is
/// signed by the one after it.
#[derive(Debug)]
pub struct CertificateChain<'a> {
    links: Vec<&'a ParsedCertificate>,
}

impl<'a> CertificateChain<'a> {
    /// `intermediates` must already be ordered leaf-ward first.
    pub fn new(
        leaf: &'a ParsedCertificate,
        intermediates: &'a [ParsedCertificate],
        root: &'a ParsedCertificate,
    ) -> Self {
        let mut links = Vec::with_capacity(intermediates.len() + 2);
        links.push(leaf);
        links.extend(intermediates.iter());
        links.push(root);
        Self { links }
    }

    pub fn certificates(&self) -> &[&'a ParsedCertificate] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Every certificate as lowercase hex DER, leaf first.
    pub fn to_hex(&self) -> Vec<String> {
        self.links.iter().map(|c| hex::encode(c.der())).collect()
    }

    /// Walk the chain from the leaf upwards. The root itself is trusted as
    /// given and never checked against itself.
    pub fn verify(&self, now: SystemTime, check_expiration: bool) -> Result<()> {
        let now = now
            .duration_since(UNIX_EPOCH)
            .map_err(|_| AttestError::InvalidValidationTime)?;

        debug!(
            "Certificate chain: 1 leaf + {} intermediates + 1 root",
            self.links.len().saturating_sub(2)
        );

        for pair in self.links.windows(2) {
            let (subject, issuer) = (pair[0], pair[1]);
            if check_expiration {
                subject.check_validity(now)?;
            }
            verify_link(subject, issuer)?;
            debug!(subject = %subject.subject(), "certificate link verified");
        }
        Ok(())
    }

    /// Boolean form of [`CertificateChain::verify`]; the failure is logged.
    pub fn is_valid(&self, now: SystemTime, check_expiration: bool) -> bool {
        match self.verify(now, check_expiration) {
            Ok(()) => true,
            Err(e) => {
                warn!("certificate chain rejected: {e}");
                false
            }
        }
    }
}

/// Check that `issuer`'s key produced the signature on `subject`.
fn verify_link(subject: &ParsedCertificate, issuer: &ParsedCertificate) -> Result<()> {
    let fail = |reason: String| AttestError::CertificateSignatureInvalid {
        subject: subject.subject(),
        issuer: issuer.subject(),
        reason,
    };

    let cert = subject.certificate();
    if cert.signature_algorithm.oid != ECDSA_WITH_SHA384 {
        return Err(fail(format!(
            "unsupported signature algorithm {}",
            cert.signature_algorithm.oid
        )));
    }

    let key = issuer.verifying_key().map_err(fail)?;
    let signature = cert
        .signature
        .as_bytes()
        .ok_or_else(|| fail("signature has unused bits".to_string()))
        .and_then(|bytes| {
            Signature::from_der(bytes).map_err(|e| fail(format!("malformed signature: {e}")))
        })?;
    let tbs = cert
        .tbs_certificate
        .to_der()
        .map_err(|e| fail(format!("cannot encode tbsCertificate: {e}")))?;

    key.verify(&tbs, &signature)
        .map_err(|_| fail("signature mismatch".to_string()))
}
