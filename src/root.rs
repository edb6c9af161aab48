//! The trusted root certificate the chain must terminate at.
//!
//! Validation never fetches the root itself. Callers obtain it once (embedded
//! copy, a file, or the published archive), check it against a pinned hash,
//! and pass the resulting [`TrustedRoot`] into every validation call.

use std::io::{Cursor, Read};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::chain::ParsedCertificate;
use crate::error::{AttestError, Result};

/// AWS Nitro root CA certificate.
///
/// The root certificate can be downloaded from
/// <https://aws-nitro-enclaves.amazonaws.com/AWS_NitroEnclaves_Root-G1.zip>,
/// and the archive can be verified against [`AWS_NITRO_ROOT_ARCHIVE_SHA256`].
/// For context and additional verification details, see
/// <https://docs.aws.amazon.com/enclaves/latest/user/verify-root.html>.
pub const AWS_ROOT_CERT_PEM: &[u8] = std::include_bytes!("../root.pem");

/// Where AWS publishes the root certificate archive.
pub const AWS_NITRO_ROOT_ARCHIVE_URL: &str =
    "https://aws-nitro-enclaves.amazonaws.com/AWS_NitroEnclaves_Root-G1.zip";

/// SHA-256 of the AWS-provided zip file.
pub const AWS_NITRO_ROOT_ARCHIVE_SHA256: &str =
    "8cf60e2b2efca96c6a9e71e851d00c1b6991cc09eadbe64a6a1d1b1eb9faff7c";

/// SHA-256 of the `root.pem` file inside the archive.
pub const AWS_ROOT_CERT_PEM_SHA256: &str =
    "6eb9688305e4bbca67f44b59c29a0661ae930f09b5945b5d1d9ae01125c8d6c0";

/// SHA-256 of the DER encoded root certificate.
pub const AWS_ROOT_CERT_DER_SHA256: &str =
    "641a0321a3e244efe456463195d606317ed7cdcc3c1756e09893f3c68f79bb5b";

/// Name of the certificate entry in the archive.
pub const ROOT_ARCHIVE_ENTRY: &str = "root.pem";

/// Extract a DER encoded certificate from bytes representing a PEM encoded
/// certificate.
pub fn cert_from_pem(pem: &[u8]) -> Result<Vec<u8>> {
    let pem = std::str::from_utf8(pem).map_err(|e| AttestError::PemDecodingError(e.to_string()))?;
    let (label, doc) = x509_cert::der::Document::from_pem(pem)
        .map_err(|e| AttestError::PemDecodingError(e.to_string()))?;
    if label != "CERTIFICATE" {
        return Err(AttestError::PemDecodingError(format!(
            "unexpected PEM label `{label}`"
        )));
    }
    Ok(doc.to_vec())
}

/// Check the archive against the pinned hash and return its `root.pem` entry.
pub fn pem_from_root_archive(archive: &[u8]) -> Result<Vec<u8>> {
    verify_sha256(archive, AWS_NITRO_ROOT_ARCHIVE_SHA256)?;

    let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;
    let mut entry = zip.by_name(ROOT_ARCHIVE_ENTRY).map_err(|_| {
        AttestError::RootArchive(format!("archive has no `{ROOT_ARCHIVE_ENTRY}` entry"))
    })?;

    let mut pem = Vec::new();
    entry
        .read_to_end(&mut pem)
        .map_err(|e| AttestError::RootArchive(e.to_string()))?;
    Ok(pem)
}

/// Fail with [`AttestError::ChecksumMismatch`] unless `bytes` hash to `expected`.
pub fn verify_sha256(bytes: &[u8], expected: &str) -> Result<()> {
    let actual = hex::encode(Sha256::digest(bytes));
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(AttestError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// A root certificate the caller has decided to trust.
#[derive(Clone, Debug)]
pub struct TrustedRoot {
    cert: ParsedCertificate,
}

impl TrustedRoot {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let cert = ParsedCertificate::from_der(der, "trusted root")?;
        Ok(Self { cert })
    }

    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        Self::from_der(&cert_from_pem(pem)?)
    }

    /// Load the root from the published AWS archive bytes.
    pub fn from_archive(archive: &[u8]) -> Result<Self> {
        let root = Self::from_pem(&pem_from_root_archive(archive)?)?;
        debug!(fingerprint = %root.fingerprint(), "loaded root from archive");
        Ok(root)
    }

    /// The AWS Nitro root compiled into this crate, checked against its
    /// pinned hashes.
    pub fn aws_nitro() -> Result<Self> {
        verify_sha256(AWS_ROOT_CERT_PEM, AWS_ROOT_CERT_PEM_SHA256)?;
        Self::from_pem(AWS_ROOT_CERT_PEM)?.pinned(AWS_ROOT_CERT_DER_SHA256)
    }

    /// Keep this root only if its DER hashes to `expected_sha256`.
    pub fn pinned(self, expected_sha256: &str) -> Result<Self> {
        verify_sha256(self.der(), expected_sha256)?;
        Ok(self)
    }

    /// Lowercase hex SHA-256 of the DER encoding.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.der()))
    }

    pub fn der(&self) -> &[u8] {
        self.cert.der()
    }

    pub fn certificate(&self) -> &ParsedCertificate {
        &self.cert
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive() -> Vec<u8> {
        std::fs::read(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/data/AWS_NitroEnclaves_Root-G1.zip"
        ))
        .unwrap()
    }

    #[test]
    fn embedded_root_matches_pins() {
        let root = TrustedRoot::aws_nitro().unwrap();
        assert_eq!(root.fingerprint(), AWS_ROOT_CERT_DER_SHA256);
        assert_eq!(
            root.certificate().subject(),
            "CN=aws.nitro-enclaves,OU=AWS,O=Amazon,C=US"
        );
    }

    #[test]
    fn archive_yields_embedded_root() {
        let pem = pem_from_root_archive(&archive()).unwrap();
        assert_eq!(pem, AWS_ROOT_CERT_PEM);

        let root = TrustedRoot::from_archive(&archive()).unwrap();
        assert_eq!(root.fingerprint(), AWS_ROOT_CERT_DER_SHA256);
    }

    #[test]
    fn tampered_archive_is_rejected() {
        let mut bytes = archive();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            TrustedRoot::from_archive(&bytes),
            Err(AttestError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn pin_mismatch_is_fatal() {
        let root = TrustedRoot::from_pem(AWS_ROOT_CERT_PEM).unwrap();
        let err = root.pinned(AWS_ROOT_CERT_PEM_SHA256).unwrap_err();
        assert_eq!(
            err,
            AttestError::ChecksumMismatch {
                expected: AWS_ROOT_CERT_PEM_SHA256.to_string(),
                actual: AWS_ROOT_CERT_DER_SHA256.to_string(),
            }
        );
    }

    #[test]
    fn pem_with_wrong_label_is_rejected() {
        let pem = b"-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n";
        assert!(matches!(
            cert_from_pem(pem),
            Err(AttestError::PemDecodingError(_))
        ));
    }
}
