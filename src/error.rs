//! Errors raised while decoding and validating an attestation document.

/// Convenience alias used throughout the crate.
pub type Result<T, E = AttestError> = std::result::Result<T, E>;

/// Everything that can go wrong while validating a Nitro attestation document.
///
/// All variants are fatal to the validation call that produced them.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AttestError {
    // Malformed input
    /// The input did not decode as a single CBOR data item.
    #[error("malformed CBOR: {0}")]
    MalformedCbor(String),
    /// The input carried a CBOR tag other than COSE_Sign1 (18).
    #[error("unsupported CBOR tag {0}, expected COSE_Sign1 (18)")]
    UnsupportedCborTag(u64),
    /// The COSE_Sign1 body was not a 4 element array of the expected types.
    #[error("invalid COSE_Sign1 structure: {0}")]
    InvalidCoseStructure(String),
    /// The COSE payload did not decode to a CBOR map with text keys.
    #[error("invalid attestation payload: {0}")]
    InvalidPayload(String),

    // Structural violations
    /// A mandatory field is absent from the payload.
    #[error("missing mandatory field `{0}`")]
    MissingField(&'static str),
    /// A field is present but has the wrong CBOR type.
    #[error("field `{field}` has wrong type, expected {expected}")]
    InvalidFieldType {
        field: &'static str,
        expected: &'static str,
    },
    /// The same key appears twice in a CBOR map.
    #[error("duplicate key `{0}`")]
    DuplicateField(String),
    #[error("module_id must not be empty")]
    InvalidModuleId,
    #[error("unsupported digest `{0}`, expected SHA384")]
    InvalidDigest(String),
    #[error("timestamp must be non-zero")]
    InvalidTimestamp,
    #[error("pcrs must hold 1 to 32 entries, got {0}")]
    InvalidPcrCount(usize),
    #[error("pcr index {0} is outside 0..=31")]
    InvalidPcrIndex(String),
    #[error("pcr {index} has length {len}, expected 32, 48 or 64")]
    InvalidPcrLength { index: u8, len: usize },
    #[error("cabundle must not be empty")]
    EmptyCaBundle,
    #[error("cabundle entry {index} has length {len}, expected 1 to 1024")]
    InvalidCaBundleEntry { index: usize, len: usize },
    #[error("certificate must not be empty")]
    EmptyCertificate,
    #[error("public_key has length {0}, expected 1 to 1024")]
    InvalidPublicKey(usize),
    #[error("user_data has length {0}, expected 1 to 512")]
    InvalidUserData(usize),
    #[error("nonce has length {0}, expected 1 to 512")]
    InvalidNonce(usize),

    // Certificates
    /// DER that could not be decoded as an X.509 certificate.
    #[error("failed to parse {which} certificate: {reason}")]
    CertificateParseError { which: String, reason: String },
    /// PEM input that could not be decoded.
    #[error("failed to decode PEM: {0}")]
    PemDecodingError(String),
    /// The end entity certificate is not an X.509 v3 certificate.
    #[error("end entity certificate is not X.509 v3")]
    InvalidEndEntityCert,
    /// A certificate in the chain is outside its validity window.
    #[error("certificate `{subject}` is not valid at {now}s (valid {not_before} to {not_after})")]
    CertificateExpiredOrNotYetValid {
        subject: String,
        not_before: String,
        not_after: String,
        now: u64,
    },
    /// A chain link does not verify under its issuer's key.
    #[error("signature on `{subject}` does not verify under issuer `{issuer}`: {reason}")]
    CertificateSignatureInvalid {
        subject: String,
        issuer: String,
        reason: String,
    },
    /// The validation time precedes the unix epoch.
    #[error("validation time is before the unix epoch")]
    InvalidValidationTime,

    // Document signature
    /// The COSE_Sign1 signature does not verify under the leaf key.
    #[error("COSE_Sign1 signature verification failed: {0}")]
    SignatureVerificationFailed(String),

    // Instance binding, only when the caller enforces it
    #[error("instance binding does not hold: {0}")]
    InstanceBindingMismatch(String),

    // Trusted root supply
    /// A pinned SHA-256 did not match.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    /// The root archive could not be read or lacks the expected entry.
    #[error("root certificate archive: {0}")]
    RootArchive(String),

    // Envelope adapter
    #[error("invalid attestation envelope: {0}")]
    InvalidEnvelope(String),
    #[error("invalid base64: {0}")]
    InvalidBase64(String),
}

impl From<base64::DecodeError> for AttestError {
    fn from(e: base64::DecodeError) -> Self {
        Self::InvalidBase64(e.to_string())
    }
}

impl From<zip::result::ZipError> for AttestError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::RootArchive(e.to_string())
    }
}

impl AttestError {
    /// True for failures raised while walking the certificate chain.
    pub fn is_chain_failure(&self) -> bool {
        matches!(
            self,
            Self::CertificateExpiredOrNotYetValid { .. }
                | Self::CertificateSignatureInvalid { .. }
                | Self::InvalidValidationTime
        )
    }
}
