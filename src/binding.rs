//! Binding an attestation to the EC2 instance hosting the enclave.
//!
//! The hypervisor extends PCR4 with the parent instance ID, so for a
//! module id `i-0123456789abcdef0-enc0123456789abcdef` the expected value is
//! `digest(zero[digest_len] ++ "i-0123456789abcdef0")`.

use serde::Serialize;
use tracing::warn;

use crate::document::AttestationDocument;
use crate::types::Digest;

/// PCR slot holding the parent instance measurement.
pub const INSTANCE_PCR: u8 = 4;

/// Why the binding check did not hold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BindingFailure {
    #[error("PCR4 missing")]
    Pcr4Missing,
    #[error("module_id `{module_id}` has no instance prefix")]
    MalformedModuleId { module_id: String },
    #[error("PCR4 is {actual}, expected {expected}")]
    Pcr4Mismatch { expected: String, actual: String },
}

/// Outcome of the instance-binding check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceBinding {
    pub instance_id: Option<String>,
    pub failure: Option<BindingFailure>,
}

impl InstanceBinding {
    pub fn holds(&self) -> bool {
        self.failure.is_none()
    }
}

/// The instance prefix of a module id: everything before the last `-`.
pub fn instance_id(module_id: &str) -> Option<&str> {
    module_id
        .rfind('-')
        .map(|i| &module_id[..i])
        .filter(|id| !id.is_empty())
}

/// PCR4 value expected for `instance_id`.
pub fn expected_instance_pcr(digest: Digest, instance_id: &str) -> Vec<u8> {
    let zeros = vec![0u8; digest.output_len()];
    digest.hash(&[zeros.as_slice(), instance_id.as_bytes()])
}

/// Compare PCR4 against the value derived from the module id. Never fails;
/// the outcome carries the reason when the binding does not hold.
pub fn check_instance_binding(doc: &AttestationDocument) -> InstanceBinding {
    let module_id = doc.module_id();
    let Some(id) = instance_id(module_id) else {
        return unbound(
            None,
            BindingFailure::MalformedModuleId {
                module_id: module_id.to_string(),
            },
        );
    };

    let Some(actual) = doc.pcr(INSTANCE_PCR) else {
        return unbound(Some(id), BindingFailure::Pcr4Missing);
    };

    let expected = expected_instance_pcr(doc.digest(), id);
    if expected.as_slice() != actual {
        return unbound(
            Some(id),
            BindingFailure::Pcr4Mismatch {
                expected: hex::encode(&expected),
                actual: hex::encode(actual),
            },
        );
    }

    InstanceBinding {
        instance_id: Some(id.to_string()),
        failure: None,
    }
}

fn unbound(instance_id: Option<&str>, failure: BindingFailure) -> InstanceBinding {
    warn!("instance binding does not hold: {failure}");
    InstanceBinding {
        instance_id: instance_id.map(str::to_string),
        failure: Some(failure),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_splits_on_last_dash() {
        assert_eq!(
            instance_id("i-0123456789abcdef0-abcdef0123456789"),
            Some("i-0123456789abcdef0")
        );
        assert_eq!(
            instance_id("i-059e862454f4a8d8f-enc0190a2f1964172e6"),
            Some("i-059e862454f4a8d8f")
        );
        assert_eq!(instance_id("nodash"), None);
        assert_eq!(instance_id("-enc"), None);
    }

    #[test]
    fn expected_pcr_for_known_instance() {
        // PCR4 of a genuine document produced on i-059e862454f4a8d8f.
        assert_eq!(
            hex::encode(expected_instance_pcr(Digest::Sha384, "i-059e862454f4a8d8f")),
            "638afebbf04c1cfe21735a21f26816878d0a6f4f6e5d69c409990a155c19d9e97aeb7f40947b8cf2192b4686d564626c"
        );
    }
}
