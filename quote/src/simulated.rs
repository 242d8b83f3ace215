//! Software trust root producing SGX shaped quotes.
//!
//! Used where no enclave hardware is present (development clusters, tests).
//! Quotes carry the SGX report body layout and are signed with Ed25519 by a
//! key held outside any enclave, so they prove nothing about real hardware.
//! The wire format is:
//!
//! ```text
//! header (48) | report body (384) | label length (u16 LE) | TCB label | signature (64)
//! ```
//!
//! The signature covers every byte before it. Signing is deterministic, so a
//! fixed key seed and identity always yield the same quote for the same data.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use tracing::instrument;

use crate::{
    constants::{
        MAX_TCB_LABEL_LEN, QUOTE_VERSION, REPORT_DATA_SIZE, SIMULATED_ATTESTATION_KEY_TYPE,
        SIMULATED_SIGNATURE_SIZE,
    },
    enclave::{ReportIssuer, ReportVerifier},
    errors::RuntimeError,
    sgx::{split_quote, QuoteHeader, ReportBody},
    types::{AttestationReport, TcbStatus},
};

/// Measurement values a simulated enclave reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnclaveIdentity {
    pub unique_id: [u8; 32],
    pub signer_id: [u8; 32],
    pub product_id: u16,
    pub security_version: u16,
    pub debug: bool,
}

/// A simulated enclave: issues quotes for a fixed identity.
pub struct SimulatedEnclave {
    signing_key: SigningKey,
    identity: EnclaveIdentity,
    tcb_status: TcbStatus,
}

impl SimulatedEnclave {
    pub fn new(seed: [u8; 32], identity: EnclaveIdentity) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
            identity,
            tcb_status: TcbStatus::UpToDate,
        }
    }

    /// Reports the given platform patch level in every issued quote.
    pub fn with_tcb_status(mut self, tcb_status: TcbStatus) -> Self {
        self.tcb_status = tcb_status;
        self
    }

    pub fn identity(&self) -> &EnclaveIdentity {
        &self.identity
    }

    /// The trust root that accepts quotes from this enclave.
    pub fn trust_root(&self) -> SimulatedTrustRoot {
        SimulatedTrustRoot {
            verifying_key: self.signing_key.verifying_key(),
        }
    }
}

impl fmt::Debug for SimulatedEnclave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedEnclave")
            .field("identity", &self.identity)
            .field("tcb_status", &self.tcb_status)
            .finish_non_exhaustive()
    }
}

impl ReportIssuer for SimulatedEnclave {
    fn get_remote_report(
        &self,
        report_data: &[u8; REPORT_DATA_SIZE],
    ) -> Result<Vec<u8>, RuntimeError> {
        let label = self.tcb_status.to_string();
        if label.len() > MAX_TCB_LABEL_LEN {
            return Err(RuntimeError::Malformed(format!(
                "TCB label of {} bytes exceeds {MAX_TCB_LABEL_LEN}",
                label.len()
            )));
        }
        let header = QuoteHeader {
            version: QUOTE_VERSION,
            attestation_key_type: SIMULATED_ATTESTATION_KEY_TYPE,
        };
        let body = ReportBody {
            mr_enclave: self.identity.unique_id,
            mr_signer: self.identity.signer_id,
            isv_prod_id: self.identity.product_id,
            isv_svn: self.identity.security_version,
            debug: self.identity.debug,
            report_data: *report_data,
        };

        let mut quote = Vec::new();
        quote.extend_from_slice(&header.to_bytes());
        quote.extend_from_slice(&body.to_bytes());
        // Bounded by MAX_TCB_LABEL_LEN above.
        quote.extend_from_slice(&(label.len() as u16).to_le_bytes());
        quote.extend_from_slice(label.as_bytes());
        let signature = self.signing_key.sign(&quote);
        quote.extend_from_slice(&signature.to_bytes());
        Ok(quote)
    }
}

/// Verifying half of a [`SimulatedEnclave`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedTrustRoot {
    verifying_key: VerifyingKey,
}

impl SimulatedTrustRoot {
    pub fn from_bytes(public_key: &[u8; 32]) -> Result<Self, RuntimeError> {
        let verifying_key = VerifyingKey::from_bytes(public_key)
            .map_err(|e| RuntimeError::Malformed(format!("invalid trust root key: {e}")))?;
        Ok(Self { verifying_key })
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }
}

impl ReportVerifier for SimulatedTrustRoot {
    #[instrument(level = "trace", name = "simulated_verify", skip_all)]
    fn verify_remote_report(&self, quote: &[u8]) -> Result<AttestationReport, RuntimeError> {
        let (header, body, trailer) = split_quote(quote)?;
        if header.version != QUOTE_VERSION
            || header.attestation_key_type != SIMULATED_ATTESTATION_KEY_TYPE
        {
            return Err(RuntimeError::Malformed(format!(
                "unsupported quote version {} / attestation key type {:#06x}",
                header.version, header.attestation_key_type
            )));
        }

        let Some((label_len, rest)) = trailer.split_first_chunk::<2>() else {
            return Err(RuntimeError::Malformed("missing TCB label".to_string()));
        };
        let label_len = usize::from(u16::from_le_bytes(*label_len));
        if label_len > MAX_TCB_LABEL_LEN || rest.len() != label_len + SIMULATED_SIGNATURE_SIZE {
            return Err(RuntimeError::Malformed(
                "inconsistent TCB label or signature length".to_string(),
            ));
        }
        let (label, signature) = rest.split_at(label_len);

        let signature = Signature::from_slice(signature)
            .map_err(|e| RuntimeError::BadSignature(e.to_string()))?;
        let signed_len = quote.len() - SIMULATED_SIGNATURE_SIZE;
        self.verifying_key
            .verify_strict(&quote[..signed_len], &signature)
            .map_err(|e| RuntimeError::BadSignature(e.to_string()))?;

        let label = std::str::from_utf8(label)
            .map_err(|_| RuntimeError::Malformed("TCB label is not UTF-8".to_string()))?;
        let tcb_status = TcbStatus::from(label.to_string());
        let report = ReportBody::parse(body)?.into_report(tcb_status);
        if report.tcb_status.is_up_to_date() {
            Ok(report)
        } else if report.tcb_status.is_revoked() {
            Err(RuntimeError::Revoked)
        } else {
            Err(RuntimeError::TcbLevelInvalid(Box::new(report)))
        }
    }
}
