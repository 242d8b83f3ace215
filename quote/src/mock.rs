//! Validators and issuers that need no attestation backend.

use std::collections::HashMap;

use crate::{
    binding::{cert_digest, check_binding, report_data_for},
    constants::BINDING_DIGEST_SIZE,
    errors::{QuoteError, Result},
    types::{InfrastructureProperties, PackageProperties, Validation},
    Issuer, Validator,
};

/// Issues the bare binding block as "quote".
#[derive(Debug, Clone, Copy, Default)]
pub struct MockIssuer;

impl Issuer for MockIssuer {
    fn issue(&self, cert: &[u8]) -> Result<Vec<u8>> {
        Ok(report_data_for(cert).to_vec())
    }
}

/// Accepts only quotes registered up front, reporting the registered identity.
///
/// Registration happens through the builder before the validator is shared.
/// Validation itself only reads.
#[derive(Debug, Clone, Default)]
pub struct MockValidator {
    valid: HashMap<Vec<u8>, PackageProperties>,
}

impl MockValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `quote` as genuine evidence for an enclave with identity `reported`.
    pub fn with_valid_quote(mut self, quote: Vec<u8>, reported: PackageProperties) -> Self {
        self.valid.insert(quote, reported);
        self
    }
}

impl Validator for MockValidator {
    fn validate(
        &self,
        quote: &[u8],
        cert: &[u8],
        package: &PackageProperties,
        _infrastructure: &InfrastructureProperties,
    ) -> Result<Validation> {
        let reported = self
            .valid
            .get(quote)
            .ok_or_else(|| QuoteError::EvidenceInvalid("unknown quote".to_string()))?;
        if !check_binding(quote, cert) {
            let actual = quote.get(..BINDING_DIGEST_SIZE).unwrap_or(quote);
            return Err(QuoteError::IdentityMismatch {
                expected: hex::encode(cert_digest(cert)),
                actual: hex::encode(actual),
            });
        }
        if !package.is_compliant(reported) {
            return Err(QuoteError::PolicyNonCompliant {
                expected: Box::new(package.clone()),
                reported: Box::new(reported.clone()),
            });
        }
        Ok(Validation {
            reported: reported.clone(),
            warning: None,
        })
    }
}

/// Refuses every quote. Used when the coordinator has no way to verify evidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailValidator;

impl Validator for FailValidator {
    fn validate(
        &self,
        _quote: &[u8],
        _cert: &[u8],
        _package: &PackageProperties,
        _infrastructure: &InfrastructureProperties,
    ) -> Result<Validation> {
        Err(QuoteError::EvidenceInvalid(
            "no attestation backend configured".to_string(),
        ))
    }
}

/// Never produces a quote. Used outside of enclaves.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailIssuer;

impl Issuer for FailIssuer {
    fn issue(&self, _cert: &[u8]) -> Result<Vec<u8>> {
        Err(QuoteError::IssuanceUnavailable(
            "not running inside an enclave".to_string(),
        ))
    }
}
