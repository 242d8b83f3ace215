//! Attestation quotes bound to TLS identities
//!
//! This crate decides whether a TLS peer provably runs an expected enclave
//! build. Quotes are verified by a backend specific [`Validator`], produced by
//! an [`Issuer`], and tied to the peer certificate through the digest
//! convention in [`binding`].

pub mod binding;
pub mod constants;
pub mod dev_attestation;
pub mod enclave;
pub mod errors;
pub mod mock;
pub mod sgx;
pub mod simulated;
pub mod types;

pub use enclave::{EnclaveIssuer, EnclaveValidator, ReportIssuer, ReportVerifier};
pub use errors::{QuoteError, Result, RuntimeError};
pub use types::{
    AttestationReport, InfrastructureProperties, PackageProperties, TcbStatus, Validation,
    ValidationWarning,
};

/// Verifies attestation evidence against an expected identity.
///
/// Implementations hold no mutable state: any number of callers may validate
/// concurrently through a shared reference.
pub trait Validator: Send + Sync {
    /// Validates `quote` for the peer presenting `cert`.
    ///
    /// On success the returned [`Validation`] may carry a warning that the
    /// caller must surface to operators. `infrastructure` is accepted but not
    /// enforced by any backend yet.
    ///
    /// # Errors
    ///
    /// - [`QuoteError::EvidenceInvalid`] if the quote is malformed, its
    ///   signature does not verify or the platform is revoked.
    /// - [`QuoteError::TcbRejected`] if the platform TCB is degraded and the
    ///   status is not in `package.accepted_tcb_statuses`.
    /// - [`QuoteError::IdentityMismatch`] if the report data is not bound to
    ///   `cert`.
    /// - [`QuoteError::PolicyNonCompliant`] if the reported properties do not
    ///   satisfy `package`.
    fn validate(
        &self,
        quote: &[u8],
        cert: &[u8],
        package: &PackageProperties,
        infrastructure: &InfrastructureProperties,
    ) -> Result<Validation>;
}

/// Produces attestation evidence binding a certificate to the local enclave.
pub trait Issuer: Send + Sync {
    /// Issues a quote whose report data is bound to `cert`.
    ///
    /// # Errors
    ///
    /// Returns [`QuoteError::IssuanceUnavailable`] if the backend cannot
    /// produce a quote, for example because the attestation device is missing
    /// or rejected the request.
    fn issue(&self, cert: &[u8]) -> Result<Vec<u8>>;
}
