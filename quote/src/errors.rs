use thiserror::Error;

use crate::types::{PackageProperties, TcbStatus};

pub type Result<T> = std::result::Result<T, QuoteError>;

/// Reasons a quote is refused or cannot be produced.
///
/// Every variant is terminal for the attempt that produced it. None of them
/// is retried by this crate.
#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("invalid attestation evidence: {0}")]
    EvidenceInvalid(String),
    #[error("TCB level invalid: {status}")]
    TcbRejected { status: TcbStatus },
    #[error("hash(cert) != report data: {expected} != {actual}")]
    IdentityMismatch { expected: String, actual: String },
    #[error("package properties not compliant:\nexpected: {expected}\ngot: {reported}")]
    PolicyNonCompliant {
        expected: Box<PackageProperties>,
        reported: Box<PackageProperties>,
    },
    #[error("quote issuance unavailable: {0}")]
    IssuanceUnavailable(String),
}

/// Failures reported by a hardware handle while verifying or producing a report.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The evidence is authentic but the platform runs a degraded TCB.
    ///
    /// The parsed report is handed back so the caller can decide whether its
    /// policy tolerates the degradation.
    #[error("TCB level invalid: {}", .0.tcb_status)]
    TcbLevelInvalid(Box<crate::types::AttestationReport>),
    #[error("malformed evidence: {0}")]
    Malformed(String),
    #[error("signature verification failed: {0}")]
    BadSignature(String),
    #[error("platform TCB revoked")]
    Revoked,
    #[error("attestation unavailable: {0}")]
    Unavailable(String),
    #[error("attestation device error: {0}")]
    Device(#[from] std::io::Error),
}
