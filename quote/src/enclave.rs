use std::sync::Arc;

use tracing::{debug, instrument};

use crate::{
    binding::{cert_digest, check_binding, report_data_for},
    constants::{BINDING_DIGEST_SIZE, REPORT_DATA_SIZE},
    errors::{QuoteError, Result, RuntimeError},
    types::{
        AttestationReport, InfrastructureProperties, PackageProperties, Validation,
        ValidationWarning,
    },
    Issuer, Validator,
};

/// Trust-root handle able to authenticate raw quotes.
///
/// Implementations are constructed once at startup and must be immutable
/// afterwards. A call may block on platform firmware for milliseconds.
pub trait ReportVerifier: Send + Sync {
    /// Verifies the quote signature and returns the parsed report.
    ///
    /// Authentic quotes from a degraded but not revoked platform are reported as
    /// [`RuntimeError::TcbLevelInvalid`] carrying the report.
    fn verify_remote_report(
        &self,
        quote: &[u8],
    ) -> std::result::Result<AttestationReport, RuntimeError>;
}

/// Hardware handle able to produce quotes for the local enclave.
pub trait ReportIssuer: Send + Sync {
    fn get_remote_report(
        &self,
        report_data: &[u8; REPORT_DATA_SIZE],
    ) -> std::result::Result<Vec<u8>, RuntimeError>;
}

/// Quote validator backed by an enclave trust root.
#[derive(Clone)]
pub struct EnclaveValidator {
    verifier: Arc<dyn ReportVerifier>,
}

impl EnclaveValidator {
    pub fn new(verifier: Arc<dyn ReportVerifier>) -> Self {
        Self { verifier }
    }
}

impl Validator for EnclaveValidator {
    #[instrument(
        level = "debug",
        name = "enclave_validate",
        skip_all,
        fields(quote_len = quote.len(), cert_len = cert.len())
    )]
    fn validate(
        &self,
        quote: &[u8],
        cert: &[u8],
        package: &PackageProperties,
        _infrastructure: &InfrastructureProperties,
    ) -> Result<Validation> {
        let (report, warning) = match self.verifier.verify_remote_report(quote) {
            Ok(report) => (report, None),
            Err(RuntimeError::TcbLevelInvalid(report)) => {
                if !package.accepts_tcb_status(&report.tcb_status) {
                    return Err(QuoteError::TcbRejected {
                        status: report.tcb_status,
                    });
                }
                let warning = ValidationWarning::TcbStatusAccepted {
                    status: report.tcb_status.clone(),
                };
                (*report, Some(warning))
            }
            Err(e) => return Err(QuoteError::EvidenceInvalid(e.to_string())),
        };

        if !check_binding(&report.data, cert) {
            return Err(QuoteError::IdentityMismatch {
                expected: hex::encode(cert_digest(cert)),
                actual: hex::encode(&report.data[..BINDING_DIGEST_SIZE]),
            });
        }

        let reported = report.package_properties();
        if !package.is_compliant(&reported) {
            return Err(QuoteError::PolicyNonCompliant {
                expected: Box::new(package.clone()),
                reported: Box::new(reported),
            });
        }

        // TODO: check InfrastructureProperties once backends expose QE/PCE SVNs.
        debug!(
            unique_id = reported.unique_id.as_deref().unwrap_or_default(),
            tcb_status = %report.tcb_status,
            "quote accepted"
        );
        Ok(Validation { reported, warning })
    }
}

/// Quote issuer backed by the local enclave runtime.
#[derive(Clone)]
pub struct EnclaveIssuer {
    runtime: Arc<dyn ReportIssuer>,
}

impl EnclaveIssuer {
    pub fn new(runtime: Arc<dyn ReportIssuer>) -> Self {
        Self { runtime }
    }
}

impl Issuer for EnclaveIssuer {
    #[instrument(level = "debug", name = "enclave_issue", skip_all, fields(cert_len = cert.len()))]
    fn issue(&self, cert: &[u8]) -> Result<Vec<u8>> {
        let report_data = report_data_for(cert);
        self.runtime
            .get_remote_report(&report_data)
            .map_err(|e| QuoteError::IssuanceUnavailable(e.to_string()))
    }
}
