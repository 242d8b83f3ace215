//! SGX quote layout shared by the enclave backends.

use crate::{
    constants::{
        report_body_offsets as offsets, QUOTE_HEADER_SIZE, REPORT_BODY_SIZE, REPORT_DATA_SIZE,
        SGX_FLAGS_DEBUG,
    },
    errors::RuntimeError,
    types::{AttestationReport, TcbStatus},
};

/// Leading fields of a quote header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteHeader {
    pub version: u16,
    pub attestation_key_type: u16,
}

impl QuoteHeader {
    pub fn to_bytes(self) -> [u8; QUOTE_HEADER_SIZE] {
        let mut header = [0u8; QUOTE_HEADER_SIZE];
        header[0..2].copy_from_slice(&self.version.to_le_bytes());
        header[2..4].copy_from_slice(&self.attestation_key_type.to_le_bytes());
        header
    }
}

/// Identity fields of an SGX enclave report body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportBody {
    pub mr_enclave: [u8; 32],
    pub mr_signer: [u8; 32],
    pub isv_prod_id: u16,
    pub isv_svn: u16,
    pub debug: bool,
    pub report_data: [u8; REPORT_DATA_SIZE],
}

impl ReportBody {
    /// Parses a report body. `body` must be exactly [`REPORT_BODY_SIZE`] bytes.
    pub fn parse(body: &[u8]) -> Result<Self, RuntimeError> {
        if body.len() != REPORT_BODY_SIZE {
            return Err(RuntimeError::Malformed(format!(
                "report body is {} bytes, expected {REPORT_BODY_SIZE}",
                body.len()
            )));
        }
        let flags = u64::from_le_bytes(array(body, offsets::ATTRIBUTES));
        Ok(Self {
            mr_enclave: array(body, offsets::MR_ENCLAVE),
            mr_signer: array(body, offsets::MR_SIGNER),
            isv_prod_id: u16::from_le_bytes(array(body, offsets::ISV_PROD_ID)),
            isv_svn: u16::from_le_bytes(array(body, offsets::ISV_SVN)),
            debug: flags & SGX_FLAGS_DEBUG != 0,
            report_data: array(body, offsets::REPORT_DATA),
        })
    }

    pub fn to_bytes(&self) -> [u8; REPORT_BODY_SIZE] {
        let mut body = [0u8; REPORT_BODY_SIZE];
        let flags: u64 = if self.debug { SGX_FLAGS_DEBUG } else { 0 };
        body[offsets::ATTRIBUTES..offsets::ATTRIBUTES + 8].copy_from_slice(&flags.to_le_bytes());
        body[offsets::MR_ENCLAVE..offsets::MR_ENCLAVE + 32].copy_from_slice(&self.mr_enclave);
        body[offsets::MR_SIGNER..offsets::MR_SIGNER + 32].copy_from_slice(&self.mr_signer);
        body[offsets::ISV_PROD_ID..offsets::ISV_PROD_ID + 2]
            .copy_from_slice(&self.isv_prod_id.to_le_bytes());
        body[offsets::ISV_SVN..offsets::ISV_SVN + 2].copy_from_slice(&self.isv_svn.to_le_bytes());
        body[offsets::REPORT_DATA..offsets::REPORT_DATA + REPORT_DATA_SIZE]
            .copy_from_slice(&self.report_data);
        body
    }

    pub fn into_report(self, tcb_status: TcbStatus) -> AttestationReport {
        AttestationReport {
            unique_id: self.mr_enclave,
            signer_id: self.mr_signer,
            product_id: u64::from(self.isv_prod_id),
            security_version: u64::from(self.isv_svn),
            debug: self.debug,
            data: self.report_data,
            tcb_status,
        }
    }
}

/// Splits a quote into its header, report body and trailing signature section.
pub fn split_quote(quote: &[u8]) -> Result<(QuoteHeader, &[u8], &[u8]), RuntimeError> {
    let body_end = QUOTE_HEADER_SIZE + REPORT_BODY_SIZE;
    if quote.len() < body_end {
        return Err(RuntimeError::Malformed(format!(
            "quote is {} bytes, shorter than header and report body ({body_end} bytes)",
            quote.len()
        )));
    }
    let header = QuoteHeader {
        version: u16::from_le_bytes(array(quote, 0)),
        attestation_key_type: u16::from_le_bytes(array(quote, 2)),
    };
    Ok((
        header,
        &quote[QUOTE_HEADER_SIZE..body_end],
        &quote[body_end..],
    ))
}

/// Copies `N` bytes at `offset`. Callers guarantee the range is in bounds.
fn array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}
