/// Length of the certificate binding digest (SHA-256).
pub const BINDING_DIGEST_SIZE: usize = 32;

/// Width of the user-data field of an SGX report.
///
/// The binding digest occupies the leading bytes, the remainder is zero padding.
pub const REPORT_DATA_SIZE: usize = 64;

/// Size of the quote header preceding the report body.
pub const QUOTE_HEADER_SIZE: usize = 48;

/// Size of an SGX enclave report body.
pub const REPORT_BODY_SIZE: usize = 384;

/// Quote format version written into the header.
pub const QUOTE_VERSION: u16 = 3;

/// Attestation key type tag used by the simulated trust root.
///
/// Real ECDSA quotes carry 2 (P-256) here, so simulated evidence can never be
/// mistaken for hardware evidence and vice versa.
pub const SIMULATED_ATTESTATION_KEY_TYPE: u16 = 0xED25;

/// Length of an Ed25519 signature appended to simulated quotes.
pub const SIMULATED_SIGNATURE_SIZE: usize = 64;

/// Upper bound for the TCB status label embedded in simulated quotes.
pub const MAX_TCB_LABEL_LEN: usize = 64;

/// SGX attribute flag marking a debug enclave.
pub const SGX_FLAGS_DEBUG: u64 = 0x02;

/// Offsets of the report body fields, relative to the start of the body.
pub mod report_body_offsets {
    pub const ATTRIBUTES: usize = 48;
    pub const MR_ENCLAVE: usize = 64;
    pub const MR_SIGNER: usize = 128;
    pub const ISV_PROD_ID: usize = 256;
    pub const ISV_SVN: usize = 258;
    pub const REPORT_DATA: usize = 320;
}

/// Default root of the attestation pseudo-filesystem of library-OS enclaves.
pub const DEV_ATTESTATION_ROOT: &str = "/dev/attestation";

/// File receiving the user report data before a quote is read.
pub const DEV_ATTESTATION_USER_REPORT_DATA: &str = "user_report_data";

/// File yielding a quote over the last written user report data.
pub const DEV_ATTESTATION_QUOTE: &str = "quote";
