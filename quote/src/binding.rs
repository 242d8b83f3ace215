//! Binding of TLS identities into attestation evidence.
//!
//! A quote certifies code identity only. Embedding a digest of the TLS
//! certificate into the quote's user data ties that code identity to the key
//! pair presented on the wire, so a legitimately issued quote cannot be
//! replayed next to a different certificate.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::constants::{BINDING_DIGEST_SIZE, REPORT_DATA_SIZE};

/// Computes the binding digest of a certificate.
pub fn cert_digest(cert: &[u8]) -> [u8; BINDING_DIGEST_SIZE] {
    Sha256::digest(cert).into()
}

/// Builds the user-data block an issuer must embed for `cert`.
///
/// The digest is left aligned, the remaining bytes are zero.
pub fn report_data_for(cert: &[u8]) -> [u8; REPORT_DATA_SIZE] {
    let mut report_data = [0u8; REPORT_DATA_SIZE];
    report_data[..BINDING_DIGEST_SIZE].copy_from_slice(&cert_digest(cert));
    report_data
}

/// Checks that `report_data` starts with the binding digest of `cert`.
pub fn check_binding(report_data: &[u8], cert: &[u8]) -> bool {
    if report_data.len() < BINDING_DIGEST_SIZE {
        return false;
    }
    let digest = cert_digest(cert);
    report_data[..BINDING_DIGEST_SIZE].ct_eq(&digest).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_data_is_zero_padded_digest() {
        let cert = b"certificate";
        let report_data = report_data_for(cert);
        assert_eq!(&report_data[..BINDING_DIGEST_SIZE], &cert_digest(cert));
        assert!(report_data[BINDING_DIGEST_SIZE..].iter().all(|b| *b == 0));
    }

    #[test]
    fn short_report_data_never_binds() {
        let cert = b"certificate";
        let digest = cert_digest(cert);
        assert!(!check_binding(&digest[..BINDING_DIGEST_SIZE - 1], cert));
        assert!(!check_binding(&[], cert));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let cert = b"certificate";
        let mut report_data = report_data_for(cert);
        report_data[REPORT_DATA_SIZE - 1] = 0xFF;
        assert!(check_binding(&report_data, cert));
    }
}
