//! Quote issuance through the `/dev/attestation` pseudo-filesystem.
//!
//! Library-OS enclave runtimes expose local attestation as files: writing
//! 64 bytes to `user_report_data` and then reading `quote` yields a hardware
//! quote over that data, signed by the platform quoting enclave.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use tracing::{info, instrument};

use crate::{
    constants::{
        DEV_ATTESTATION_QUOTE, DEV_ATTESTATION_ROOT, DEV_ATTESTATION_USER_REPORT_DATA,
        REPORT_DATA_SIZE,
    },
    enclave::ReportIssuer,
    errors::RuntimeError,
};

#[derive(Debug, Clone)]
pub struct DevAttestation {
    root: PathBuf,
}

impl Default for DevAttestation {
    fn default() -> Self {
        Self::with_root(DEV_ATTESTATION_ROOT)
    }
}

impl DevAttestation {
    /// Uses an attestation filesystem mounted somewhere other than the default.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Whether the process runs inside an enclave exposing the attestation files.
    pub fn is_available(&self) -> bool {
        self.root.join(DEV_ATTESTATION_QUOTE).exists()
    }
}

impl ReportIssuer for DevAttestation {
    #[instrument(
        level = "debug",
        name = "dev_attestation_quote",
        skip_all,
        fields(root = %self.root.display())
    )]
    fn get_remote_report(
        &self,
        report_data: &[u8; REPORT_DATA_SIZE],
    ) -> Result<Vec<u8>, RuntimeError> {
        let mut user_report_data = OpenOptions::new()
            .write(true)
            .open(self.root.join(DEV_ATTESTATION_USER_REPORT_DATA))
            .map_err(device_error)?;
        user_report_data.write_all(report_data)?;
        drop(user_report_data);

        let quote = fs::read(self.root.join(DEV_ATTESTATION_QUOTE)).map_err(device_error)?;
        if quote.is_empty() {
            return Err(RuntimeError::Malformed(
                "attestation device returned an empty quote".to_string(),
            ));
        }
        info!(quote_len = quote.len(), "Obtained quote from attestation device");
        Ok(quote)
    }
}

fn device_error(e: io::Error) -> RuntimeError {
    if e.kind() == io::ErrorKind::NotFound {
        RuntimeError::Unavailable("not running inside an enclave with /dev/attestation".to_string())
    } else {
        RuntimeError::Device(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let device = DevAttestation::with_root(dir.path().join("absent"));
        assert!(!device.is_available());
        let result = device.get_remote_report(&[0u8; REPORT_DATA_SIZE]);
        assert!(matches!(result, Err(RuntimeError::Unavailable(_))));
    }

    #[test]
    fn writes_report_data_and_reads_quote() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(DEV_ATTESTATION_USER_REPORT_DATA), b"").unwrap();
        fs::write(dir.path().join(DEV_ATTESTATION_QUOTE), b"quote-bytes").unwrap();
        let device = DevAttestation::with_root(dir.path());
        assert!(device.is_available());

        let quote = device.get_remote_report(&[0xAB; REPORT_DATA_SIZE]).unwrap();
        assert_eq!(quote, b"quote-bytes");
        let written = fs::read(dir.path().join(DEV_ATTESTATION_USER_REPORT_DATA)).unwrap();
        assert_eq!(written, vec![0xAB; REPORT_DATA_SIZE]);
    }
}
