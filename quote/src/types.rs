use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::constants::REPORT_DATA_SIZE;

/// Expected (or reported) identity of an enclave package.
///
/// As a policy, either `unique_id` pins one exact build, or `signer_id`
/// together with the optional product and version bounds admits every build
/// of a signer's product line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PackageProperties {
    /// Hex encoded measurement of one exact enclave build (MRENCLAVE).
    #[serde(rename = "UniqueID", default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    /// Hex encoded digest of the signing authority (MRSIGNER).
    #[serde(rename = "SignerID", default, skip_serializing_if = "Option::is_none")]
    pub signer_id: Option<String>,

    #[serde(rename = "ProductID", default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u64>,

    /// Minimum accepted security version. Reported versions must be at least this.
    #[serde(
        rename = "SecurityVersion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub security_version: Option<u64>,

    #[serde(rename = "Debug", default)]
    pub debug: bool,

    /// Degraded TCB states this policy tolerates, by label.
    #[serde(
        rename = "AcceptedTCBStatuses",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub accepted_tcb_statuses: Vec<String>,
}

impl PackageProperties {
    /// Checks whether `reported` satisfies this policy.
    pub fn is_compliant(&self, reported: &PackageProperties) -> bool {
        if let Some(unique_id) = &self.unique_id {
            return hex_eq(unique_id, reported.unique_id.as_deref());
        }
        let Some(signer_id) = &self.signer_id else {
            return false;
        };
        if !hex_eq(signer_id, reported.signer_id.as_deref()) {
            return false;
        }
        if self.debug != reported.debug {
            return false;
        }
        if let Some(product_id) = self.product_id {
            if reported.product_id != Some(product_id) {
                return false;
            }
        }
        if let Some(security_version) = self.security_version {
            match reported.security_version {
                Some(reported_version) if reported_version >= security_version => {}
                _ => return false,
            }
        }
        true
    }

    /// Whether the policy explicitly tolerates the given degraded TCB status.
    pub fn accepts_tcb_status(&self, status: &TcbStatus) -> bool {
        self.accepted_tcb_statuses
            .iter()
            .any(|accepted| TcbStatus::from(accepted.clone()) == *status)
    }
}

fn hex_eq(expected: &str, reported: Option<&str>) -> bool {
    reported.is_some_and(|reported| expected.eq_ignore_ascii_case(reported))
}

impl fmt::Display for PackageProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn or_unset<T: fmt::Display>(value: &Option<T>) -> String {
            value
                .as_ref()
                .map_or_else(|| "<unset>".to_string(), ToString::to_string)
        }
        write!(
            f,
            "{{UniqueID: {}, SignerID: {}, ProductID: {}, SecurityVersion: {}, Debug: {}}}",
            or_unset(&self.unique_id),
            or_unset(&self.signer_id),
            or_unset(&self.product_id),
            or_unset(&self.security_version),
            self.debug
        )
    }
}

/// Claims about the platform an enclave runs on.
///
/// Accepted by validators for forward compatibility but not enforced by any
/// backend yet. Callers must not assume these claims were checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct InfrastructureProperties {
    #[serde(rename = "Architecture", default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(rename = "QESVN", default, skip_serializing_if = "Option::is_none")]
    pub qe_svn: Option<u16>,
    #[serde(rename = "PCESVN", default, skip_serializing_if = "Option::is_none")]
    pub pce_svn: Option<u16>,
    /// Hex encoded CPU security version.
    #[serde(rename = "CPUSVN", default, skip_serializing_if = "Option::is_none")]
    pub cpu_svn: Option<String>,
    /// PEM encoded root CA of the attestation service.
    #[serde(rename = "RootCA", default, skip_serializing_if = "Option::is_none")]
    pub root_ca: Option<String>,
}

/// Patch level of the platform that produced a quote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(into = "String", from = "String")]
pub enum TcbStatus {
    UpToDate,
    SwHardeningNeeded,
    ConfigurationNeeded,
    ConfigurationAndSwHardeningNeeded,
    OutOfDate,
    OutOfDateConfigurationNeeded,
    Revoked,
    Other(String),
}

impl TcbStatus {
    pub fn is_up_to_date(&self) -> bool {
        matches!(self, Self::UpToDate)
    }

    pub fn is_revoked(&self) -> bool {
        matches!(self, Self::Revoked)
    }
}

impl fmt::Display for TcbStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::UpToDate => "UpToDate",
            Self::SwHardeningNeeded => "SWHardeningNeeded",
            Self::ConfigurationNeeded => "ConfigurationNeeded",
            Self::ConfigurationAndSwHardeningNeeded => "ConfigurationAndSWHardeningNeeded",
            Self::OutOfDate => "OutOfDate",
            Self::OutOfDateConfigurationNeeded => "OutOfDateConfigurationNeeded",
            Self::Revoked => "Revoked",
            Self::Other(label) => label,
        };
        f.write_str(label)
    }
}

impl FromStr for TcbStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "UpToDate" | "OK" => Self::UpToDate,
            "SWHardeningNeeded" => Self::SwHardeningNeeded,
            "ConfigurationNeeded" => Self::ConfigurationNeeded,
            "ConfigurationAndSWHardeningNeeded" => Self::ConfigurationAndSwHardeningNeeded,
            "OutOfDate" => Self::OutOfDate,
            "OutOfDateConfigurationNeeded" => Self::OutOfDateConfigurationNeeded,
            "Revoked" => Self::Revoked,
            other => Self::Other(other.to_string()),
        })
    }
}

impl From<String> for TcbStatus {
    fn from(label: String) -> Self {
        match label.parse() {
            Ok(status) => status,
            Err(infallible) => match infallible {},
        }
    }
}

impl From<TcbStatus> for String {
    fn from(status: TcbStatus) -> Self {
        status.to_string()
    }
}

/// Contents of a verified quote. Produced fresh by every verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationReport {
    pub unique_id: [u8; 32],
    pub signer_id: [u8; 32],
    pub product_id: u64,
    pub security_version: u64,
    pub debug: bool,
    /// User data embedded by the issuer, carrying the certificate binding.
    pub data: [u8; REPORT_DATA_SIZE],
    pub tcb_status: TcbStatus,
}

impl AttestationReport {
    /// The identity this report claims, in policy form.
    pub fn package_properties(&self) -> PackageProperties {
        PackageProperties {
            unique_id: Some(hex::encode(self.unique_id)),
            signer_id: Some(hex::encode(self.signer_id)),
            product_id: Some(self.product_id),
            security_version: Some(self.security_version),
            debug: self.debug,
            accepted_tcb_statuses: Vec::new(),
        }
    }
}

/// Something an operator should audit about an otherwise successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// The platform TCB is degraded, but the policy lists this status as accepted.
    TcbStatusAccepted { status: TcbStatus },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TcbStatusAccepted { status } => {
                write!(f, "TCB level invalid, but accepted by configuration: {status}")
            }
        }
    }
}

/// Successful outcome of a quote validation.
#[derive(Debug, Clone)]
pub struct Validation {
    /// Identity the evidence proved, as reported by the backend.
    pub reported: PackageProperties,
    /// Present exactly when trust was relaxed. Callers must route it to an audit sink.
    pub warning: Option<ValidationWarning>,
}
