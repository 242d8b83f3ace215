use std::{collections::HashMap, fs, path::Path};

use coordinator_quote::{InfrastructureProperties, PackageProperties};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, ServerError};

/// Expected identity of one class of marbles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorkloadPolicy {
    #[serde(rename = "Package")]
    pub package: PackageProperties,
    #[serde(rename = "Infrastructure", default)]
    pub infrastructure: InfrastructureProperties,
}

/// Source of the policy a marble type is validated against.
pub trait PolicyStore: Send + Sync + 'static {
    fn policy(&self, marble_type: &str) -> Option<WorkloadPolicy>;
}

/// Policies fixed at startup, keyed by marble type.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct StaticPolicyStore {
    policies: HashMap<String, WorkloadPolicy>,
}

impl StaticPolicyStore {
    pub fn new(policies: HashMap<String, WorkloadPolicy>) -> Self {
        Self { policies }
    }

    /// Loads a JSON document mapping marble types to policies.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] naming `path` if the file cannot be
    /// read or is not a valid policy document.
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_error = |reason: String| ServerError::Config {
            path: path.display().to_string(),
            reason,
        };
        let raw = fs::read(path).map_err(|e| config_error(e.to_string()))?;
        serde_json::from_slice(&raw).map_err(|e| config_error(e.to_string()))
    }

    pub fn marble_types(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }
}

impl PolicyStore for StaticPolicyStore {
    fn policy(&self, marble_type: &str) -> Option<WorkloadPolicy> {
        self.policies.get(marble_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_policy_document() {
        let store: StaticPolicyStore = serde_json::from_str(
            r#"{
                "backend": {
                    "Package": { "SignerID": "aa", "ProductID": 1, "SecurityVersion": 2 },
                    "Infrastructure": { "Architecture": "x86_64" }
                },
                "frontend": { "Package": { "UniqueID": "bb" } }
            }"#,
        )
        .unwrap();
        let backend = store.policy("backend").unwrap();
        assert_eq!(backend.package.product_id, Some(1));
        assert_eq!(backend.infrastructure.architecture.as_deref(), Some("x86_64"));
        assert_eq!(store.policy("frontend").unwrap().package.unique_id.as_deref(), Some("bb"));
        assert!(store.policy("unknown").is_none());
    }
}
