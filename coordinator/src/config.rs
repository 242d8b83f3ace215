use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::constants::{DEFAULT_CLIENT_ADDR, DEFAULT_DNS_NAMES, DEFAULT_MESH_ADDR};

/// Attestation backend the coordinator validates and issues quotes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum QuoteBackend {
    /// Software enclave signing quotes with a key derived from the simulation seed.
    Simulated,
    /// Issue through `/dev/attestation`. No verifier is available, so every
    /// activation is rejected.
    DevAttestation,
    /// No attestation at all: validation and issuance always fail.
    Unavailable,
}

/// Coordinator for attestation-gated confidential workloads
#[derive(Parser, Debug, Clone)]
#[command(name = "coordinator", version, about, long_about = None)]
pub struct Args {
    /// Address of the attestation-gated workload listener
    #[arg(long, env = "COORDINATOR_MESH_ADDR", default_value = DEFAULT_MESH_ADDR)]
    pub mesh_addr: String,

    /// Address of the administrative HTTPS listener
    #[arg(long, env = "COORDINATOR_CLIENT_ADDR", default_value = DEFAULT_CLIENT_ADDR)]
    pub client_addr: String,

    /// Address of the telemetry listener; disabled when unset
    #[arg(long, env = "COORDINATOR_METRICS_ADDR")]
    pub metrics_addr: Option<String>,

    /// DNS names of the coordinator certificate, comma separated
    #[arg(
        long,
        env = "COORDINATOR_DNS_NAMES",
        default_value = DEFAULT_DNS_NAMES,
        value_delimiter = ','
    )]
    pub dns_names: Vec<String>,

    /// JSON file mapping marble types to their expected properties
    #[arg(long, env = "COORDINATOR_POLICY_FILE")]
    pub policy_file: Option<PathBuf>,

    #[arg(
        long,
        env = "COORDINATOR_QUOTE_BACKEND",
        value_enum,
        default_value_t = QuoteBackend::Simulated
    )]
    pub quote_backend: QuoteBackend,

    /// Hex encoded 32-byte seed of the simulated enclave key
    #[arg(long, env = "COORDINATOR_SIMULATION_SEED")]
    pub simulation_seed: Option<String>,

    /// Log level (trace, debug, info, warn, error) or an `EnvFilter` directive
    #[arg(long, env = "COORDINATOR_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_arguments() {
        let args = Args::try_parse_from(["coordinator"]).unwrap();
        assert_eq!(args.mesh_addr, DEFAULT_MESH_ADDR);
        assert_eq!(args.client_addr, DEFAULT_CLIENT_ADDR);
        assert_eq!(args.dns_names, vec!["localhost".to_string()]);
        assert_eq!(args.quote_backend, QuoteBackend::Simulated);
        assert!(args.metrics_addr.is_none());
    }

    #[test]
    fn parses_backend_and_dns_list() {
        let args = Args::try_parse_from([
            "coordinator",
            "--quote-backend",
            "dev-attestation",
            "--dns-names",
            "localhost,coordinator.local",
        ])
        .unwrap();
        assert_eq!(args.quote_backend, QuoteBackend::DevAttestation);
        assert_eq!(args.dns_names.len(), 2);
    }
}
