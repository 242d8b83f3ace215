//! Coordinator listeners for attestation-gated confidential workloads
//!
//! Three independent listeners run side by side:
//!
//! - the workload listener ([`workload`]) admits marbles over mutual TLS only
//!   after their quote validates against the policy of their marble type,
//! - the administrative listener ([`admin`]) serves an HTTPS API,
//! - the optional telemetry listener ([`telemetry`]) exposes metrics and the
//!   event log.

pub mod admin;
pub mod client;
pub mod config;
pub mod constants;
pub mod errors;
pub mod events;
pub mod identity;
pub mod listener;
pub mod metrics;
pub mod policy;
pub mod protocol;
pub mod telemetry;
#[cfg(test)]
mod tests;
pub mod tls;
pub mod workload;

pub use admin::{spawn_admin_listener, BootstrapApi, ClientApi};
pub use errors::{Result, ServerError};
pub use events::{EventKind, EventLog};
pub use identity::{IdentityProvider, SelfSignedIdentity};
pub use listener::{ListenerHandle, PeerCertificates};
pub use metrics::CoordinatorMetrics;
pub use policy::{PolicyStore, StaticPolicyStore, WorkloadPolicy};
pub use protocol::{ActivationRequest, ActivationResponse};
pub use telemetry::spawn_telemetry_listener;
pub use workload::{
    spawn_workload_listener, ActivationHandler, AuthenticatedPeer, ReportingActivationHandler,
    WorkloadServer,
};
