use std::time::Duration;

/// Default address of the attestation-gated workload (mesh) listener.
pub const DEFAULT_MESH_ADDR: &str = "0.0.0.0:2001";

/// Default address of the administrative HTTPS listener.
pub const DEFAULT_CLIENT_ADDR: &str = "0.0.0.0:4433";

/// Default DNS names placed into the coordinator's self-signed certificate.
pub const DEFAULT_DNS_NAMES: &str = "localhost";

/// Common name of the coordinator's TLS identity.
pub const COORDINATOR_COMMON_NAME: &str = "Coordinator";

/// Upper bound for a single workload protocol frame.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Time a peer gets to finish the TLS handshake.
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause before accepting again after an accept error not tied to a single
/// connection, such as running out of file descriptors.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Time a peer gets to deliver its activation request after the handshake.
pub const ACTIVATION_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of events the in-memory event log retains.
pub const EVENT_LOG_CAPACITY: usize = 1024;

/// Content type of the Prometheus text exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";
