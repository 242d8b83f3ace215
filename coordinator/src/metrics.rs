//! Prometheus metrics for the workload channel.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `coordinator_activations_total` | Counter | `result` |
//! | `coordinator_tcb_relaxations_total` | Counter | `status` |

use prometheus::{CounterVec, Encoder, Opts, Registry, TextEncoder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// Metrics recorded by the workload listener. Cheap to clone, safe to share.
#[derive(Clone)]
pub struct CoordinatorMetrics {
    registry: Registry,
    activations_total: CounterVec,
    tcb_relaxations_total: CounterVec,
}

impl CoordinatorMetrics {
    /// Creates the metrics and registers them with `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric with the same name is already registered.
    pub fn new(registry: Registry) -> Result<Self, MetricsError> {
        let activations_total = CounterVec::new(
            Opts::new(
                "coordinator_activations_total",
                "Activation attempts on the workload channel",
            ),
            &["result"],
        )?;
        let tcb_relaxations_total = CounterVec::new(
            Opts::new(
                "coordinator_tcb_relaxations_total",
                "Activations admitted with a degraded but accepted TCB status",
            ),
            &["status"],
        )?;
        registry.register(Box::new(activations_total.clone()))?;
        registry.register(Box::new(tcb_relaxations_total.clone()))?;
        Ok(Self {
            registry,
            activations_total,
            tcb_relaxations_total,
        })
    }

    pub fn activation(&self, result: &str) {
        self.activations_total.with_label_values(&[result]).inc();
    }

    pub fn tcb_relaxed(&self, status: &str) {
        self.tcb_relaxations_total.with_label_values(&[status]).inc();
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders every metric of the registry in the Prometheus text format.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }
}
