//! Telemetry listener serving `/metrics` and `/events`.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::error;

use crate::{
    constants::PROMETHEUS_CONTENT_TYPE,
    errors::ServerError,
    events::EventLog,
    listener::{accept_loop, serve_https, spawn_listener, ListenerHandle},
    metrics::CoordinatorMetrics,
};

#[derive(Clone)]
struct TelemetryState {
    metrics: CoordinatorMetrics,
    events: Arc<EventLog>,
}

pub fn routes(metrics: CoordinatorMetrics, events: Arc<EventLog>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/events", get(events_handler))
        .with_state(TelemetryState { metrics, events })
}

/// Starts the telemetry listener on `addr`, over TLS when `tls_config` is set.
pub fn spawn_telemetry_listener(
    addr: impl Into<String>,
    metrics: CoordinatorMetrics,
    events: Arc<EventLog>,
    tls_config: Option<Arc<ServerConfig>>,
) -> ListenerHandle {
    let router = routes(metrics, events);
    match tls_config {
        Some(tls_config) => {
            let acceptor = TlsAcceptor::from(tls_config);
            spawn_listener("telemetry", addr.into(), move |listener, shutdown| {
                accept_loop(listener, shutdown, move |stream, peer| {
                    serve_https(acceptor.clone(), stream, peer, router.clone())
                })
            })
        }
        None => spawn_listener("telemetry", addr.into(), move |listener, mut shutdown| async move {
            let local_addr = listener.local_addr()?;
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.changed().await;
                })
                .await
                .map_err(|source| ServerError::Serve {
                    addr: local_addr,
                    source,
                })
        }),
    }
}

async fn metrics_handler(State(state): State<TelemetryState>) -> Response {
    match state.metrics.encode_text() {
        Ok(body) => ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {e}"),
            )
                .into_response()
        }
    }
}

async fn events_handler(State(state): State<TelemetryState>) -> Response {
    Json(state.events.snapshot()).into_response()
}
