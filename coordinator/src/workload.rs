//! Attestation-gated workload listener.
//!
//! Marbles connect with mutual TLS using a self-signed certificate, then send
//! one [`ActivationRequest`] carrying a quote bound to that certificate. The
//! certificate is trusted only once the quote validates against the policy of
//! the requested marble type.

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use coordinator_quote::{PackageProperties, QuoteError, Validation, ValidationWarning, Validator};
use rustls::pki_types::CertificateDer;
use serde_json::json;
use tokio::{io::AsyncWriteExt, net::TcpStream, time::timeout};
use tokio_rustls::{server::TlsStream, TlsAcceptor};
use tracing::{debug, info, instrument, warn};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::{
    constants::{ACTIVATION_REQUEST_TIMEOUT, TLS_HANDSHAKE_TIMEOUT},
    errors::{Result, ServerError},
    events::{EventKind, EventLog},
    identity::IdentityProvider,
    listener::{accept_loop, spawn_listener, ListenerHandle},
    metrics::CoordinatorMetrics,
    policy::PolicyStore,
    protocol::{read_message, write_message, ActivationRequest, ActivationResponse},
    tls::workload_server_config,
};

/// A marble whose quote validated against its policy.
#[derive(Debug, Clone)]
pub struct AuthenticatedPeer {
    pub marble_type: String,
    pub uuid: Option<String>,
    pub remote_addr: SocketAddr,
    /// Certificate the marble presented in the handshake, now trusted.
    pub certificate: CertificateDer<'static>,
    pub reported: PackageProperties,
    pub warning: Option<ValidationWarning>,
}

/// Decides what an admitted marble receives.
#[async_trait]
pub trait ActivationHandler: Send + Sync + 'static {
    /// Returns the payload sent back in [`ActivationResponse::Accepted`].
    async fn activate(&self, peer: &AuthenticatedPeer) -> Result<serde_json::Value>;
}

/// Answers every admitted marble with the identity it proved.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReportingActivationHandler;

#[async_trait]
impl ActivationHandler for ReportingActivationHandler {
    async fn activate(&self, peer: &AuthenticatedPeer) -> Result<serde_json::Value> {
        Ok(json!({
            "uuid": peer.uuid,
            "reported": peer.reported,
        }))
    }
}

/// State shared by all connections of the workload listener.
pub struct WorkloadServer {
    validator: Arc<dyn Validator>,
    policies: Arc<dyn PolicyStore>,
    handler: Arc<dyn ActivationHandler>,
    events: Arc<EventLog>,
    metrics: CoordinatorMetrics,
}

impl WorkloadServer {
    pub fn new(
        validator: Arc<dyn Validator>,
        policies: Arc<dyn PolicyStore>,
        handler: Arc<dyn ActivationHandler>,
        events: Arc<EventLog>,
        metrics: CoordinatorMetrics,
    ) -> Self {
        Self {
            validator,
            policies,
            handler,
            events,
            metrics,
        }
    }

    /// Runs one activation request presented by the holder of `certificate`.
    #[instrument(skip_all, fields(marble_type = %request.marble_type, %remote_addr))]
    pub async fn activate(
        &self,
        request: ActivationRequest,
        certificate: CertificateDer<'static>,
        remote_addr: SocketAddr,
    ) -> ActivationResponse {
        let ActivationRequest {
            marble_type,
            uuid,
            quote,
        } = request;

        let Some(policy) = self.policies.policy(&marble_type) else {
            let reason = format!("unknown marble type: {marble_type}");
            return self.reject(marble_type, uuid, reason);
        };

        let validator = Arc::clone(&self.validator);
        let cert = certificate.clone();
        let validated = tokio::task::spawn_blocking(move || {
            validator.validate(&quote, &cert, &policy.package, &policy.infrastructure)
        })
        .await;

        let Validation { reported, warning } = match validated {
            Ok(Ok(validation)) => validation,
            Ok(Err(e)) => {
                if matches!(e, QuoteError::IdentityMismatch { .. }) {
                    warn!("Quote is not bound to the presented certificate: {e}");
                }
                return self.reject(marble_type, uuid, e.to_string());
            }
            Err(e) => {
                return self.reject(marble_type, uuid, format!("validation aborted: {e}"));
            }
        };

        if let Some(ValidationWarning::TcbStatusAccepted { status }) = &warning {
            warn!(%status, "Admitting marble with degraded TCB accepted by policy");
            self.events.record(EventKind::TcbRelaxed {
                marble_type: marble_type.clone(),
                status: status.to_string(),
            });
            self.metrics.tcb_relaxed(&status.to_string());
        }

        let peer = AuthenticatedPeer {
            marble_type,
            uuid,
            remote_addr,
            certificate,
            reported,
            warning,
        };
        match self.handler.activate(&peer).await {
            Ok(payload) => {
                info!(uuid = ?peer.uuid, "Marble activated");
                self.metrics.activation("accepted");
                self.events.record(EventKind::Activation {
                    marble_type: peer.marble_type.clone(),
                    uuid: peer.uuid.clone(),
                    accepted: true,
                    reason: None,
                });
                ActivationResponse::Accepted {
                    marble_type: peer.marble_type,
                    payload,
                }
            }
            Err(e) => self.reject(peer.marble_type, peer.uuid, e.to_string()),
        }
    }

    fn reject(
        &self,
        marble_type: String,
        uuid: Option<String>,
        reason: String,
    ) -> ActivationResponse {
        info!(%marble_type, %reason, "Activation rejected");
        self.metrics.activation("rejected");
        self.events.record(EventKind::Activation {
            marble_type,
            uuid,
            accepted: false,
            reason: Some(reason.clone()),
        });
        ActivationResponse::Rejected { reason }
    }

    async fn serve_connection(
        self: Arc<Self>,
        acceptor: TlsAcceptor,
        stream: TcpStream,
        remote_addr: SocketAddr,
    ) -> Result<()> {
        let mut tls = timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream))
            .await
            .map_err(|_| ServerError::Protocol("TLS handshake timed out".to_string()))??;
        let certificate = peer_certificate(&tls)?;

        let request: ActivationRequest = timeout(ACTIVATION_REQUEST_TIMEOUT, read_message(&mut tls))
            .await
            .map_err(|_| ServerError::Protocol("no activation request received".to_string()))??;

        let response = self.activate(request, certificate, remote_addr).await;
        write_message(&mut tls, &response).await?;
        tls.shutdown().await?;
        Ok(())
    }
}

/// Starts the workload listener on `addr`.
///
/// Binding happens in the listener task; bind failures are reported through
/// [`ListenerHandle::ready`].
///
/// # Errors
///
/// Returns an error if the TLS server configuration cannot be built from
/// `identity`.
pub fn spawn_workload_listener(
    server: Arc<WorkloadServer>,
    identity: Arc<dyn IdentityProvider>,
    addr: impl Into<String>,
) -> Result<ListenerHandle> {
    let acceptor = TlsAcceptor::from(workload_server_config(identity)?);
    Ok(spawn_listener("workload", addr.into(), move |listener, shutdown| {
        accept_loop(listener, shutdown, move |stream, remote_addr| {
            let server = Arc::clone(&server);
            let acceptor = acceptor.clone();
            async move {
                if let Err(e) = server.serve_connection(acceptor, stream, remote_addr).await {
                    debug!(%remote_addr, "Workload connection failed: {e}");
                }
            }
        })
    }))
}

/// Extracts the leaf certificate the marble presented and checks that it parses.
fn peer_certificate(tls: &TlsStream<TcpStream>) -> Result<CertificateDer<'static>> {
    let certificate = tls
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|chain| chain.first())
        .map(|c| c.clone().into_owned())
        .ok_or_else(|| ServerError::Certificate("peer presented no certificate".to_string()))?;

    let (_, parsed) = X509Certificate::from_der(certificate.as_ref())
        .map_err(|e| ServerError::Certificate(format!("unparsable peer certificate: {e}")))?;
    debug!(subject = %parsed.subject(), "Peer certificate received");
    Ok(certificate)
}
