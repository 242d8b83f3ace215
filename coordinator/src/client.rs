//! Marble side of the workload activation protocol.

use std::{net::SocketAddr, sync::Arc};

use coordinator_quote::Issuer;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument};

use crate::{
    errors::Result,
    identity::generate_self_signed,
    protocol::{read_message, write_message, ActivationRequest, ActivationResponse},
    tls::marble_client_config,
};

/// Self-signed TLS identity a marble activates with.
#[derive(Debug)]
pub struct MarbleIdentity {
    pub cert: CertificateDer<'static>,
    pub key: PrivateKeyDer<'static>,
}

impl MarbleIdentity {
    pub fn generate(common_name: &str) -> Result<Self> {
        let generated = generate_self_signed(common_name, &["localhost".to_string()])?;
        Ok(Self {
            cert: generated.cert,
            key: generated.key,
        })
    }
}

/// Activates a marble of `marble_type` with the coordinator at `addr`.
///
/// Issues a quote bound to the marble certificate and only talks to a
/// coordinator presenting `coordinator_cert`.
#[instrument(skip(coordinator_cert, identity, issuer))]
pub async fn activate(
    addr: SocketAddr,
    coordinator_cert: CertificateDer<'static>,
    identity: &MarbleIdentity,
    issuer: Arc<dyn Issuer>,
    marble_type: &str,
    uuid: Option<String>,
) -> Result<ActivationResponse> {
    let cert = identity.cert.as_ref().to_vec();
    let quote = tokio::task::spawn_blocking(move || issuer.issue(&cert))
        .await
        .map_err(std::io::Error::other)??;
    debug!(quote_len = quote.len(), "Issued activation quote");

    let request = ActivationRequest {
        marble_type: marble_type.to_string(),
        uuid,
        quote,
    };
    send_activation(addr, coordinator_cert, identity, &request).await
}

/// Sends an already built activation request and returns the coordinator's answer.
pub async fn send_activation(
    addr: SocketAddr,
    coordinator_cert: CertificateDer<'static>,
    identity: &MarbleIdentity,
    request: &ActivationRequest,
) -> Result<ActivationResponse> {
    let config = marble_client_config(
        coordinator_cert,
        identity.cert.clone(),
        identity.key.clone_key(),
    )?;
    let stream = TcpStream::connect(addr).await?;
    let mut tls = TlsConnector::from(config)
        .connect(ServerName::from(addr.ip()), stream)
        .await?;

    write_message(&mut tls, request).await?;
    read_message(&mut tls).await
}
