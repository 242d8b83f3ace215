//! TLS configuration for the coordinator listeners.
//!
//! On the workload channel every marble presents a self-signed certificate, so
//! certificate authority validation carries no meaning there. The handshake
//! only proves possession of the certificate key; the decision whether to
//! trust that certificate is made afterwards by validating the quote bound to
//! it.

use std::{fmt, sync::Arc};

use rustls::{
    client::{
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        WantsClientCert,
    },
    crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider},
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
    server::{
        danger::{ClientCertVerified, ClientCertVerifier},
        ClientHello, ResolvesServerCert,
    },
    sign::CertifiedKey,
    ClientConfig, ConfigBuilder, DigitallySignedStruct, DistinguishedName, Error, ServerConfig,
    SignatureScheme,
};
use tracing::error;

use crate::{errors::Result, identity::IdentityProvider};

pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Server TLS config for the workload listener: coordinator identity fetched
/// per handshake, client certificate required but not chain-validated.
pub fn workload_server_config(identity: Arc<dyn IdentityProvider>) -> Result<Arc<ServerConfig>> {
    let provider = crypto_provider();
    let config = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(Arc::new(DeferredClientVerifier::mandatory(provider)))
        .with_cert_resolver(Arc::new(IdentityCertResolver::new(identity)));
    Ok(Arc::new(config))
}

/// Server TLS config for the administrative listener.
///
/// Client certificates are requested but optional; the admin API decides per
/// route whether an authenticated user is needed.
pub fn admin_server_config(identity: Arc<dyn IdentityProvider>) -> Result<Arc<ServerConfig>> {
    let provider = crypto_provider();
    let config = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(Arc::new(DeferredClientVerifier::optional(provider)))
        .with_cert_resolver(Arc::new(IdentityCertResolver::new(identity)));
    Ok(Arc::new(config))
}

/// Client TLS config for a marble: presents its own certificate and only
/// accepts a coordinator presenting `coordinator_cert`.
pub fn marble_client_config(
    coordinator_cert: CertificateDer<'static>,
    cert: CertificateDer<'static>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<ClientConfig>> {
    let config = pinned_builder(coordinator_cert)?.with_client_auth_cert(vec![cert], key)?;
    Ok(Arc::new(config))
}

/// Client TLS config without a client certificate, for the administrative
/// routes that need no authentication. Only accepts a coordinator presenting
/// `coordinator_cert`.
pub fn anonymous_client_config(
    coordinator_cert: CertificateDer<'static>,
) -> Result<Arc<ClientConfig>> {
    Ok(Arc::new(pinned_builder(coordinator_cert)?.with_no_client_auth()))
}

fn pinned_builder(
    coordinator_cert: CertificateDer<'static>,
) -> Result<ConfigBuilder<ClientConfig, WantsClientCert>> {
    let provider = crypto_provider();
    Ok(ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(PinnedServerVerifier {
            pinned: coordinator_cert,
            provider,
        })))
}

/// Resolves the server certificate from an [`IdentityProvider`] on every handshake.
pub struct IdentityCertResolver {
    identity: Arc<dyn IdentityProvider>,
}

impl IdentityCertResolver {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self { identity }
    }
}

impl fmt::Debug for IdentityCertResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCertResolver").finish_non_exhaustive()
    }
}

impl ResolvesServerCert for IdentityCertResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        match self.identity.certified_key() {
            Ok(key) => Some(key),
            Err(e) => {
                error!("Failed to load coordinator certificate: {e}");
                None
            }
        }
    }
}

/// Accepts any client certificate chain while still checking the handshake
/// signature made with its key.
#[derive(Debug)]
pub struct DeferredClientVerifier {
    mandatory: bool,
    provider: Arc<CryptoProvider>,
}

impl DeferredClientVerifier {
    pub fn mandatory(provider: Arc<CryptoProvider>) -> Self {
        Self {
            mandatory: true,
            provider,
        }
    }

    pub fn optional(provider: Arc<CryptoProvider>) -> Self {
        Self {
            mandatory: false,
            provider,
        }
    }
}

impl ClientCertVerifier for DeferredClientVerifier {
    fn client_auth_mandatory(&self) -> bool {
        self.mandatory
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, Error> {
        // Trust is established later from the quote bound to this certificate.
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Accepts exactly one server certificate.
#[derive(Debug)]
struct PinnedServerVerifier {
    pinned: CertificateDer<'static>,
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, Error> {
        if end_entity.as_ref() == self.pinned.as_ref() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(Error::General(
                "coordinator certificate does not match the pinned certificate".to_string(),
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
