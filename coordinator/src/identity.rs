//! TLS identity of the coordinator.

use std::sync::{Arc, RwLock};

use rcgen::{CertificateParams, DnType, KeyPair};
use rustls::{
    crypto::ring::sign::any_supported_type,
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
    sign::CertifiedKey,
};
use tracing::info;

use crate::{
    constants::COORDINATOR_COMMON_NAME,
    errors::{Result, ServerError},
};

/// Source of the certificate the coordinator presents on its listeners.
///
/// Queried on every handshake, so an owner rotating the identity takes effect
/// for the next connection without restarting any listener.
pub trait IdentityProvider: Send + Sync + 'static {
    fn certified_key(&self) -> Result<Arc<CertifiedKey>>;

    /// DER and PEM of the leaf certificate currently in use, taken from the
    /// same identity even while it rotates.
    fn certificate_with_pem(&self) -> Result<(CertificateDer<'static>, String)>;

    /// DER of the leaf certificate currently in use.
    fn certificate(&self) -> Result<CertificateDer<'static>> {
        self.certified_key()?
            .cert
            .first()
            .cloned()
            .ok_or_else(|| ServerError::Identity("empty certificate chain".to_string()))
    }
}

/// A self-signed identity generated in process.
pub struct SelfSignedIdentity {
    dns_names: Vec<String>,
    current: RwLock<Arc<CurrentIdentity>>,
}

/// Signing key and PEM of the same certificate, swapped together on rotation.
struct CurrentIdentity {
    key: Arc<CertifiedKey>,
    pem: String,
}

impl SelfSignedIdentity {
    pub fn generate(dns_names: Vec<String>) -> Result<Self> {
        let current = RwLock::new(generate_identity(&dns_names)?);
        Ok(Self { dns_names, current })
    }

    /// Replaces the identity with a freshly generated key pair and certificate.
    pub fn rotate(&self) -> Result<()> {
        let next = generate_identity(&self.dns_names)?;
        let mut current = self.current.write().map_err(|_| poisoned())?;
        *current = next;
        info!(dns_names = ?self.dns_names, "Rotated coordinator certificate");
        Ok(())
    }

    fn current(&self) -> Result<Arc<CurrentIdentity>> {
        self.current
            .read()
            .map(|current| Arc::clone(&current))
            .map_err(|_| poisoned())
    }
}

impl IdentityProvider for SelfSignedIdentity {
    fn certified_key(&self) -> Result<Arc<CertifiedKey>> {
        Ok(Arc::clone(&self.current()?.key))
    }

    fn certificate_with_pem(&self) -> Result<(CertificateDer<'static>, String)> {
        let current = self.current()?;
        let cert = current
            .key
            .cert
            .first()
            .cloned()
            .ok_or_else(|| ServerError::Identity("empty certificate chain".to_string()))?;
        Ok((cert, current.pem.clone()))
    }
}

fn poisoned() -> ServerError {
    ServerError::Identity("identity lock poisoned".to_string())
}

/// A freshly generated certificate, in DER and PEM, with its private key.
#[derive(Debug)]
pub struct SelfSignedCertificate {
    pub cert: CertificateDer<'static>,
    pub pem: String,
    pub key: PrivateKeyDer<'static>,
}

/// Generates a self-signed certificate and its signing key.
pub fn generate_self_signed(
    common_name: &str,
    dns_names: &[String],
) -> Result<SelfSignedCertificate> {
    let mut params = CertificateParams::new(dns_names.to_vec())?;
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;
    Ok(SelfSignedCertificate {
        cert: cert.der().clone(),
        pem: cert.pem(),
        key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
    })
}

/// Wraps a certificate and private key into a rustls signing identity.
pub fn certified_key(
    cert: CertificateDer<'static>,
    key: &PrivateKeyDer<'static>,
) -> Result<Arc<CertifiedKey>> {
    let signing_key = any_supported_type(key)?;
    Ok(Arc::new(CertifiedKey::new(vec![cert], signing_key)))
}

fn generate_identity(dns_names: &[String]) -> Result<Arc<CurrentIdentity>> {
    let generated = generate_self_signed(COORDINATOR_COMMON_NAME, dns_names)?;
    Ok(Arc::new(CurrentIdentity {
        key: certified_key(generated.cert, &generated.key)?,
        pem: generated.pem,
    }))
}
