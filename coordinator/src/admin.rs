//! Administrative HTTPS listener.
//!
//! Routes speak JSend: `{"status": "success", "data": ...}` on success,
//! `{"status": "fail", "data": {"message": ...}}` for client errors and
//! `{"status": "error", "message": ...}` for server errors. What each route
//! does is up to the [`ClientApi`] implementation; this module only binds
//! routes to it and authenticates users from their TLS client certificate.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use coordinator_quote::Issuer;
use rustls::ServerConfig;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_rustls::TlsAcceptor;
use url::form_urlencoded;

use crate::{
    identity::IdentityProvider,
    listener::{accept_loop, serve_https, spawn_listener, ListenerHandle, PeerCertificates},
};

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match &self {
            Self::BadRequest(_) | Self::Unauthorized(_) => json!({
                "status": "fail",
                "data": { "message": self.to_string() },
            }),
            Self::Internal(_) => json!({
                "status": "error",
                "message": self.to_string(),
            }),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

fn success(data: impl Serialize) -> Response {
    Json(json!({ "status": "success", "data": data })).into_response()
}

/// An administrator authenticated by client certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminUser {
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct ManifestSignature {
    pub root_ecdsa: Vec<u8>,
    pub signature: Vec<u8>,
    pub manifest: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CoordinatorStatus {
    pub code: u32,
    pub message: String,
}

/// The coordinator certificate in PEM and a quote bound to it.
#[derive(Debug, Clone)]
pub struct CertQuote {
    pub cert: String,
    pub quote: Vec<u8>,
}

/// Backend of the administrative routes.
#[async_trait]
pub trait ClientApi: Send + Sync + 'static {
    /// Installs the initial manifest and returns the encrypted recovery secrets.
    async fn set_manifest(&self, manifest: Bytes) -> ApiResult<HashMap<String, Vec<u8>>>;
    async fn manifest_signature(&self) -> ApiResult<ManifestSignature>;
    async fn update_log(&self) -> ApiResult<String>;
    async fn update_manifest(&self, update: Bytes, user: &AdminUser) -> ApiResult<()>;
    async fn secrets(&self, requested: &[String], user: &AdminUser) -> ApiResult<Value>;
    async fn write_secrets(&self, secrets: Bytes, user: &AdminUser) -> ApiResult<()>;
    async fn status(&self) -> ApiResult<CoordinatorStatus>;
    async fn cert_quote(&self) -> ApiResult<CertQuote>;
    /// Applies one recovery key share and returns how many are still missing.
    async fn recover(&self, key: Bytes) -> ApiResult<u32>;
    async fn verify_user(&self, certificates: &PeerCertificates) -> ApiResult<AdminUser>;
}

type SharedApi = Arc<dyn ClientApi>;

/// Binds the administrative routes to `api`.
pub fn routes(api: Arc<dyn ClientApi>) -> Router {
    Router::new()
        .route("/manifest", get(manifest_get).post(manifest_post))
        .route("/update", get(update_get).post(update_post))
        .route("/secrets", get(secrets_get).post(secrets_post))
        .route("/status", get(status_get))
        .route("/quote", get(quote_get))
        .route("/recover", post(recover_post))
        .fallback(not_found)
        .with_state(api)
}

/// Serves `router` over TLS on `addr`. Each request carries the client
/// certificates as a [`PeerCertificates`] extension.
pub fn spawn_admin_listener(
    router: Router,
    addr: impl Into<String>,
    tls_config: Arc<ServerConfig>,
) -> ListenerHandle {
    let acceptor = TlsAcceptor::from(tls_config);
    spawn_listener("admin", addr.into(), move |listener, shutdown| {
        accept_loop(listener, shutdown, move |stream, peer| {
            serve_https(acceptor.clone(), stream, peer, router.clone())
        })
    })
}

async fn manifest_get(State(api): State<SharedApi>) -> ApiResult<Response> {
    let signature = api.manifest_signature().await?;
    Ok(success(json!({
        "ManifestSignatureRootECDSA": STANDARD.encode(signature.root_ecdsa),
        "ManifestSignature": hex::encode(signature.signature),
        "Manifest": STANDARD.encode(signature.manifest),
    })))
}

async fn manifest_post(State(api): State<SharedApi>, body: Bytes) -> ApiResult<Response> {
    let secrets = api.set_manifest(body).await?;
    if secrets.is_empty() {
        return Ok(success(Value::Null));
    }
    let encoded: HashMap<_, _> = secrets
        .into_iter()
        .map(|(name, secret)| (name, STANDARD.encode(secret)))
        .collect();
    Ok(success(json!({ "RecoverySecrets": encoded })))
}

async fn update_get(State(api): State<SharedApi>) -> ApiResult<Response> {
    Ok(success(api.update_log().await?))
}

async fn update_post(
    State(api): State<SharedApi>,
    certificates: Option<Extension<PeerCertificates>>,
    body: Bytes,
) -> ApiResult<Response> {
    let user = authenticate(&api, certificates).await?;
    api.update_manifest(body, &user).await?;
    Ok(success(Value::Null))
}

async fn secrets_get(
    State(api): State<SharedApi>,
    certificates: Option<Extension<PeerCertificates>>,
    RawQuery(query): RawQuery,
) -> ApiResult<Response> {
    let requested = requested_secrets(query.as_deref());
    if requested.is_empty() {
        return Err(ApiError::BadRequest("no secrets requested".to_string()));
    }
    let user = authenticate(&api, certificates).await?;
    Ok(success(api.secrets(&requested, &user).await?))
}

async fn secrets_post(
    State(api): State<SharedApi>,
    certificates: Option<Extension<PeerCertificates>>,
    body: Bytes,
) -> ApiResult<Response> {
    let user = authenticate(&api, certificates).await?;
    api.write_secrets(body, &user).await?;
    Ok(success(Value::Null))
}

async fn status_get(State(api): State<SharedApi>) -> ApiResult<Response> {
    let status = api.status().await?;
    Ok(success(json!({
        "StatusCode": status.code,
        "StatusMessage": status.message,
    })))
}

async fn quote_get(State(api): State<SharedApi>) -> ApiResult<Response> {
    let cert_quote = api.cert_quote().await?;
    Ok(success(json!({
        "Cert": cert_quote.cert,
        "Quote": STANDARD.encode(cert_quote.quote),
    })))
}

async fn recover_post(State(api): State<SharedApi>, body: Bytes) -> ApiResult<Response> {
    let remaining = api.recover(body).await?;
    let message = if remaining == 0 {
        "Recovery successful.".to_string()
    } else {
        format!(
            "Secret was processed successfully. Upload the next secret. \
             Remaining secrets: {remaining}"
        )
    };
    Ok(success(json!({
        "StatusMessage": message,
        "RemainingSecrets": remaining,
    })))
}

async fn not_found() -> Response {
    let body = json!({ "status": "fail", "data": { "message": "no such route" } });
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

async fn authenticate(
    api: &SharedApi,
    certificates: Option<Extension<PeerCertificates>>,
) -> ApiResult<AdminUser> {
    let certificates = certificates.map(|Extension(c)| c).unwrap_or_default();
    if certificates.leaf().is_none() {
        return Err(ApiError::Unauthorized("no client certificate provided".to_string()));
    }
    api.verify_user(&certificates).await
}

/// Collects the decoded values of every `s` parameter of `query`.
fn requested_secrets(query: Option<&str>) -> Vec<String> {
    form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .filter(|(key, name)| key == "s" && !name.is_empty())
        .map(|(_, name)| name.into_owned())
        .collect()
}

/// [`ClientApi`] of a coordinator that has no manifest yet.
///
/// Serves the coordinator certificate with a quote bound to it and reports
/// its status. Everything that needs a manifest is refused.
pub struct BootstrapApi {
    identity: Arc<dyn IdentityProvider>,
    issuer: Arc<dyn Issuer>,
}

impl BootstrapApi {
    pub fn new(identity: Arc<dyn IdentityProvider>, issuer: Arc<dyn Issuer>) -> Self {
        Self { identity, issuer }
    }
}

fn no_manifest<T>() -> ApiResult<T> {
    Err(ApiError::BadRequest("coordinator has no manifest".to_string()))
}

#[async_trait]
impl ClientApi for BootstrapApi {
    async fn set_manifest(&self, _manifest: Bytes) -> ApiResult<HashMap<String, Vec<u8>>> {
        Err(ApiError::BadRequest(
            "manifests are not supported by this coordinator".to_string(),
        ))
    }

    async fn manifest_signature(&self) -> ApiResult<ManifestSignature> {
        Ok(ManifestSignature::default())
    }

    async fn update_log(&self) -> ApiResult<String> {
        Ok(String::new())
    }

    async fn update_manifest(&self, _update: Bytes, _user: &AdminUser) -> ApiResult<()> {
        no_manifest()
    }

    async fn secrets(&self, _requested: &[String], _user: &AdminUser) -> ApiResult<Value> {
        no_manifest()
    }

    async fn write_secrets(&self, _secrets: Bytes, _user: &AdminUser) -> ApiResult<()> {
        no_manifest()
    }

    async fn status(&self) -> ApiResult<CoordinatorStatus> {
        Ok(CoordinatorStatus {
            code: 2,
            message: "Coordinator is ready to accept a manifest.".to_string(),
        })
    }

    async fn cert_quote(&self) -> ApiResult<CertQuote> {
        let (cert, pem) = self
            .identity
            .certificate_with_pem()
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        let issuer = Arc::clone(&self.issuer);
        let der = cert.as_ref().to_vec();
        let quote = tokio::task::spawn_blocking(move || issuer.issue(&der))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(CertQuote { cert: pem, quote })
    }

    async fn recover(&self, _key: Bytes) -> ApiResult<u32> {
        Err(ApiError::BadRequest(
            "coordinator is not in recovery mode".to_string(),
        ))
    }

    async fn verify_user(&self, _certificates: &PeerCertificates) -> ApiResult<AdminUser> {
        Err(ApiError::Unauthorized(
            "no users are defined without a manifest".to_string(),
        ))
    }
}
