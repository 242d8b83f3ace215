use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use coordinator_quote::{
    binding::check_binding,
    simulated::{EnclaveIdentity, SimulatedEnclave},
    EnclaveIssuer, EnclaveValidator, Issuer, PackageProperties, TcbStatus, Validator,
};
use prometheus::Registry;
use rustls::pki_types::ServerName;
use serde_json::Value;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tokio_rustls::TlsConnector;
use tower::ServiceExt;

use crate::{
    admin::{self, spawn_admin_listener, BootstrapApi},
    client::{activate, send_activation, MarbleIdentity},
    events::{EventKind, EventLog},
    identity::{IdentityProvider, SelfSignedIdentity},
    metrics::CoordinatorMetrics,
    policy::{StaticPolicyStore, WorkloadPolicy},
    protocol::{read_message, write_message, ActivationRequest, ActivationResponse},
    telemetry::spawn_telemetry_listener,
    tls::{admin_server_config, anonymous_client_config, marble_client_config},
    workload::{spawn_workload_listener, ReportingActivationHandler, WorkloadServer},
    ListenerHandle, ServerError,
};

const SEED: [u8; 32] = [0x11; 32];
const LOCALHOST: &str = "127.0.0.1:0";

fn marble_enclave(tcb_status: TcbStatus) -> SimulatedEnclave {
    SimulatedEnclave::new(
        SEED,
        EnclaveIdentity {
            unique_id: [0x01; 32],
            signer_id: [0x02; 32],
            product_id: 7,
            security_version: 3,
            debug: false,
        },
    )
    .with_tcb_status(tcb_status)
}

fn backend_policy() -> PackageProperties {
    PackageProperties {
        signer_id: Some(hex::encode([0x02; 32])),
        product_id: Some(7),
        security_version: Some(2),
        ..Default::default()
    }
}

struct Coordinator {
    workload: ListenerHandle,
    addr: SocketAddr,
    identity: Arc<SelfSignedIdentity>,
    events: Arc<EventLog>,
    metrics: CoordinatorMetrics,
}

impl Coordinator {
    fn certificate(&self) -> rustls::pki_types::CertificateDer<'static> {
        self.identity.certificate().unwrap()
    }
}

async fn start_coordinator(
    validator: Arc<dyn Validator>,
    package: PackageProperties,
) -> Coordinator {
    let identity = Arc::new(SelfSignedIdentity::generate(vec!["localhost".to_string()]).unwrap());
    let policies = StaticPolicyStore::new(HashMap::from([(
        "backend".to_string(),
        WorkloadPolicy {
            package,
            ..Default::default()
        },
    )]));
    let events = Arc::new(EventLog::new(16));
    let metrics = CoordinatorMetrics::new(Registry::new()).unwrap();
    let server = Arc::new(WorkloadServer::new(
        validator,
        Arc::new(policies),
        Arc::new(ReportingActivationHandler),
        Arc::clone(&events),
        metrics.clone(),
    ));
    let provider: Arc<dyn IdentityProvider> = identity.clone();
    let mut workload = spawn_workload_listener(server, provider, LOCALHOST).unwrap();
    let addr = workload.ready().await.unwrap();
    Coordinator {
        workload,
        addr,
        identity,
        events,
        metrics,
    }
}

fn simulated_validator(enclave: &SimulatedEnclave) -> Arc<dyn Validator> {
    Arc::new(EnclaveValidator::new(Arc::new(enclave.trust_root())))
}

fn simulated_issuer(enclave: SimulatedEnclave) -> Arc<dyn Issuer> {
    Arc::new(EnclaveIssuer::new(Arc::new(enclave)))
}

fn rejection_reason(response: ActivationResponse) -> String {
    match response {
        ActivationResponse::Rejected { reason } => reason,
        other => panic!("expected rejection, got {other:?}"),
    }
}

async fn http_get<S>(mut stream: S, path: &str) -> String
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    // A peer closing without close_notify still leaves the response in the buffer.
    let _ = stream.read_to_end(&mut response).await;
    String::from_utf8_lossy(&response).into_owned()
}

#[tokio::test]
async fn simulated_marble_is_activated() {
    let enclave = marble_enclave(TcbStatus::UpToDate);
    let coordinator = start_coordinator(simulated_validator(&enclave), backend_policy()).await;
    let marble = MarbleIdentity::generate("marble").unwrap();

    let response = activate(
        coordinator.addr,
        coordinator.certificate(),
        &marble,
        simulated_issuer(enclave),
        "backend",
        Some("marble-0".to_string()),
    )
    .await
    .unwrap();

    let (marble_type, payload) = match response {
        ActivationResponse::Accepted {
            marble_type,
            payload,
        } => (marble_type, payload),
        ActivationResponse::Rejected { reason } => panic!("activation rejected: {reason}"),
    };
    assert_eq!(marble_type, "backend");
    assert_eq!(payload["uuid"], "marble-0");
    assert_eq!(payload["reported"]["SecurityVersion"], 3);
    assert_eq!(payload["reported"]["ProductID"], 7);

    let events = coordinator.events.snapshot();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0].kind,
        EventKind::Activation { accepted: true, .. }
    ));
    let text = coordinator.metrics.encode_text().unwrap();
    assert!(text.contains(r#"coordinator_activations_total{result="accepted"} 1"#));
}

#[tokio::test]
async fn quote_for_another_certificate_is_rejected() {
    let enclave = marble_enclave(TcbStatus::UpToDate);
    let coordinator = start_coordinator(simulated_validator(&enclave), backend_policy()).await;
    let marble = MarbleIdentity::generate("marble").unwrap();
    let other = MarbleIdentity::generate("other").unwrap();
    let quote = simulated_issuer(enclave).issue(other.cert.as_ref()).unwrap();

    let request = ActivationRequest {
        marble_type: "backend".to_string(),
        uuid: None,
        quote,
    };
    let response = send_activation(coordinator.addr, coordinator.certificate(), &marble, &request)
        .await
        .unwrap();

    assert!(rejection_reason(response).contains("hash(cert) != report data"));
    let text = coordinator.metrics.encode_text().unwrap();
    assert!(text.contains(r#"coordinator_activations_total{result="rejected"} 1"#));
}

#[tokio::test]
async fn garbage_quote_is_rejected() {
    let enclave = marble_enclave(TcbStatus::UpToDate);
    let coordinator = start_coordinator(simulated_validator(&enclave), backend_policy()).await;
    let marble = MarbleIdentity::generate("marble").unwrap();
    let request = ActivationRequest {
        marble_type: "backend".to_string(),
        uuid: None,
        quote: vec![0u8; 16],
    };

    let response = send_activation(coordinator.addr, coordinator.certificate(), &marble, &request)
        .await
        .unwrap();
    rejection_reason(response);
}

#[tokio::test]
async fn unknown_marble_type_is_rejected() {
    let enclave = marble_enclave(TcbStatus::UpToDate);
    let coordinator = start_coordinator(simulated_validator(&enclave), backend_policy()).await;
    let marble = MarbleIdentity::generate("marble").unwrap();

    let response = activate(
        coordinator.addr,
        coordinator.certificate(),
        &marble,
        simulated_issuer(enclave),
        "frontend",
        None,
    )
    .await
    .unwrap();
    assert!(rejection_reason(response).contains("unknown marble type"));
}

#[tokio::test]
async fn policy_violation_is_rejected() {
    let enclave = marble_enclave(TcbStatus::UpToDate);
    let policy = PackageProperties {
        security_version: Some(4),
        ..backend_policy()
    };
    let coordinator = start_coordinator(simulated_validator(&enclave), policy).await;
    let marble = MarbleIdentity::generate("marble").unwrap();

    let response = activate(
        coordinator.addr,
        coordinator.certificate(),
        &marble,
        simulated_issuer(enclave),
        "backend",
        None,
    )
    .await
    .unwrap();
    assert!(rejection_reason(response).contains("not compliant"));
}

#[tokio::test]
async fn degraded_tcb_is_rejected_unless_accepted() {
    let enclave = marble_enclave(TcbStatus::SwHardeningNeeded);
    let coordinator = start_coordinator(simulated_validator(&enclave), backend_policy()).await;
    let marble = MarbleIdentity::generate("marble").unwrap();

    let response = activate(
        coordinator.addr,
        coordinator.certificate(),
        &marble,
        simulated_issuer(enclave),
        "backend",
        None,
    )
    .await
    .unwrap();
    rejection_reason(response);
    assert!(!coordinator
        .events
        .snapshot()
        .iter()
        .any(|e| matches!(e.kind, EventKind::TcbRelaxed { .. })));
}

#[tokio::test]
async fn accepted_degraded_tcb_is_audited_once() {
    let enclave = marble_enclave(TcbStatus::SwHardeningNeeded);
    let policy = PackageProperties {
        accepted_tcb_statuses: vec!["SWHardeningNeeded".to_string()],
        ..backend_policy()
    };
    let coordinator = start_coordinator(simulated_validator(&enclave), policy).await;
    let marble = MarbleIdentity::generate("marble").unwrap();

    let response = activate(
        coordinator.addr,
        coordinator.certificate(),
        &marble,
        simulated_issuer(enclave),
        "backend",
        None,
    )
    .await
    .unwrap();
    assert!(matches!(response, ActivationResponse::Accepted { .. }));

    let relaxed: Vec<_> = coordinator
        .events
        .snapshot()
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::TcbRelaxed { status, .. } => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(relaxed, vec!["SWHardeningNeeded".to_string()]);
    let text = coordinator.metrics.encode_text().unwrap();
    assert!(text.contains(r#"coordinator_tcb_relaxations_total{status="SWHardeningNeeded"} 1"#));
}

#[tokio::test]
async fn concurrent_activations_are_independent() {
    let enclave = marble_enclave(TcbStatus::UpToDate);
    let coordinator = start_coordinator(simulated_validator(&enclave), backend_policy()).await;
    let issuer = simulated_issuer(enclave);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let addr = coordinator.addr;
        let cert = coordinator.certificate();
        let issuer = Arc::clone(&issuer);
        tasks.push(tokio::spawn(async move {
            let marble = MarbleIdentity::generate(&format!("marble-{i}")).unwrap();
            activate(addr, cert, &marble, issuer, "backend", Some(i.to_string()))
                .await
                .unwrap()
        }));
    }
    for task in tasks {
        assert!(matches!(
            task.await.unwrap(),
            ActivationResponse::Accepted { .. }
        ));
    }
    assert_eq!(coordinator.events.snapshot().len(), 16);
}

#[tokio::test]
async fn rotated_identity_is_served_on_next_handshake() {
    let enclave = marble_enclave(TcbStatus::UpToDate);
    let coordinator = start_coordinator(simulated_validator(&enclave), backend_policy()).await;
    let issuer = simulated_issuer(enclave);
    let marble = MarbleIdentity::generate("marble").unwrap();
    let old_cert = coordinator.certificate();

    coordinator.identity.rotate().unwrap();
    let new_cert = coordinator.certificate();
    assert_ne!(old_cert, new_cert);

    let pinned_to_old = activate(
        coordinator.addr,
        old_cert,
        &marble,
        Arc::clone(&issuer),
        "backend",
        None,
    )
    .await;
    assert!(pinned_to_old.is_err());

    let pinned_to_new = activate(coordinator.addr, new_cert, &marble, issuer, "backend", None)
        .await
        .unwrap();
    assert!(matches!(pinned_to_new, ActivationResponse::Accepted { .. }));
}

#[tokio::test]
async fn listeners_bind_separately_and_stop_independently() {
    let enclave = marble_enclave(TcbStatus::UpToDate);
    let mut coordinator = start_coordinator(simulated_validator(&enclave), backend_policy()).await;

    let (router, identity) = bootstrap_router();
    let provider: Arc<dyn IdentityProvider> = identity;
    let events = Arc::clone(&coordinator.events);
    let mut telemetry =
        spawn_telemetry_listener(LOCALHOST, coordinator.metrics.clone(), events, None);
    let mut admin = spawn_admin_listener(router, LOCALHOST, admin_server_config(provider).unwrap());
    let (telemetry_addr, admin_addr) = tokio::join!(telemetry.ready(), admin.ready());
    let (telemetry_addr, admin_addr) = (telemetry_addr.unwrap(), admin_addr.unwrap());
    assert_ne!(telemetry_addr, admin_addr);
    assert_ne!(telemetry_addr, coordinator.addr);
    assert_ne!(admin_addr, coordinator.addr);
    assert!(matches!(
        telemetry.ready().await,
        Err(ServerError::ListenerClosed)
    ));

    telemetry.shutdown();
    telemetry.join().await.unwrap();
    assert!(TcpStream::connect(telemetry_addr).await.is_err());
    assert!(TcpStream::connect(admin_addr).await.is_ok());

    let marble = MarbleIdentity::generate("marble").unwrap();
    let response = activate(
        coordinator.addr,
        coordinator.certificate(),
        &marble,
        simulated_issuer(enclave),
        "backend",
        None,
    )
    .await
    .unwrap();
    assert!(matches!(response, ActivationResponse::Accepted { .. }));

    admin.shutdown();
    admin.join().await.unwrap();
    coordinator.workload.shutdown();
    coordinator.workload.join().await.unwrap();
}

#[tokio::test]
async fn workload_listener_refuses_clients_without_certificate() {
    let enclave = marble_enclave(TcbStatus::UpToDate);
    let coordinator = start_coordinator(simulated_validator(&enclave), backend_policy()).await;
    let marble = MarbleIdentity::generate("marble").unwrap();
    let request = ActivationRequest {
        marble_type: "backend".to_string(),
        uuid: None,
        quote: simulated_issuer(enclave).issue(marble.cert.as_ref()).unwrap(),
    };

    let config = anonymous_client_config(coordinator.certificate()).unwrap();
    let result: crate::Result<ActivationResponse> = async {
        let stream = TcpStream::connect(coordinator.addr).await?;
        let mut tls = TlsConnector::from(config)
            .connect(ServerName::try_from("localhost").unwrap(), stream)
            .await?;
        write_message(&mut tls, &request).await?;
        read_message(&mut tls).await
    }
    .await;
    assert!(result.is_err(), "anonymous client got {result:?}");
    assert!(coordinator.events.snapshot().is_empty());
}

#[tokio::test]
async fn bind_failure_is_reported_through_ready() {
    let occupied = TcpListener::bind(LOCALHOST).await.unwrap();
    let addr = occupied.local_addr().unwrap();
    let metrics = CoordinatorMetrics::new(Registry::new()).unwrap();

    let mut telemetry =
        spawn_telemetry_listener(addr.to_string(), metrics, Arc::new(EventLog::new(4)), None);
    assert!(matches!(
        telemetry.ready().await,
        Err(ServerError::Bind { .. })
    ));
    assert!(telemetry.join().await.is_err());
}

#[tokio::test]
async fn telemetry_serves_metrics_and_events() {
    let enclave = marble_enclave(TcbStatus::UpToDate);
    let coordinator = start_coordinator(simulated_validator(&enclave), backend_policy()).await;
    let marble = MarbleIdentity::generate("marble").unwrap();
    activate(
        coordinator.addr,
        coordinator.certificate(),
        &marble,
        simulated_issuer(enclave),
        "backend",
        None,
    )
    .await
    .unwrap();

    let mut telemetry = spawn_telemetry_listener(
        LOCALHOST,
        coordinator.metrics.clone(),
        Arc::clone(&coordinator.events),
        None,
    );
    let addr = telemetry.ready().await.unwrap();

    let metrics = http_get(TcpStream::connect(addr).await.unwrap(), "/metrics").await;
    assert!(metrics.starts_with("HTTP/1.1 200"));
    assert!(metrics.contains(r#"coordinator_activations_total{result="accepted"} 1"#));

    let events = http_get(TcpStream::connect(addr).await.unwrap(), "/events").await;
    assert!(events.starts_with("HTTP/1.1 200"));
    assert!(events.contains(r#""type":"activation""#));
}

fn bootstrap_router() -> (axum::Router, Arc<SelfSignedIdentity>) {
    let identity = Arc::new(SelfSignedIdentity::generate(vec!["localhost".to_string()]).unwrap());
    let api = BootstrapApi::new(
        identity.clone(),
        simulated_issuer(marble_enclave(TcbStatus::UpToDate)),
    );
    (admin::routes(Arc::new(api)), identity)
}

async fn call(router: axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn admin_routes_speak_jsend() {
    let (router, identity) = bootstrap_router();

    let (status, body) = call(router.clone(), "GET", "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["StatusCode"], 2);

    let (status, body) = call(router.clone(), "GET", "/quote").await;
    assert_eq!(status, StatusCode::OK);
    let (_, pem) = identity.certificate_with_pem().unwrap();
    assert_eq!(body["data"]["Cert"], pem);
    assert!(pem.starts_with("-----BEGIN CERTIFICATE-----"));
    let quote = STANDARD
        .decode(body["data"]["Quote"].as_str().unwrap())
        .unwrap();
    let validator = EnclaveValidator::new(Arc::new(
        marble_enclave(TcbStatus::UpToDate).trust_root(),
    ));
    let cert = identity.certificate().unwrap();
    let validation = validator
        .validate(&quote, cert.as_ref(), &backend_policy(), &Default::default())
        .unwrap();
    assert_eq!(validation.reported.product_id, Some(7));

    let (status, body) = call(router.clone(), "POST", "/update").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "fail");

    let (status, body) = call(router.clone(), "GET", "/secrets").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "fail");

    let (status, _) = call(router.clone(), "POST", "/recover").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(router, "GET", "/no-such-route").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_listener_serves_over_tls() {
    let (router, identity) = bootstrap_router();
    let provider: Arc<dyn IdentityProvider> = identity.clone();
    let mut admin = spawn_admin_listener(router, LOCALHOST, admin_server_config(provider).unwrap());
    let addr = admin.ready().await.unwrap();

    let marble = MarbleIdentity::generate("admin").unwrap();
    let config = marble_client_config(
        identity.certificate().unwrap(),
        marble.cert.clone(),
        marble.key.clone_key(),
    )
    .unwrap();
    let stream = TcpStream::connect(addr).await.unwrap();
    let tls = TlsConnector::from(config)
        .connect(ServerName::try_from("localhost").unwrap(), stream)
        .await
        .unwrap();

    let response = http_get(tls, "/status").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains(r#""status":"success""#));

    let anonymous = anonymous_client_config(identity.certificate().unwrap()).unwrap();
    let stream = TcpStream::connect(addr).await.unwrap();
    let tls = TlsConnector::from(anonymous)
        .connect(ServerName::try_from("localhost").unwrap(), stream)
        .await
        .unwrap();
    let response = http_get(tls, "/quote").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains(r#""Cert":"-----BEGIN CERTIFICATE-----"#));

    admin.shutdown();
    admin.join().await.unwrap();
}

#[test]
fn quote_binding_matches_marble_certificate() {
    let marble = MarbleIdentity::generate("marble").unwrap();
    let quote = coordinator_quote::mock::MockIssuer
        .issue(marble.cert.as_ref())
        .unwrap();
    assert!(check_binding(&quote, marble.cert.as_ref()));
}
