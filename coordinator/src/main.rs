use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use coordinator::{
    admin,
    config::{Args, QuoteBackend},
    constants::EVENT_LOG_CAPACITY,
    spawn_admin_listener, spawn_telemetry_listener, spawn_workload_listener,
    tls::admin_server_config,
    BootstrapApi, CoordinatorMetrics, EventLog, IdentityProvider, ListenerHandle,
    ReportingActivationHandler, SelfSignedIdentity, StaticPolicyStore, WorkloadServer,
};
use coordinator_quote::{
    dev_attestation::DevAttestation,
    mock::{FailIssuer, FailValidator},
    simulated::{EnclaveIdentity, SimulatedEnclave},
    EnclaveIssuer, EnclaveValidator, Issuer, Validator,
};
use prometheus::Registry;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let identity: Arc<dyn IdentityProvider> = Arc::new(
        SelfSignedIdentity::generate(args.dns_names.clone())
            .context("failed to generate the coordinator identity")?,
    );
    let (validator, issuer) = quote_backend(&args)?;

    let policies = match &args.policy_file {
        Some(path) => StaticPolicyStore::from_file(path)
            .with_context(|| format!("failed to load policies from {}", path.display()))?,
        None => {
            warn!("No policy file given; every activation will be rejected");
            StaticPolicyStore::default()
        }
    };
    info!(marble_types = ?policies.marble_types().collect::<Vec<_>>(), "Loaded policies");

    let events = Arc::new(EventLog::new(EVENT_LOG_CAPACITY));
    let metrics =
        CoordinatorMetrics::new(Registry::new()).context("failed to register metrics")?;

    let server = Arc::new(WorkloadServer::new(
        validator,
        Arc::new(policies),
        Arc::new(ReportingActivationHandler),
        Arc::clone(&events),
        metrics.clone(),
    ));
    let mut workload = spawn_workload_listener(server, Arc::clone(&identity), args.mesh_addr)?;

    let router = admin::routes(Arc::new(BootstrapApi::new(Arc::clone(&identity), issuer)));
    let mut admin = spawn_admin_listener(
        router,
        args.client_addr,
        admin_server_config(Arc::clone(&identity))?,
    );

    workload
        .ready()
        .await
        .context("workload listener failed to start")?;
    admin
        .ready()
        .await
        .context("administrative listener failed to start")?;

    let mut telemetry = match args.metrics_addr {
        Some(addr) => {
            let mut telemetry = spawn_telemetry_listener(addr, metrics, events, None);
            match telemetry.ready().await {
                Ok(_) => Some(telemetry),
                Err(e) => {
                    warn!("Telemetry listener unavailable, continuing without it: {e}");
                    None
                }
            }
        }
        None => None,
    };

    loop {
        let (name, result) = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to wait for the shutdown signal")?;
                info!("Shutting down");
                break;
            }
            result = workload.join() => ("workload", result),
            result = admin.join() => ("administrative", result),
            result = join_optional(telemetry.as_mut()) => ("telemetry", result),
        };
        match (name, result) {
            ("telemetry", result) => {
                warn!(?result, "Telemetry listener stopped, continuing without it");
                telemetry = None;
            }
            (name, Err(e)) => return Err(e).with_context(|| format!("{name} listener failed")),
            (name, Ok(())) => bail!("{name} listener stopped unexpectedly"),
        }
    }

    workload.shutdown();
    admin.shutdown();
    if let Some(telemetry) = &telemetry {
        telemetry.shutdown();
    }
    workload.join().await?;
    admin.join().await?;
    if let Some(telemetry) = &mut telemetry {
        telemetry.join().await?;
    }
    Ok(())
}

async fn join_optional(handle: Option<&mut ListenerHandle>) -> coordinator::Result<()> {
    match handle {
        Some(handle) => handle.join().await,
        None => std::future::pending().await,
    }
}

fn quote_backend(args: &Args) -> anyhow::Result<(Arc<dyn Validator>, Arc<dyn Issuer>)> {
    Ok(match args.quote_backend {
        QuoteBackend::Simulated => {
            let seed = simulation_seed(args.simulation_seed.as_deref())?;
            let enclave = SimulatedEnclave::new(seed, simulated_coordinator());
            let trust_root = enclave.trust_root();
            info!(
                trust_root = %hex::encode(trust_root.to_bytes()),
                "Using simulated attestation"
            );
            (
                Arc::new(EnclaveValidator::new(Arc::new(trust_root))),
                Arc::new(EnclaveIssuer::new(Arc::new(enclave))),
            )
        }
        QuoteBackend::DevAttestation => {
            let device = DevAttestation::default();
            if !device.is_available() {
                warn!("/dev/attestation is not available; quote issuance will fail");
            }
            warn!("No quote verifier for this backend; every activation will be rejected");
            (
                Arc::new(FailValidator),
                Arc::new(EnclaveIssuer::new(Arc::new(device))),
            )
        }
        QuoteBackend::Unavailable => {
            warn!("Attestation disabled; every activation will be rejected");
            (Arc::new(FailValidator), Arc::new(FailIssuer))
        }
    })
}

fn simulation_seed(seed: Option<&str>) -> anyhow::Result<[u8; 32]> {
    let Some(seed) = seed else {
        warn!("No simulation seed given, using the all-zero seed");
        return Ok([0u8; 32]);
    };
    let bytes = hex::decode(seed).context("simulation seed is not valid hex")?;
    match <[u8; 32]>::try_from(bytes.as_slice()) {
        Ok(seed) => Ok(seed),
        Err(_) => bail!("simulation seed must be 32 bytes, got {}", bytes.len()),
    }
}

fn simulated_coordinator() -> EnclaveIdentity {
    EnclaveIdentity {
        unique_id: [0u8; 32],
        signer_id: [0u8; 32],
        product_id: 0,
        security_version: 0,
        debug: true,
    }
}
