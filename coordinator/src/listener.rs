//! Lifecycle shared by the coordinator listeners.
//!
//! A listener binds inside its own task, reports the bound address (or the
//! bind error) once through [`ListenerHandle::ready`] and then serves until
//! [`ListenerHandle::shutdown`] is called or the handle is dropped. Accept
//! errors never end a listener; it backs off and keeps accepting.

use std::{future::Future, io, net::SocketAddr, time::Duration};

use axum::{extract::Request, Router};
use hyper::body::Incoming;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use rustls::pki_types::CertificateDer;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{oneshot, watch},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_rustls::TlsAcceptor;
use tower::Service;
use tracing::{debug, info, warn};

use crate::{
    constants::{ACCEPT_ERROR_BACKOFF, TLS_HANDSHAKE_TIMEOUT},
    errors::{Result, ServerError},
};

/// Certificates the TLS peer presented, leaf first. Inserted as a request
/// extension by the HTTPS listeners; empty when the peer sent none.
#[derive(Debug, Clone, Default)]
pub struct PeerCertificates(pub Vec<CertificateDer<'static>>);

impl PeerCertificates {
    pub fn leaf(&self) -> Option<&CertificateDer<'static>> {
        self.0.first()
    }
}

/// Handle to a running listener task.
pub struct ListenerHandle {
    name: &'static str,
    ready: Option<oneshot::Receiver<Result<SocketAddr>>>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<Result<()>>>,
}

impl ListenerHandle {
    /// Waits until the listener is bound and returns its local address.
    ///
    /// The outcome is delivered once; later calls return
    /// [`ServerError::ListenerClosed`].
    pub async fn ready(&mut self) -> Result<SocketAddr> {
        let ready = self.ready.take().ok_or(ServerError::ListenerClosed)?;
        ready.await.map_err(|_| ServerError::ListenerClosed)?
    }

    /// Stops accepting connections and closes the listening socket.
    /// Connections already accepted run to completion.
    pub fn shutdown(&self) {
        debug!(listener = self.name, "Shutdown requested");
        let _ = self.shutdown.send(true);
    }

    /// Waits for the listener task to end and returns how serving terminated.
    ///
    /// Cancel safe, so it can race other futures in `tokio::select!`. Once
    /// the outcome was returned, later calls return
    /// [`ServerError::ListenerClosed`].
    pub async fn join(&mut self) -> Result<()> {
        let task = self.task.as_mut().ok_or(ServerError::ListenerClosed)?;
        let result = task.await;
        self.task = None;
        result.map_err(|e| ServerError::Io(io::Error::other(e)))?
    }
}

/// Binds `addr` in a new task and hands the socket to `serve`.
pub(crate) fn spawn_listener<F, Fut>(name: &'static str, addr: String, serve: F) -> ListenerHandle
where
    F: FnOnce(TcpListener, watch::Receiver<bool>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (ready_tx, ready_rx) = oneshot::channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!(listener = name, %addr, "Failed to bind: {e}");
                let reported = io::Error::new(e.kind(), e.to_string());
                let _ = ready_tx.send(Err(ServerError::Bind {
                    addr: addr.clone(),
                    source: reported,
                }));
                return Err(ServerError::Bind { addr, source: e });
            }
        };
        let local_addr = listener.local_addr()?;
        info!(listener = name, addr = %local_addr, "Listening");
        let _ = ready_tx.send(Ok(local_addr));

        let result = serve(listener, shutdown_rx).await;
        info!(listener = name, addr = %local_addr, "Listener stopped");
        result
    });

    ListenerHandle {
        name,
        ready: Some(ready_rx),
        shutdown: shutdown_tx,
        task: Some(task),
    }
}

/// Accepts connections until shutdown, spawning `handle` for each of them.
pub(crate) async fn accept_loop<H, Fut>(
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    handle: H,
) -> Result<()>
where
    H: Fn(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr()?;
    loop {
        tokio::select! {
            // Also fires when the handle, and with it the sender, is dropped.
            _ = shutdown.changed() => return Ok(()),
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(handle(stream, peer));
                }
                Err(e) => {
                    let backoff = accept_backoff(&e);
                    warn!(addr = %local_addr, ?backoff, "Failed to accept connection: {e}");
                    if !backoff.is_zero() {
                        tokio::select! {
                            _ = shutdown.changed() => return Ok(()),
                            _ = sleep(backoff) => {}
                        }
                    }
                }
            },
        }
    }
}

/// Delay before accepting again after `error`.
///
/// Errors that only concern the connection being accepted are retried at
/// once. Anything else, like running out of file descriptors, would repeat
/// immediately, so the loop pauses for [`ACCEPT_ERROR_BACKOFF`].
pub(crate) fn accept_backoff(error: &io::Error) -> Duration {
    match error.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset => Duration::ZERO,
        _ => ACCEPT_ERROR_BACKOFF,
    }
}

/// Serves `router` over TLS on one accepted connection.
pub(crate) async fn serve_https(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
) {
    let tls = match timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
        Ok(Ok(tls)) => tls,
        Ok(Err(e)) => {
            debug!(%peer, "TLS handshake failed: {e}");
            return;
        }
        Err(_) => {
            debug!(%peer, "TLS handshake timed out");
            return;
        }
    };
    let certificates = PeerCertificates(
        tls.get_ref()
            .1
            .peer_certificates()
            .map(|chain| chain.iter().map(|c| c.clone().into_owned()).collect())
            .unwrap_or_default(),
    );

    let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(certificates.clone());
        router.clone().call(request)
    });
    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(tls), service)
        .await
    {
        debug!(%peer, "Connection closed with error: {e}");
    }
}
