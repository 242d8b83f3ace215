use std::{io, net::SocketAddr};

use coordinator_quote::QuoteError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("listener on {addr} failed: {source}")]
    Serve {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to load {path}: {reason}")]
    Config { path: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("certificate error: {0}")]
    Certificate(String),
    #[error("identity unavailable: {0}")]
    Identity(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("failed to encode message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("attestation failed: {0}")]
    Quote(#[from] QuoteError),
    #[error("listener exited before reporting its address")]
    ListenerClosed,
}

impl From<rcgen::Error> for ServerError {
    fn from(e: rcgen::Error) -> Self {
        Self::Identity(e.to_string())
    }
}
