//! Error types for the postern-edge crate.

use std::{io, net::SocketAddr};

use postern_common::{ConfigError, tls::TlsError};
use thiserror::Error;

/// Why an edge could not be built or started. Always fatal at startup.
#[derive(Debug, Error)]
pub enum EdgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Unable to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("TLS configuration error: {0}")]
    Tls(#[from] TlsError),
}

/// Why a session ended abnormally.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Line exceeded {0} bytes")]
    LineTooLong(usize),

    #[error("TLS handshake failed: {0}")]
    Tls(String),
}
