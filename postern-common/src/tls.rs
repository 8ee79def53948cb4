//! TLS material shared by edges (server side) and relays (client side).

use std::{fs::File, io::BufReader, path::PathBuf, sync::Arc};

use thiserror::Error;
use tokio_rustls::{
    TlsAcceptor, TlsConnector,
    rustls::{
        self, ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
    },
};

use crate::{config::ComponentOptions, error::ConfigError};

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("Unable to load certificates from {path}: {source}")]
    CertificateLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to load key from {path}: {reason}")]
    KeyLoad { path: String, reason: String },

    #[error(transparent)]
    Rustls(#[from] rustls::Error),

    #[error("Invalid server name: {0}")]
    ServerName(String),
}

/// The `tls` table of an edge or relay.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TlsSettings {
    pub certfile: Option<PathBuf>,
    pub keyfile: Option<PathBuf>,
    /// Relays: refuse to deliver without STARTTLS.
    pub required: bool,
    /// Relays: verify the peer certificate.
    pub verify: bool,
}

impl TlsSettings {
    /// Read an optional `tls` table. A bare `tls = true` enables client TLS
    /// with verification.
    ///
    /// # Errors
    /// If the value has the wrong shape, or only one of `certfile` and
    /// `keyfile` is given.
    pub fn from_options(options: &ComponentOptions) -> Result<Option<Self>, ConfigError> {
        if let Some(toml::Value::Boolean(enabled)) = options.get("tls") {
            return Ok(enabled.then(|| Self {
                verify: true,
                ..Self::default()
            }));
        }

        let Some(tls) = options.table("tls")? else {
            return Ok(None);
        };

        let settings = Self {
            certfile: tls.path("certfile")?,
            keyfile: tls.path("keyfile")?,
            required: tls.bool_or("required", false)?,
            verify: tls.bool_or("verify", true)?,
        };

        match (&settings.certfile, &settings.keyfile) {
            (Some(_), None) => Err(ConfigError::missing(tls.scope(), "keyfile")),
            (None, Some(_)) => Err(ConfigError::missing(tls.scope(), "certfile")),
            _ => Ok(Some(settings)),
        }
    }

    /// Whether these settings can serve TLS to clients.
    #[must_use]
    pub const fn has_identity(&self) -> bool {
        self.certfile.is_some() && self.keyfile.is_some()
    }

    /// Build an acceptor from the configured certificate and key.
    ///
    /// # Errors
    /// If either file cannot be read or parsed.
    pub fn acceptor(&self) -> Result<Option<TlsAcceptor>, TlsError> {
        let (Some(certfile), Some(keyfile)) = (&self.certfile, &self.keyfile) else {
            return Ok(None);
        };

        let certs = load_certs(certfile)?;
        let key = load_key(keyfile)?;
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        Ok(Some(TlsAcceptor::from(Arc::new(config))))
    }

    /// Build a connector that trusts the platform roots.
    #[must_use]
    pub fn connector(&self) -> TlsConnector {
        let mut root_store = RootCertStore::empty();
        let certs = rustls_native_certs::load_native_certs();
        let (added, ignored) = root_store.add_parsable_certificates(certs.certs);
        if !certs.errors.is_empty() || ignored > 0 {
            tracing::warn!(?certs.errors, added, ignored, "Some certificates could not be loaded");
        }

        let mut config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        if !self.verify {
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(NoVerifier));
        }

        TlsConnector::from(Arc::new(config))
    }
}

/// Parse `host` as a TLS server name.
///
/// # Errors
/// If `host` is neither a DNS name nor an IP address.
pub fn server_name(host: &str) -> Result<ServerName<'static>, TlsError> {
    ServerName::try_from(host.to_string()).map_err(|e| TlsError::ServerName(e.to_string()))
}

fn load_certs(path: &PathBuf) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let error = |source| TlsError::CertificateLoad {
        path: path.display().to_string(),
        source,
    };

    rustls_pemfile::certs(&mut BufReader::new(File::open(path).map_err(error)?))
        .collect::<Result<Vec<_>, _>>()
        .map_err(error)
}

fn load_key(path: &PathBuf) -> Result<PrivateKeyDer<'static>, TlsError> {
    let path_str = path.display().to_string();
    let mut reader = BufReader::new(File::open(path).map_err(|e| TlsError::KeyLoad {
        path: path_str.clone(),
        reason: e.to_string(),
    })?);

    match rustls_pemfile::read_one(&mut reader).map_err(|e| TlsError::KeyLoad {
        path: path_str.clone(),
        reason: e.to_string(),
    })? {
        Some(rustls_pemfile::Item::Pkcs1Key(key)) => Ok(PrivateKeyDer::Pkcs1(key)),
        Some(rustls_pemfile::Item::Pkcs8Key(key)) => Ok(PrivateKeyDer::Pkcs8(key)),
        Some(rustls_pemfile::Item::Sec1Key(key)) => Ok(PrivateKeyDer::Sec1(key)),
        _ => Err(TlsError::KeyLoad {
            path: path_str,
            reason: "Unable to determine key file format (expected PKCS1, PKCS8, or SEC1)"
                .to_string(),
        }),
    }
}

/// Accepts any server certificate. Used when `verify = false`.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}
