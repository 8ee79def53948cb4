//! SMTP AUTH support.
//!
//! An edge offers `AUTH PLAIN LOGIN` when its section has an
//! `authentication` table:
//!
//! ```toml
//! [edge.submission.authentication]
//! type = "static"
//! credentials = { alice = "secret" }
//! credentials_file = "/etc/postern/credentials"   # user:password per line
//! ```

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use postern_common::{ComponentOptions, ConfigError};

pub const MECHANISMS: &str = "PLAIN LOGIN";

#[async_trait]
pub trait Authenticator: Send + Sync + std::fmt::Debug {
    /// Whether `secret` is the password of `identity`.
    async fn verify(&self, identity: &str, secret: &str) -> bool;
}

/// Credentials listed in configuration.
#[derive(Default, Clone)]
pub struct StaticCredentials {
    credentials: HashMap<String, String>,
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("identities", &self.credentials.len())
            .finish()
    }
}

impl StaticCredentials {
    /// # Errors
    /// If neither `credentials` nor `credentials_file` is given, or the file
    /// cannot be read.
    pub fn from_options(options: &ComponentOptions) -> Result<Self, ConfigError> {
        let mut credentials = HashMap::new();

        if let Some(table) = options.table("credentials")? {
            for (identity, _) in table.iter() {
                credentials.insert(identity.clone(), table.require_str(identity)?.to_string());
            }
        }

        if let Some(path) = options.path("credentials_file")? {
            let content = std::fs::read_to_string(&path)
                .map_err(|source| ConfigError::Read { path, source })?;
            credentials.extend(parse_credentials(&content));
        }

        if credentials.is_empty() && !options.contains("credentials") {
            return Err(ConfigError::MissingField {
                scope: options.scope().to_string(),
                field: "credentials".to_string(),
            });
        }

        Ok(Self { credentials })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

/// `identity:secret` lines; blank lines and `#` comments are skipped.
fn parse_credentials(content: &str) -> impl Iterator<Item = (String, String)> + '_ {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(identity, secret)| (identity.trim().to_string(), secret.to_string()))
}

#[async_trait]
impl Authenticator for StaticCredentials {
    async fn verify(&self, identity: &str, secret: &str) -> bool {
        self.credentials
            .get(identity)
            .is_some_and(|expected| expected == secret)
    }
}

/// Build a built-in authenticator from an `authentication` table.
///
/// # Errors
/// [`ConfigError::UnknownType`] unless `type` is `static`, or the options
/// are malformed.
pub fn build_authenticator(
    options: &ComponentOptions,
) -> Result<Arc<dyn Authenticator>, ConfigError> {
    match options.ty()? {
        "static" => Ok(Arc::new(StaticCredentials::from_options(options)?)),
        other => Err(ConfigError::UnknownType {
            kind: "authentication",
            ty: other.to_string(),
        }),
    }
}

/// Decode a base64 SASL response into text.
pub(crate) fn decode(response: &str) -> Option<String> {
    STANDARD
        .decode(response.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

pub(crate) fn encode(challenge: &str) -> String {
    STANDARD.encode(challenge)
}

/// Split a decoded `PLAIN` response into identity and secret.
///
/// The response is `authzid NUL authcid NUL passwd`; the authorization
/// identity is ignored.
pub(crate) fn split_plain(response: &str) -> Option<(String, String)> {
    let mut parts = response.split('\0');
    let _authzid = parts.next()?;
    let identity = parts.next()?;
    let secret = parts.next()?;

    (parts.next().is_none() && !identity.is_empty())
        .then(|| (identity.to_string(), secret.to_string()))
}
