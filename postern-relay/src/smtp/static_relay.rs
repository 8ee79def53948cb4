use async_trait::async_trait;
use postern_common::{ComponentOptions, ConfigError, Envelope, internal};

use super::{SmtpRelayConfig, SmtpTransport, defaults};
use crate::{Relay, error::RelayError, reply::Reply};

/// Delivers every message to one fixed smarthost.
#[derive(Debug)]
pub struct StaticSmtpRelay {
    host: String,
    port: u16,
    transport: SmtpTransport,
}

impl StaticSmtpRelay {
    /// # Errors
    /// If `host` is missing, or any option is malformed.
    pub fn from_options(options: &ComponentOptions) -> Result<Self, ConfigError> {
        let host = options.require_str("host")?.to_string();
        let port = options.u16_or("port", defaults::PORT)?;
        let config = SmtpRelayConfig::from_options(options)?;

        Ok(Self {
            host,
            port,
            transport: SmtpTransport::new(config),
        })
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub const fn config(&self) -> &SmtpRelayConfig {
        self.transport.config()
    }
}

#[async_trait]
impl Relay for StaticSmtpRelay {
    async fn attempt(&self, envelope: &Envelope, attempt: u32) -> Result<Reply, RelayError> {
        internal!(
            level = DEBUG,
            "Relaying message from {} to {}:{} (attempt {attempt})",
            envelope.sender,
            self.host,
            self.port
        );

        self.transport
            .deliver(&self.host, self.port, envelope, &envelope.recipients)
            .await
    }

    fn kind(&self) -> &'static str {
        "static"
    }

    async fn shutdown(&self) {
        self.transport.shutdown().await;
    }
}
