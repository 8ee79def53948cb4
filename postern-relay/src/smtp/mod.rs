//! SMTP delivery shared by the `mx` and `static` relays.

mod client;
mod mx;
mod pool;
mod static_relay;

use std::time::Duration;

use postern_common::{
    ComponentOptions, ConfigError, Envelope, hostname::fill_hostname_template, internal,
    tls::TlsSettings,
};
use tokio::sync::Semaphore;
use tokio_rustls::TlsConnector;

pub use self::{client::SmtpConnection, mx::MxSmtpRelay, static_relay::StaticSmtpRelay};
use self::pool::ConnectionPool;
use crate::{
    error::{Failure, RelayError},
    reply::Reply,
};

pub mod defaults {
    use std::time::Duration;

    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DATA_TIMEOUT: Duration = Duration::from_secs(60);
    pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);
    pub const CONCURRENT_CONNECTIONS: usize = 5;
    pub const PORT: u16 = 25;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub command: Duration,
    pub data: Duration,
}

/// Options common to every SMTP relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpRelayConfig {
    pub timeouts: Timeouts,
    /// Idle connections are reused for this long; zero disables reuse.
    pub idle_timeout: Duration,
    pub concurrent_connections: usize,
    pub ehlo_as: String,
    pub tls: Option<TlsSettings>,
}

impl SmtpRelayConfig {
    /// # Errors
    /// If any option is present with the wrong shape.
    pub fn from_options(options: &ComponentOptions) -> Result<Self, ConfigError> {
        let concurrent_connections =
            options.usize_or("concurrent_connections", defaults::CONCURRENT_CONNECTIONS)?;
        if concurrent_connections > Semaphore::MAX_PERMITS {
            return Err(ConfigError::InvalidValue {
                scope: options.scope().to_string(),
                field: "concurrent_connections".to_string(),
                expected: "a connection count the pool can hold",
            });
        }

        Ok(Self {
            timeouts: Timeouts {
                connect: options.duration_or("connect_timeout", defaults::CONNECT_TIMEOUT)?,
                command: options.duration_or("command_timeout", defaults::COMMAND_TIMEOUT)?,
                data: options.duration_or("data_timeout", defaults::DATA_TIMEOUT)?,
            },
            idle_timeout: options.duration_or("idle_timeout", defaults::IDLE_TIMEOUT)?,
            concurrent_connections,
            ehlo_as: fill_hostname_template(options.str("ehlo_as")?),
            tls: TlsSettings::from_options(options)?,
        })
    }
}

/// Connection pool plus the SMTP transaction, parameterised by destination.
pub(crate) struct SmtpTransport {
    config: SmtpRelayConfig,
    pool: ConnectionPool,
    connector: Option<TlsConnector>,
}

impl std::fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpTransport")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("starttls", &self.connector.is_some())
            .finish()
    }
}

impl SmtpTransport {
    pub(crate) fn new(config: SmtpRelayConfig) -> Self {
        let pool = ConnectionPool::new(config.concurrent_connections, config.idle_timeout);
        let connector = config.tls.as_ref().map(TlsSettings::connector);

        Self {
            config,
            pool,
            connector,
        }
    }

    pub(crate) const fn config(&self) -> &SmtpRelayConfig {
        &self.config
    }

    async fn open(&self, host: &str, port: u16) -> Result<SmtpConnection, RelayError> {
        internal!(level = DEBUG, "Connecting to {host}:{port}");
        let (mut connection, banner) = SmtpConnection::connect(host, port, self.config.timeouts).await?;
        if !banner.is_success() {
            connection.quit().await;
            return Err(RelayError::from_reply("Server rejected connection", banner));
        }

        let reply = connection.greet(&self.config.ehlo_as).await?;
        if !reply.is_success() {
            connection.quit().await;
            return Err(RelayError::from_reply("Server rejected greeting", reply));
        }

        let required = self.config.tls.as_ref().is_some_and(|tls| tls.required);
        match &self.connector {
            Some(connector) if connection.has_extension("STARTTLS") => {
                connection = connection
                    .starttls(host, connector, &self.config.ehlo_as)
                    .await?;
            }
            _ if required => {
                connection.quit().await;
                return Err(RelayError::transient(format!(
                    "{host}:{port} does not offer STARTTLS and TLS is required"
                )));
            }
            _ => {}
        }

        Ok(connection)
    }

    /// Reuse an idle connection if one survives `RSET`, else open a new one.
    async fn connection(&self, host: &str, port: u16) -> Result<SmtpConnection, RelayError> {
        while let Some(mut connection) = self.pool.checkout(host, port).await {
            if connection
                .command("RSET")
                .await
                .is_ok_and(|reply| reply.is_success())
            {
                return Ok(connection);
            }
        }

        self.open(host, port).await
    }

    /// Deliver `envelope` to `recipients` at `host:port`.
    ///
    /// Recipients refused at RCPT time are reported through the error even
    /// when the message is accepted for the others.
    pub(crate) async fn deliver(
        &self,
        host: &str,
        port: u16,
        envelope: &Envelope,
        recipients: &[String],
    ) -> Result<Reply, RelayError> {
        let Some(_permit) = self.pool.acquire().await else {
            return Err(RelayError::transient("Relay is shutting down"));
        };

        let mut connection = self.connection(host, port).await?;
        let result = transaction(&mut connection, envelope, recipients).await;

        match &result {
            Err(err) if err.failure().reply.is_none() => {
                // Connection-level failure, the session state is unknown.
            }
            _ => self.pool.checkin(host, port, connection).await,
        }

        result
    }

    pub(crate) async fn shutdown(&self) {
        self.pool.drain().await;
    }
}

async fn transaction(
    connection: &mut SmtpConnection,
    envelope: &Envelope,
    recipients: &[String],
) -> Result<Reply, RelayError> {
    let reply = connection
        .command(&format!("MAIL FROM:<{}>", envelope.sender))
        .await?;
    if !reply.is_success() {
        return Err(RelayError::from_reply("MAIL FROM rejected", reply)
            .for_recipients(recipients.to_vec()));
    }

    let mut accepted = Vec::with_capacity(recipients.len());
    let mut temporary = Vec::new();
    let mut last_rejection = None;

    for recipient in recipients {
        let reply = connection
            .command(&format!("RCPT TO:<{recipient}>"))
            .await?;

        if reply.is_success() {
            accepted.push(recipient.clone());
        } else {
            if reply.is_temporary_error() {
                temporary.push(recipient.clone());
            } else {
                internal!(level = WARN, "Recipient {recipient} rejected: {reply}");
            }
            last_rejection = Some(reply);
        }
    }

    let rejected = last_rejection.map(|last| rejection(recipients, &accepted, temporary, last));
    if accepted.is_empty() {
        let _ = connection.command("RSET").await;
        return Err(rejected.unwrap_or_else(|| RelayError::permanent("No recipients")));
    }

    let reply = connection.command("DATA").await?;
    if !reply.is_intermediate() {
        return Err(RelayError::from_reply("DATA rejected", reply).for_recipients(accepted));
    }

    let reply = send_message(connection, envelope, accepted).await?;
    rejected.map_or(Ok(reply), Err)
}

async fn send_message(
    connection: &mut SmtpConnection,
    envelope: &Envelope,
    accepted: Vec<String>,
) -> Result<Reply, RelayError> {
    let reply = connection.send_data(&envelope.data).await?;
    if !reply.is_success() {
        return Err(RelayError::from_reply("Message rejected", reply).for_recipients(accepted));
    }

    Ok(reply)
}

/// The error reported for recipients refused at RCPT time.
///
/// Temporarily refused recipients take precedence so the queue retries them;
/// permanently refused ones have already been logged.
fn rejection(
    recipients: &[String],
    accepted: &[String],
    temporary: Vec<String>,
    last: Reply,
) -> RelayError {
    if temporary.is_empty() {
        let refused = recipients
            .iter()
            .filter(|r| !accepted.contains(r))
            .cloned()
            .collect();
        RelayError::from_reply("Recipients rejected", last).for_recipients(refused)
    } else {
        RelayError::Transient(Failure {
            message: "Recipients temporarily rejected".to_string(),
            reply: Some(last),
            recipients: temporary,
        })
    }
}
