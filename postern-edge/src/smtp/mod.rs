//! The `smtp` edge: a listener handing each accepted message to its queue.

mod command;
mod connection;
mod session;

use std::{
    net::{IpAddr, SocketAddr},
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use futures_util::future::join_all;
use postern_common::{
    ComponentOptions, ConfigError, Signal, hostname::fill_hostname_template, internal,
    tls::TlsSettings,
};
use postern_queue::Queue;
use tokio::{
    net::TcpListener,
    sync::{Mutex, broadcast, watch},
    task::JoinHandle,
};
use tokio_rustls::TlsAcceptor;

pub use self::command::{Command, HeloVariant};
use self::session::{Session, stopped};
use crate::{
    Edge,
    auth::Authenticator,
    error::EdgeError,
    validators::{RulesValidator, Validator},
};

pub mod defaults {
    use std::time::Duration;

    pub const INTERFACE: &str = "127.0.0.1";
    pub const PORT: u16 = 25;
    pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(20);
    pub const DATA_TIMEOUT: Duration = Duration::from_secs(30);
    pub const MAX_SIZE: usize = 10 * 1024 * 1024;
}

/// Per-read limits for a session. Not configurable from a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub command: Duration,
    pub data: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command: defaults::COMMAND_TIMEOUT,
            data: defaults::DATA_TIMEOUT,
        }
    }
}

/// Everything an `[edge.<name>]` section of type `smtp` configures, apart
/// from the queue, validator and authenticator it is wired to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpEdgeConfig {
    pub address: SocketAddr,
    pub hostname: String,
    pub max_size: usize,
    pub timeouts: Timeouts,
    pub tls: Option<TlsSettings>,
    /// Start TLS before the greeting instead of waiting for STARTTLS.
    pub tls_immediately: bool,
}

impl SmtpEdgeConfig {
    /// # Errors
    /// If any option is malformed, or `tls_immediately` is set without a
    /// certificate.
    pub fn from_options(options: &ComponentOptions) -> Result<Self, ConfigError> {
        let (interface, port) = match options.table("listener")? {
            Some(listener) => (
                listener.str_or("interface", defaults::INTERFACE)?.to_string(),
                listener.u16_or("port", defaults::PORT)?,
            ),
            None => (defaults::INTERFACE.to_string(), defaults::PORT),
        };
        let ip: IpAddr = interface.parse().map_err(|_| ConfigError::InvalidValue {
            scope: format!("{}.listener", options.scope()),
            field: "interface".to_string(),
            expected: "an IP address",
        })?;

        let tls = TlsSettings::from_options(options)?;
        let tls_immediately = options.bool_or("tls_immediately", false)?;
        if tls_immediately && !tls.as_ref().is_some_and(TlsSettings::has_identity) {
            return Err(ConfigError::InvalidValue {
                scope: options.scope().to_string(),
                field: "tls_immediately".to_string(),
                expected: "false unless tls.certfile and tls.keyfile are set",
            });
        }

        Ok(Self {
            address: SocketAddr::new(ip, port),
            hostname: fill_hostname_template(options.str("hostname")?),
            max_size: options.usize_or("max_size", defaults::MAX_SIZE)?,
            timeouts: Timeouts::default(),
            tls,
            tls_immediately,
        })
    }
}

/// State shared by every session of one edge.
pub(crate) struct Context {
    config: SmtpEdgeConfig,
    queue: Arc<dyn Queue>,
    validators: Vec<Arc<dyn Validator>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    acceptor: Option<TlsAcceptor>,
}

struct Running {
    addr: SocketAddr,
    halt: Arc<watch::Sender<bool>>,
    task: JoinHandle<()>,
}

pub struct SmtpEdge {
    context: Arc<Context>,
    signal: Option<broadcast::Sender<Signal>>,
    running: Mutex<Option<Running>>,
    /// Cleared by the accept loop when it exits on its own.
    addr: Arc<RwLock<Option<SocketAddr>>>,
}

impl std::fmt::Debug for SmtpEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpEdge")
            .field("config", &self.context.config)
            .field("queue", &self.context.queue)
            .field("validators", &self.context.validators)
            .field("auth", &self.context.authenticator.is_some())
            .field("addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

impl SmtpEdge {
    /// # Errors
    /// If the TLS certificate or key cannot be loaded.
    pub fn new(
        config: SmtpEdgeConfig,
        queue: Arc<dyn Queue>,
        validators: Vec<Arc<dyn Validator>>,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Result<Self, EdgeError> {
        let acceptor = match &config.tls {
            Some(tls) => tls.acceptor()?,
            None => None,
        };

        Ok(Self {
            context: Arc::new(Context {
                config,
                queue,
                validators,
                authenticator,
                acceptor,
            }),
            signal: None,
            running: Mutex::new(None),
            addr: Arc::new(RwLock::new(None)),
        })
    }

    /// Build from an `[edge.<name>]` section. A `rules` table becomes the
    /// first validator, followed by `validator` when given.
    ///
    /// # Errors
    /// If any option is malformed or the TLS material cannot be loaded.
    pub fn from_options(
        options: &ComponentOptions,
        queue: Arc<dyn Queue>,
        validator: Option<Arc<dyn Validator>>,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Result<Self, EdgeError> {
        let config = SmtpEdgeConfig::from_options(options)?;

        let mut validators: Vec<Arc<dyn Validator>> = Vec::new();
        if let Some(rules) = options.table("rules")? {
            let rules = RulesValidator::from_options(&rules)?;
            if rules.requires_credentials() && authenticator.is_none() {
                internal!(
                    level = WARN,
                    "{} requires credentials but has no authentication configured",
                    options.scope()
                );
            }
            validators.push(Arc::new(rules));
        }
        validators.extend(validator);

        Self::new(config, queue, validators, authenticator)
    }

    /// Also stop when `signal` broadcasts [`Signal::Shutdown`].
    #[must_use]
    pub fn with_shutdown(mut self, signal: broadcast::Sender<Signal>) -> Self {
        self.signal = Some(signal);
        self
    }

    #[must_use]
    pub fn config(&self) -> &SmtpEdgeConfig {
        &self.context.config
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<dyn Queue> {
        &self.context.queue
    }

    #[must_use]
    pub fn offers_starttls(&self) -> bool {
        self.context.acceptor.is_some()
    }
}

#[async_trait]
impl Edge for SmtpEdge {
    async fn start(&self) -> Result<(), EdgeError> {
        let mut running = self.running.lock().await;
        if running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
        {
            return Ok(());
        }

        let requested = self.context.config.address;
        let bind_error = |source| EdgeError::Bind {
            addr: requested,
            source,
        };
        let listener = TcpListener::bind(requested).await.map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;

        *self.addr.write().unwrap_or_else(PoisonError::into_inner) = Some(addr);
        let (halt, stop) = watch::channel(false);
        let halt = Arc::new(halt);
        let task = tokio::spawn(serve(
            listener,
            Arc::clone(&self.context),
            Arc::clone(&halt),
            stop,
            self.signal.as_ref().map(broadcast::Sender::subscribe),
            Arc::clone(&self.addr),
        ));

        internal!(level = INFO, "SMTP edge listening on {addr}");
        *running = Some(Running { addr, halt, task });
        Ok(())
    }

    async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        running.halt.send_replace(true);
        if let Err(err) = running.task.await {
            internal!(level = ERROR, "SMTP edge on {} failed: {err}", running.addr);
        }

        *self.addr.write().unwrap_or_else(PoisonError::into_inner) = None;
        internal!(level = INFO, "SMTP edge on {} stopped", running.addr);
    }

    fn is_running(&self) -> bool {
        self.local_addr().is_some()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *self.addr.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn kind(&self) -> &'static str {
        "smtp"
    }
}

/// Resolve on [`Signal::Shutdown`], or never when there is no channel.
async fn signalled(receiver: &mut Option<broadcast::Receiver<Signal>>) {
    let Some(receiver) = receiver else {
        return std::future::pending().await;
    };

    loop {
        match receiver.recv().await {
            Ok(Signal::Shutdown) => return,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return std::future::pending().await,
        }
    }
}

/// Accept connections until told to stop, then wait for open sessions.
async fn serve(
    listener: TcpListener,
    context: Arc<Context>,
    halt: Arc<watch::Sender<bool>>,
    mut stop: watch::Receiver<bool>,
    mut signal: Option<broadcast::Receiver<Signal>>,
    addr: Arc<RwLock<Option<SocketAddr>>>,
) {
    let mut sessions: Vec<JoinHandle<()>> = Vec::new();

    loop {
        tokio::select! {
            () = stopped(&mut stop) => break,
            () = signalled(&mut signal) => {
                internal!(level = DEBUG, "SMTP edge received shutdown signal");
                halt.send_replace(true);
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        internal!(level = WARN, "Unable to accept connection: {err}");
                        continue;
                    }
                };

                internal!(level = DEBUG, "Connection from {peer}");
                sessions.retain(|session| !session.is_finished());

                let session = Session::new(Arc::clone(&context), stream, stop.clone());
                sessions.push(tokio::spawn(async move {
                    if let Err(err) = session.run().await {
                        internal!(level = DEBUG, "Session with {peer} ended: {err}");
                    }
                }));
            }
        }
    }

    drop(listener);
    *addr.write().unwrap_or_else(PoisonError::into_inner) = None;
    join_all(sessions).await;
}
