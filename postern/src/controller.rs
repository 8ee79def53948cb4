use std::{
    collections::HashMap,
    io,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock},
};

use postern_common::{
    ComponentKind, ComponentOptions, Config, ConfigError, NamedComponent, Signal, internal,
    logging::{self, LogSettings},
};
use postern_edge::{Authenticator, Edge, EdgeError, Validator, build_authenticator};
use postern_queue::{Queue, TaskQueueClient, add_queue_policies};
use postern_relay::Relay;
use tokio::sync::broadcast;

use crate::{
    error::{OrchestratorError, PrivilegeError, ResourceError},
    factory::{EdgeParts, FactoryTables, QueueParts, TaskClientCell, lookup},
    process::{
        Detachment, PidFile, PidFileState, Privileges, ProcessOps, ProcessState, SignalListener,
        StandardStream, Stdio, SystemOps,
    },
    registry::Registry,
};

pub mod defaults {
    pub const PROGRAM: &str = "postern";
    pub const WORKER_PROGRAM: &str = "postern-worker";
    pub const CONFIG_ENV: &str = "POSTERN_CONFIG";
    /// Relative to `$HOME`.
    pub const USER_CONFIG: &str = ".postern/postern.toml";
    pub const SYSTEM_CONFIG: &str = "/etc/postern/postern.toml";
    pub const DISCARD: &str = "/dev/null";
    pub const SIGNAL_CAPACITY: usize = 64;
}

/// Settings given on the command line rather than in the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arguments {
    pub config: Option<PathBuf>,
    /// Stay in the foreground with inherited streams even when `daemon` is set.
    pub attached: bool,
    /// Takes precedence over the process section's `pid_file`.
    pub pid_file: Option<PathBuf>,
}

impl Arguments {
    /// Configuration files to try, in order.
    ///
    /// An explicit `--config` is the only candidate, as is `POSTERN_CONFIG`
    /// when set. Otherwise the per-user file comes before the system one.
    #[must_use]
    pub fn config_candidates(&self) -> Vec<PathBuf> {
        if let Some(path) = &self.config {
            return vec![path.clone()];
        }
        if let Some(path) = std::env::var_os(defaults::CONFIG_ENV) {
            return vec![PathBuf::from(path)];
        }

        let mut candidates = Vec::with_capacity(2);
        if let Some(home) = std::env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(defaults::USER_CONFIG));
        }
        candidates.push(PathBuf::from(defaults::SYSTEM_CONFIG));
        candidates
    }
}

/// Constructed instances per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrySizes {
    pub relays: usize,
    pub queues: usize,
    pub edges: usize,
}

/// Turns configuration into running relays, queues and edges, and owns the
/// process lifecycle around them.
///
/// Every driver operation may be repeated; the second call changes nothing.
pub struct Postern {
    program: String,
    arguments: Arguments,
    config: OnceLock<Config>,
    ops: Arc<dyn ProcessOps>,
    state: Arc<Mutex<ProcessState>>,
    factories: FactoryTables,
    validators: RwLock<HashMap<String, Arc<dyn Validator>>>,
    authenticators: RwLock<HashMap<String, Arc<dyn Authenticator>>>,
    relays: Registry<dyn Relay>,
    queues: Registry<dyn Queue>,
    edges: Registry<dyn Edge>,
    tasks: TaskClientCell,
    shutdown: broadcast::Sender<Signal>,
    logging: OnceLock<bool>,
    /// Warnings raised before logging was set up.
    deferred: Mutex<Vec<String>>,
}

impl std::fmt::Debug for Postern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Postern")
            .field("program", &self.program)
            .field("arguments", &self.arguments)
            .field("state", &self.process_state())
            .field("factories", &self.factories)
            .field("relays", &self.relays)
            .field("queues", &self.queues)
            .field("edges", &self.edges)
            .finish_non_exhaustive()
    }
}

/// `path` extended with `next`, unless `next` is already on it.
fn enter(path: &[NamedComponent], next: NamedComponent) -> Result<Vec<NamedComponent>, ConfigError> {
    if path.contains(&next) {
        let cycle: Vec<String> = path
            .iter()
            .chain(std::iter::once(&next))
            .map(ToString::to_string)
            .collect();
        return Err(ConfigError::DependencyCycle(cycle.join(" -> ")));
    }

    let mut path = path.to_vec();
    path.push(next);
    Ok(path)
}

fn switch_error(what: &'static str, name: &str) -> impl FnOnce(io::Error) -> PrivilegeError + use<> {
    let name = name.to_string();
    move |source| PrivilegeError::Switch { what, name, source }
}

fn unknown_identity(what: &'static str, name: &str) -> ConfigError {
    ConfigError::UnknownIdentity {
        what,
        name: name.to_string(),
    }
}

async fn wait_for_shutdown(receiver: &mut broadcast::Receiver<Signal>) {
    loop {
        match receiver.recv().await {
            Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Closed) => return,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
        }
    }
}

impl Postern {
    #[must_use]
    pub fn new(program: impl Into<String>, arguments: Arguments) -> Self {
        Self::with_ops(program, arguments, Arc::new(SystemOps))
    }

    /// Use `ops` instead of the real system calls.
    #[must_use]
    pub fn with_ops(
        program: impl Into<String>,
        arguments: Arguments,
        ops: Arc<dyn ProcessOps>,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(defaults::SIGNAL_CAPACITY);

        Self {
            program: program.into(),
            arguments,
            config: OnceLock::new(),
            ops,
            state: Arc::default(),
            factories: FactoryTables::default(),
            validators: RwLock::default(),
            authenticators: RwLock::default(),
            relays: Registry::default(),
            queues: Registry::default(),
            edges: Registry::default(),
            tasks: TaskClientCell::default(),
            shutdown,
            logging: OnceLock::new(),
            deferred: Mutex::default(),
        }
    }

    /// Use an already-parsed configuration instead of reading one.
    #[must_use]
    pub fn with_config(self, config: Config) -> Self {
        let _ = self.config.set(config);
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub const fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    fn state(&self) -> MutexGuard<'_, ProcessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn process_state(&self) -> ProcessState {
        self.state().clone()
    }

    /// Read the configuration, the first time only.
    ///
    /// # Errors
    /// If no candidate file exists, or the chosen one cannot be read or
    /// parsed.
    pub fn load_configuration(&self) -> Result<&Config, ConfigError> {
        if let Some(config) = self.config.get() {
            return Ok(config);
        }

        let candidates = self.arguments.config_candidates();
        let config = Config::discover(&candidates)?;
        Ok(self.config.get_or_init(|| config))
    }

    fn process_options(&self) -> Result<ComponentOptions, ConfigError> {
        self.load_configuration()?.process(&self.program)
    }

    /// Log `message` now, or once logging is set up.
    fn warn(&self, message: String) {
        if self.logging.get().is_some() {
            internal!(level = WARN, "{message}");
        } else {
            self.deferred
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(message);
        }
    }

    /// Whether the process section asks to run in the background and the
    /// command line does not override it.
    fn detaching(&self, options: &ComponentOptions) -> Result<bool, ConfigError> {
        Ok(options.bool_or("daemon", false)? && !self.arguments.attached)
    }

    /// Switch to the configured `group` and then `user`.
    ///
    /// Without superuser rights this only records
    /// [`Privileges::Insufficient`] and warns once logging is set up; the
    /// names are not looked up in that case.
    ///
    /// # Errors
    /// [`ConfigError::UnknownIdentity`] for a name that does not exist, or
    /// [`PrivilegeError::Switch`] if the system refuses the switch.
    pub fn drop_privileges(&self) -> Result<Privileges, OrchestratorError> {
        let current = self.state().privileges;
        if current != Privileges::Retained {
            return Ok(current);
        }

        let options = self.process_options()?;
        let user = options.str("user")?;
        let group = options.str("group")?;
        if user.is_none() && group.is_none() {
            return Ok(current);
        }

        let euid = self.ops.effective_uid();
        if euid != 0 {
            self.warn(PrivilegeError::Insufficient { euid }.to_string());
            self.state().privileges = Privileges::Insufficient;
            return Ok(Privileges::Insufficient);
        }

        let user = match user {
            Some(name) => {
                let (uid, gid) = self
                    .ops
                    .lookup_user(name)
                    .map_err(switch_error("user", name))?
                    .ok_or_else(|| unknown_identity("user", name))?;
                Some((name, uid, gid))
            }
            None => None,
        };
        let group = match group {
            Some(name) => {
                let gid = self
                    .ops
                    .lookup_group(name)
                    .map_err(switch_error("group", name))?
                    .ok_or_else(|| unknown_identity("group", name))?;
                Some((name, gid))
            }
            None => user.map(|(name, _, gid)| (name, gid)),
        };

        if let Some((name, gid)) = group {
            self.ops
                .set_group(gid)
                .map_err(switch_error("group", name))?;
        }
        if let Some((name, uid, _)) = user {
            self.ops.set_user(uid).map_err(switch_error("user", name))?;
        }

        self.state().privileges = Privileges::Dropped;
        Ok(Privileges::Dropped)
    }

    /// Point the standard streams at the configured `stdout`, `stderr` and
    /// `stdin` files, or `/dev/null`, when running as a daemon.
    ///
    /// # Errors
    /// [`ResourceError::Redirect`] if a file cannot be opened.
    pub fn redirect_streams(&self) -> Result<Stdio, OrchestratorError> {
        let options = self.process_options()?;
        if self.state().stdio == Stdio::Redirected || !self.detaching(&options)? {
            return Ok(self.state().stdio);
        }

        let mut targets = Vec::with_capacity(3);
        for (stream, key) in [
            (StandardStream::Stdout, "stdout"),
            (StandardStream::Stderr, "stderr"),
            (StandardStream::Stdin, "stdin"),
        ] {
            let path = options
                .path(key)?
                .unwrap_or_else(|| PathBuf::from(defaults::DISCARD));
            targets.push((stream, path));
        }

        for (stream, path) in targets {
            self.ops
                .redirect(stream, &path)
                .map_err(|source| ResourceError::Redirect { path, source })?;
        }

        self.state().stdio = Stdio::Redirected;
        Ok(Stdio::Redirected)
    }

    /// Detach from the controlling terminal when running as a daemon.
    ///
    /// Must happen before the async runtime is built.
    ///
    /// # Errors
    /// [`ResourceError::Daemonize`] if forking fails.
    pub fn daemonize(&self) -> Result<Detachment, OrchestratorError> {
        let options = self.process_options()?;
        if self.state().detachment == Detachment::Daemonized || !self.detaching(&options)? {
            return Ok(self.state().detachment);
        }

        self.ops.daemonize().map_err(ResourceError::Daemonize)?;
        self.state().detachment = Detachment::Daemonized;
        Ok(Detachment::Daemonized)
    }

    /// Install the log subscriber from the process section's `logging`
    /// table, then emit any warnings held back until now.
    ///
    /// Returns whether this call installed the subscriber.
    ///
    /// # Errors
    /// If the `logging` table is malformed.
    pub fn setup_logging(&self) -> Result<bool, ConfigError> {
        if self.logging.get().is_some() {
            return Ok(false);
        }

        let options = self.process_options()?;
        let settings = LogSettings::from_options(options.table("logging")?.as_ref())?;
        let installed = *self.logging.get_or_init(|| logging::init(&settings));

        let deferred = std::mem::take(
            &mut *self.deferred.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for message in deferred {
            internal!(level = WARN, "{message}");
        }

        Ok(installed)
    }

    /// Add a relay `type`, or replace a built-in one.
    pub fn register_relay_type<F>(&self, tag: impl Into<String>, constructor: F)
    where
        F: Fn(&ComponentOptions) -> Result<Arc<dyn Relay>, ConfigError> + Send + Sync + 'static,
    {
        self.factories
            .relays
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag.into(), Arc::new(constructor));
    }

    /// Add a queue `type`, or replace a built-in one.
    pub fn register_queue_type<F>(&self, tag: impl Into<String>, constructor: F)
    where
        F: Fn(QueueParts<'_>) -> Result<Arc<dyn Queue>, ConfigError> + Send + Sync + 'static,
    {
        self.factories
            .queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag.into(), Arc::new(constructor));
    }

    /// Add an edge `type`, or replace a built-in one.
    pub fn register_edge_type<F>(&self, tag: impl Into<String>, constructor: F)
    where
        F: Fn(EdgeParts<'_>) -> Result<Arc<dyn Edge>, EdgeError> + Send + Sync + 'static,
    {
        self.factories
            .edges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag.into(), Arc::new(constructor));
    }

    /// Make `validator` available to edges whose `validator` option is
    /// `name`.
    pub fn register_validator(&self, name: impl Into<String>, validator: Arc<dyn Validator>) {
        self.validators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), validator);
    }

    /// Use `authenticator` for `authentication` tables with this `type`.
    pub fn register_authenticator(
        &self,
        tag: impl Into<String>,
        authenticator: Arc<dyn Authenticator>,
    ) {
        self.authenticators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag.into(), authenticator);
    }

    fn validator(&self, name: &str) -> Result<Arc<dyn Validator>, ConfigError> {
        self.validators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownType {
                kind: "validator",
                ty: name.to_string(),
            })
    }

    fn authenticator(
        &self,
        options: &ComponentOptions,
    ) -> Result<Arc<dyn Authenticator>, ConfigError> {
        let registered = self
            .authenticators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(options.ty()?)
            .cloned();

        registered.map_or_else(|| build_authenticator(options), Ok)
    }

    /// The task-queue client shared by every `celery` queue, created from
    /// the `celery_app` section on first use.
    ///
    /// # Errors
    /// If the configuration cannot be loaded or `celery_app` is malformed.
    pub fn task_client(&self) -> Result<Arc<TaskQueueClient>, ConfigError> {
        self.tasks.get_or_try_init(self.load_configuration()?)
    }

    /// The relay called `name`, built on first request.
    ///
    /// # Errors
    /// If its section is missing, its `type` is unknown or its options are
    /// invalid.
    pub async fn get_relay(&self, name: &str) -> Result<Arc<dyn Relay>, OrchestratorError> {
        self.resolve_relay(name, &[]).await
    }

    /// The queue called `name`, built and started on first request along
    /// with its relay.
    ///
    /// # Errors
    /// As for [`get_relay`](Self::get_relay), plus a missing `relay` option.
    pub async fn get_queue(&self, name: &str) -> Result<Arc<dyn Queue>, OrchestratorError> {
        self.resolve_queue(name, &[]).await
    }

    /// The edge called `name`, built and listening on first request along
    /// with its queue and relay.
    ///
    /// # Errors
    /// As for [`get_queue`](Self::get_queue), plus a missing `queue` option or
    /// a listener that cannot be bound.
    pub async fn get_edge(&self, name: &str) -> Result<Arc<dyn Edge>, OrchestratorError> {
        self.resolve_edge(name, &[]).await
    }

    async fn resolve_relay(
        &self,
        name: &str,
        path: &[NamedComponent],
    ) -> Result<Arc<dyn Relay>, OrchestratorError> {
        enter(path, NamedComponent::new(ComponentKind::Relay, name))?;
        self.relays
            .get_or_try_init(name, || async { self.build_relay(name) })
            .await
    }

    fn build_relay(&self, name: &str) -> Result<Arc<dyn Relay>, OrchestratorError> {
        let options = self
            .load_configuration()?
            .component(ComponentKind::Relay, name)?;
        let constructor = lookup(&self.factories.relays, "relay", options.ty()?)?;

        let relay = constructor(&options)?;
        internal!(level = INFO, "Started {} relay '{name}'", relay.kind());
        Ok(relay)
    }

    async fn resolve_queue(
        &self,
        name: &str,
        path: &[NamedComponent],
    ) -> Result<Arc<dyn Queue>, OrchestratorError> {
        let path = enter(path, NamedComponent::new(ComponentKind::Queue, name))?;
        self.queues
            .get_or_try_init(name, || self.build_queue(name, &path))
            .await
    }

    async fn build_queue(
        &self,
        name: &str,
        path: &[NamedComponent],
    ) -> Result<Arc<dyn Queue>, OrchestratorError> {
        let config = self.load_configuration()?;
        let options = config.component(ComponentKind::Queue, name)?;
        let constructor = lookup(&self.factories.queues, "queue", options.ty()?)?;
        let Some(relay_name) = options.str("relay")? else {
            return Err(ConfigError::MissingDependency {
                scope: options.scope().to_string(),
                message: "queue sections must be given a relay name",
            }
            .into());
        };

        let relay = self.resolve_relay(relay_name, path).await?;
        let queue = constructor(QueueParts::new(name, &options, relay, config, &self.tasks))?;
        let queue = add_queue_policies(queue, &options.tables("policies")?)?;
        queue.start().await?;

        internal!(level = INFO, "Started {} queue '{name}'", queue.kind());
        Ok(queue)
    }

    async fn resolve_edge(
        &self,
        name: &str,
        path: &[NamedComponent],
    ) -> Result<Arc<dyn Edge>, OrchestratorError> {
        let path = enter(path, NamedComponent::new(ComponentKind::Edge, name))?;
        self.edges
            .get_or_try_init(name, || self.build_edge(name, &path))
            .await
    }

    async fn build_edge(
        &self,
        name: &str,
        path: &[NamedComponent],
    ) -> Result<Arc<dyn Edge>, OrchestratorError> {
        let options = self
            .load_configuration()?
            .component(ComponentKind::Edge, name)?;
        let constructor = lookup(&self.factories.edges, "edge", options.ty()?)?;
        let Some(queue_name) = options.str("queue")? else {
            return Err(ConfigError::MissingDependency {
                scope: options.scope().to_string(),
                message: "edge sections must be given a queue name",
            }
            .into());
        };

        let validator = match options.str("validator")? {
            Some(validator) => Some(self.validator(validator)?),
            None => None,
        };
        let authenticator = match options.table("authentication")? {
            Some(authentication) => Some(self.authenticator(&authentication)?),
            None => None,
        };

        let queue = self.resolve_queue(queue_name, path).await?;
        let edge = constructor(EdgeParts {
            name,
            options: &options,
            queue,
            validator,
            authenticator,
            shutdown: self.shutdown.clone(),
        })?;
        edge.start().await?;

        match edge.local_addr() {
            Some(addr) => {
                internal!(level = INFO, "Started {} edge '{name}' on {addr}", edge.kind());
            }
            None => internal!(level = INFO, "Started {} edge '{name}'", edge.kind()),
        }
        Ok(edge)
    }

    /// Build and start every configured edge, with the queues and relays
    /// they depend on.
    ///
    /// # Errors
    /// The first failure; edges started before it keep running.
    pub async fn start_edges(&self) -> Result<Vec<Arc<dyn Edge>>, OrchestratorError> {
        let names: Vec<String> = self
            .load_configuration()?
            .components(ComponentKind::Edge)?
            .into_iter()
            .map(|(name, _)| name)
            .collect();

        let mut edges = Vec::with_capacity(names.len());
        for name in names {
            edges.push(self.get_edge(&name).await?);
        }
        Ok(edges)
    }

    /// Build every `celery` queue so the worker can route tasks to their
    /// relays.
    ///
    /// # Errors
    /// The first failure.
    pub async fn start_celery_queues(&self) -> Result<Vec<Arc<dyn Queue>>, OrchestratorError> {
        let mut names = Vec::new();
        for (name, options) in self.load_configuration()?.components(ComponentKind::Queue)? {
            if options.ty()? == "celery" {
                names.push(name);
            }
        }

        let mut queues = Vec::with_capacity(names.len());
        for name in names {
            queues.push(self.get_queue(&name).await?);
        }
        Ok(queues)
    }

    /// Write the pid file named by `--pid-file` or the process section's
    /// `pid_file`, unless one is already held.
    ///
    /// # Errors
    /// [`ResourceError::PidFile`] if it cannot be written.
    pub fn acquire_pid_file(&self) -> Result<Option<PidFile>, OrchestratorError> {
        if matches!(self.state().pid_file, PidFileState::Held(_)) {
            return Ok(None);
        }

        let path = match &self.arguments.pid_file {
            Some(path) => Some(path.clone()),
            None => self.process_options()?.path("pid_file")?,
        };

        match path {
            Some(path) => Ok(Some(PidFile::acquire(
                &path,
                self.ops.pid(),
                Arc::clone(&self.state),
            )?)),
            None => Ok(None),
        }
    }

    /// Receive [`Signal::Shutdown`] and, once everything has stopped,
    /// [`Signal::Finalised`].
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.shutdown.subscribe()
    }

    /// Ask the run loop to finish, as SIGTERM does.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(Signal::Shutdown);
    }

    /// Hold the pid file and wait for SIGTERM, SIGINT or [`shutdown`].
    ///
    /// When `celery` queues exist their worker runs for as long as the loop
    /// does, since their tasks are brokered in this process.
    ///
    /// # Errors
    /// If the pid file or signal handlers cannot be set up.
    ///
    /// [`shutdown`]: Self::shutdown
    pub async fn run_service_loop(&self) -> Result<(), OrchestratorError> {
        let mut receiver = self.shutdown.subscribe();
        let _pid_file = self.acquire_pid_file()?;
        let signals = SignalListener::install(self.shutdown.clone())?;

        internal!(level = INFO, "{} running", self.program);
        match self.tasks.get() {
            Some(client) => client.worker().run(receiver).await,
            None => wait_for_shutdown(&mut receiver).await,
        }
        drop(signals);

        self.stop_components().await;
        Ok(())
    }

    /// Hold the pid file and run the task-queue worker until SIGTERM,
    /// SIGINT or [`shutdown`](Self::shutdown).
    ///
    /// # Errors
    /// If the task-queue client, pid file or signal handlers cannot be set
    /// up.
    pub async fn run_worker_loop(&self) -> Result<(), OrchestratorError> {
        let client = self.task_client()?;
        let receiver = self.shutdown.subscribe();
        let _pid_file = self.acquire_pid_file()?;
        let signals = SignalListener::install(self.shutdown.clone())?;

        internal!(
            level = INFO,
            "{} worker '{}' running with concurrency {}",
            self.program,
            client.name(),
            client.concurrency()
        );
        client.worker().run(receiver).await;
        drop(signals);

        self.stop_components().await;
        Ok(())
    }

    /// Stop edges first so nothing new arrives, then queues, then relays.
    async fn stop_components(&self) {
        internal!(level = INFO, "Shutting down...");

        for edge in self.edges.instances() {
            edge.stop().await;
        }
        for queue in self.queues.instances() {
            queue.stop().await;
        }
        for relay in self.relays.instances() {
            relay.shutdown().await;
        }

        let _ = self.shutdown.send(Signal::Finalised);
    }

    /// Constructed instances per kind.
    #[must_use]
    pub fn sizes(&self) -> RegistrySizes {
        RegistrySizes {
            relays: self.relays.len(),
            queues: self.queues.len(),
            edges: self.edges.len(),
        }
    }

    /// Successful constructions per kind. Equal to [`sizes`](Self::sizes)
    /// when nothing was built twice.
    #[must_use]
    pub fn constructions(&self) -> RegistrySizes {
        RegistrySizes {
            relays: self.relays.constructions(),
            queues: self.queues.constructions(),
            edges: self.edges.constructions(),
        }
    }
}
