//! Constructors selected by a section's `type` tag.
//!
//! Each kind keeps a table from tag to constructor. The built-in tags are
//! installed by [`FactoryTables::default`] and
//! [`Postern::register_relay_type`](crate::Postern::register_relay_type) and
//! friends add more.

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock, PoisonError, RwLock},
};

use postern_common::{ComponentOptions, Config, ConfigError, Signal};
use postern_edge::{Authenticator, Edge, EdgeError, SmtpEdge, Validator};
use postern_queue::{
    DiskStorage, MemoryStorage, ProxyQueue, Queue, StoredQueue, TaskQueue, TaskQueueClient,
    build_backoff,
};
use postern_relay::{MaildropRelay, MxSmtpRelay, Relay, StaticSmtpRelay};
use tokio::sync::broadcast;

pub type RelayConstructor =
    Arc<dyn Fn(&ComponentOptions) -> Result<Arc<dyn Relay>, ConfigError> + Send + Sync>;

pub type QueueConstructor =
    Arc<dyn Fn(QueueParts<'_>) -> Result<Arc<dyn Queue>, ConfigError> + Send + Sync>;

pub type EdgeConstructor =
    Arc<dyn Fn(EdgeParts<'_>) -> Result<Arc<dyn Edge>, EdgeError> + Send + Sync>;

/// The shared task-queue client, created from the whole configuration the
/// first time any `celery` queue asks for it.
#[derive(Debug, Default)]
pub(crate) struct TaskClientCell(OnceLock<Arc<TaskQueueClient>>);

impl TaskClientCell {
    pub(crate) fn get_or_try_init(
        &self,
        config: &Config,
    ) -> Result<Arc<TaskQueueClient>, ConfigError> {
        if let Some(client) = self.0.get() {
            return Ok(Arc::clone(client));
        }

        let client = Arc::new(TaskQueueClient::from_config(config)?);
        Ok(Arc::clone(self.0.get_or_init(|| client)))
    }

    pub(crate) fn get(&self) -> Option<Arc<TaskQueueClient>> {
        self.0.get().cloned()
    }
}

/// What a queue constructor is given.
pub struct QueueParts<'a> {
    pub name: &'a str,
    pub options: &'a ComponentOptions,
    /// The relay named by the section's `relay` option, already running.
    pub relay: Arc<dyn Relay>,
    config: &'a Config,
    tasks: &'a TaskClientCell,
}

impl std::fmt::Debug for QueueParts<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueParts")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("relay", &self.relay)
            .finish_non_exhaustive()
    }
}

impl<'a> QueueParts<'a> {
    pub(crate) const fn new(
        name: &'a str,
        options: &'a ComponentOptions,
        relay: Arc<dyn Relay>,
        config: &'a Config,
        tasks: &'a TaskClientCell,
    ) -> Self {
        Self {
            name,
            options,
            relay,
            config,
            tasks,
        }
    }

    /// The task-queue client shared by every `celery` queue.
    ///
    /// # Errors
    /// If the `celery_app` section is malformed.
    pub fn task_client(&self) -> Result<Arc<TaskQueueClient>, ConfigError> {
        self.tasks.get_or_try_init(self.config)
    }
}

/// What an edge constructor is given.
#[derive(Debug)]
pub struct EdgeParts<'a> {
    pub name: &'a str,
    pub options: &'a ComponentOptions,
    /// The queue named by the section's `queue` option, already running.
    pub queue: Arc<dyn Queue>,
    /// The registered validator named by the section's `validator` option.
    pub validator: Option<Arc<dyn Validator>>,
    /// Built from the section's `authentication` table.
    pub authenticator: Option<Arc<dyn Authenticator>>,
    /// Broadcasts [`Signal::Shutdown`] when the process is stopping.
    pub shutdown: broadcast::Sender<Signal>,
}

/// Tag → constructor, per kind.
pub(crate) struct FactoryTables {
    pub(crate) relays: RwLock<HashMap<String, RelayConstructor>>,
    pub(crate) queues: RwLock<HashMap<String, QueueConstructor>>,
    pub(crate) edges: RwLock<HashMap<String, EdgeConstructor>>,
}

impl std::fmt::Debug for FactoryTables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn tags<V>(table: &RwLock<HashMap<String, V>>) -> Vec<String> {
            let mut tags: Vec<_> = table
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .cloned()
                .collect();
            tags.sort();
            tags
        }

        f.debug_struct("FactoryTables")
            .field("relays", &tags(&self.relays))
            .field("queues", &tags(&self.queues))
            .field("edges", &tags(&self.edges))
            .finish()
    }
}

impl Default for FactoryTables {
    fn default() -> Self {
        let mut relays: HashMap<String, RelayConstructor> = HashMap::new();
        relays.insert("mx".to_string(), Arc::new(mx_relay));
        relays.insert("static".to_string(), Arc::new(static_relay));
        relays.insert("maildrop".to_string(), Arc::new(maildrop_relay));

        let mut queues: HashMap<String, QueueConstructor> = HashMap::new();
        queues.insert("memory".to_string(), Arc::new(memory_queue));
        queues.insert("disk".to_string(), Arc::new(disk_queue));
        queues.insert("proxy".to_string(), Arc::new(proxy_queue));
        queues.insert("celery".to_string(), Arc::new(celery_queue));

        let mut edges: HashMap<String, EdgeConstructor> = HashMap::new();
        edges.insert("smtp".to_string(), Arc::new(smtp_edge));

        Self {
            relays: RwLock::new(relays),
            queues: RwLock::new(queues),
            edges: RwLock::new(edges),
        }
    }
}

/// Look up `tag` in `table`.
pub(crate) fn lookup<V: Clone>(
    table: &RwLock<HashMap<String, V>>,
    kind: &'static str,
    tag: &str,
) -> Result<V, ConfigError> {
    table
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(tag)
        .cloned()
        .ok_or_else(|| ConfigError::UnknownType {
            kind,
            ty: tag.to_string(),
        })
}

fn mx_relay(options: &ComponentOptions) -> Result<Arc<dyn Relay>, ConfigError> {
    Ok(Arc::new(MxSmtpRelay::from_options(options)?))
}

fn static_relay(options: &ComponentOptions) -> Result<Arc<dyn Relay>, ConfigError> {
    Ok(Arc::new(StaticSmtpRelay::from_options(options)?))
}

fn maildrop_relay(options: &ComponentOptions) -> Result<Arc<dyn Relay>, ConfigError> {
    Ok(Arc::new(MaildropRelay::from_options(options)?))
}

fn memory_queue(parts: QueueParts<'_>) -> Result<Arc<dyn Queue>, ConfigError> {
    let backoff = build_backoff(parts.options.table("retry")?.as_ref())?;
    Ok(Arc::new(StoredQueue::new(
        "memory",
        Arc::new(MemoryStorage::new()),
        parts.relay,
        backoff,
    )))
}

fn disk_queue(parts: QueueParts<'_>) -> Result<Arc<dyn Queue>, ConfigError> {
    let storage = DiskStorage::from_options(parts.options)?;
    let backoff = build_backoff(parts.options.table("retry")?.as_ref())?;
    Ok(Arc::new(StoredQueue::new(
        "disk",
        Arc::new(storage),
        parts.relay,
        backoff,
    )))
}

fn proxy_queue(parts: QueueParts<'_>) -> Result<Arc<dyn Queue>, ConfigError> {
    Ok(Arc::new(ProxyQueue::new(parts.relay)))
}

fn celery_queue(parts: QueueParts<'_>) -> Result<Arc<dyn Queue>, ConfigError> {
    let backoff = build_backoff(parts.options.table("retry")?.as_ref())?;
    let client = parts.task_client()?;
    Ok(Arc::new(TaskQueue::new(
        parts.name,
        client,
        parts.relay,
        backoff,
    )))
}

fn smtp_edge(parts: EdgeParts<'_>) -> Result<Arc<dyn Edge>, EdgeError> {
    let edge = SmtpEdge::from_options(
        parts.options,
        parts.queue,
        parts.validator,
        parts.authenticator,
    )?;
    Ok(Arc::new(edge.with_shutdown(parts.shutdown)))
}
