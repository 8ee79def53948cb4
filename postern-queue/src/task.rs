//! The `celery` queue: deliveries executed by a task worker.
//!
//! Queues of this type do not deliver anything themselves. They submit a
//! [`Task`] to the shared [`TaskQueueClient`], and a [`Worker`] bound to the
//! same client runs the delivery through the relay registered for the task's
//! queue, resubmitting it after the queue's backoff when it fails
//! transiently.
//!
//! The broker is in-process: tasks are passed over a channel and only reach
//! a worker running in the same process.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use postern_common::{Config, ConfigError, Envelope, Signal, internal};
use postern_relay::Relay;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore, broadcast, mpsc};

use crate::{Backoff, Queue, QueueError, QueueId};

pub mod defaults {
    pub const CONCURRENCY: usize = 4;
    pub const NAME: &str = "postern";
}

/// One delivery job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: QueueId,
    /// Name of the queue that submitted this task.
    pub queue: String,
    pub envelope: Envelope,
    /// Attempts made so far.
    pub attempts: u32,
}

impl Task {
    #[must_use]
    pub fn new(queue: impl Into<String>, envelope: Envelope) -> Self {
        Self {
            id: QueueId::generate(),
            queue: queue.into(),
            envelope,
            attempts: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct Handler {
    relay: Arc<dyn Relay>,
    backoff: Backoff,
}

/// Broker plus the registry of queues whose tasks it carries.
///
/// One exists per orchestrator, built from the `[celery_app]` section.
#[derive(Debug)]
pub struct TaskQueueClient {
    name: String,
    concurrency: usize,
    sender: mpsc::UnboundedSender<Task>,
    receiver: Mutex<mpsc::UnboundedReceiver<Task>>,
    handlers: RwLock<HashMap<String, Handler>>,
}

impl TaskQueueClient {
    /// Build the client from the `[celery_app]` section of `config`.
    ///
    /// # Errors
    /// If the section or one of its options is malformed.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let options = config.section("celery_app")?;
        let concurrency = options.usize_or("concurrency", defaults::CONCURRENCY)?;
        if concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                scope: options.scope().to_string(),
                field: "concurrency".to_string(),
                expected: "at least 1",
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();

        Ok(Self {
            name: options.str_or("name", defaults::NAME)?.to_string(),
            concurrency,
            sender,
            receiver: Mutex::new(receiver),
            handlers: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Route tasks from queue `name` to `relay`.
    pub fn register(&self, name: &str, relay: Arc<dyn Relay>, backoff: Backoff) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Handler { relay, backoff });
    }

    /// Names of the queues with a registered handler, sorted.
    #[must_use]
    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn handler(&self, queue: &str) -> Option<Handler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(queue)
            .cloned()
    }

    /// Hand `task` to the broker.
    ///
    /// # Errors
    /// [`QueueError::ShuttingDown`] if the broker is closed.
    pub fn submit(&self, task: Task) -> Result<QueueId, QueueError> {
        let id = task.id;
        self.sender
            .send(task)
            .map_err(|_| QueueError::ShuttingDown)?;
        Ok(id)
    }

    /// A worker consuming this client's tasks.
    #[must_use]
    pub fn worker(self: &Arc<Self>) -> Worker {
        Worker {
            client: Arc::clone(self),
        }
    }
}

/// Executes tasks until told to shut down.
///
/// Only one worker consumes at a time; a second [`Worker::run`] waits for
/// the first to return.
#[derive(Debug, Clone)]
pub struct Worker {
    client: Arc<TaskQueueClient>,
}

impl Worker {
    /// Consume tasks, running at most `concurrency` deliveries at once, until
    /// a [`Signal::Shutdown`] arrives. Deliveries already running are left to
    /// finish on their own.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<Signal>) {
        let mut receiver = self.client.receiver.lock().await;
        let permits = Arc::new(Semaphore::new(self.client.concurrency));

        internal!(
            level = INFO,
            "Worker for {} started with concurrency {}",
            self.client.name,
            self.client.concurrency
        );

        loop {
            let permit = tokio::select! {
                _ = shutdown.recv() => break,
                permit = Arc::clone(&permits).acquire_owned() => permit,
            };
            let Ok(permit) = permit else { break };

            let task = tokio::select! {
                _ = shutdown.recv() => break,
                task = receiver.recv() => task,
            };
            let Some(task) = task else { break };

            let client = Arc::clone(&self.client);
            tokio::spawn(async move {
                execute(client, task).await;
                drop(permit);
            });
        }

        internal!(level = INFO, "Worker for {} stopped", self.client.name);
    }
}

async fn execute(client: Arc<TaskQueueClient>, mut task: Task) {
    let id = task.id;
    let Some(handler) = client.handler(&task.queue) else {
        internal!(
            level = ERROR,
            "Dropping task {id}: no queue named {} is registered",
            task.queue
        );
        return;
    };

    task.attempts += 1;
    match handler.relay.attempt(&task.envelope, task.attempts).await {
        Ok(reply) => internal!(level = INFO, "Delivered {id}: {reply}"),
        Err(err) if !err.is_transient() => {
            internal!(level = WARN, "Permanent failure delivering {id}: {err}");
        }
        Err(err) => match handler.backoff.delay(task.attempts) {
            None => internal!(
                level = WARN,
                "Giving up on {id} after {} attempt(s): {err}",
                task.attempts
            ),
            Some(delay) => {
                let failed = err.recipients();
                if !failed.is_empty() {
                    task.envelope
                        .recipients
                        .retain(|recipient| failed.contains(recipient));
                }

                internal!(
                    level = INFO,
                    "Transient failure delivering {id}, retrying in {}s: {err}",
                    delay.as_secs_f64()
                );

                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if client.submit(task).is_err() {
                        internal!(level = WARN, "Unable to resubmit {id}: broker closed");
                    }
                });
            }
        },
    }
}

/// Adapter submitting a `celery` queue's envelopes to the shared client.
#[derive(Debug)]
pub struct TaskQueue {
    name: String,
    client: Arc<TaskQueueClient>,
}

impl TaskQueue {
    /// Register queue `name` with `client` and return its adapter.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        client: Arc<TaskQueueClient>,
        relay: Arc<dyn Relay>,
        backoff: Backoff,
    ) -> Self {
        let name = name.into();
        client.register(&name, relay, backoff);
        Self { name, client }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Queue for TaskQueue {
    async fn enqueue(&self, envelope: Envelope) -> Result<Vec<QueueId>, QueueError> {
        let id = self.client.submit(Task::new(self.name.clone(), envelope))?;
        internal!(level = DEBUG, "Submitted task {id} for queue {}", self.name);
        Ok(vec![id])
    }

    fn kind(&self) -> &'static str {
        "celery"
    }
}
