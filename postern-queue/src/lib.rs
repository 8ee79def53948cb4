//! Store-and-forward queues for the Postern MTA.
//!
//! A [`Queue`] accepts envelopes from an edge and takes responsibility for
//! getting them to its relay. The concrete queue is chosen by the `type` tag
//! of a `[queue.<name>]` section:
//!
//! | type     | storage            | retries            |
//! |----------|--------------------|--------------------|
//! | `memory` | [`MemoryStorage`]  | [`Backoff`]        |
//! | `disk`   | [`DiskStorage`]    | [`Backoff`]        |
//! | `proxy`  | none               | left to next hop   |
//! | `celery` | task broker        | [`Backoff`]        |
//!
//! Policies from the section's `policies` array wrap the result in a
//! [`PolicyQueue`].

pub mod backoff;
pub mod error;
pub mod policy;
pub mod proxy;
pub mod storage;
pub mod stored;
pub mod task;
mod types;

use async_trait::async_trait;
use postern_common::Envelope;

pub use self::{
    backoff::{Backoff, Strategy, build_backoff},
    error::{QueueError, StorageError},
    policy::{PolicyQueue, QueuePolicy, add_queue_policies},
    proxy::ProxyQueue,
    storage::{DiskStorage, MemoryStorage, Storage},
    stored::StoredQueue,
    task::{Task, TaskQueue, TaskQueueClient, Worker},
    types::{QueueEntry, QueueId},
};

#[async_trait]
pub trait Queue: Send + Sync + std::fmt::Debug {
    /// Take responsibility for `envelope`.
    ///
    /// Returns one id per stored entry; policies may split an envelope into
    /// several. An error means the caller still owns the message.
    async fn enqueue(&self, envelope: Envelope) -> Result<Vec<QueueId>, QueueError>;

    /// The configuration `type` this queue was built from.
    fn kind(&self) -> &'static str;

    /// Begin delivering, picking up anything left in storage.
    ///
    /// Calling this more than once has no further effect.
    async fn start(&self) -> Result<(), QueueError> {
        Ok(())
    }

    /// Stop scheduling deliveries. Stored entries stay where they are.
    async fn stop(&self) {}
}
