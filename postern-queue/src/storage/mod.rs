//! Where stored queues keep their entries between attempts.

mod disk;
mod memory;

use async_trait::async_trait;

pub use self::{disk::DiskStorage, memory::MemoryStorage};
use crate::{QueueEntry, QueueId, StorageError};

#[async_trait]
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Insert `entry`, replacing any entry with the same id.
    async fn write(&self, entry: &QueueEntry) -> Result<(), StorageError>;

    async fn read(&self, id: &QueueId) -> Result<QueueEntry, StorageError>;

    async fn remove(&self, id: &QueueId) -> Result<(), StorageError>;

    /// Every stored entry, oldest first.
    async fn load(&self) -> Result<Vec<QueueEntry>, StorageError>;
}
