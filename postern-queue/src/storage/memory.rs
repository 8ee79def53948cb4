use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use async_trait::async_trait;

use super::Storage;
use crate::{QueueEntry, QueueId, StorageError};

/// Entries held in a map for the life of the process.
///
/// Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<QueueId, QueueEntry>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn write(&self, entry: &QueueEntry) -> Result<(), StorageError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.id, entry.clone());
        Ok(())
    }

    async fn read(&self, id: &QueueId) -> Result<QueueEntry, StorageError> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or(StorageError::NotFound(*id))
    }

    async fn remove(&self, id: &QueueId) -> Result<(), StorageError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .map(|_| ())
            .ok_or(StorageError::NotFound(*id))
    }

    async fn load(&self) -> Result<Vec<QueueEntry>, StorageError> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        entries.sort_by_key(|entry| entry.id);
        Ok(entries)
    }
}
