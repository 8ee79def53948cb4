//! Error types for the postern-queue crate.

use std::{io, path::PathBuf};

use postern_relay::RelayError;
use thiserror::Error;

use crate::QueueId;

/// Errors raised by a storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("Queue entry not found: {0}")]
    NotFound(QueueId),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

/// Why a queue refused an envelope.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A proxy queue's relay refused the message.
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("Queue is shutting down")]
    ShuttingDown,
}

impl QueueError {
    /// Returns `true` if resubmitting the same message will never succeed.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Relay(err) if !err.is_transient())
    }

    /// The remote reply behind this error, if any.
    #[must_use]
    pub const fn reply(&self) -> Option<&postern_relay::Reply> {
        match self {
            Self::Relay(err) => err.failure().reply.as_ref(),
            _ => None,
        }
    }
}
