//! Error types for the postern crate.

use std::{io, path::PathBuf};

use postern_common::ConfigError;
use postern_edge::EdgeError;
use postern_queue::QueueError;
use thiserror::Error;

/// Everything that can stop the orchestrator from starting.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Edge(#[from] EdgeError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl OrchestratorError {
    /// Whether this is a configuration mistake rather than a runtime failure.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Edge(EdgeError::Config(_)))
    }
}

#[derive(Debug, Error)]
pub enum PrivilegeError {
    /// `user` or `group` is configured but the process cannot switch to it.
    /// Only ever reported as a warning.
    #[error("Only the superuser can drop privileges (effective uid {euid})")]
    Insufficient { euid: u32 },

    #[error("Unable to switch to {what} {name}: {source}")]
    Switch {
        what: &'static str,
        name: String,
        #[source]
        source: io::Error,
    },
}

/// A process-level resource could not be acquired. Always fatal.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Unable to write pid file {}: {source}", path.display())]
    PidFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to redirect standard streams to {}: {source}", path.display())]
    Redirect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to daemonize: {0}")]
    Daemonize(#[source] io::Error),

    #[error("Unable to install signal handlers: {0}")]
    Signal(#[source] io::Error),
}
