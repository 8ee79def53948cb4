//! Error types for the postern-common crate.
//!
//! [`ConfigError`] is the one error every factory in the workspace can raise
//! while turning configuration into components. It is always fatal at
//! startup.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors raised while reading configuration or picking a constructor for it.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The `type` tag of a section is not one of the recognised values.
    #[error("{kind} type does not exist: {ty}")]
    UnknownType { kind: &'static str, ty: String },

    /// A component was requested by name but has no configuration section.
    #[error("No [{kind}.{name}] section found in configuration")]
    MissingSection { kind: &'static str, name: String },

    /// A component does not name the component it depends on.
    #[error("{scope}: {message}")]
    MissingDependency { scope: String, message: &'static str },

    /// A mandatory option is absent.
    #[error("{scope} is missing required option '{field}'")]
    MissingField { scope: String, field: String },

    /// An option is present but has the wrong shape.
    #[error("{scope} option '{field}' must be {expected}")]
    InvalidValue {
        scope: String,
        field: String,
        expected: &'static str,
    },

    /// Resolving a component led back to a component already being resolved.
    #[error("Dependency cycle detected: {0}")]
    DependencyCycle(String),

    /// A user or group name does not exist on this system.
    #[error("Unknown {what}: {name}")]
    UnknownIdentity { what: &'static str, name: String },

    /// The configuration file is not valid TOML.
    #[error("Unable to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The configuration file could not be read.
    #[error("Unable to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// None of the candidate configuration files exist.
    #[error("No configuration files found! Tried: {}", .0.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    NotFound(Vec<PathBuf>),
}

impl ConfigError {
    pub(crate) fn invalid(scope: &str, field: &str, expected: &'static str) -> Self {
        Self::InvalidValue {
            scope: scope.to_string(),
            field: field.to_string(),
            expected,
        }
    }

    pub(crate) fn missing(scope: &str, field: &str) -> Self {
        Self::MissingField {
            scope: scope.to_string(),
            field: field.to_string(),
        }
    }

    /// Returns `true` if this error was caused by a `type` tag nobody handles.
    #[must_use]
    pub const fn is_unknown_type(&self) -> bool {
        matches!(self, Self::UnknownType { .. })
    }

    /// Returns `true` if a required option or dependency reference is absent.
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(
            self,
            Self::MissingField { .. } | Self::MissingDependency { .. } | Self::MissingSection { .. }
        )
    }
}
