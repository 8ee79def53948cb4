//! Read-only access to the parsed configuration tree.
//!
//! The configuration is a TOML document whose top-level sections name the
//! component kinds:
//!
//! ```toml
//! [process.postern]
//! daemon = false
//!
//! [relay.outbound]
//! type = "static"
//! host = "mail.example.com"
//!
//! [queue.main]
//! type = "memory"
//! relay = "outbound"
//!
//! [edge.inbound]
//! type = "smtp"
//! queue = "main"
//! ```
//!
//! Every named section is handed to its factory as a [`ComponentOptions`],
//! which carries the section's scope so errors can name the offending section.

mod options;

use std::{
    fmt::{self, Display, Formatter},
    path::{Path, PathBuf},
    str::FromStr,
};

pub use self::options::ComponentOptions;
use crate::error::ConfigError;

/// The three kinds of named component the orchestrator builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    Relay,
    Queue,
    Edge,
}

impl ComponentKind {
    /// Name of the top-level configuration section holding this kind.
    #[must_use]
    pub const fn section(self) -> &'static str {
        match self {
            Self::Relay => "relay",
            Self::Queue => "queue",
            Self::Edge => "edge",
        }
    }
}

impl Display for ComponentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.section())
    }
}

/// A `(kind, name)` pair uniquely identifying a configured component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamedComponent {
    pub kind: ComponentKind,
    pub name: String,
}

impl NamedComponent {
    #[must_use]
    pub fn new(kind: ComponentKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl Display for NamedComponent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

/// The whole configuration document.
#[derive(Debug, Clone, Default)]
pub struct Config {
    root: toml::Table,
    source: Option<PathBuf>,
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let root = s.parse::<toml::Table>().map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;

        Ok(Self { root, source: None })
    }
}

impl Config {
    /// Read and parse the configuration file at `path`.
    ///
    /// # Errors
    /// If the file cannot be read or is not valid TOML.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let root = content
            .parse::<toml::Table>()
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            root,
            source: Some(path.to_path_buf()),
        })
    }

    /// Load the first of `candidates` that exists.
    ///
    /// # Errors
    /// [`ConfigError::NotFound`] when none of them exist, otherwise whatever
    /// [`Config::from_path`] reports for the first existing one.
    pub fn discover(candidates: &[PathBuf]) -> Result<Self, ConfigError> {
        candidates
            .iter()
            .find(|path| path.is_file())
            .map_or_else(
                || Err(ConfigError::NotFound(candidates.to_vec())),
                |path| Self::from_path(path),
            )
    }

    /// The file this configuration was read from, if any.
    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// The options of a single named component.
    ///
    /// # Errors
    /// [`ConfigError::MissingSection`] if there is no `[kind.name]` section.
    pub fn component(
        &self,
        kind: ComponentKind,
        name: &str,
    ) -> Result<ComponentOptions, ConfigError> {
        let missing = || ConfigError::MissingSection {
            kind: kind.section(),
            name: name.to_string(),
        };

        let section = self.kind_table(kind)?.ok_or_else(missing)?;
        let value = section.get(name).ok_or_else(missing)?;
        let scope = NamedComponent::new(kind, name).to_string();

        value.as_table().map_or_else(
            || Err(ConfigError::invalid(&scope, name, "a table")),
            |table| Ok(ComponentOptions::new(scope.clone(), table.clone())),
        )
    }

    /// Every configured component of `kind`, in file order.
    ///
    /// # Errors
    /// If an entry of the section is not a table.
    pub fn components(
        &self,
        kind: ComponentKind,
    ) -> Result<Vec<(String, ComponentOptions)>, ConfigError> {
        let Some(section) = self.kind_table(kind)? else {
            return Ok(Vec::new());
        };

        section
            .iter()
            .map(|(name, value)| {
                let scope = NamedComponent::new(kind, name.as_str()).to_string();
                value.as_table().map_or_else(
                    || Err(ConfigError::invalid(kind.section(), name, "a table")),
                    |table| Ok((name.clone(), ComponentOptions::new(scope, table.clone()))),
                )
            })
            .collect()
    }

    /// The `[process.<program>]` section; empty when absent.
    ///
    /// # Errors
    /// If `process` or `process.<program>` is present but not a table.
    pub fn process(&self, program: &str) -> Result<ComponentOptions, ConfigError> {
        let process = self.section("process")?;
        Ok(process
            .table(program)?
            .unwrap_or_else(|| ComponentOptions::new(format!("process.{program}"), toml::Table::new())))
    }

    /// An arbitrary top-level section; empty when absent.
    ///
    /// # Errors
    /// If the section is present but not a table.
    pub fn section(&self, name: &str) -> Result<ComponentOptions, ConfigError> {
        match self.root.get(name) {
            None => Ok(ComponentOptions::new(name, toml::Table::new())),
            Some(toml::Value::Table(table)) => Ok(ComponentOptions::new(name, table.clone())),
            Some(_) => Err(ConfigError::invalid("configuration", name, "a table")),
        }
    }

    fn kind_table(&self, kind: ComponentKind) -> Result<Option<&toml::Table>, ConfigError> {
        match self.root.get(kind.section()) {
            None => Ok(None),
            Some(toml::Value::Table(table)) => Ok(Some(table)),
            Some(_) => Err(ConfigError::invalid(
                "configuration",
                kind.section(),
                "a table",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const SAMPLE: &str = r#"
        [process.postern]
        daemon = true
        user = "mail"

        [relay.outbound]
        type = "static"
        host = "mx.example.com"

        [relay.direct]
        type = "mx"

        [queue.main]
        type = "memory"
        relay = "outbound"

        [edge.inbound]
        type = "smtp"
        queue = "main"
    "#;

    #[test]
    fn test_components_preserve_file_order() {
        let config: Config = SAMPLE.parse().expect("valid config");
        let names: Vec<_> = config
            .components(ComponentKind::Relay)
            .expect("relays")
            .into_iter()
            .map(|(name, _)| name)
            .collect();

        assert_eq!(names, vec!["outbound".to_string(), "direct".to_string()]);
    }

    #[test]
    fn test_component_lookup() {
        let config: Config = SAMPLE.parse().expect("valid config");
        let queue = config
            .component(ComponentKind::Queue, "main")
            .expect("queue section");

        assert_eq!(queue.scope(), "queue 'main'");
        assert_eq!(queue.ty().expect("type"), "memory");
        assert_eq!(queue.require_str("relay").expect("relay"), "outbound");
    }

    #[test]
    fn test_missing_component_section() {
        let config: Config = SAMPLE.parse().expect("valid config");
        let err = config
            .component(ComponentKind::Edge, "outbound")
            .expect_err("no such edge");

        assert!(matches!(
            err,
            ConfigError::MissingSection { kind: "edge", ref name } if name == "outbound"
        ));
    }

    #[test]
    fn test_missing_kind_is_empty() {
        let config: Config = "[relay.a]\ntype = \"mx\"\n".parse().expect("valid config");
        assert!(config.components(ComponentKind::Edge).expect("edges").is_empty());
    }

    #[test]
    fn test_process_section() {
        let config: Config = SAMPLE.parse().expect("valid config");
        let process = config.process("postern").expect("process section");
        assert!(process.bool_or("daemon", false).expect("daemon"));
        assert_eq!(process.str("user").expect("user"), Some("mail"));

        let worker = config.process("postern-worker").expect("empty section");
        assert!(!worker.bool_or("daemon", false).expect("daemon"));
    }

    #[test]
    fn test_parse_error() {
        let err = "[relay\n".parse::<Config>().expect_err("broken toml");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_discover_picks_first_existing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let present = dir.path().join("postern.toml");
        std::fs::write(&present, SAMPLE).expect("write config");

        let config = Config::discover(&[dir.path().join("absent.toml"), present.clone()])
            .expect("discovered");
        assert_eq!(config.source(), Some(present.as_path()));

        let err = Config::discover(&[dir.path().join("absent.toml")]).expect_err("none exist");
        assert!(matches!(err, ConfigError::NotFound(ref paths) if paths.len() == 1));
    }
}
