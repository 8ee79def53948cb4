use std::{path::PathBuf, time::Duration};

use crate::error::ConfigError;

/// The options of one configuration section.
///
/// Getters come in three flavours: `*_or` returns a default when the key is
/// absent, `require_*` fails with [`ConfigError::MissingField`], and the plain
/// getters return `Option`. A key that is present with the wrong shape is
/// always a [`ConfigError::InvalidValue`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentOptions {
    scope: String,
    table: toml::Table,
}

impl ComponentOptions {
    #[must_use]
    pub fn new(scope: impl Into<String>, table: toml::Table) -> Self {
        Self {
            scope: scope.into(),
            table,
        }
    }

    /// Human readable location of these options, used in error messages.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// The raw table.
    #[must_use]
    pub const fn table_ref(&self) -> &toml::Table {
        &self.table
    }

    /// The mandatory `type` discriminator.
    ///
    /// # Errors
    /// If `type` is absent, empty or not a string.
    pub fn ty(&self) -> Result<&str, ConfigError> {
        self.require_str("type")
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.table.contains_key(key)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.table.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &toml::Value)> {
        self.table.iter()
    }

    /// # Errors
    /// If the value is present but not a string.
    pub fn str(&self, key: &str) -> Result<Option<&str>, ConfigError> {
        match self.table.get(key) {
            None => Ok(None),
            Some(toml::Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(ConfigError::invalid(&self.scope, key, "a string")),
        }
    }

    /// # Errors
    /// If the value is present but not a string.
    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str, ConfigError> {
        Ok(self.str(key)?.unwrap_or(default))
    }

    /// A string that must be present and non-empty.
    ///
    /// # Errors
    /// If the value is absent, empty, or not a string.
    pub fn require_str(&self, key: &str) -> Result<&str, ConfigError> {
        match self.str(key)? {
            Some(s) if !s.is_empty() => Ok(s),
            _ => Err(ConfigError::missing(&self.scope, key)),
        }
    }

    /// Non-negative integers; numeric strings are accepted too.
    ///
    /// # Errors
    /// If the value is present but not a non-negative integer.
    pub fn u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        let invalid = || ConfigError::invalid(&self.scope, key, "a non-negative integer");

        match self.table.get(key) {
            None => Ok(None),
            Some(toml::Value::Integer(i)) => u64::try_from(*i).map(Some).map_err(|_| invalid()),
            Some(toml::Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid()),
            Some(_) => Err(invalid()),
        }
    }

    /// # Errors
    /// If the value is present but not a non-negative integer.
    pub fn u64_or(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        Ok(self.u64(key)?.unwrap_or(default))
    }

    /// # Errors
    /// If the value is present but not an integer in `0..=65535`.
    pub fn u16_or(&self, key: &str, default: u16) -> Result<u16, ConfigError> {
        self.u64(key)?.map_or(Ok(default), |value| {
            u16::try_from(value)
                .map_err(|_| ConfigError::invalid(&self.scope, key, "an integer in 0..=65535"))
        })
    }

    /// # Errors
    /// If the value is present but not an integer that fits in `usize`.
    pub fn usize_or(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        self.u64(key)?.map_or(Ok(default), |value| {
            usize::try_from(value).map_err(|_| ConfigError::invalid(&self.scope, key, "a size"))
        })
    }

    /// Floats; integers are widened.
    ///
    /// # Errors
    /// If the value is present but not a number.
    #[allow(clippy::cast_precision_loss, reason = "configuration values are small")]
    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        match self.table.get(key) {
            None => Ok(default),
            Some(toml::Value::Float(f)) => Ok(*f),
            Some(toml::Value::Integer(i)) => Ok(*i as f64),
            Some(_) => Err(ConfigError::invalid(&self.scope, key, "a number")),
        }
    }

    /// # Errors
    /// If the value is present but not a boolean.
    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.table.get(key) {
            None => Ok(default),
            Some(toml::Value::Boolean(b)) => Ok(*b),
            Some(_) => Err(ConfigError::invalid(&self.scope, key, "a boolean")),
        }
    }

    /// A duration given in (possibly fractional) seconds.
    ///
    /// # Errors
    /// If the value is present but not a non-negative number.
    pub fn duration_or(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        if !self.contains(key) {
            return Ok(default);
        }

        let secs = self.f64_or(key, 0.0)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| ConfigError::invalid(&self.scope, key, "a non-negative number of seconds"))
    }

    /// # Errors
    /// If the value is present but not a string.
    pub fn path(&self, key: &str) -> Result<Option<PathBuf>, ConfigError> {
        Ok(self.str(key)?.filter(|s| !s.is_empty()).map(PathBuf::from))
    }

    /// # Errors
    /// If the value is absent, empty, or not a string.
    pub fn require_path(&self, key: &str) -> Result<PathBuf, ConfigError> {
        self.require_str(key).map(PathBuf::from)
    }

    /// A nested table, scoped as `<scope>.<key>`.
    ///
    /// # Errors
    /// If the value is present but not a table.
    pub fn table(&self, key: &str) -> Result<Option<Self>, ConfigError> {
        match self.table.get(key) {
            None => Ok(None),
            Some(toml::Value::Table(table)) => {
                Ok(Some(Self::new(format!("{}.{key}", self.scope), table.clone())))
            }
            Some(_) => Err(ConfigError::invalid(&self.scope, key, "a table")),
        }
    }

    /// An array of tables, each scoped as `<scope>.<key>[<index>]`.
    ///
    /// # Errors
    /// If the value is present but not an array of tables.
    pub fn tables(&self, key: &str) -> Result<Vec<Self>, ConfigError> {
        let invalid = || ConfigError::invalid(&self.scope, key, "an array of tables");

        match self.table.get(key) {
            None => Ok(Vec::new()),
            Some(toml::Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    item.as_table()
                        .map(|table| {
                            Self::new(format!("{}.{key}[{index}]", self.scope), table.clone())
                        })
                        .ok_or_else(invalid)
                })
                .collect(),
            Some(_) => Err(invalid()),
        }
    }

    /// A list of strings; a single string is treated as a list of one.
    ///
    /// # Errors
    /// If the value is present but neither a string nor an array of strings.
    pub fn strings(&self, key: &str) -> Result<Vec<String>, ConfigError> {
        let invalid = || ConfigError::invalid(&self.scope, key, "a string or array of strings");

        match self.table.get(key) {
            None => Ok(Vec::new()),
            Some(toml::Value::String(s)) => Ok(vec![s.clone()]),
            Some(toml::Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string).ok_or_else(invalid))
                .collect(),
            Some(_) => Err(invalid()),
        }
    }
}
