use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

use crate::{config::ComponentOptions, error::ConfigError};

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};
}

/// Traffic written to a peer: replies from an edge, commands from a relay.
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::outgoing!(level = TRACE, $($msg),*)
    };
}

/// Traffic read from a peer.
#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::incoming!(level = TRACE, $($msg),*)
    };
}

/// Lifecycle and orchestration events.
#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// The `logging` table of a `[process.<program>]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
    pub ansi: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: if cfg!(debug_assertions) {
                LevelFilter::TRACE
            } else {
                LevelFilter::INFO
            },
            format: LogFormat::Compact,
            ansi: true,
        }
    }
}

impl LogSettings {
    /// Build settings from an optional `logging` table.
    ///
    /// # Errors
    /// If `level` or `format` are not recognised.
    pub fn from_options(options: Option<&ComponentOptions>) -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        let Some(options) = options else {
            return Ok(settings);
        };

        if let Some(level) = options.str("level")? {
            settings.level = LevelFilter::from_str(level).map_err(|_| ConfigError::InvalidValue {
                scope: options.scope().to_string(),
                field: "level".to_string(),
                expected: "one of off, error, warn, info, debug, trace",
            })?;
        }

        settings.format = match options.str_or("format", "compact")? {
            "compact" => LogFormat::Compact,
            "json" => LogFormat::Json,
            _ => {
                return Err(ConfigError::InvalidValue {
                    scope: options.scope().to_string(),
                    field: "format".to_string(),
                    expected: "either compact or json",
                });
            }
        };
        settings.ansi = options.bool_or("ansi", settings.ansi)?;

        Ok(settings)
    }

    /// The configured level, unless `LOG_LEVEL` overrides it.
    fn effective_level(&self) -> LevelFilter {
        std::env::var("LOG_LEVEL").map_or(self.level, |level| {
            LevelFilter::from_str(level.as_str()).unwrap_or_else(|_| {
                eprintln!("Invalid log level specified {level}, defaulting to {}", self.level);
                self.level
            })
        })
    }
}

/// Install the global subscriber.
///
/// Returns `false` if a subscriber was already installed, which makes repeated
/// calls harmless.
pub fn init(settings: &LogSettings) -> bool {
    let level = settings.effective_level();
    let targets = FilterFn::new(|metadata| metadata.target().starts_with("postern"));

    let layer = match settings.format {
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_ansi(settings.ansi)
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
            .with_filter(level)
            .with_filter(targets)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
            .with_filter(level)
            .with_filter(targets)
            .boxed(),
    };

    tracing_subscriber::Registry::default()
        .with(layer)
        .try_init()
        .is_ok()
}
