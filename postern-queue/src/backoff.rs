//! Retry schedules for stored queues.
//!
//! A [`Backoff`] maps the number of attempts already made to how long to wait
//! before the next one, or `None` once the queue should give up.

use std::time::Duration;

use postern_common::{ComponentOptions, ConfigError};

pub mod defaults {
    use std::time::Duration;

    use super::Strategy;

    /// Never retry unless configured to.
    pub const MAXIMUM: u32 = 0;
    pub const DELAY: Duration = Duration::from_secs(300);
    pub const STRATEGY: Strategy = Strategy::Exponential;
    pub const MAX_DELAY: Duration = Duration::from_secs(86400);
}

/// How the wait grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Always `delay`.
    Constant,
    /// `delay * attempts`.
    Linear,
    /// `delay * 2^(attempts - 1)`.
    Exponential,
}

impl std::str::FromStr for Strategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "constant" => Ok(Self::Constant),
            "linear" => Ok(Self::Linear),
            "exponential" => Ok(Self::Exponential),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Retries allowed after the first attempt.
    pub maximum: u32,
    pub delay: Duration,
    pub strategy: Strategy,
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            maximum: defaults::MAXIMUM,
            delay: defaults::DELAY,
            strategy: defaults::STRATEGY,
            max_delay: defaults::MAX_DELAY,
        }
    }
}

impl Backoff {
    /// Wait before the next attempt, given `attempts` already made.
    ///
    /// Returns `None` once `attempts` exceeds `maximum`.
    #[must_use]
    pub fn delay(&self, attempts: u32) -> Option<Duration> {
        if attempts == 0 {
            return Some(Duration::ZERO);
        }
        if attempts > self.maximum {
            return None;
        }

        let delay = match self.strategy {
            Strategy::Constant => self.delay,
            Strategy::Linear => self.delay.saturating_mul(attempts),
            Strategy::Exponential => {
                let exponent = attempts.saturating_sub(1).min(31);
                self.delay.saturating_mul(2_u32.saturating_pow(exponent))
            }
        };

        Some(delay.min(self.max_delay))
    }
}

/// Build a [`Backoff`] from a queue's `retry` table, or the defaults without one.
///
/// # Errors
/// If any option in the table is malformed.
pub fn build_backoff(options: Option<&ComponentOptions>) -> Result<Backoff, ConfigError> {
    let Some(options) = options else {
        return Ok(Backoff::default());
    };

    let invalid = |field: &str, expected| ConfigError::InvalidValue {
        scope: options.scope().to_string(),
        field: field.to_string(),
        expected,
    };

    let maximum = u32::try_from(options.u64_or("maximum", u64::from(defaults::MAXIMUM))?)
        .map_err(|_| invalid("maximum", "a 32-bit attempt count"))?;

    let strategy = match options.str("strategy")? {
        None => defaults::STRATEGY,
        Some(name) => name
            .parse()
            .map_err(|()| invalid("strategy", "one of constant, linear or exponential"))?,
    };

    Ok(Backoff {
        maximum,
        delay: options.duration_or("delay", defaults::DELAY)?,
        strategy,
        max_delay: options.duration_or("max_delay", defaults::MAX_DELAY)?,
    })
}
