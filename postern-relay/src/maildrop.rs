//! Local delivery through an external command.

use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use postern_common::{ComponentOptions, ConfigError, Envelope, internal};
use tokio::{io::AsyncWriteExt, process::Command};

use crate::{Relay, error::RelayError, merge_outcomes, reply::Reply};

/// `EX_TEMPFAIL` from sysexits.h.
const EX_TEMPFAIL: i32 = 75;

pub mod defaults {
    use std::time::Duration;

    pub const EXECUTABLE: &str = "maildrop";
    pub const TIMEOUT: Duration = Duration::from_secs(30);
}

/// Pipes each message into a local delivery agent, once per recipient.
///
/// The agent is invoked as `<executable> -f <sender>` with `SENDER` and
/// `RECIPIENT` in its environment. Exit status 0 means delivered, 75 means
/// try again later, anything else is a permanent failure.
#[derive(Debug, Clone)]
pub struct MaildropRelay {
    executable: String,
    timeout: Duration,
}

impl MaildropRelay {
    /// # Errors
    /// If `executable` or `timeout` is malformed.
    pub fn from_options(options: &ComponentOptions) -> Result<Self, ConfigError> {
        Ok(Self {
            executable: options.str_or("executable", defaults::EXECUTABLE)?.to_string(),
            timeout: options.duration_or("timeout", defaults::TIMEOUT)?,
        })
    }

    #[must_use]
    pub fn executable(&self) -> &str {
        &self.executable
    }

    async fn deliver_one(&self, envelope: &Envelope, recipient: &str) -> Result<Reply, RelayError> {
        let mut child = Command::new(&self.executable)
            .arg("-f")
            .arg(&envelope.sender)
            .env("SENDER", &envelope.sender)
            .env("RECIPIENT", recipient)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                RelayError::transient(format!("Unable to run {}: {err}", self.executable))
            })?;

        let run = async {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(&envelope.data).await?;
                stdin.shutdown().await?;
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| {
                RelayError::transient(format!(
                    "{} timed out after {}s",
                    self.executable,
                    self.timeout.as_secs_f64()
                ))
            })?
            .map_err(|err| {
                RelayError::transient(format!("Error communicating with {}: {err}", self.executable))
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(0) => Ok(Reply::new(250, "Delivered")),
            Some(EX_TEMPFAIL) => Err(RelayError::transient(format!(
                "{} deferred delivery: {stderr}",
                self.executable
            ))),
            Some(code) => Err(RelayError::permanent(format!(
                "{} exited with status {code}: {stderr}",
                self.executable
            ))),
            None => Err(RelayError::transient(format!(
                "{} was killed by a signal",
                self.executable
            ))),
        }
    }
}

#[async_trait]
impl Relay for MaildropRelay {
    async fn attempt(&self, envelope: &Envelope, attempt: u32) -> Result<Reply, RelayError> {
        let mut outcomes = Vec::with_capacity(envelope.recipients.len());

        for recipient in &envelope.recipients {
            internal!(
                level = DEBUG,
                "Handing message for {recipient} to {} (attempt {attempt})",
                self.executable
            );
            let outcome = self.deliver_one(envelope, recipient).await;
            outcomes.push((vec![recipient.clone()], outcome));
        }

        merge_outcomes(outcomes)
    }

    fn kind(&self) -> &'static str {
        "maildrop"
    }
}
