use std::fmt::{self, Display, Formatter};

use thiserror::Error;

use crate::reply::Reply;

/// Connection-level errors raised by the SMTP client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Invalid reply: {0}")]
    Parse(String),

    #[error("Reply exceeded {0} bytes")]
    ReplyTooLong(usize),

    #[error("TLS error: {0}")]
    Tls(String),
}

/// Details of a failed delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub message: String,
    /// The remote reply that caused the failure, if there was one.
    pub reply: Option<Reply>,
    /// The recipients this failure applies to. Empty means all of them.
    pub recipients: Vec<String>,
}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.reply {
            Some(reply) => write!(f, "{} ({reply})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// The verdict of a failed [`crate::Relay::attempt`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Retrying later may succeed.
    #[error("Transient delivery failure: {0}")]
    Transient(Failure),

    /// Retrying will not help.
    #[error("Permanent delivery failure: {0}")]
    Permanent(Failure),
}

impl RelayError {
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(Failure {
            message: message.into(),
            reply: None,
            recipients: Vec::new(),
        })
    }

    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(Failure {
            message: message.into(),
            reply: None,
            recipients: Vec::new(),
        })
    }

    /// Classify a remote reply: 4xx is transient, anything else permanent.
    #[must_use]
    pub fn from_reply(message: impl Into<String>, reply: Reply) -> Self {
        let failure = Failure {
            message: message.into(),
            reply: Some(reply),
            recipients: Vec::new(),
        };

        if failure.reply.as_ref().is_some_and(Reply::is_temporary_error) {
            Self::Transient(failure)
        } else {
            Self::Permanent(failure)
        }
    }

    /// Restrict this failure to `recipients`.
    #[must_use]
    pub fn for_recipients(mut self, recipients: Vec<String>) -> Self {
        match &mut self {
            Self::Transient(failure) | Self::Permanent(failure) => failure.recipients = recipients,
        }
        self
    }

    #[must_use]
    pub const fn failure(&self) -> &Failure {
        match self {
            Self::Transient(failure) | Self::Permanent(failure) => failure,
        }
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Recipients this failure applies to; empty means all of them.
    #[must_use]
    pub fn recipients(&self) -> &[String] {
        &self.failure().recipients
    }
}

impl From<ClientError> for RelayError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Parse(_) | ClientError::ReplyTooLong(_) => Self::permanent(err.to_string()),
            _ => Self::transient(err.to_string()),
        }
    }
}
