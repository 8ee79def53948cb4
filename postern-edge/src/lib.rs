//! Inbound listeners for the Postern MTA.
//!
//! An [`Edge`] accepts mail from the network and hands each message to its
//! queue. The only built-in edge is [`SmtpEdge`], built from a
//! `[edge.<name>]` section with `type = "smtp"`.

pub mod auth;
pub mod error;
pub mod smtp;
pub mod status;
pub mod validators;

use std::net::SocketAddr;

use async_trait::async_trait;

pub use self::{
    auth::{Authenticator, StaticCredentials, build_authenticator},
    error::{EdgeError, SessionError},
    smtp::{SmtpEdge, SmtpEdgeConfig, Timeouts},
    status::Status,
    validators::{Rejection, RulesValidator, Validator},
};

#[async_trait]
pub trait Edge: Send + Sync + std::fmt::Debug {
    /// Bind the listener and begin accepting connections.
    ///
    /// Starting a running edge has no effect.
    async fn start(&self) -> Result<(), EdgeError>;

    /// Stop accepting, tell open sessions to close and wait for them.
    async fn stop(&self);

    fn is_running(&self) -> bool;

    /// The bound address while running.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// The configuration `type` this edge was built from.
    fn kind(&self) -> &'static str;
}
