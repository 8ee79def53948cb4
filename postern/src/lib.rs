//! Assembles a mail transfer agent from named components in a TOML file.
//!
//! Edges accept mail, queues hold it, relays deliver it. Each is declared in
//! its own section, selected by `type` and wired to the others by name:
//!
//! ```toml
//! [process.postern]
//! daemon = true
//! user = "mail"
//! pid_file = "/run/postern.pid"
//! logging = { level = "info" }
//!
//! [edge.inbound]
//! type = "smtp"
//! queue = "main"
//! listener = { interface = "0.0.0.0", port = 25 }
//!
//! [queue.main]
//! type = "disk"
//! relay = "outbound"
//! envelope_dir = "/var/spool/postern/envelope"
//! meta_dir = "/var/spool/postern/meta"
//!
//! [relay.outbound]
//! type = "mx"
//! ```
//!
//! [`Postern`] builds a component the first time it is asked for, along with
//! everything it depends on, and hands out the same instance afterwards.

pub mod controller;
pub mod error;
pub mod factory;
pub mod process;
pub mod registry;

pub use self::{
    controller::{Arguments, Postern, RegistrySizes},
    error::{OrchestratorError, PrivilegeError, ResourceError},
    factory::{EdgeConstructor, EdgeParts, QueueConstructor, QueueParts, RelayConstructor},
    process::{Detachment, PidFileState, Privileges, ProcessOps, ProcessState, Stdio},
    registry::Registry,
};
