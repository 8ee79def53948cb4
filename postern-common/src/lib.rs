pub mod config;
pub mod envelope;
pub mod error;
pub mod hostname;
pub mod logging;
pub mod tls;

pub use tracing;

pub use self::{
    config::{ComponentKind, ComponentOptions, Config, NamedComponent},
    envelope::{ClientInfo, Envelope},
    error::ConfigError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
