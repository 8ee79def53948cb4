//! Process-level state: privileges, standard streams, detachment and the
//! pid file.
//!
//! Every transition moves forward only. The pid file is the one resource
//! released again, by [`PidFile`] when the run loop exits.

mod ops;
mod pid_file;
mod signals;

use std::path::PathBuf;

pub use self::{
    ops::{ProcessOps, StandardStream, SystemOps},
    pid_file::PidFile,
    signals::SignalListener,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Privileges {
    /// Still running as launched.
    #[default]
    Retained,
    Dropped,
    /// A user or group was configured but the process is not the superuser.
    Insufficient,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stdio {
    #[default]
    Inherited,
    Redirected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Detachment {
    #[default]
    Foreground,
    Daemonized,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PidFileState {
    #[default]
    Absent,
    Held(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessState {
    pub privileges: Privileges,
    pub stdio: Stdio,
    pub detachment: Detachment,
    pub pid_file: PidFileState,
}
