use std::{io, mem, ptr};

use postern_common::{Signal, internal};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::broadcast,
    task::JoinHandle,
};

use crate::error::ResourceError;

const HANDLED: [libc::c_int; 2] = [libc::SIGTERM, libc::SIGINT];

/// Turns the first SIGTERM or SIGINT into a [`Signal::Shutdown`] broadcast.
///
/// Dropping the listener aborts the listening task and puts back whatever
/// disposition SIGTERM and SIGINT had before [`install`](Self::install).
#[derive(Debug)]
pub struct SignalListener {
    task: JoinHandle<()>,
    previous: Vec<(libc::c_int, libc::sigaction)>,
}

fn current_action(signum: libc::c_int) -> io::Result<libc::sigaction> {
    // SAFETY: a null new action only queries; `old` is a valid out pointer.
    let mut old: libc::sigaction = unsafe { mem::zeroed() };
    if unsafe { libc::sigaction(signum, ptr::null(), &raw mut old) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(old)
}

impl SignalListener {
    /// Must be called from within the runtime.
    ///
    /// # Errors
    /// If either handler cannot be installed.
    pub fn install(shutdown: broadcast::Sender<Signal>) -> Result<Self, ResourceError> {
        let previous = HANDLED
            .iter()
            .map(|&signum| current_action(signum).map(|action| (signum, action)))
            .collect::<io::Result<Vec<_>>>()
            .map_err(ResourceError::Signal)?;

        let mut terminate = signal(SignalKind::terminate()).map_err(ResourceError::Signal)?;
        let mut interrupt = signal(SignalKind::interrupt()).map_err(ResourceError::Signal)?;

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = terminate.recv() => {
                    internal!(level = INFO, "Terminate signal received, shutting down");
                }
                _ = interrupt.recv() => {
                    internal!(level = INFO, "Interrupt received, shutting down");
                }
            }

            let _ = shutdown.send(Signal::Shutdown);
        });

        Ok(Self { task, previous })
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        self.task.abort();

        for (signum, action) in &self.previous {
            // SAFETY: `action` was read back from the kernel by `current_action`.
            if unsafe { libc::sigaction(*signum, action, ptr::null_mut()) } != 0 {
                internal!(
                    level = WARN,
                    "Unable to restore handler for signal {signum}: {}",
                    io::Error::last_os_error()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[cfg_attr(miri, ignore = "sigaction is not supported under miri")]
    async fn test_previous_disposition_is_restored() {
        let before = current_action(libc::SIGTERM).expect("query").sa_sigaction;
        let before_interrupt = current_action(libc::SIGINT).expect("query").sa_sigaction;
        let (sender, _receiver) = broadcast::channel(1);

        let listener = SignalListener::install(sender).expect("install");
        assert_ne!(
            current_action(libc::SIGTERM).expect("query").sa_sigaction,
            before
        );

        drop(listener);
        assert_eq!(current_action(libc::SIGTERM).expect("query").sa_sigaction, before);
        assert_eq!(
            current_action(libc::SIGINT).expect("query").sa_sigaction,
            before_interrupt
        );
    }
}
