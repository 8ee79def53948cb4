use std::{
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use postern_common::internal;

use super::{PidFileState, ProcessState};
use crate::error::ResourceError;

/// Holds `<pid>\n` in a file for as long as it lives.
///
/// Dropping the guard removes the file, so it disappears on every exit path
/// of the run loop, including unwinding.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    state: Arc<Mutex<ProcessState>>,
}

impl PidFile {
    pub(crate) fn acquire(
        path: &Path,
        pid: u32,
        state: Arc<Mutex<ProcessState>>,
    ) -> Result<Self, ResourceError> {
        let error = |source| ResourceError::PidFile {
            path: path.to_path_buf(),
            source,
        };
        let path = std::path::absolute(path).map_err(error)?;
        std::fs::write(&path, format!("{pid}\n")).map_err(error)?;

        internal!(level = DEBUG, "Wrote pid {pid} to {}", path.display());
        state.lock().unwrap_or_else(PoisonError::into_inner).pid_file =
            PidFileState::Held(path.clone());

        Ok(Self { path, state })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => internal!(
                level = WARN,
                "Unable to remove pid file {}: {err}",
                self.path.display()
            ),
        }

        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pid_file = PidFileState::Absent;
    }
}
