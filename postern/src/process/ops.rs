use std::{
    ffi::CString,
    fs::OpenOptions,
    io,
    os::fd::AsRawFd,
    path::Path,
};

use libc::gid_t;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardStream {
    Stdin,
    Stdout,
    Stderr,
}

impl StandardStream {
    const fn fd(self) -> libc::c_int {
        match self {
            Self::Stdin => libc::STDIN_FILENO,
            Self::Stdout => libc::STDOUT_FILENO,
            Self::Stderr => libc::STDERR_FILENO,
        }
    }
}

/// The operating-system calls behind each lifecycle transition.
pub trait ProcessOps: Send + Sync + std::fmt::Debug {
    fn effective_uid(&self) -> u32;

    fn pid(&self) -> u32;

    /// The uid and primary gid of `name`, or `None` if there is no such user.
    ///
    /// # Errors
    /// If the user database cannot be read.
    fn lookup_user(&self, name: &str) -> io::Result<Option<(u32, u32)>>;

    /// The gid of `name`, or `None` if there is no such group.
    ///
    /// # Errors
    /// If the group database cannot be read.
    fn lookup_group(&self, name: &str) -> io::Result<Option<u32>>;

    /// Clear supplementary groups and switch to `gid`.
    ///
    /// # Errors
    /// If the switch is refused.
    fn set_group(&self, gid: u32) -> io::Result<()>;

    /// # Errors
    /// If the switch is refused.
    fn set_user(&self, uid: u32) -> io::Result<()>;

    /// Point `stream` at `path`. Output streams append, creating the file.
    ///
    /// # Errors
    /// If `path` cannot be opened or the descriptor cannot be replaced.
    fn redirect(&self, stream: StandardStream, path: &Path) -> io::Result<()>;

    /// Fork, start a new session and fork again. Only the final child
    /// returns; the original process exits with status 0.
    ///
    /// # Errors
    /// If either fork or `setsid` fails.
    fn daemonize(&self) -> io::Result<()>;
}

/// [`ProcessOps`] for the running process, through libc.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOps;

/// Scratch space for the reentrant user and group lookups.
const LOOKUP_BUFFER: usize = 16 * 1024;

fn c_name(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "name contains NUL"))
}

/// `getpwnam_r`/`getgrnam_r` report a missing entry either as success with no
/// result or as one of these errors.
const fn is_not_found(code: libc::c_int) -> bool {
    matches!(code, libc::ENOENT | libc::ESRCH | libc::EBADF | libc::EPERM)
}

fn fork_and_exit_parent() -> io::Result<()> {
    // SAFETY: called before the async runtime exists, so the process has a
    // single thread and the child may continue running arbitrary code.
    match unsafe { libc::fork() } {
        -1 => Err(io::Error::last_os_error()),
        0 => Ok(()),
        // SAFETY: `_exit` skips destructors and atexit handlers, which belong
        // to the child now.
        _ => unsafe { libc::_exit(0) },
    }
}

impl ProcessOps for SystemOps {
    fn effective_uid(&self) -> u32 {
        // SAFETY: geteuid cannot fail and touches no memory.
        unsafe { libc::geteuid() }
    }

    fn pid(&self) -> u32 {
        std::process::id()
    }

    fn lookup_user(&self, name: &str) -> io::Result<Option<(u32, u32)>> {
        let name = c_name(name)?;
        // SAFETY: passwd is plain data; an all-zero value is valid and is
        // overwritten by getpwnam_r before being read.
        let mut entry: libc::passwd = unsafe { std::mem::zeroed() };
        let mut buffer = vec![libc::c_char::default(); LOOKUP_BUFFER];
        let mut result = std::ptr::null_mut();

        // SAFETY: every pointer is valid for the duration of the call and the
        // buffer length matches its allocation.
        let code = unsafe {
            libc::getpwnam_r(
                name.as_ptr(),
                &raw mut entry,
                buffer.as_mut_ptr(),
                buffer.len(),
                &raw mut result,
            )
        };

        match code {
            0 if result.is_null() => Ok(None),
            0 => Ok(Some((entry.pw_uid, entry.pw_gid))),
            code if is_not_found(code) => Ok(None),
            code => Err(io::Error::from_raw_os_error(code)),
        }
    }

    fn lookup_group(&self, name: &str) -> io::Result<Option<u32>> {
        let name = c_name(name)?;
        // SAFETY: as for passwd above.
        let mut entry: libc::group = unsafe { std::mem::zeroed() };
        let mut buffer = vec![libc::c_char::default(); LOOKUP_BUFFER];
        let mut result = std::ptr::null_mut();

        // SAFETY: as for getpwnam_r above.
        let code = unsafe {
            libc::getgrnam_r(
                name.as_ptr(),
                &raw mut entry,
                buffer.as_mut_ptr(),
                buffer.len(),
                &raw mut result,
            )
        };

        match code {
            0 if result.is_null() => Ok(None),
            0 => Ok(Some(entry.gr_gid)),
            code if is_not_found(code) => Ok(None),
            code => Err(io::Error::from_raw_os_error(code)),
        }
    }

    fn set_group(&self, gid: u32) -> io::Result<()> {
        let gid: gid_t = gid;
        // SAFETY: the pointer refers to one valid gid for the call.
        if unsafe { libc::setgroups(1, &raw const gid) } != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: setgid takes its argument by value.
        if unsafe { libc::setgid(gid) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn set_user(&self, uid: u32) -> io::Result<()> {
        // SAFETY: setuid takes its argument by value.
        if unsafe { libc::setuid(uid) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn redirect(&self, stream: StandardStream, path: &Path) -> io::Result<()> {
        let file = match stream {
            StandardStream::Stdin => OpenOptions::new().read(true).open(path)?,
            StandardStream::Stdout | StandardStream::Stderr => {
                OpenOptions::new().append(true).create(true).open(path)?
            }
        };

        // SAFETY: both descriptors are open; dup2 replaces the standard one
        // and `file` closes its own copy when dropped.
        if unsafe { libc::dup2(file.as_raw_fd(), stream.fd()) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn daemonize(&self) -> io::Result<()> {
        fork_and_exit_parent()?;

        // SAFETY: setsid has no memory-safety preconditions.
        if unsafe { libc::setsid() } == -1 {
            return Err(io::Error::last_os_error());
        }

        fork_and_exit_parent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg_attr(miri, ignore = "Calls into libc")]
    fn test_lookup_root() {
        let ops = SystemOps;
        assert_eq!(ops.lookup_user("root").expect("passwd"), Some((0, 0)));
        assert_eq!(
            ops.lookup_user("no-such-user-postern").expect("passwd"),
            None
        );
        assert_eq!(
            ops.lookup_group("no-such-group-postern").expect("group"),
            None
        );
    }

    #[test]
    fn test_nul_in_name() {
        let err = SystemOps.lookup_user("ro\0ot").expect_err("interior NUL");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    #[cfg_attr(miri, ignore = "Calls into libc")]
    fn test_redirect_missing_stdin() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = SystemOps
            .redirect(StandardStream::Stdin, &dir.path().join("absent"))
            .expect_err("no such file");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
