//! POSIX named semaphores as cross-process synchronization primitives.
//!
//! The supervisor creates every semaphore with `O_CREAT | O_EXCL` and is
//! the only process that ever unlinks one; generators open pre-existing
//! names and fail fast when the supervisor has not started. Waits block in
//! the kernel (no polling); an interrupting signal surfaces as
//! [`SemError::Interrupted`] so callers can re-check cancellation state at
//! their documented poll points.

use std::ffi::CString;
use std::fmt;
use std::io;

/// A handle to a POSIX named semaphore.
///
/// Dropping the handle closes it; the creating (owner) handle also unlinks
/// the name, so the kernel object disappears once every process has closed
/// its own handle.
pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
    name: CString,
    owner: bool,
}

// SAFETY: sem_wait/sem_post/sem_getvalue are thread-safe operations on a
// process-shared kernel object; the raw pointer is only handed to libc.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Creates a new named semaphore with the given initial count.
    ///
    /// Uses `O_CREAT | O_EXCL` (mode 0600): creation fails if the name is
    /// already in use, so a stale or concurrent supervisor is detected
    /// rather than silently shared.
    ///
    /// # Errors
    /// Fails if the name is invalid or the semaphore already exists.
    pub fn create(name: &str, initial: u32) -> Result<Self, SemError> {
        let cname = c_name(name)?;
        let sem = unsafe {
            libc::sem_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o600 as libc::mode_t,
                initial as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(SemError::Create {
                name: name.to_string(),
                cause: io::Error::last_os_error().to_string(),
            });
        }
        Ok(Self {
            sem,
            name: cname,
            owner: true,
        })
    }

    /// Opens a pre-existing named semaphore.
    ///
    /// # Errors
    /// Fails if the semaphore does not exist (the owning process has not
    /// created it yet, or already tore it down).
    pub fn open(name: &str) -> Result<Self, SemError> {
        let cname = c_name(name)?;
        let sem = unsafe { libc::sem_open(cname.as_ptr(), 0) };
        if sem == libc::SEM_FAILED {
            return Err(SemError::Open {
                name: name.to_string(),
                cause: io::Error::last_os_error().to_string(),
            });
        }
        Ok(Self {
            sem,
            name: cname,
            owner: false,
        })
    }

    /// Decrements the semaphore, blocking while its count is zero.
    ///
    /// # Errors
    /// Returns [`SemError::Interrupted`] when a signal handler interrupts
    /// the wait; callers decide whether to re-check a cancellation flag or
    /// retry.
    pub fn wait(&self) -> Result<(), SemError> {
        if unsafe { libc::sem_wait(self.sem) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            Err(SemError::Interrupted)
        } else {
            Err(SemError::Wait {
                cause: err.to_string(),
            })
        }
    }

    /// Increments the semaphore, waking one blocked waiter if any.
    ///
    /// # Errors
    /// Fails only on semaphore overflow or an invalid handle.
    pub fn post(&self) -> Result<(), SemError> {
        if unsafe { libc::sem_post(self.sem) } == 0 {
            Ok(())
        } else {
            Err(SemError::Post {
                cause: io::Error::last_os_error().to_string(),
            })
        }
    }

    /// Current count. Diagnostic only: the value may be stale by the time
    /// the caller observes it.
    pub fn value(&self) -> Result<i32, SemError> {
        let mut value: libc::c_int = 0;
        if unsafe { libc::sem_getvalue(self.sem, &mut value) } == 0 {
            Ok(value)
        } else {
            Err(SemError::Wait {
                cause: io::Error::last_os_error().to_string(),
            })
        }
    }

}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // Errors are unreportable here; teardown is best-effort.
        unsafe {
            let _ = libc::sem_close(self.sem);
            if self.owner {
                let _ = libc::sem_unlink(self.name.as_ptr());
            }
        }
    }
}

impl fmt::Debug for NamedSemaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedSemaphore")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .finish()
    }
}

fn c_name(name: &str) -> Result<CString, SemError> {
    CString::new(name).map_err(|_| SemError::InvalidName {
        name: name.to_string(),
    })
}

// ============================================================================
// Errors
// ============================================================================

/// Errors from named-semaphore operations, each naming the failing call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SemError {
    /// The name contains an interior NUL byte.
    InvalidName {
        /// The offending name.
        name: String,
    },
    /// `sem_open(O_CREAT | O_EXCL)` failed.
    Create {
        /// Semaphore name.
        name: String,
        /// OS error text.
        cause: String,
    },
    /// `sem_open` on a pre-existing name failed.
    Open {
        /// Semaphore name.
        name: String,
        /// OS error text.
        cause: String,
    },
    /// `sem_wait` failed for a reason other than a signal.
    Wait {
        /// OS error text.
        cause: String,
    },
    /// `sem_post` failed.
    Post {
        /// OS error text.
        cause: String,
    },
    /// A blocking wait was interrupted by a signal handler.
    Interrupted,
}

impl fmt::Display for SemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemError::InvalidName { name } => {
                write!(f, "invalid semaphore name {name:?}")
            }
            SemError::Create { name, cause } => {
                write!(f, "could not create semaphore {name}: {cause}")
            }
            SemError::Open { name, cause } => {
                write!(f, "could not open semaphore {name}: {cause}")
            }
            SemError::Wait { cause } => write!(f, "semaphore wait failed: {cause}"),
            SemError::Post { cause } => write!(f, "semaphore post failed: {cause}"),
            SemError::Interrupted => write!(f, "semaphore wait interrupted by signal"),
        }
    }
}

impl std::error::Error for SemError {}
