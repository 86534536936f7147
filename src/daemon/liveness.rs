//! Process existence probes and signal delivery.

use crate::error::Result;

/// Answers "is this PID a live process?" without affecting it.
pub trait ProcessLiveness: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Delivers shutdown signals.
pub trait ProcessSignals: ProcessLiveness {
    /// Graceful termination request (SIGTERM).
    fn terminate(&self, pid: u32) -> Result<()>;

    /// Forceful kill (SIGKILL).
    fn kill(&self, pid: u32) -> Result<()>;
}

/// The operating system's process table.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcess;

#[cfg(unix)]
mod imp {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    use super::{OsProcess, ProcessLiveness, ProcessSignals};
    use crate::error::{RalphError, Result};

    fn to_pid(pid: u32) -> Option<Pid> {
        match i32::try_from(pid) {
            Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
            _ => None,
        }
    }

    fn send(pid: u32, sig: Signal) -> Result<()> {
        let Some(target) = to_pid(pid) else {
            return Ok(());
        };
        match signal::kill(target, sig) {
            // Already gone
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(RalphError::Io(std::io::Error::from(e))),
        }
    }

    impl ProcessLiveness for OsProcess {
        fn is_alive(&self, pid: u32) -> bool {
            let Some(target) = to_pid(pid) else {
                return false;
            };
            // Signal 0: existence and permission check only
            match signal::kill(target, None) {
                Ok(()) => true,
                Err(Errno::EPERM) => true,
                Err(_) => false,
            }
        }
    }

    impl ProcessSignals for OsProcess {
        fn terminate(&self, pid: u32) -> Result<()> {
            send(pid, Signal::SIGTERM)
        }

        fn kill(&self, pid: u32) -> Result<()> {
            send(pid, Signal::SIGKILL)
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use super::{OsProcess, ProcessLiveness, ProcessSignals};
    use crate::error::{RalphError, Result};

    fn unsupported() -> RalphError {
        RalphError::Io(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "process signals are not supported on this platform",
        ))
    }

    impl ProcessLiveness for OsProcess {
        // No cheap probe here; assume alive so PID files are never reaped wrongly.
        fn is_alive(&self, _pid: u32) -> bool {
            true
        }
    }

    impl ProcessSignals for OsProcess {
        fn terminate(&self, _pid: u32) -> Result<()> {
            Err(unsupported())
        }

        fn kill(&self, _pid: u32) -> Result<()> {
            Err(unsupported())
        }
    }
}
