//! Signal delivery strategies for stopping a session's process.
//!
//! POSIX hosts spawn each command as the leader of its own process group,
//! so a signal sent to the negative PID reaches the shell and everything
//! it started. Hosts without process groups can only address the shell
//! itself. The two behaviours sit behind [`SignalTarget`] so the stop
//! escalation never branches on platform.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Signals used by the stop escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Polite interrupt (`SIGINT`).
    Interrupt,
    /// Polite terminate (`SIGTERM`).
    Terminate,
    /// Forced kill (`SIGKILL`).
    Kill,
}

impl StopSignal {
    /// Graceful signals, tried in order until one is delivered.
    pub const GRACEFUL: [Self; 2] = [Self::Interrupt, Self::Terminate];

    /// Conventional POSIX name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Kill => "SIGKILL",
        }
    }
}

/// Which address accepted a delivered signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryRoute {
    /// The whole process group.
    Group,
    /// The shell process alone.
    Process,
}

impl Display for DeliveryRoute {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Group => f.write_str("process group"),
            Self::Process => f.write_str("process"),
        }
    }
}

/// Why a signal could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The target no longer exists (`ESRCH`).
    Gone,
    /// The caller may not signal the target (`EPERM`).
    NotPermitted,
    /// The platform has no primitive for this signal.
    Unsupported,
    /// Any other OS failure.
    Other(String),
}

impl Display for DeliveryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gone => f.write_str("no such process"),
            Self::NotPermitted => f.write_str("operation not permitted"),
            Self::Unsupported => f.write_str("not supported on this platform"),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Capability to deliver a [`StopSignal`] to a spawned command.
///
/// `Ok` means the OS accepted the signal, not that the process died.
pub trait SignalTarget: Send + Sync + std::fmt::Debug {
    /// Deliver `signal` to the command whose shell has `pid`.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] when no address accepted the signal.
    fn deliver(&self, pid: u32, signal: StopSignal) -> Result<DeliveryRoute, DeliveryError>;
}

/// Signal the process group first, falling back to the PID only when the
/// group no longer exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupThenPid;

/// Signal the shell process only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectPid;

/// Pick the strategy for this platform.
///
/// `process_groups` must match how the command was spawned; signalling a
/// group the child never created would hit the server's own group.
#[must_use]
pub fn platform_target(process_groups: bool) -> Arc<dyn SignalTarget> {
    if process_groups && cfg!(unix) {
        Arc::new(GroupThenPid)
    } else {
        Arc::new(DirectPid)
    }
}

#[cfg(unix)]
mod imp {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    use super::{DeliveryError, DeliveryRoute, DirectPid, GroupThenPid, SignalTarget, StopSignal};

    fn to_nix(signal: StopSignal) -> Signal {
        match signal {
            StopSignal::Interrupt => Signal::SIGINT,
            StopSignal::Terminate => Signal::SIGTERM,
            StopSignal::Kill => Signal::SIGKILL,
        }
    }

    fn send(raw_pid: i32, signal: StopSignal) -> Result<(), DeliveryError> {
        kill(Pid::from_raw(raw_pid), to_nix(signal)).map_err(|errno| match errno {
            Errno::ESRCH => DeliveryError::Gone,
            Errno::EPERM => DeliveryError::NotPermitted,
            other => DeliveryError::Other(other.desc().to_owned()),
        })
    }

    fn raw(pid: u32) -> Result<i32, DeliveryError> {
        match i32::try_from(pid) {
            Ok(raw) if raw > 0 => Ok(raw),
            _ => Err(DeliveryError::Other(format!("invalid pid {pid}"))),
        }
    }

    impl SignalTarget for GroupThenPid {
        fn deliver(&self, pid: u32, signal: StopSignal) -> Result<DeliveryRoute, DeliveryError> {
            let raw_pid = raw(pid)?;
            match send(-raw_pid, signal) {
                Ok(()) => Ok(DeliveryRoute::Group),
                Err(DeliveryError::Gone) => send(raw_pid, signal).map(|()| DeliveryRoute::Process),
                Err(err) => Err(err),
            }
        }
    }

    impl SignalTarget for DirectPid {
        fn deliver(&self, pid: u32, signal: StopSignal) -> Result<DeliveryRoute, DeliveryError> {
            send(raw(pid)?, signal).map(|()| DeliveryRoute::Process)
        }
    }

    /// Name of the signal that terminated a process, if any.
    pub fn terminating_signal(status: &std::process::ExitStatus) -> Option<String> {
        use std::os::unix::process::ExitStatusExt;

        status.signal().map(|sig| {
            Signal::try_from(sig).map_or_else(|_| format!("signal {sig}"), |s| s.as_str().to_owned())
        })
    }
}

#[cfg(not(unix))]
mod imp {
    use std::process::{Command, Stdio};

    use super::{DeliveryError, DeliveryRoute, DirectPid, GroupThenPid, SignalTarget, StopSignal};

    // No console-interrupt primitive is reachable without attaching to the
    // child's console, so the graceful step is a single `taskkill` and the
    // forced step adds `/F`.
    fn taskkill(pid: u32, force: bool) -> Result<DeliveryRoute, DeliveryError> {
        let mut cmd = Command::new("taskkill");
        cmd.arg("/T").arg("/PID").arg(pid.to_string());
        if force {
            cmd.arg("/F");
        }
        let status = cmd
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|err| DeliveryError::Other(err.to_string()))?;
        if status.success() {
            Ok(DeliveryRoute::Process)
        } else {
            Err(DeliveryError::Other(format!("taskkill exited with {status}")))
        }
    }

    impl SignalTarget for DirectPid {
        fn deliver(&self, pid: u32, signal: StopSignal) -> Result<DeliveryRoute, DeliveryError> {
            match signal {
                StopSignal::Interrupt => Err(DeliveryError::Unsupported),
                StopSignal::Terminate => taskkill(pid, false),
                StopSignal::Kill => taskkill(pid, true),
            }
        }
    }

    impl SignalTarget for GroupThenPid {
        fn deliver(&self, pid: u32, signal: StopSignal) -> Result<DeliveryRoute, DeliveryError> {
            DirectPid.deliver(pid, signal)
        }
    }

    /// Windows exit statuses never carry a signal.
    pub fn terminating_signal(_status: &std::process::ExitStatus) -> Option<String> {
        None
    }
}

pub use imp::terminating_signal;
