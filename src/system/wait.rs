use libc::{c_int, WCOREDUMP, WEXITSTATUS, WIFEXITED, WIFSIGNALED, WIFSTOPPED, WSTOPSIG, WTERMSIG};

use crate::system::signal::{signal_name, SignalNumber};

/// The status of a waited child, as returned by `waitpid(2)`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct WaitStatus {
    status: c_int,
}

impl std::fmt::Debug for WaitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(exit_status) = self.exit_status() {
            write!(f, "ExitStatus({exit_status})")
        } else if let Some(signal) = self.term_signal() {
            write!(f, "TermSignal({})", signal_name(signal).unwrap_or("?"))
        } else if let Some(signal) = self.stop_signal() {
            write!(f, "StopSignal({})", signal_name(signal).unwrap_or("?"))
        } else {
            write!(f, "Unknown")
        }
    }
}

impl WaitStatus {
    pub const fn from_raw(status: c_int) -> Self {
        Self { status }
    }

    /// A status equivalent to the child calling `exit(code)`.
    pub const fn exited(code: u8) -> Self {
        Self {
            status: (code as c_int) << 8,
        }
    }

    /// A status equivalent to the child being killed by `signal`.
    pub const fn signaled(signal: SignalNumber, core_dumped: bool) -> Self {
        Self {
            status: (signal & 0x7f) | if core_dumped { 0x80 } else { 0 },
        }
    }

    pub const fn raw(&self) -> c_int {
        self.status
    }

    /// Return `true` if the child terminated normally, i.e., by calling `exit`.
    pub const fn did_exit(&self) -> bool {
        WIFEXITED(self.status)
    }

    /// Return the exit status of the child if the child terminated normally.
    pub const fn exit_status(&self) -> Option<c_int> {
        if self.did_exit() {
            Some(WEXITSTATUS(self.status))
        } else {
            None
        }
    }

    /// Return `true` if the child process was terminated by a signal.
    pub const fn was_signaled(&self) -> bool {
        WIFSIGNALED(self.status)
    }

    /// Return the signal number which caused the child to terminate if the child was terminated by
    /// a signal.
    pub const fn term_signal(&self) -> Option<SignalNumber> {
        if self.was_signaled() {
            Some(WTERMSIG(self.status))
        } else {
            None
        }
    }

    /// Return `true` if the terminating signal produced a core dump.
    pub const fn core_dumped(&self) -> bool {
        self.was_signaled() && WCOREDUMP(self.status)
    }

    /// Return the signal number which caused the child to stop if the child was stopped by a
    /// signal.
    pub const fn stop_signal(&self) -> Option<SignalNumber> {
        if WIFSTOPPED(self.status) {
            Some(WSTOPSIG(self.status))
        } else {
            None
        }
    }
}
