//! Signal numbers and their names.
use libc::c_int;

pub type SignalNumber = c_int;

macro_rules! define_consts {
    ($($signal:ident,)*) => {
        pub mod consts {
            pub use libc::{$($signal,)*};
        }

        /// The name of a signal, including its `SIG` prefix.
        pub fn signal_name(signal: SignalNumber) -> Option<&'static str> {
            match signal {
                $(consts::$signal => Some(stringify!($signal)),)*
                _ => None,
            }
        }

        /// The number of a signal given its name, with or without the `SIG` prefix.
        pub fn signal_number(name: &str) -> Option<SignalNumber> {
            let name = name.strip_prefix("SIG").unwrap_or(name);
            match name {
                $(_ if &stringify!($signal)[3..] == name => Some(consts::$signal),)*
                _ => None,
            }
        }
    };
}

define_consts! {
    SIGHUP,
    SIGINT,
    SIGQUIT,
    SIGILL,
    SIGTRAP,
    SIGABRT,
    SIGBUS,
    SIGFPE,
    SIGKILL,
    SIGUSR1,
    SIGSEGV,
    SIGUSR2,
    SIGPIPE,
    SIGALRM,
    SIGTERM,
    SIGCHLD,
    SIGCONT,
    SIGSTOP,
    SIGTSTP,
    SIGTTIN,
    SIGTTOU,
    SIGURG,
    SIGXCPU,
    SIGXFSZ,
    SIGVTALRM,
    SIGPROF,
    SIGWINCH,
    SIGIO,
    SIGSYS,
}

/// The signal name as written to I/O logs and sent to log servers: without the `SIG`
/// prefix, or the decimal number for signals without a name.
pub fn short_signal_name(signal: SignalNumber) -> String {
    match signal_name(signal) {
        Some(name) => name[3..].to_string(),
        None => signal.to_string(),
    }
}
