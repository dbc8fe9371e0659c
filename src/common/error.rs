use crate::{iolog, logsrv, system::Hostname};
use std::{borrow::Cow, fmt, path::PathBuf};

#[derive(Debug)]
pub enum Error {
    Silent,
    NotAllowed {
        username: String,
        command: Cow<'static, str>,
        hostname: Hostname,
        other_user: Option<String>,
    },
    UserNotFound(String),
    GroupNotFound(String),
    Configuration(String),
    Options(String),
    IoLog(iolog::Error),
    LogServer(logsrv::Error),
    Io(Option<PathBuf>, std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Silent => Ok(()),
            Error::NotAllowed {
                username,
                command,
                hostname,
                other_user,
            } => {
                if let Some(other_user) = other_user {
                    write!(
                        f,
                        "Sorry, user {username} is not allowed to execute '{command}' as {other_user} on {hostname}.",
                    )
                } else {
                    write!(
                        f,
                        "Sorry, user {username} may not run {command} on {hostname}.",
                    )
                }
            }
            Error::UserNotFound(u) => write!(f, "user '{u}' not found"),
            Error::GroupNotFound(g) => write!(f, "group '{g}' not found"),
            Error::Configuration(e) => write!(f, "invalid configuration: {e}"),
            Error::Options(e) => write!(f, "{e}"),
            Error::IoLog(e) => write!(f, "I/O log error: {e}"),
            Error::LogServer(e) => write!(f, "log server error: {e}"),
            Error::Io(location, e) => {
                if let Some(path) = location {
                    write!(f, "{}: {e}", path.display())
                } else {
                    write!(f, "IO error: {e}")
                }
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(None, err)
    }
}

impl From<iolog::Error> for Error {
    fn from(err: iolog::Error) -> Self {
        Error::IoLog(err)
    }
}

impl From<logsrv::Error> for Error {
    fn from(err: logsrv::Error) -> Self {
        Error::LogServer(err)
    }
}

impl Error {
    /// Returns `true` if the error is [`Silent`].
    ///
    /// [`Silent`]: Error::Silent
    #[must_use]
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::Silent)
    }
}
