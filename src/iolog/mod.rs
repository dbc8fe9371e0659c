//! Session recordings: the timing file and data streams on disk, the session info files, and
//! the session object that sends recorded I/O to a local directory or to a log server.
use std::{fmt, io, path::PathBuf, time::Duration};

use crate::logsrv::transport::{ServerAddress, TlsConfig};
use crate::sudoers::Settings;
use crate::system::time::TimeSpec;

mod files;
mod info;
mod session;
pub mod timing;
mod writer;

pub use files::IoLogFiles;
pub use info::{read_info, write_info};
pub use session::{IoLogBackend, IoLogSession};
pub use timing::{Payload, TimingReader, TimingRecord};
pub use writer::{expand_path, next_sequence, IoLogWriter, PathEscapes};

#[derive(Debug)]
pub enum Error {
    Io(Option<PathBuf>, io::Error),
    /// A line of the timing file that could not be parsed.
    InvalidTiming(String),
    /// The legacy `log` file is malformed.
    InvalidLogInfo(String),
    /// A required member of the session info is absent.
    MissingField(&'static str),
    /// The elapsed time is not reachable exactly by a prefix of the timing records.
    NotFound(TimeSpec),
    Corrupt(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(Some(path), err) => write!(f, "{}: {err}", path.display()),
            Error::Io(None, err) => write!(f, "{err}"),
            Error::InvalidTiming(line) => write!(f, "invalid timing file line: {line}"),
            Error::InvalidLogInfo(reason) => write!(f, "invalid log file: {reason}"),
            Error::MissingField(name) => write!(f, "missing {name} in session info"),
            Error::NotFound(target) => write!(f, "unable to find resume point [{target}]"),
            Error::Corrupt(reason) => write!(f, "corrupt I/O log: {reason}"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(None, err)
    }
}

pub(crate) trait WithPath<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T, Error>;
}

impl<T> WithPath<T> for io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T, Error> {
        self.map_err(|err| Error::Io(Some(path.into()), err))
    }
}

/// The kinds of records in a timing file, by their on-disk code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IoEvent {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
    TtyIn = 3,
    TtyOut = 4,
    WinSize = 5,
    Suspend = 7,
}

impl IoEvent {
    /// Written by a historical release for terminal output; every code that follows it in
    /// the same file is two too high.
    pub const LEGACY_TTYOUT: i64 = 6;
    pub const COUNT: i64 = 8;

    /// The events that carry data, in the order of their stream files.
    pub const STREAMS: [IoEvent; 5] = [
        IoEvent::Stdin,
        IoEvent::Stdout,
        IoEvent::Stderr,
        IoEvent::TtyIn,
        IoEvent::TtyOut,
    ];

    pub fn from_code(code: i64) -> Option<IoEvent> {
        Some(match code {
            0 => IoEvent::Stdin,
            1 => IoEvent::Stdout,
            2 => IoEvent::Stderr,
            3 => IoEvent::TtyIn,
            4 => IoEvent::TtyOut,
            5 => IoEvent::WinSize,
            7 => IoEvent::Suspend,
            _ => return None,
        })
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    /// Name of the file in the session directory holding this stream's data.
    pub fn stream_name(self) -> Option<&'static str> {
        match self {
            IoEvent::Stdin => Some("stdin"),
            IoEvent::Stdout => Some("stdout"),
            IoEvent::Stderr => Some("stderr"),
            IoEvent::TtyIn => Some("ttyin"),
            IoEvent::TtyOut => Some("ttyout"),
            IoEvent::WinSize | IoEvent::Suspend => None,
        }
    }

    pub(crate) fn stream_index(self) -> Option<usize> {
        IoEvent::STREAMS.iter().position(|&stream| stream == self)
    }

    pub fn is_input(self) -> bool {
        matches!(self, IoEvent::Stdin | IoEvent::TtyIn)
    }
}

/// How sessions are recorded, derived from the effective policy settings.
#[derive(Debug, Clone)]
pub struct IoLogConfig {
    pub log_input: bool,
    pub log_output: bool,
    pub iolog_dir: PathBuf,
    pub iolog_file: String,
    pub iolog_flush: bool,
    pub ignore_iolog_errors: bool,
    pub log_servers: Vec<ServerAddress>,
    pub server_timeout: Option<Duration>,
    pub keepalive: bool,
    pub tls: TlsConfig,
}

impl IoLogConfig {
    /// Unparsable entries in `log_servers` are reported and skipped.
    pub fn from_settings(settings: &Settings) -> Self {
        let log_servers = settings
            .log_servers
            .iter()
            .filter_map(|entry| match entry.parse() {
                Ok(address) => Some(address),
                Err(err) => {
                    crate::log::user_warn!("ignoring log server {entry}: {err}");
                    None
                }
            })
            .collect();

        IoLogConfig {
            log_input: settings.log_input,
            log_output: settings.log_output,
            iolog_dir: PathBuf::from(
                settings
                    .iolog_dir
                    .as_deref()
                    .unwrap_or(env!("PATH_IOLOG_DIR")),
            ),
            iolog_file: settings
                .iolog_file
                .clone()
                .unwrap_or_else(|| "%{seq}".to_string()),
            iolog_flush: settings.iolog_flush,
            ignore_iolog_errors: settings.ignore_iolog_errors,
            log_servers,
            server_timeout: u64::try_from(settings.log_server_timeout)
                .ok()
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs),
            keepalive: settings.log_server_keepalive,
            tls: TlsConfig {
                ca_bundle: settings.log_server_cabundle.as_ref().map(PathBuf::from),
                cert: settings.log_server_peer_cert.as_ref().map(PathBuf::from),
                key: settings.log_server_peer_key.as_ref().map(PathBuf::from),
                verify: settings.log_server_verify,
            },
        }
    }

    /// Whether events of this kind are recorded at all.
    pub fn records(&self, event: IoEvent) -> bool {
        match event {
            IoEvent::Stdin | IoEvent::TtyIn => self.log_input,
            IoEvent::Stdout | IoEvent::Stderr | IoEvent::TtyOut => self.log_output,
            IoEvent::WinSize | IoEvent::Suspend => self.log_input || self.log_output,
        }
    }
}
