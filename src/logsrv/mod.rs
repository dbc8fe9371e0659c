//! The log server protocol: message encoding, the client that streams a session to a
//! server, the server-side handlers that journal or store what a client sends, and the
//! relay that forwards journals to the next server.
use std::{fmt, io};

use crate::iolog;

mod buffer;
pub mod client;
pub mod handler;
pub mod journal;
pub mod proto;
pub mod relay;
pub mod store;
pub mod transport;

pub use buffer::{ConnectionBuffer, WriteQueue};
pub use client::{ClientClosure, ClientState, IoSource};
pub use handler::ClientMessageHandler;
pub use journal::{Journal, JournalReader};
pub use relay::Relay;
pub use store::LogStore;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    /// No answer from the server within the configured time.
    Timeout,
    /// A message that does not fit the protocol, or arrives in the wrong state.
    Protocol(String),
    TooLarge(usize),
    /// The server reported an error.
    Server(String),
    /// The server aborted the session.
    Aborted(String),
    Tls(String),
    Address(String),
    Journal(String),
    /// Every configured server refused or failed the connection.
    Unreachable,
    IoLog(iolog::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "{err}"),
            Error::Timeout => f.write_str("timeout waiting for the log server"),
            Error::Protocol(reason) => write!(f, "protocol error: {reason}"),
            Error::TooLarge(len) => write!(f, "client message too large: {len}"),
            Error::Server(reason) => write!(f, "error message received from server: {reason}"),
            Error::Aborted(reason) => write!(f, "abort message received from server: {reason}"),
            Error::Tls(reason) => write!(f, "TLS error: {reason}"),
            Error::Address(entry) => write!(f, "invalid log server address: {entry}"),
            Error::Journal(reason) => write!(f, "{reason}"),
            Error::Unreachable => f.write_str("unable to connect to log server"),
            Error::IoLog(err) => write!(f, "{err}"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::TimedOut {
            Error::Timeout
        } else {
            Error::Io(err)
        }
    }
}

impl From<iolog::Error> for Error {
    fn from(err: iolog::Error) -> Self {
        Error::IoLog(err)
    }
}
