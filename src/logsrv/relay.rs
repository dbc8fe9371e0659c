//! Forwarding completed journals to the next log server.
//!
//! Each journal in `<relay_dir>/outgoing` is replayed as one client session. A journal is
//! removed once the upstream server has committed all of it; otherwise it stays where it
//! is and is tried again on the next pass.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::client::{ClientClosure, ClientConfig, IoSource};
use super::journal::{JournalReader, OUTGOING};
use super::proto::ClientMessage;
use super::transport::{ServerAddress, Stream, TlsConfig, Transport};
use super::Error;
use crate::log::{dev_debug, dev_info, dev_warn, user_warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The messages that follow the session start in a journal.
struct JournalSource {
    reader: JournalReader,
}

impl IoSource for JournalSource {
    fn next_message(&mut self) -> Result<Option<ClientMessage>, Error> {
        Ok(self.reader.read_message()?.map(|(message, _)| message))
    }
}

pub struct Relay {
    relay_dir: PathBuf,
    servers: Vec<ServerAddress>,
    tls: TlsConfig,
    timeout: Option<Duration>,
    keepalive: bool,
}

impl Relay {
    pub fn new(relay_dir: impl Into<PathBuf>, servers: Vec<ServerAddress>) -> Self {
        Relay {
            relay_dir: relay_dir.into(),
            servers,
            tls: TlsConfig::default(),
            timeout: Some(Duration::from_secs(30)),
            keepalive: true,
        }
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Completed journals waiting to be forwarded, oldest name first.
    pub fn pending(&self) -> Result<Vec<PathBuf>, Error> {
        let outgoing = self.relay_dir.join(OUTGOING);
        let entries = match fs::read_dir(&outgoing) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(Error::Journal(format!(
                    "unable to read {}: {err}",
                    outgoing.display()
                )))
            }
        };

        let mut journals = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                journals.push(entry.path());
            }
        }
        journals.sort();
        Ok(journals)
    }

    /// Forward every pending journal; returns how many were delivered.
    pub fn forward_outgoing(&self) -> Result<usize, Error> {
        let mut delivered = 0;
        for path in self.pending()? {
            match self.forward_journal(&path) {
                Ok(()) => delivered += 1,
                Err(err) => user_warn!("unable to relay {}: {err}", path.display()),
            }
        }
        Ok(delivered)
    }

    /// Send one journal upstream and remove it once it has been committed.
    pub fn forward_journal(&self, path: &Path) -> Result<(), Error> {
        // another relay may be sending this journal right now
        let reader = JournalReader::open_locked(path)?;

        for address in &self.servers {
            match Transport::open(address, &self.tls, self.timeout, self.keepalive) {
                Ok(transport) => {
                    dev_info!("relaying {} to {address}", path.display());
                    self.send_journal(reader, transport)?;
                    fs::remove_file(path).map_err(|err| {
                        Error::Journal(format!("unable to remove {}: {err}", path.display()))
                    })?;
                    return Ok(());
                }
                Err(err) => dev_warn!("unable to connect to {address}: {err}"),
            }
        }
        Err(Error::Unreachable)
    }

    fn session_config(&self, first: ClientMessage) -> Result<ClientConfig, Error> {
        let config = ClientConfig {
            client_id: Some(format!("relay {VERSION}")),
            timeout: self.timeout,
            ..Default::default()
        };
        match first {
            ClientMessage::Accept(accept) => Ok(ClientConfig {
                submit_time: accept.submit_time,
                info: accept.info_msgs,
                accept_only: !accept.expect_iobufs,
                ..config
            }),
            ClientMessage::Reject(reject) => Ok(ClientConfig {
                submit_time: reject.submit_time,
                info: reject.info_msgs,
                reject: Some(reject.reason),
                ..config
            }),
            other => Err(Error::Journal(format!(
                "journal starts with {}",
                other.name()
            ))),
        }
    }

    /// Replay the session in `reader` over `stream` until the server has committed it.
    pub fn send_journal<S: Stream>(&self, mut reader: JournalReader, stream: S) -> Result<(), Error> {
        let Some((first, _)) = reader.read_message()? else {
            return Err(Error::Journal("empty journal".to_string()));
        };
        let config = self.session_config(first)?;

        let mut source = JournalSource { reader };
        let mut client = ClientClosure::connect(stream, config, &mut source)?;
        client.run(&mut source)?;
        dev_debug!("relayed session committed at {}", client.committed());
        client.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logsrv::handler::{dispatch, serve};
    use crate::logsrv::journal::Journal;
    use crate::logsrv::proto::{AcceptMessage, ExitMessage, InfoMessage, IoBuffer, RejectMessage};
    use crate::system::file::FileLock;
    use crate::system::time::TimeSpec;
    use pretty_assertions::assert_eq;
    use std::fs::File;
    use std::net::TcpListener;
    use std::thread;

    fn accept() -> ClientMessage {
        ClientMessage::Accept(AcceptMessage {
            submit_time: TimeSpec::new(1_700_000_000, 0),
            info_msgs: vec![InfoMessage::string("command", "/usr/bin/id")],
            expect_iobufs: true,
        })
    }

    fn output(secs: i64, data: &[u8]) -> ClientMessage {
        ClientMessage::TtyOut(IoBuffer {
            delay: TimeSpec::new(secs, 0),
            data: data.to_vec(),
        })
    }

    fn exit() -> ClientMessage {
        ClientMessage::Exit(ExitMessage {
            run_time: TimeSpec::new(3, 0),
            exit_value: 1,
            ..Default::default()
        })
    }

    /// Journal `messages` in `relay_dir` as one completed session.
    fn journal(relay_dir: &Path, messages: &[ClientMessage]) -> PathBuf {
        let mut journal = Journal::new(relay_dir);
        for message in messages {
            dispatch(&mut journal, message, &message.encode()).unwrap();
        }
        journal.finished_path().unwrap().to_path_buf()
    }

    /// Accept one connection and journal it in `relay_dir`.
    fn upstream(relay_dir: &Path) -> (u16, thread::JoinHandle<Vec<ClientMessage>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let relay_dir = relay_dir.to_path_buf();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut journal = Journal::new(&relay_dir);
            serve(&mut stream, &mut journal, "upstream").unwrap();
            let path = journal.finished_path().unwrap();
            JournalReader::open(path)
                .unwrap()
                .map(|message| message.unwrap())
                .collect()
        });
        (port, handle)
    }

    fn local(port: u16) -> Vec<ServerAddress> {
        vec![ServerAddress::new("127.0.0.1", port, false)]
    }

    #[test]
    fn journals_are_forwarded_and_removed() {
        let here = tempfile::tempdir().unwrap();
        let there = tempfile::tempdir().unwrap();
        let messages = [accept(), output(1, b"uid=0"), output(2, b"(root)"), exit()];
        let path = journal(here.path(), &messages);

        let (port, server) = upstream(there.path());
        let relay = Relay::new(here.path(), local(port));
        assert_eq!(relay.pending().unwrap(), [path.clone()]);
        assert_eq!(relay.forward_outgoing().unwrap(), 1);

        assert!(!path.exists());
        assert!(relay.pending().unwrap().is_empty());
        assert_eq!(server.join().unwrap(), messages);
    }

    #[test]
    fn rejected_sessions_are_forwarded() {
        let here = tempfile::tempdir().unwrap();
        let there = tempfile::tempdir().unwrap();
        let reject = ClientMessage::Reject(RejectMessage {
            submit_time: TimeSpec::new(1_700_000_000, 0),
            reason: "command not allowed".to_string(),
            info_msgs: vec![InfoMessage::string("command", "/bin/sh")],
        });
        let path = journal(here.path(), &[reject.clone()]);

        let (port, server) = upstream(there.path());
        Relay::new(here.path(), local(port))
            .forward_journal(&path)
            .unwrap();
        assert!(!path.exists());
        assert_eq!(server.join().unwrap(), [reject]);
    }

    #[test]
    fn undelivered_journals_stay_queued() {
        let here = tempfile::tempdir().unwrap();
        let path = journal(here.path(), &[accept(), output(1, b"x"), exit()]);

        // nothing listens on a port that was just released
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let relay = Relay::new(here.path(), local(port)).with_timeout(Some(Duration::from_secs(1)));
        assert_eq!(relay.forward_outgoing().unwrap(), 0);
        assert!(path.exists());
        assert!(matches!(relay.forward_journal(&path), Err(Error::Unreachable)));
    }

    #[test]
    fn busy_journals_are_skipped() {
        let here = tempfile::tempdir().unwrap();
        let path = journal(here.path(), &[accept(), exit()]);

        let file = File::open(&path).unwrap();
        let _lock = FileLock::exclusive(&file, true).unwrap();
        let relay = Relay::new(here.path(), Vec::new());
        assert!(matches!(relay.forward_journal(&path), Err(Error::Journal(_))));
        assert!(path.exists());
    }

    #[test]
    fn sessions_must_start_with_accept_or_reject() {
        let relay = Relay::new("/nonexistent", Vec::new());
        assert!(relay.pending().unwrap().is_empty());
        assert!(matches!(
            relay.session_config(output(1, b"x")),
            Err(Error::Journal(reason)) if reason == "journal starts with TtyOutBuf"
        ));

        let ClientMessage::Accept(mut only) = accept() else {
            unreachable!()
        };
        only.expect_iobufs = false;
        let config = relay.session_config(ClientMessage::Accept(only)).unwrap();
        assert!(config.accept_only);
        assert_eq!(config.info, [InfoMessage::string("command", "/usr/bin/id")]);
        assert_eq!(config.client_id.as_deref(), Some(concat!("relay ", env!("CARGO_PKG_VERSION"))));
    }
}
