use std::path::Path;
use std::time::Duration;

use crate::common::Error;
use crate::iolog::{IoEvent, IoLogFiles, Payload, TimingRecord};
use crate::log::{dev_info, user_error, user_warn};
use crate::logsrv::client::{ClientClosure, ClientConfig, IoSource, RestartPoint};
use crate::logsrv::proto::{
    info_messages, ChangeWindowSize, ClientMessage, CommandSuspend, ExitMessage, IoBuffer,
};
use crate::logsrv::transport::{
    ServerAddress, Stream, TlsConfig, Transport, DEFAULT_PORT, DEFAULT_PORT_TLS,
};
use crate::logsrv::Error as LogServerError;
use crate::system::poll::{PollEvent, PollSet};
use crate::system::signal::short_signal_name;

use self::cli::{SendlogAction, SendlogOptions};

mod cli;
mod help;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Limit on every wait for the server.
const TIMEOUT: Duration = Duration::from_secs(30);

/// Replays a recording: every timing record becomes one message, and the end of the
/// timing file becomes the exit message.
pub(crate) struct IoLogSource {
    files: IoLogFiles,
    exit_sent: bool,
}

impl IoLogSource {
    pub(crate) fn new(files: IoLogFiles) -> Self {
        IoLogSource {
            files,
            exit_sent: false,
        }
    }

    fn message(&mut self, record: &TimingRecord) -> Result<ClientMessage, LogServerError> {
        let delay = record.delay;
        let message = match record.payload {
            Payload::Bytes(_) => {
                let buffer = IoBuffer {
                    delay,
                    data: self.files.read_data(record)?,
                };
                match record.event {
                    IoEvent::TtyIn => ClientMessage::TtyIn(buffer),
                    IoEvent::TtyOut => ClientMessage::TtyOut(buffer),
                    IoEvent::Stdin => ClientMessage::Stdin(buffer),
                    IoEvent::Stdout => ClientMessage::Stdout(buffer),
                    IoEvent::Stderr => ClientMessage::Stderr(buffer),
                    event => {
                        return Err(LogServerError::Protocol(format!(
                            "unexpected I/O event {event:?}"
                        )))
                    }
                }
            }
            Payload::WinSize { lines, cols } => ClientMessage::WinSize(ChangeWindowSize {
                delay,
                rows: lines as i32,
                cols: cols as i32,
            }),
            Payload::Suspend(signal) => ClientMessage::Suspend(CommandSuspend {
                delay,
                signal: short_signal_name(signal),
            }),
        };
        Ok(message)
    }
}

impl IoSource for IoLogSource {
    fn next_message(&mut self) -> Result<Option<ClientMessage>, LogServerError> {
        if self.exit_sent {
            return Ok(None);
        }
        match self.files.read_record()? {
            Some(record) => self.message(&record).map(Some),
            None => {
                // a recording does not know how the command ended
                self.exit_sent = true;
                Ok(Some(ClientMessage::Exit(ExitMessage {
                    run_time: self.files.elapsed(),
                    ..Default::default()
                })))
            }
        }
    }
}

pub fn main() {
    crate::log::SudoLogger::new("sendlog: ").into_global_logger();

    let options = match SendlogOptions::from_env() {
        Ok(options) => options,
        Err(error) => {
            eprintln_ignore_io_error!("sendlog: {error}");
            eprintln_ignore_io_error!("{}", help::USAGE_MSG);
            std::process::exit(1);
        }
    };

    match options.action {
        SendlogAction::Help => {
            println_ignore_io_error!("{}", help::long_help_message());
        }
        SendlogAction::Version => {
            println_ignore_io_error!("sendlog version {VERSION}");
        }
        SendlogAction::Run => {
            if let Err(error) = sendlog_process(&options) {
                if !matches!(error, Error::Silent) {
                    eprintln_ignore_io_error!("sendlog: {error}");
                }
                std::process::exit(1);
            }
        }
    }
}

/// Everything one connection needs to send the recording in `dir`.
fn prepare_session(
    options: &SendlogOptions,
    dir: &Path,
) -> Result<(ClientConfig, IoLogSource), Error> {
    let mut files = IoLogFiles::open(dir)?;
    let evlog = files.info()?;

    let restart = match (&options.iolog_id, options.restart) {
        (Some(log_id), Some(resume_point)) => {
            files.seek_to(resume_point)?;
            Some(RestartPoint {
                log_id: log_id.clone(),
                resume_point,
            })
        }
        _ => None,
    };

    let config = ClientConfig {
        submit_time: evlog.submit_time,
        info: info_messages(&evlog),
        reject: options.reject.clone(),
        restart,
        accept_only: options.accept_only,
        client_id: Some(format!("sendlog {VERSION}")),
        timeout: Some(TIMEOUT),
    };
    Ok((config, IoLogSource::new(files)))
}

fn sendlog_process(options: &SendlogOptions) -> Result<(), Error> {
    let Some(dir) = &options.iolog_dir else {
        return Err(Error::Options("the I/O log directory is required".to_string()));
    };

    let tls = options.use_tls();
    let port = options
        .port
        .unwrap_or(if tls { DEFAULT_PORT_TLS } else { DEFAULT_PORT });
    let address = ServerAddress::new(&options.host, port, tls);
    let tls_config = TlsConfig {
        ca_bundle: options.ca_bundle.clone(),
        cert: options.cert.clone(),
        key: options.key.clone(),
        verify: options.verify,
    };

    let mut clients = Vec::with_capacity(options.tests);
    for _ in 0..options.tests {
        let (config, source) = prepare_session(options, dir)?;
        let transport = Transport::open(&address, &tls_config, Some(TIMEOUT), true)?;
        clients.push((ClientClosure::new(transport, config)?, source));
    }
    dev_info!("connected to {address}");

    run_clients(&mut clients, TIMEOUT)
}

/// Run all connections on one event loop until each of them has finished or failed.
fn run_clients<S: Stream>(
    clients: &mut [(ClientClosure<S>, IoLogSource)],
    timeout: Duration,
) -> Result<(), Error> {
    loop {
        let mut set = PollSet::new();
        for (index, (client, _)) in clients.iter().enumerate() {
            for event in client.interest() {
                set.add_fd((index, event), client.stream(), event);
            }
        }
        if set.is_empty() {
            break;
        }

        let ready = set.poll(Some(timeout))?;
        if ready.is_empty() {
            return Err(LogServerError::Timeout.into());
        }

        for (index, event) in ready {
            let (client, source) = &mut clients[index];
            // an earlier event of this round may have ended the connection
            if client.interest().is_empty() {
                continue;
            }
            let result = match event {
                PollEvent::Readable => client.on_readable(source),
                PollEvent::Writable => client.on_writable(source),
            };
            if let Err(err) = result {
                user_error!("connection {index}: {err}");
                client.close();
            }
        }
    }

    let mut failed = 0;
    for (index, (client, _)) in clients.iter_mut().enumerate() {
        if client.committed() != client.elapsed() {
            user_warn!(
                "connection {index}: commit point mismatch, expected {}, got {}",
                client.elapsed(),
                client.committed()
            );
        }
        if client.is_finished() {
            if let Some(log_id) = client.log_id() {
                dev_info!("connection {index}: remote log ID {log_id}");
            }
            client.close();
        } else {
            user_error!(
                "connection {index}: exited prematurely in state {:?}",
                client.state()
            );
            failed += 1;
        }
    }

    if failed > 0 {
        Err(Error::Silent)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventlog::{EventLogger, Eventlog, EventlogConfig, LogSink};
    use crate::iolog::IoLogWriter;
    use crate::logsrv::handler::serve;
    use crate::logsrv::journal::{Journal, JournalReader};
    use crate::logsrv::LogStore;
    use crate::system::time::TimeSpec;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::fs::{self, File};
    use std::io;
    use std::net::TcpListener;
    use std::path::PathBuf;
    use std::thread::{self, JoinHandle};

    #[derive(Default)]
    struct Sink {
        syslog: RefCell<Vec<String>>,
    }

    impl LogSink for &Sink {
        fn open_log(&self, path: &Path) -> io::Result<File> {
            File::create(path)
        }

        fn syslog(&self, _: libc::c_int, message: &str) {
            self.syslog.borrow_mut().push(message.to_string());
        }
    }

    fn record(dir: &Path) {
        let evlog = Eventlog {
            command: "/usr/bin/top".to_string(),
            argv: vec!["top".to_string()],
            runuser: "root".to_string(),
            submituser: "alice".to_string(),
            submithost: Some("client".to_string()),
            submit_time: TimeSpec::new(1_700_000_000, 0),
            lines: 24,
            columns: 80,
            ..Default::default()
        };
        let mut writer = IoLogWriter::create(dir, &evlog, false).unwrap();
        writer
            .write_io(IoEvent::TtyOut, TimeSpec::new(1, 0), b"top - 10:00")
            .unwrap();
        writer.write_winsize(TimeSpec::new(0, 500), 40, 120).unwrap();
        writer
            .write_io(IoEvent::TtyIn, TimeSpec::new(2, 0), b"q")
            .unwrap();
        writer.flush().unwrap();
    }

    fn options(port: u16, dir: &Path) -> SendlogOptions {
        SendlogOptions {
            host: "127.0.0.1".to_string(),
            port: Some(port),
            iolog_dir: Some(dir.to_path_buf()),
            ..Default::default()
        }
    }

    /// Serve one connection into a local store; returns what was sent to syslog.
    fn store_server(store_dir: &Path) -> (u16, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let store_dir = store_dir.to_path_buf();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let config = EventlogConfig::default();
            let sink = Sink::default();
            let mut store = LogStore::new(&store_dir, EventLogger::new(&config, &sink), true);
            serve(&mut stream, &mut store, "test").unwrap();
            drop(store);
            sink.syslog.into_inner()
        });
        (port, server)
    }

    #[test]
    fn recording_is_replayed_into_a_store() {
        let source = tempfile::tempdir().unwrap();
        let store = tempfile::tempdir().unwrap();
        record(source.path());

        let (port, server) = store_server(store.path());
        sendlog_process(&options(port, source.path())).unwrap();
        let syslog = server.join().unwrap();

        assert_eq!(syslog.len(), 1);
        assert!(syslog[0].contains("COMMAND=/usr/bin/top"));
        let stored = store.path().join("00/00/01");
        assert_eq!(
            fs::read_to_string(stored.join("timing")).unwrap(),
            fs::read_to_string(source.path().join("timing")).unwrap()
        );
        assert_eq!(fs::read(stored.join("ttyout")).unwrap(), b"top - 10:00");
        assert_eq!(fs::read(stored.join("ttyin")).unwrap(), b"q");
    }

    #[test]
    fn interrupted_transfer_is_restarted() {
        let source = tempfile::tempdir().unwrap();
        let store = tempfile::tempdir().unwrap();
        record(source.path());

        let (port, server) = store_server(store.path());
        sendlog_process(&options(port, source.path())).unwrap();
        server.join().unwrap();

        let (port, server) = store_server(store.path());
        let options = SendlogOptions {
            iolog_id: Some("00/00/01".to_string()),
            restart: Some(TimeSpec::new(1, 0)),
            ..options(port, source.path())
        };
        sendlog_process(&options).unwrap();
        server.join().unwrap();

        let stored = store.path().join("00/00/01");
        assert_eq!(
            fs::read_to_string(stored.join("timing")).unwrap(),
            fs::read_to_string(source.path().join("timing")).unwrap()
        );
        assert_eq!(fs::read(stored.join("ttyout")).unwrap(), b"top - 10:00");
        assert_eq!(fs::read(stored.join("ttyin")).unwrap(), b"q");
    }

    #[test]
    fn rejected_command_is_only_logged() {
        let source = tempfile::tempdir().unwrap();
        let store = tempfile::tempdir().unwrap();
        record(source.path());

        let (port, server) = store_server(store.path());
        let options = SendlogOptions {
            reject: Some("not allowed".to_string()),
            ..options(port, source.path())
        };
        sendlog_process(&options).unwrap();
        let syslog = server.join().unwrap();

        assert_eq!(syslog.len(), 1);
        assert!(syslog[0].contains("not allowed"));
        assert!(!store.path().join("00/00/01").exists());
    }

    #[test]
    fn parallel_connections_share_one_loop() {
        let source = tempfile::tempdir().unwrap();
        let relay = tempfile::tempdir().unwrap();
        record(source.path());

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let relay_dir = relay.path().to_path_buf();
        let server = thread::spawn(move || {
            let mut finished: Vec<PathBuf> = Vec::new();
            for _ in 0..3 {
                let (mut stream, _) = listener.accept().unwrap();
                let mut journal = Journal::new(&relay_dir);
                serve(&mut stream, &mut journal, "relay").unwrap();
                finished.extend(journal.finished_path().map(Path::to_path_buf));
            }
            finished
        });

        let options = SendlogOptions {
            tests: 3,
            ..options(port, source.path())
        };
        sendlog_process(&options).unwrap();
        let finished = server.join().unwrap();

        assert_eq!(finished.len(), 3);
        for path in finished {
            let names: Vec<&str> = JournalReader::open(&path)
                .unwrap()
                .map(|message| message.unwrap().name())
                .collect();
            assert_eq!(
                names,
                [
                    "AcceptMessage",
                    "TtyOutBuf",
                    "ChangeWindowSize",
                    "TtyInBuf",
                    "ExitMessage"
                ]
            );
        }
    }

    #[test]
    fn missing_server_is_an_error() {
        let source = tempfile::tempdir().unwrap();
        record(source.path());
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(sendlog_process(&options(port, source.path())).is_err());
    }

    #[test]
    fn replay_ends_with_the_exit_message() {
        let source = tempfile::tempdir().unwrap();
        record(source.path());
        let mut files = IoLogFiles::open(source.path()).unwrap();
        files.seek_to(TimeSpec::new(1, 500)).unwrap();

        let mut replay = IoLogSource::new(files);
        let mut messages = Vec::new();
        while let Some(message) = replay.next_message().unwrap() {
            messages.push(message);
        }
        assert_eq!(
            messages,
            [
                ClientMessage::TtyIn(IoBuffer {
                    delay: TimeSpec::new(2, 0),
                    data: b"q".to_vec(),
                }),
                ClientMessage::Exit(ExitMessage {
                    run_time: TimeSpec::new(3, 500),
                    ..Default::default()
                }),
            ]
        );
    }
}
